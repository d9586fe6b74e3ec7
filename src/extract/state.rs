use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};
use serde_json::Value;
use thiserror::Error;

// The assignment the site inlines for client-side hydration. The anchor
// string and the `\"` unescape below are the actual contract with the
// source markup; keep them byte-exact.
static STATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"window\.__INITIAL_PROPS__ = JSON\.parse\("(.+?)"\);"#).unwrap()
});

/// Page-scope extraction failure: the whole page yields no records.
#[derive(Debug, Error)]
pub enum PageError {
    #[error("no inline script in page body")]
    ScriptMissing,
    #[error("state marker not found in first body script")]
    MarkerMissing,
    #[error("embedded state is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("`{0}` missing from embedded state")]
    PathMissing(&'static str),
}

/// Locate the embedded state blob in a fetched page body and return the
/// listings array from `initialSearch.result.realEstates`.
pub fn parse_state(body: &str) -> Result<Vec<Value>, PageError> {
    let script = first_body_script(body).ok_or(PageError::ScriptMissing)?;
    let caps = STATE_RE.captures(&script).ok_or(PageError::MarkerMissing)?;
    let unescaped = caps[1].replace("\\\"", "\"");
    let state: Value = serde_json::from_str(&unescaped)?;

    let listings = state
        .get("initialSearch")
        .ok_or(PageError::PathMissing("initialSearch"))?
        .get("result")
        .ok_or(PageError::PathMissing("initialSearch.result"))?
        .get("realEstates")
        .and_then(Value::as_array)
        .ok_or(PageError::PathMissing("initialSearch.result.realEstates"))?;

    Ok(listings.clone())
}

/// Text of the first `script` child of `body`, if any. The surrounding
/// markup is irrelevant; only this one structural position is searched.
fn first_body_script(body: &str) -> Option<String> {
    let document = Html::parse_document(body);
    let selector = Selector::parse("body > script").unwrap();
    let text = document.select(&selector).next()?.inner_html();
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}
