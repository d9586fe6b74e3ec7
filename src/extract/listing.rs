use serde_json::Value;
use thiserror::Error;

use crate::db::ListingRow;

/// Item-scope mapping failure: the one listing is dropped, siblings on the
/// same page are unaffected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ItemError {
    #[error("listing field `{0}` is missing")]
    Missing(&'static str),
    #[error("listing field `{0}` has an unexpected type")]
    Type(&'static str),
}

/// Map one entry of the embedded listings array to a flat record.
pub fn map_listing(listing: &Value) -> Result<ListingRow, ItemError> {
    let coordinates = req(listing, "coordinates")?;
    let date = req(listing, "date")?;
    let detail = req(listing, "detail")?;

    let latitude = coordinates
        .get("latitude")
        .and_then(Value::as_f64)
        .ok_or(ItemError::Missing("coordinates.latitude"))?;
    let longitude = coordinates
        .get("longitude")
        .and_then(Value::as_f64)
        .ok_or(ItemError::Missing("coordinates.longitude"))?;

    // Publication date may lack the epoch field entirely
    let timestamp = date.get("timestamp").and_then(Value::as_i64).unwrap_or(0);

    let url = detail
        .get("es-ES")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or(ItemError::Missing("detail.es-ES"))?;

    let mut rooms = None;
    let mut baths = None;
    let mut surface = None;
    let features = req(listing, "features")?
        .as_array()
        .ok_or(ItemError::Type("features"))?;
    for feature in features {
        match feature.get("key").and_then(Value::as_str) {
            Some("rooms") => rooms = int_value(feature.get("value")),
            Some("bathrooms") => baths = int_value(feature.get("value")),
            Some("surface") => surface = float_value(feature.get("value")),
            _ => {}
        }
    }

    let media = req(listing, "multimedia")?
        .as_array()
        .ok_or(ItemError::Type("multimedia"))?;
    let mut multimedia = String::new();
    for entry in media {
        let src = entry
            .get("src")
            .and_then(Value::as_str)
            .ok_or(ItemError::Missing("multimedia.src"))?;
        multimedia.push_str(src);
        multimedia.push('|');
    }

    Ok(ListingRow {
        id: int_field(listing, "id")?,
        building_type: str_field(listing, "buildingType")?,
        building_subtype: str_field(listing, "buildingSubtype")?,
        client_id: int_field(listing, "clientId")?,
        client_url: str_field(listing, "clientUrl")?,
        latitude,
        longitude,
        timestamp,
        description: sanitize(&str_field(listing, "description")?),
        url,
        rooms,
        baths,
        surface,
        is_new: bool_field(listing, "isNew")?,
        is_new_construction: bool_field(listing, "isNewConstruction")?,
        location: str_field(listing, "location")?,
        phone: str_field(listing, "phone")?,
        price: str_field(listing, "price")?,
        price_raw: float_field(listing, "rawPrice")?,
        multimedia,
    })
}

/// Strip line breaks and neutralize the output delimiter so the text is
/// safe for one CSV cell.
fn sanitize(description: &str) -> String {
    description.replace(['\r', '\n'], "").replace(';', ",")
}

fn req<'a>(listing: &'a Value, key: &'static str) -> Result<&'a Value, ItemError> {
    match listing.get(key) {
        None | Some(Value::Null) => Err(ItemError::Missing(key)),
        Some(value) => Ok(value),
    }
}

fn str_field(listing: &Value, key: &'static str) -> Result<String, ItemError> {
    req(listing, key)?
        .as_str()
        .map(str::to_string)
        .ok_or(ItemError::Type(key))
}

fn int_field(listing: &Value, key: &'static str) -> Result<i64, ItemError> {
    req(listing, key)?.as_i64().ok_or(ItemError::Type(key))
}

fn float_field(listing: &Value, key: &'static str) -> Result<f64, ItemError> {
    req(listing, key)?.as_f64().ok_or(ItemError::Type(key))
}

fn bool_field(listing: &Value, key: &'static str) -> Result<bool, ItemError> {
    req(listing, key)?.as_bool().ok_or(ItemError::Type(key))
}

// Feature values arrive as numbers on most pages and as digit strings on
// some older ones; anything else leaves the field unset.

fn int_value(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn float_value(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
