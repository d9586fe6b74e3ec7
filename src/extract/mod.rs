pub mod listing;
pub mod state;

use serde_json::Value;
use tracing::{debug, warn};

use crate::db::ListingRow;
pub use listing::{map_listing, ItemError};
pub use state::{parse_state, PageError};

/// Lazy one-pass stream of listing records from one fetched page body.
///
/// Both failure scopes are absorbed here: a page without a usable state
/// blob streams nothing, a listing that fails mapping is skipped and its
/// siblings still come out, in source array order. Callers that need the
/// failure reasons use `process_page` (or the typed layers directly).
pub fn extract(body: &str) -> Records {
    let listings = match state::parse_state(body) {
        Ok(listings) => listings,
        Err(e) => {
            debug!("page yields no records: {e}");
            Vec::new()
        }
    };
    Records {
        listings: listings.into_iter(),
    }
}

pub struct Records {
    listings: std::vec::IntoIter<Value>,
}

impl Iterator for Records {
    type Item = ListingRow;

    fn next(&mut self) -> Option<ListingRow> {
        loop {
            let value = self.listings.next()?;
            match listing::map_listing(&value) {
                Ok(row) => return Some(row),
                Err(e) => debug!("listing skipped: {e}"),
            }
        }
    }
}

/// Extraction result for one page, with both failure scopes counted so the
/// process pipeline can report them instead of losing records silently.
pub struct PageOutcome {
    pub rows: Vec<ListingRow>,
    pub page_error: Option<PageError>,
    pub skipped: usize,
}

pub fn process_page(url: &str, body: &str) -> PageOutcome {
    let listings = match state::parse_state(body) {
        Ok(listings) => listings,
        Err(e) => {
            warn!("{url}: {e}");
            return PageOutcome {
                rows: Vec::new(),
                page_error: Some(e),
                skipped: 0,
            };
        }
    };

    let mut rows = Vec::with_capacity(listings.len());
    let mut skipped = 0;
    for value in &listings {
        match listing::map_listing(value) {
            Ok(row) => rows.push(row),
            Err(e) => {
                warn!("{url}: listing skipped: {e}");
                skipped += 1;
            }
        }
    }

    PageOutcome {
        rows,
        page_error: None,
        skipped,
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> String {
        std::fs::read_to_string("tests/fixtures/search_results.html").unwrap()
    }

    #[test]
    fn fixture_page_yields_records_in_source_order() {
        // The fixture carries three listings; the middle one has no
        // coordinates and must be the only one dropped.
        let rows: Vec<ListingRow> = extract(&fixture()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, 180462311);
        assert_eq!(rows[1].id, 180462313);
    }

    #[test]
    fn fixture_fields_survive_the_escaped_blob() {
        let rows: Vec<ListingRow> = extract(&fixture()).collect();
        let first = &rows[0];
        assert_eq!(first.rooms, Some(3));
        assert_eq!(first.surface, Some(90.0));
        assert_eq!(
            first.multimedia,
            "https://static.fotocasa.es/images/ads/180462311-1.jpg|https://static.fotocasa.es/images/ads/180462311-2.jpg|"
        );
        // Embedded "\n" and ";" in the blob's description are neutralized
        assert_eq!(first.description, "Piso luminoso,cerca del centro");

        let second = &rows[1];
        assert_eq!(second.timestamp, 0);
        assert_eq!(second.multimedia, "");
        assert_eq!(second.baths, None);
    }

    #[test]
    fn extraction_is_idempotent() {
        let body = fixture();
        let first: Vec<ListingRow> = extract(&body).collect();
        let second: Vec<ListingRow> = extract(&body).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn page_without_marker_streams_nothing() {
        let body = "<html><body><script>var app = {};</script></body></html>";
        assert_eq!(extract(body).count(), 0);
    }

    #[test]
    fn garbage_body_streams_nothing() {
        assert_eq!(extract("not html at all").count(), 0);
        assert_eq!(extract("").count(), 0);
    }

    #[test]
    fn process_page_counts_both_failure_scopes() {
        let outcome = process_page("https://example.test/l", &fixture());
        assert!(outcome.page_error.is_none());
        assert_eq!(outcome.rows.len(), 2);
        assert_eq!(outcome.skipped, 1);

        let bad = process_page("https://example.test/l", "<html><body></body></html>");
        assert!(matches!(bad.page_error, Some(PageError::ScriptMissing)));
        assert!(bad.rows.is_empty());
    }
}
