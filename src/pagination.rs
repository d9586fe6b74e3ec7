use reqwest::Url;
use scraper::{Html, Selector};

const ALLOWED_DOMAIN: &str = "www.fotocasa.es";

// The site's pagination control items (prev/next arrows and page jumps);
// ordinary result links are deliberately not followed.
const PAGINATION_SELECTOR: &str = "li.sui-PaginationBasic-item--control a[href]";

/// Collect pagination links from a fetched body, resolved against the page
/// URL and restricted to the crawl domain. Pure function, no I/O; the
/// caller feeds the result back into the URL queue.
pub fn discover_links(body: &str, page_url: &str) -> Vec<String> {
    let Ok(base) = Url::parse(page_url) else {
        return Vec::new();
    };
    let document = Html::parse_document(body);
    let selector = Selector::parse(PAGINATION_SELECTOR).unwrap();

    let mut links = Vec::new();
    for anchor in document.select(&selector) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let Ok(mut url) = base.join(href) else {
            continue;
        };
        if url.domain() != Some(ALLOWED_DOMAIN) {
            continue;
        }
        url.set_fragment(None);
        links.push(url.to_string());
    }
    links.sort();
    links.dedup();
    links
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE_URL: &str = "https://www.fotocasa.es/es/comprar/viviendas/espana/todas-las-zonas/l/2";

    fn pagination_html() -> &'static str {
        r#"<html><body>
        <ul class="sui-PaginationBasic">
          <li class="sui-PaginationBasic-item sui-PaginationBasic-item--control">
            <a href="/es/comprar/viviendas/espana/todas-las-zonas/l/1">&laquo;</a>
          </li>
          <li class="sui-PaginationBasic-item">
            <a href="/es/comprar/viviendas/espana/todas-las-zonas/l/7">7</a>
          </li>
          <li class="sui-PaginationBasic-item sui-PaginationBasic-item--control">
            <a href="/es/comprar/viviendas/espana/todas-las-zonas/l/3#list">&raquo;</a>
          </li>
          <li class="sui-PaginationBasic-item sui-PaginationBasic-item--control">
            <a href="https://ads.example.com/click">ad</a>
          </li>
        </ul>
        </body></html>"#
    }

    #[test]
    fn resolves_control_links_only() {
        let links = discover_links(pagination_html(), PAGE_URL);
        assert_eq!(
            links,
            vec![
                "https://www.fotocasa.es/es/comprar/viviendas/espana/todas-las-zonas/l/1".to_string(),
                "https://www.fotocasa.es/es/comprar/viviendas/espana/todas-las-zonas/l/3".to_string(),
            ]
        );
    }

    #[test]
    fn fragments_are_stripped() {
        let links = discover_links(pagination_html(), PAGE_URL);
        assert!(links.iter().all(|l| !l.contains('#')));
    }

    #[test]
    fn offsite_links_are_dropped() {
        let links = discover_links(pagination_html(), PAGE_URL);
        assert!(links.iter().all(|l| l.starts_with("https://www.fotocasa.es/")));
    }

    #[test]
    fn duplicate_targets_collapse() {
        let html = r#"<body><ul>
          <li class="sui-PaginationBasic-item--control"><a href="/l/5">5</a></li>
          <li class="sui-PaginationBasic-item--control"><a href="/l/5">next</a></li>
        </ul></body>"#;
        let links = discover_links(html, PAGE_URL);
        assert_eq!(links.len(), 1);
    }

    #[test]
    fn unparsable_page_url_yields_nothing() {
        assert!(discover_links(pagination_html(), "not a url").is_empty());
    }

    #[test]
    fn page_without_pagination_yields_nothing() {
        assert!(discover_links("<html><body><p>empty</p></body></html>", PAGE_URL).is_empty());
    }
}
