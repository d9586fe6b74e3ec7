use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use rusqlite::Connection;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::db::{self, FetchRow};
use crate::pagination;

const CONCURRENCY: usize = 4;
const MAX_RETRIES: u32 = 3;
const BASE_BACKOFF_MS: u64 = 2000;
const DOWNLOAD_DELAY_MS: u64 = 200;
const REQUEST_TIMEOUT_SECS: u64 = 30;
const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_14_6) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/76.0.3809.132 Safari/537.36";

/// Crawl stats returned after one round completes.
#[derive(Default)]
pub struct CrawlStats {
    pub total: usize,
    pub ok: usize,
    pub errors: usize,
    pub discovered: usize,
}

impl CrawlStats {
    pub fn merge(&mut self, other: &CrawlStats) {
        self.total += other.total;
        self.ok += other.ok;
        self.errors += other.errors;
        self.discovered += other.discovered;
    }
}

/// Fetch pages concurrently, saving each result to DB as it arrives and
/// queueing pagination links discovered on fetched bodies.
pub async fn crawl_streaming(conn: &Connection, pages: Vec<(i64, String)>) -> Result<CrawlStats> {
    let client = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .build()?;
    let semaphore = Arc::new(Semaphore::new(CONCURRENCY));
    let total = pages.len();

    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
            .progress_chars("=> "),
    );

    // Channel: workers send results, main loop saves to DB
    let (tx, mut rx) = tokio::sync::mpsc::channel::<FetchRow>(CONCURRENCY * 2);

    for (page_id, url) in pages {
        let client = client.clone();
        let sem = Arc::clone(&semaphore);
        let tx = tx.clone();

        tokio::spawn(async move {
            let _permit = sem.acquire().await.unwrap();
            let row = fetch_with_retry(&client, page_id, &url).await;
            let _ = tx.send(row).await;
        });
    }

    // Drop our copy of tx so rx closes when all spawned tasks finish
    drop(tx);

    let mut ok = 0usize;
    let mut errors = 0usize;
    let mut discovered = 0usize;

    // Prepare statements once, reuse for each row
    let mut insert_stmt = conn.prepare(
        "INSERT INTO page_data (page_id, url, html, status, error, latency_ms)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    let mut update_stmt = conn.prepare(
        "UPDATE pages SET visited = 1, visited_at = datetime('now') WHERE id = ?1",
    )?;

    while let Some(row) = rx.recv().await {
        if row.error.is_some() {
            errors += 1;
        } else {
            ok += 1;
        }

        // Follow pagination: new same-domain URLs go back into the queue,
        // where the UNIQUE constraint drops anything already seen
        if let Some(html) = &row.html {
            let links = pagination::discover_links(html, &row.url);
            if !links.is_empty() {
                discovered += db::insert_pages(conn, &links)?;
            }
        }

        save_one(&mut insert_stmt, &mut update_stmt, &row)?;
        pb.inc(1);
    }

    pb.finish_and_clear();
    info!(
        "Fetched {} pages ({} ok, {} errors, {} new links queued)",
        total, ok, errors, discovered
    );

    Ok(CrawlStats {
        total,
        ok,
        errors,
        discovered,
    })
}

/// Save a single fetch result to DB using pre-prepared statements.
fn save_one(
    insert: &mut rusqlite::Statement,
    update: &mut rusqlite::Statement,
    row: &FetchRow,
) -> Result<()> {
    insert.execute(rusqlite::params![
        row.page_id, row.url, row.html, row.status, row.error, row.latency_ms,
    ])?;
    update.execute(rusqlite::params![row.page_id])?;
    Ok(())
}

async fn fetch_with_retry(client: &reqwest::Client, page_id: i64, url: &str) -> FetchRow {
    for attempt in 0..=MAX_RETRIES {
        let row = fetch_one(client, page_id, url).await;

        let should_retry = match row.status {
            Some(429) | Some(500) | Some(502) | Some(503) => true,
            None if row.error.is_some() => true,
            _ => false,
        };

        if !should_retry || attempt == MAX_RETRIES {
            return row;
        }

        let backoff = Duration::from_millis(BASE_BACKOFF_MS * 2u64.pow(attempt));
        warn!(
            "Retrying {} (attempt {}/{}), backing off {:.1}s",
            url,
            attempt + 1,
            MAX_RETRIES,
            backoff.as_secs_f64()
        );
        tokio::time::sleep(backoff).await;
    }

    fetch_one(client, page_id, url).await
}

async fn fetch_one(client: &reqwest::Client, page_id: i64, url: &str) -> FetchRow {
    // Politeness delay, paid inside the concurrency permit
    tokio::time::sleep(Duration::from_millis(DOWNLOAD_DELAY_MS)).await;

    let start = Instant::now();
    let response = client.get(url).send().await;

    match response {
        Ok(resp) => {
            let status = resp.status().as_u16() as i32;
            let body = resp.text().await;
            let latency = start.elapsed().as_millis() as i64;
            match body {
                Ok(html) if (200..300).contains(&status) => FetchRow {
                    page_id,
                    url: url.to_string(),
                    html: Some(html),
                    status: Some(status),
                    error: None,
                    latency_ms: Some(latency),
                },
                Ok(_) => FetchRow {
                    page_id,
                    url: url.to_string(),
                    html: None,
                    status: Some(status),
                    error: Some(format!("HTTP {}", status)),
                    latency_ms: Some(latency),
                },
                Err(e) => FetchRow {
                    page_id,
                    url: url.to_string(),
                    html: None,
                    status: Some(status),
                    error: Some(e.to_string()),
                    latency_ms: Some(latency),
                },
            }
        }
        Err(e) => FetchRow {
            page_id,
            url: url.to_string(),
            html: None,
            status: None,
            error: Some(e.to_string()),
            latency_ms: Some(start.elapsed().as_millis() as i64),
        },
    }
}
