mod crawler;
mod db;
mod export;
mod extract;
mod pagination;

use std::time::Instant;

use clap::{Parser, Subcommand};

const START_URL: &str = "https://www.fotocasa.es/es/comprar/viviendas/espana/todas-las-zonas/l";

#[derive(Parser)]
#[command(name = "fotocasa_scraper", about = "Fotocasa sale listings crawler")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the schema and seed the search start URL
    Init,
    /// Fetch unvisited pages, following pagination links
    Crawl {
        /// Max pages to fetch (default: until the queue drains)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Extract listing records from fetched pages
    Process {
        /// Max pages to process (default: all unprocessed)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Crawl + process in one pipeline
    Run {
        /// Max pages to crawl+process
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Write stored listings to a CSV file
    Export {
        /// Output path
        #[arg(short, long, default_value = "result.csv")]
        output: String,
    },
    /// Extract records from a saved page body and print them as CSV
    Parse {
        /// Path to an HTML file
        file: String,
    },
    /// Compact listings table
    Overview {
        /// Filter by location substring (e.g. "Barcelona")
        #[arg(short, long)]
        location: Option<String>,
        /// Only listings flagged as new
        #[arg(long)]
        new: bool,
        /// Max rows to display
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
    },
    /// Show crawling statistics
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Init => {
            let conn = db::connect()?;
            db::init_schema(&conn)?;
            let inserted = db::insert_pages(&conn, &[START_URL.to_string()])?;
            if inserted == 0 {
                println!("Start URL already queued.");
            } else {
                println!("Queued start URL: {}", START_URL);
            }
            Ok(())
        }
        Commands::Crawl { limit } => {
            let conn = db::connect()?;
            db::init_schema(&conn)?;
            let stats = crawl_rounds(&conn, limit).await?;
            if stats.total == 0 {
                println!("No unvisited pages. Run 'init' first or all pages are crawled.");
                return Ok(());
            }
            println!(
                "Done: {} fetched ({} ok, {} errors), {} new pages discovered.",
                stats.total, stats.ok, stats.errors, stats.discovered
            );
            Ok(())
        }
        Commands::Process { limit } => {
            let conn = db::connect()?;
            db::init_schema(&conn)?;
            let pages = db::fetch_unprocessed(&conn, limit)?;
            if pages.is_empty() {
                println!("No unprocessed pages. Run 'crawl' first.");
                return Ok(());
            }
            println!("Processing {} pages...", pages.len());
            let counts = process_pages(&conn, &pages)?;
            counts.print();
            Ok(())
        }
        Commands::Run { limit } => {
            let conn = db::connect()?;
            db::init_schema(&conn)?;

            // Phase 1: Crawl (streaming to DB, pagination followed in rounds)
            let t_crawl = Instant::now();
            let stats = crawl_rounds(&conn, limit).await?;
            if stats.total == 0 {
                println!("No unvisited pages. Run 'init' first.");
                return Ok(());
            }
            println!(
                "Fetched {} pages ({} ok, {} errors) in {:.1}s",
                stats.total,
                stats.ok,
                stats.errors,
                t_crawl.elapsed().as_secs_f64()
            );

            // Phase 2: Process
            let t_process = Instant::now();
            let unprocessed = db::fetch_unprocessed(&conn, None)?;
            if unprocessed.is_empty() {
                println!("Nothing to process (all fetched pages had errors).");
                return Ok(());
            }
            println!("Processing {} pages...", unprocessed.len());
            let counts = process_pages(&conn, &unprocessed)?;
            println!("Processed in {:.1}s", t_process.elapsed().as_secs_f64());
            counts.print();
            Ok(())
        }
        Commands::Export { output } => {
            let conn = db::connect()?;
            db::init_schema(&conn)?;
            let rows = db::fetch_listings(&conn)?;
            let written = export::write_csv(&output, &rows)?;
            println!("Wrote {} listings to {}", written, output);
            Ok(())
        }
        Commands::Parse { file } => {
            let body = std::fs::read_to_string(&file)?;
            let rows: Vec<db::ListingRow> = extract::extract(&body).collect();
            if rows.is_empty() {
                println!("No records extracted from {}", file);
                return Ok(());
            }
            export::write_records(std::io::stdout(), &rows)?;
            Ok(())
        }
        Commands::Overview { location, new, limit } => {
            let conn = db::connect()?;
            db::init_schema(&conn)?;
            let rows = db::fetch_overview(&conn, location.as_deref(), new, limit)?;
            if rows.is_empty() {
                println!("No listings found.");
                return Ok(());
            }

            // Compact, readable table
            println!(
                "{:>3} | {:>10} | {:<28} | {:>12} | {:>5} | {:>7} | {:<3} | {:<10}",
                "#", "Id", "Location", "Price", "Rooms", "Surface", "New", "Published"
            );
            println!("{}", "-".repeat(98));

            for (i, r) in rows.iter().enumerate() {
                let location = truncate(&r.location, 28);
                let rooms = r.rooms.map(|n| n.to_string()).unwrap_or_else(|| "-".into());
                let surface = r
                    .surface
                    .map(|s| format!("{:.0} m2", s))
                    .unwrap_or_else(|| "-".into());
                let published = published_date(r.timestamp);

                println!(
                    "{:>3} | {:>10} | {:<28} | {:>12} | {:>5} | {:>7} | {:<3} | {:<10}",
                    i + 1,
                    r.id,
                    location,
                    truncate(&r.price, 12),
                    rooms,
                    surface,
                    if r.is_new { "yes" } else { "no" },
                    published
                );
            }

            println!("\n{} listings", rows.len());
            Ok(())
        }
        Commands::Stats => {
            let conn = db::connect()?;
            db::init_schema(&conn)?;
            let s = db::get_stats(&conn)?;
            println!("Queued:    {}", s.total);
            println!("Visited:   {}", s.visited);
            println!("Unvisited: {}", s.unvisited);
            println!("Fetched:   {}", s.fetched);
            println!("Errors:    {}", s.errors);
            println!("Listings:  {}", s.listings);
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

/// Crawl in rounds: each round fetches the current unvisited set and queues
/// the pagination links it discovers, so the next round picks those up.
/// Stops when the queue drains or the page budget is spent.
async fn crawl_rounds(
    conn: &rusqlite::Connection,
    limit: Option<usize>,
) -> anyhow::Result<crawler::CrawlStats> {
    let mut totals = crawler::CrawlStats::default();
    let mut budget = limit;

    loop {
        let pages = db::fetch_unvisited(conn, budget)?;
        if pages.is_empty() {
            break;
        }
        println!("Crawling {} pages (streaming to DB)...", pages.len());
        let stats = crawler::crawl_streaming(conn, pages).await?;
        totals.merge(&stats);

        if let Some(b) = budget.as_mut() {
            *b = b.saturating_sub(stats.total);
            if *b == 0 {
                break;
            }
        }
    }

    Ok(totals)
}

struct ProcessCounts {
    pages: usize,
    listings: usize,
    page_failures: usize,
    listings_skipped: usize,
}

impl ProcessCounts {
    fn print(&self) {
        println!(
            "Saved {} listings from {} pages ({} pages without a usable blob, {} listings skipped).",
            self.listings, self.pages, self.page_failures, self.listings_skipped,
        );
    }
}

fn process_pages(
    conn: &rusqlite::Connection,
    pages: &[db::FetchedPage],
) -> anyhow::Result<ProcessCounts> {
    use indicatif::{ProgressBar, ProgressStyle};
    use rayon::prelude::*;

    let pb = ProgressBar::new(pages.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")
            .unwrap()
            .progress_chars("#>-"),
    );

    let mut counts = ProcessCounts {
        pages: 0,
        listings: 0,
        page_failures: 0,
        listings_skipped: 0,
    };

    for chunk in pages.chunks(200) {
        let outcomes: Vec<_> = chunk
            .par_iter()
            .map(|page| extract::process_page(&page.url, &page.html))
            .collect();

        let mut rows = Vec::new();
        let mut processed_ids = Vec::with_capacity(chunk.len());

        for (page, outcome) in chunk.iter().zip(outcomes) {
            counts.pages += 1;
            counts.listings += outcome.rows.len();
            counts.listings_skipped += outcome.skipped;
            if outcome.page_error.is_some() {
                counts.page_failures += 1;
            }
            rows.extend(outcome.rows);
            processed_ids.push(page.page_data_id);
        }

        db::save_listings(conn, &rows)?;
        db::mark_processed(conn, &processed_ids)?;
        pb.inc(chunk.len() as u64);
    }

    pb.finish_and_clear();
    Ok(counts)
}

fn published_date(timestamp_ms: i64) -> String {
    if timestamp_ms == 0 {
        return "-".to_string();
    }
    chrono::DateTime::from_timestamp_millis(timestamp_ms)
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn published_date_renders_epoch_millis() {
        assert_eq!(published_date(1_566_300_000_000), "2019-08-20");
        assert_eq!(published_date(0), "-");
    }

    #[test]
    fn truncate_keeps_short_strings() {
        assert_eq!(truncate("Barcelona", 28), "Barcelona");
        assert_eq!(truncate("abcdef", 3), "abc...");
    }
}
