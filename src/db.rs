use anyhow::Result;
use rusqlite::Connection;
use serde::Serialize;

const DB_PATH: &str = "data/fotocasa.sqlite";

pub fn connect() -> Result<Connection> {
    let conn = Connection::open(DB_PATH)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS pages (
            id         INTEGER PRIMARY KEY,
            url        TEXT UNIQUE NOT NULL,
            visited    BOOLEAN NOT NULL DEFAULT 0,
            visited_at TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_pages_visited ON pages(visited);

        CREATE TABLE IF NOT EXISTS page_data (
            id         INTEGER PRIMARY KEY,
            page_id    INTEGER NOT NULL REFERENCES pages(id),
            url        TEXT NOT NULL,
            html       TEXT,
            status     INTEGER,
            error      TEXT,
            latency_ms INTEGER,
            processed  BOOLEAN NOT NULL DEFAULT 0,
            fetched_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_page_data_processed ON page_data(processed);

        -- Flat listing records, one row per real estate id
        CREATE TABLE IF NOT EXISTS listings (
            id                  INTEGER PRIMARY KEY,
            building_type       TEXT NOT NULL,
            building_subtype    TEXT NOT NULL,
            client_id           INTEGER NOT NULL,
            client_url          TEXT NOT NULL,
            latitude            REAL NOT NULL,
            longitude           REAL NOT NULL,
            timestamp           INTEGER NOT NULL DEFAULT 0,
            description         TEXT NOT NULL,
            url                 TEXT NOT NULL,
            rooms               INTEGER,
            baths               INTEGER,
            surface             REAL,
            is_new              BOOLEAN NOT NULL,
            is_new_construction BOOLEAN NOT NULL,
            location            TEXT NOT NULL,
            phone               TEXT NOT NULL,
            price               TEXT NOT NULL,
            price_raw           REAL NOT NULL,
            multimedia          TEXT NOT NULL,
            scraped_at          TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_listings_location ON listings(location);
        ",
    )?;
    Ok(())
}

// ── Crawl queue ──

pub fn insert_pages(conn: &Connection, urls: &[String]) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let mut count = 0;
    {
        let mut stmt = tx.prepare("INSERT OR IGNORE INTO pages (url) VALUES (?1)")?;
        for url in urls {
            count += stmt.execute(rusqlite::params![url])?;
        }
    }
    tx.commit()?;
    Ok(count)
}

pub fn fetch_unvisited(conn: &Connection, limit: Option<usize>) -> Result<Vec<(i64, String)>> {
    let sql = match limit {
        Some(n) => format!(
            "SELECT id, url FROM pages WHERE visited = 0 ORDER BY id LIMIT {}",
            n
        ),
        None => "SELECT id, url FROM pages WHERE visited = 0 ORDER BY id".to_string(),
    };
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// One fetch attempt's outcome, streamed from the crawler to the DB writer.
pub struct FetchRow {
    pub page_id: i64,
    pub url: String,
    pub html: Option<String>,
    pub status: Option<i32>,
    pub error: Option<String>,
    pub latency_ms: Option<i64>,
}

// ── Processing ──

pub struct FetchedPage {
    pub page_data_id: i64,
    pub url: String,
    pub html: String,
}

pub fn fetch_unprocessed(conn: &Connection, limit: Option<usize>) -> Result<Vec<FetchedPage>> {
    let sql = format!(
        "SELECT id, url, html FROM page_data
         WHERE html IS NOT NULL AND processed = 0
         ORDER BY id{}",
        match limit {
            Some(n) => format!(" LIMIT {}", n),
            None => String::new(),
        }
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], |row| {
            Ok(FetchedPage {
                page_data_id: row.get(0)?,
                url: row.get(1)?,
                html: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn mark_processed(conn: &Connection, page_data_ids: &[i64]) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    {
        let mut stmt = tx.prepare("UPDATE page_data SET processed = 1 WHERE id = ?1")?;
        for id in page_data_ids {
            stmt.execute(rusqlite::params![id])?;
        }
    }
    tx.commit()?;
    Ok(())
}

// ── Listings ──

/// Flat record for one real estate listing. Serde renames produce the
/// camelCase CSV headers (id, buildingType, ..., multimedia).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingRow {
    pub id: i64,
    pub building_type: String,
    pub building_subtype: String,
    pub client_id: i64,
    pub client_url: String,
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: i64,
    pub description: String,
    pub url: String,
    pub rooms: Option<i64>,
    pub baths: Option<i64>,
    pub surface: Option<f64>,
    pub is_new: bool,
    pub is_new_construction: bool,
    pub location: String,
    pub phone: String,
    pub price: String,
    pub price_raw: f64,
    pub multimedia: String,
}

pub fn save_listings(conn: &Connection, rows: &[ListingRow]) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT OR REPLACE INTO listings
             (id, building_type, building_subtype, client_id, client_url,
              latitude, longitude, timestamp, description, url,
              rooms, baths, surface, is_new, is_new_construction,
              location, phone, price, price_raw, multimedia)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20)",
        )?;
        for r in rows {
            stmt.execute(rusqlite::params![
                r.id, r.building_type, r.building_subtype, r.client_id, r.client_url,
                r.latitude, r.longitude, r.timestamp, r.description, r.url,
                r.rooms, r.baths, r.surface, r.is_new, r.is_new_construction,
                r.location, r.phone, r.price, r.price_raw, r.multimedia,
            ])?;
        }
    }
    tx.commit()?;
    Ok(())
}

pub fn fetch_listings(conn: &Connection) -> Result<Vec<ListingRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, building_type, building_subtype, client_id, client_url,
                latitude, longitude, timestamp, description, url,
                rooms, baths, surface, is_new, is_new_construction,
                location, phone, price, price_raw, multimedia
         FROM listings ORDER BY id",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(ListingRow {
                id: row.get(0)?,
                building_type: row.get(1)?,
                building_subtype: row.get(2)?,
                client_id: row.get(3)?,
                client_url: row.get(4)?,
                latitude: row.get(5)?,
                longitude: row.get(6)?,
                timestamp: row.get(7)?,
                description: row.get(8)?,
                url: row.get(9)?,
                rooms: row.get(10)?,
                baths: row.get(11)?,
                surface: row.get(12)?,
                is_new: row.get(13)?,
                is_new_construction: row.get(14)?,
                location: row.get(15)?,
                phone: row.get(16)?,
                price: row.get(17)?,
                price_raw: row.get(18)?,
                multimedia: row.get(19)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ── Overview ──

pub struct OverviewRow {
    pub id: i64,
    pub location: String,
    pub price: String,
    pub rooms: Option<i64>,
    pub surface: Option<f64>,
    pub is_new: bool,
    pub timestamp: i64,
}

pub fn fetch_overview(
    conn: &Connection,
    location: Option<&str>,
    only_new: bool,
    limit: usize,
) -> Result<Vec<OverviewRow>> {
    let mut conditions = Vec::new();
    let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

    if let Some(loc) = location {
        conditions.push(format!("location LIKE ?{}", params.len() + 1));
        params.push(Box::new(format!("%{}%", loc)));
    }
    if only_new {
        conditions.push("is_new = 1".to_string());
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conditions.join(" AND "))
    };

    let sql = format!(
        "SELECT id, location, price, rooms, surface, is_new, timestamp
         FROM listings{}
         ORDER BY timestamp DESC, id
         LIMIT {}",
        where_clause, limit
    );

    let mut stmt = conn.prepare(&sql)?;
    let param_refs: Vec<&dyn rusqlite::types::ToSql> = params.iter().map(|p| p.as_ref()).collect();
    let rows = stmt
        .query_map(param_refs.as_slice(), |row| {
            Ok(OverviewRow {
                id: row.get(0)?,
                location: row.get(1)?,
                price: row.get(2)?,
                rooms: row.get(3)?,
                surface: row.get(4)?,
                is_new: row.get(5)?,
                timestamp: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ── Stats ──

pub struct Stats {
    pub total: usize,
    pub visited: usize,
    pub unvisited: usize,
    pub fetched: usize,
    pub errors: usize,
    pub listings: usize,
}

pub fn get_stats(conn: &Connection) -> Result<Stats> {
    let total: usize = conn.query_row("SELECT COUNT(*) FROM pages", [], |r| r.get(0))?;
    let visited: usize =
        conn.query_row("SELECT COUNT(*) FROM pages WHERE visited = 1", [], |r| r.get(0))?;
    let fetched: usize = conn.query_row("SELECT COUNT(*) FROM page_data", [], |r| r.get(0))?;
    let errors: usize = conn.query_row(
        "SELECT COUNT(*) FROM page_data WHERE error IS NOT NULL",
        [],
        |r| r.get(0),
    )?;
    let listings: usize = conn.query_row("SELECT COUNT(*) FROM listings", [], |r| r.get(0))?;
    Ok(Stats {
        total,
        visited,
        unvisited: total - visited,
        fetched,
        errors,
        listings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    fn sample_listing(id: i64) -> ListingRow {
        ListingRow {
            id,
            building_type: "Flat".into(),
            building_subtype: "Apartment".into(),
            client_id: 7,
            client_url: "https://www.fotocasa.es/agencia/7".into(),
            latitude: 41.38,
            longitude: 2.17,
            timestamp: 1_566_300_000_000,
            description: "Piso luminoso".into(),
            url: "https://www.fotocasa.es/es/comprar/vivienda/barcelona/1".into(),
            rooms: Some(3),
            baths: Some(2),
            surface: Some(80.0),
            is_new: false,
            is_new_construction: false,
            location: "Barcelona Capital".into(),
            phone: "930000000".into(),
            price: "250.000 €".into(),
            price_raw: 250_000.0,
            multimedia: "a.jpg|b.jpg|".into(),
        }
    }

    #[test]
    fn insert_pages_dedups_urls() {
        let conn = test_conn();
        let urls = vec!["https://a".to_string(), "https://a".to_string()];
        assert_eq!(insert_pages(&conn, &urls).unwrap(), 1);
        assert_eq!(insert_pages(&conn, &urls).unwrap(), 0);
        assert_eq!(fetch_unvisited(&conn, None).unwrap().len(), 1);
    }

    #[test]
    fn listings_round_trip() {
        let conn = test_conn();
        let rows = vec![sample_listing(1), sample_listing(2)];
        save_listings(&conn, &rows).unwrap();
        // Re-saving the same ids replaces, not duplicates
        save_listings(&conn, &rows).unwrap();
        let back = fetch_listings(&conn).unwrap();
        assert_eq!(back, rows);
    }

    #[test]
    fn overview_filters_by_location() {
        let conn = test_conn();
        let mut madrid = sample_listing(3);
        madrid.location = "Madrid Capital".into();
        save_listings(&conn, &[sample_listing(1), madrid]).unwrap();
        let rows = fetch_overview(&conn, Some("Madrid"), false, 50).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, 3);
    }
}
