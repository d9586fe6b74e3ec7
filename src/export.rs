use std::io::Write;

use anyhow::Result;

use crate::db::ListingRow;

// Header row written even when there are no records yet; serde emits the
// same names (camelCase renames on ListingRow) once rows exist.
const HEADERS: [&str; 20] = [
    "id", "buildingType", "buildingSubtype", "clientId", "clientUrl",
    "latitude", "longitude", "timestamp", "description", "url",
    "rooms", "baths", "surface", "isNew", "isNewConstruction",
    "location", "phone", "price", "priceRaw", "multimedia",
];

/// Write stored listings to a CSV file, one row per record.
pub fn write_csv(path: &str, rows: &[ListingRow]) -> Result<usize> {
    let file = std::fs::File::create(path)?;
    write_records(file, rows)?;
    Ok(rows.len())
}

pub fn write_records<W: Write>(writer: W, rows: &[ListingRow]) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    if rows.is_empty() {
        wtr.write_record(HEADERS)?;
    }
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}
