//! CSV listing loader with a fixed header contract.
//!
//! Columns: listing_id, source, make, model, trim, year, price_cents,
//! mileage_km, latitude, longitude, postal_code, image_hash. An empty cell is
//! a missing field, never an error; a malformed numeric cell is a hard error
//! naming the listing.

use crate::error::DedupError;
use crate::model::ListingSnapshot;

const REQUIRED_COLUMNS: &[&str] = &["listing_id", "source"];
const OPTIONAL_COLUMNS: &[&str] = &[
    "make",
    "model",
    "trim",
    "year",
    "price_cents",
    "mileage_km",
    "latitude",
    "longitude",
    "postal_code",
    "image_hash",
];

pub fn load_listings_csv(csv_data: &str) -> Result<Vec<ListingSnapshot>, DedupError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(csv_data.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| DedupError::Csv { record: "<headers>".into(), message: e.to_string() })?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let idx = |name: &str| headers.iter().position(|h| h == name);

    for required in REQUIRED_COLUMNS {
        if idx(required).is_none() {
            return Err(DedupError::Csv {
                record: "<headers>".into(),
                message: format!("missing required column '{required}'"),
            });
        }
    }

    let col_idx: Vec<Option<usize>> = REQUIRED_COLUMNS
        .iter()
        .chain(OPTIONAL_COLUMNS.iter())
        .map(|name| idx(name))
        .collect();

    let get = |record: &csv::StringRecord, slot: usize| -> Option<String> {
        col_idx[slot]
            .and_then(|i| record.get(i))
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    let mut listings = Vec::new();

    for record in reader.records() {
        let record = record
            .map_err(|e| DedupError::Csv { record: "<row>".into(), message: e.to_string() })?;

        let listing_id = get(&record, 0).ok_or_else(|| DedupError::Csv {
            record: "<row>".into(),
            message: "empty listing_id".into(),
        })?;
        let source = get(&record, 1).ok_or_else(|| DedupError::Csv {
            record: listing_id.clone(),
            message: "empty source".into(),
        })?;

        let parse_i64 = |slot: usize, name: &str| -> Result<Option<i64>, DedupError> {
            match get(&record, slot) {
                None => Ok(None),
                Some(v) => v.parse::<i64>().map(Some).map_err(|_| DedupError::Csv {
                    record: listing_id.clone(),
                    message: format!("cannot parse {name} '{v}'"),
                }),
            }
        };
        let parse_f64 = |slot: usize, name: &str| -> Result<Option<f64>, DedupError> {
            match get(&record, slot) {
                None => Ok(None),
                Some(v) => v.parse::<f64>().map(Some).map_err(|_| DedupError::Csv {
                    record: listing_id.clone(),
                    message: format!("cannot parse {name} '{v}'"),
                }),
            }
        };

        let year = match get(&record, 5) {
            None => None,
            Some(v) => Some(v.parse::<i32>().map_err(|_| DedupError::Csv {
                record: listing_id.clone(),
                message: format!("cannot parse year '{v}'"),
            })?),
        };

        listings.push(ListingSnapshot {
            make: get(&record, 2),
            model: get(&record, 3),
            trim: get(&record, 4),
            year,
            price_cents: parse_i64(6, "price_cents")?,
            mileage_km: parse_i64(7, "mileage_km")?,
            latitude: parse_f64(8, "latitude")?,
            longitude: parse_f64(9, "longitude")?,
            postal_code: get(&record, 10),
            image_hash: get(&record, 11),
            listing_id,
            source,
        });
    }

    Ok(listings)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSV: &str = "\
listing_id,source,make,model,trim,year,price_cents,mileage_km,latitude,longitude,postal_code,image_hash
at_101,autotrader,Toyota,Camry,XLE,2021,2450000,42000,43.6532,-79.3832,,ffab0912
kj_202,kijiji,Toyota,Camry,,2021,2430000,,,,M5V 2T6,
";

    #[test]
    fn loads_rows_with_missing_fields_as_none() {
        let listings = load_listings_csv(CSV).unwrap();
        assert_eq!(listings.len(), 2);

        let first = &listings[0];
        assert_eq!(first.listing_id, "at_101");
        assert_eq!(first.source, "autotrader");
        assert_eq!(first.year, Some(2021));
        assert_eq!(first.price_cents, Some(2_450_000));
        assert_eq!(first.postal_code, None);
        assert_eq!(first.image_hash.as_deref(), Some("ffab0912"));

        let second = &listings[1];
        assert_eq!(second.trim, None);
        assert_eq!(second.mileage_km, None);
        assert_eq!(second.latitude, None);
        assert_eq!(second.postal_code.as_deref(), Some("M5V 2T6"));
        assert_eq!(second.image_hash, None);
    }

    #[test]
    fn missing_required_column_is_rejected() {
        let err = load_listings_csv("make,model\nToyota,Camry\n").unwrap_err();
        assert!(err.to_string().contains("listing_id"));
    }

    #[test]
    fn bad_year_names_the_listing() {
        let csv = "\
listing_id,source,make,model,year
x_1,feed,Toyota,Camry,twenty21
";
        let err = load_listings_csv(csv).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("x_1"), "{msg}");
        assert!(msg.contains("year"), "{msg}");
    }

    #[test]
    fn bad_price_names_the_listing() {
        let csv = "\
listing_id,source,price_cents
x_2,feed,lots
";
        let err = load_listings_csv(csv).unwrap_err();
        assert!(err.to_string().contains("x_2"));
    }

    #[test]
    fn absent_optional_columns_are_fine() {
        let listings = load_listings_csv("listing_id,source\na,feed\n").unwrap();
        assert_eq!(listings.len(), 1);
        assert_eq!(listings[0].make, None);
    }
}
