use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::Duration;
use flate2::read::GzDecoder;
use reqwest::blocking::Client;
use serde::Serialize;
use serde_json::Value;
use url::Url;
use log::{info, warn, error};
use thiserror::Error;

use crate::delay;
use crate::geometry::{self, FeatureCollection, Geometry};

#[derive(Debug, Error)]
pub enum AddressError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("invalid source url: {0}")]
    Url(#[from] url::ParseError),
}

/// One address point from a regional parcel layer, projected to the flat
/// walk-list schema.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct KnockableAddress {
    #[serde(rename = "HOUSE_NUM")]
    pub house_num: String,
    #[serde(rename = "STREET_NAME")]
    pub street_name: String,
    #[serde(rename = "STREET_TYPE")]
    pub street_type: String,
    #[serde(rename = "UNIT_NUM")]
    pub unit_num: String,
    #[serde(rename = "ZIP_CODE")]
    pub zip_code: String,
    pub lat: f64,
    pub lon: f64,
    pub addr_key: String,
}

/// Canonical dedupe key: `HOUSE STREET TYPE [#UNIT] ZIP`, uppercased with
/// runs of whitespace collapsed.
pub fn address_key(house: &str, street: &str, street_type: &str, unit: &str, zip: &str) -> String {
    let unit_part = if unit.trim().is_empty() {
        String::new()
    } else {
        format!("#{}", unit.trim())
    };
    let raw = format!(
        "{} {} {} {} {}",
        house.trim(),
        street.trim(),
        street_type.trim(),
        unit_part,
        zip.trim()
    );
    raw.to_uppercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn value_string(properties: &Value, key: &str) -> String {
    match properties.get(key) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

/// Streams a gzipped, line-delimited GeoJSON dump and writes one CSV row
/// per feature whose `city` property matches (case-insensitive). Malformed
/// lines are skipped. Returns how many rows were written.
pub fn filter_city_addresses(
    input: &Path,
    output: &Path,
    city: &str,
) -> Result<usize, AddressError> {
    let reader = BufReader::new(GzDecoder::new(File::open(input)?));
    let mut writer = csv::Writer::from_path(output)?;
    writer.write_record([
        "number", "street", "unit", "city", "postcode", "full_address", "lat", "lon",
    ])?;

    let wanted = city.to_lowercase();
    let mut written = 0usize;
    for line in reader.lines() {
        let line = line?;
        let feature: Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(_) => continue, // skip bad lines
        };
        let props = &feature["properties"];
        if value_string(props, "city").to_lowercase() != wanted {
            continue;
        }
        let coords = &feature["geometry"]["coordinates"];
        let lon = coords.get(0).and_then(Value::as_f64);
        let lat = coords.get(1).and_then(Value::as_f64);
        writer.write_record([
            value_string(props, "number"),
            value_string(props, "street"),
            value_string(props, "unit"),
            value_string(props, "city"),
            value_string(props, "postcode"),
            value_string(props, "full"),
            lat.map(|v| v.to_string()).unwrap_or_default(),
            lon.map(|v| v.to_string()).unwrap_or_default(),
        ])?;
        written += 1;
    }
    writer.flush()?;
    Ok(written)
}

/// Pages a feature layer down in fixed-size chunks, one JSON file per
/// chunk. A chunk file already on disk is skipped, which is what makes an
/// interrupted download resumable. Ends when the service returns an empty
/// page.
pub struct ChunkDownloader {
    http: Client,
    rest_url: String,
    pub chunk_dir: PathBuf,
    pub page_size: usize,
    pub retries: u32,
    pub base_sleep_secs: u64,
}

impl ChunkDownloader {
    pub fn new(rest_url: &str, chunk_dir: &Path) -> Self {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static(
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
            ),
        );
        let http = Client::builder()
            .timeout(Duration::from_secs(60))
            .default_headers(headers)
            .build()
            .expect("Failed to build download HTTP client");
        ChunkDownloader {
            http,
            rest_url: rest_url.to_string(),
            chunk_dir: chunk_dir.to_path_buf(),
            page_size: 2000,
            retries: 5,
            base_sleep_secs: 2,
        }
    }

    fn chunk_url(&self, offset: usize) -> Result<Url, url::ParseError> {
        let mut url = Url::parse(&self.rest_url)?;
        url.query_pairs_mut()
            .append_pair("where", "1=1")
            .append_pair("outFields", "*")
            .append_pair("outSR", "4326")
            .append_pair("f", "geojson")
            .append_pair("resultOffset", &offset.to_string())
            .append_pair("resultRecordCount", &self.page_size.to_string());
        Ok(url)
    }

    /// One page, with bounded exponential-backoff retries. Returns the raw
    /// body and its feature count, or None once retries are exhausted.
    fn download_chunk(&self, offset: usize) -> Result<Option<(String, usize)>, AddressError> {
        let url = self.chunk_url(offset)?;
        for attempt in 0..self.retries {
            match self.http.get(url.as_str()).send().and_then(|r| r.error_for_status()) {
                Ok(response) => match response.text() {
                    Ok(body) => {
                        let count = serde_json::from_str::<Value>(&body)
                            .ok()
                            .and_then(|v| v["features"].as_array().map(Vec::len))
                            .unwrap_or(0);
                        return Ok(Some((body, count)));
                    }
                    Err(e) => warn!(
                        "Error reading offset {} (try {}/{}): {}",
                        offset, attempt + 1, self.retries, e
                    ),
                },
                Err(e) => warn!(
                    "Error on offset {} (try {}/{}): {}",
                    offset, attempt + 1, self.retries, e
                ),
            }
            delay::retry_backoff(self.base_sleep_secs, attempt);
        }
        error!("Failed to download offset {} after {} retries.", offset, self.retries);
        Ok(None)
    }

    /// Runs the download to completion, skipping chunks already on disk.
    /// Returns the total number of features saved by this invocation.
    pub fn download_all(&self) -> Result<usize, AddressError> {
        fs::create_dir_all(&self.chunk_dir)?;
        let mut offset = 0usize;
        let mut saved = 0usize;
        info!("Starting chunked download of address points...");
        loop {
            let chunk_file = self.chunk_dir.join(format!("cams_{}.geojson", offset));
            if chunk_file.exists() {
                info!("Found cached chunk: {:?}", chunk_file);
                offset += self.page_size;
                continue;
            }
            let (body, count) = match self.download_chunk(offset)? {
                Some(chunk) if chunk.1 > 0 => chunk,
                _ => break,
            };
            fs::write(&chunk_file, body)?;
            info!("Saved chunk: {:?} ({} rows)", chunk_file, count);
            saved += count;
            offset += count;
        }
        Ok(saved)
    }
}

/// Reassembles every saved chunk, keeps points inside the boundary, and
/// collapses duplicates by address key (first occurrence wins).
pub fn collect_addresses(
    chunk_dir: &Path,
    boundary: &Geometry,
) -> Result<Vec<KnockableAddress>, AddressError> {
    let mut chunk_files: Vec<PathBuf> = fs::read_dir(chunk_dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map_or(false, |n| n.starts_with("cams_") && n.ends_with(".geojson"))
        })
        .collect();
    chunk_files.sort();

    let mut seen = std::collections::BTreeSet::new();
    let mut addresses = Vec::new();
    for path in chunk_files {
        let collection: FeatureCollection = serde_json::from_str(&fs::read_to_string(&path)?)?;
        for feature in collection.features {
            let point = match geometry::centroid(&feature.geometry) {
                Some(c) => c,
                None => continue,
            };
            if !geometry::contains(boundary, point.lat, point.lon) {
                continue;
            }
            let house = value_string(&feature.properties, "Number");
            let street = value_string(&feature.properties, "StreetName");
            let street_type = value_string(&feature.properties, "PostType");
            let unit = value_string(&feature.properties, "UnitName");
            let zip = value_string(&feature.properties, "ZipCode");
            let key = address_key(&house, &street, &street_type, &unit, &zip);
            if !seen.insert(key.clone()) {
                continue;
            }
            addresses.push(KnockableAddress {
                house_num: house,
                street_name: street,
                street_type,
                unit_num: unit,
                zip_code: zip,
                lat: point.lat,
                lon: point.lon,
                addr_key: key,
            });
        }
    }
    Ok(addresses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    #[test]
    fn address_key_is_normalized_and_unit_aware() {
        assert_eq!(
            address_key("123", " maple ", "Ave", "", "90501"),
            "123 MAPLE AVE 90501"
        );
        assert_eq!(
            address_key("123", "Maple", "Ave", "4b", "90501"),
            "123 MAPLE AVE #4B 90501"
        );
        // Idempotent under re-normalization.
        let key = address_key("123", "Maple", "Ave", "4b", "90501");
        assert_eq!(
            key,
            key.to_uppercase().split_whitespace().collect::<Vec<_>>().join(" ")
        );
    }

    #[test]
    fn gz_filter_keeps_only_the_target_city_and_skips_bad_lines() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("source.geojson.gz");
        let output = dir.path().join("addresses.csv");

        let lines = [
            r#"{"type":"Feature","properties":{"number":"123","street":"Maple Ave","unit":"","city":"Torrance","postcode":"90501","full":"123 Maple Ave"},"geometry":{"type":"Point","coordinates":[-118.34,33.83]}}"#,
            r#"{"type":"Feature","properties":{"number":"9","street":"Elsewhere","city":"Carson","postcode":"90745"},"geometry":{"type":"Point","coordinates":[-118.2,33.8]}}"#,
            "this line is not json",
            r#"{"type":"Feature","properties":{"number":"77","street":"Oak St","unit":"2","city":"TORRANCE","postcode":"90503","full":"77 Oak St #2"},"geometry":{"type":"Point","coordinates":[-118.35,33.84]}}"#,
        ];
        let mut encoder = GzEncoder::new(File::create(&input).unwrap(), Compression::default());
        for line in lines {
            writeln!(encoder, "{}", line).unwrap();
        }
        encoder.finish().unwrap();

        let written = filter_city_addresses(&input, &output, "torrance").unwrap();
        assert_eq!(written, 2);

        let content = fs::read_to_string(&output).unwrap();
        assert!(content.contains("123,Maple Ave"));
        assert!(content.contains("77,Oak St"));
        assert!(!content.contains("Carson"));
    }

    #[test]
    fn collect_addresses_clips_to_boundary_and_dedupes() {
        let dir = tempfile::tempdir().unwrap();
        let chunk = r#"{
            "type": "FeatureCollection",
            "features": [
                {"type":"Feature","properties":{"Number":"123","StreetName":"Maple","PostType":"Ave","UnitName":"","ZipCode":"90501"},
                 "geometry":{"type":"Point","coordinates":[-118.34,33.83]}},
                {"type":"Feature","properties":{"Number":"123","StreetName":"maple","PostType":"AVE","UnitName":"","ZipCode":"90501"},
                 "geometry":{"type":"Point","coordinates":[-118.34,33.83]}},
                {"type":"Feature","properties":{"Number":"500","StreetName":"Far","PostType":"Rd","UnitName":"","ZipCode":"90001"},
                 "geometry":{"type":"Point","coordinates":[-117.0,34.5]}}
            ]
        }"#;
        fs::write(dir.path().join("cams_0.geojson"), chunk).unwrap();

        let boundary = Geometry::Polygon {
            coordinates: vec![vec![
                vec![-118.4, 33.7],
                vec![-118.2, 33.7],
                vec![-118.2, 33.9],
                vec![-118.4, 33.9],
                vec![-118.4, 33.7],
            ]],
        };
        let addresses = collect_addresses(dir.path(), &boundary).unwrap();
        assert_eq!(addresses.len(), 1);
        assert_eq!(addresses[0].addr_key, "123 MAPLE AVE 90501");
    }
}
