use canvass_scraper_lib::census::{
    CensusClient, CensusEndpoints, AcsQuery, EnrichmentContext, DEFAULT_CHUNK_SIZE,
    PROFILE_GROUPS,
};
use canvass_scraper_lib::geometry::{self, FeatureCollection};
use canvass_scraper_lib::logger;

use std::collections::{BTreeMap, HashSet};
use std::env;
use std::error::Error;
use std::fs;
use log::{info, warn, error};
use serde_json::json;

const PRECINCT_CSV: &str = "Torrance_Precincts_Overlay.csv";
const PRECINCT_GEOJSON: &str = "RegistrarRecorder_Precincts-simple.geojson";

const TRACT_CACHE: &str = "tract_cache.json";
const CHUNK_CACHE: &str = "acs_chunk_cache.json";
const ACS_CACHE: &str = "acs_cache.json";
const TRACT_TO_PRECINCT: &str = "tract_to_precinct.json";

const OUTPUT_JSON: &str = "Precinct_ACS_FullOverlay.json";
const OUTPUT_CSV: &str = "Precinct_ACS_FullOverlay.csv";

fn load_valid_precincts() -> Result<HashSet<String>, Box<dyn Error>> {
    let mut reader = csv::Reader::from_path(PRECINCT_CSV)?;
    let headers = reader.headers()?.clone();
    let id_column = headers
        .iter()
        .position(|h| h == "Precinct_ID")
        .ok_or("Precinct_ID column missing from overlay CSV")?;
    let mut ids = HashSet::new();
    for record in reader.records() {
        let record = record?;
        if let Some(id) = record.get(id_column) {
            ids.insert(id.trim().to_uppercase());
        }
    }
    Ok(ids)
}

fn main() -> Result<(), Box<dyn Error>> {
    logger::init();
    info!("Starting precinct enrichment...");

    let valid_ids = load_valid_precincts()?;
    let collection: FeatureCollection = serde_json::from_str(&fs::read_to_string(PRECINCT_GEOJSON)?)?;
    let features: Vec<_> = collection
        .features
        .into_iter()
        .filter(|f| valid_ids.contains(&f.property_string("PRECINCT")))
        .collect();
    info!("{} precinct features selected.", features.len());

    let client = CensusClient::new(CensusEndpoints::default());
    let all_vars = client.variable_labels(&PROFILE_GROUPS)?;
    info!("{} estimate variables across {} groups.", all_vars.len(), PROFILE_GROUPS.len());

    let variable_names: Vec<String> = all_vars.iter().map(|(name, _)| name.clone()).collect();
    let query = AcsQuery {
        state: "06".to_string(),
        county: "037".to_string(),
        api_key: env::var("CENSUS_API_KEY").unwrap_or_default(),
        chunk_size: DEFAULT_CHUNK_SIZE,
    };
    let mut ctx = EnrichmentContext::load(TRACT_CACHE, CHUNK_CACHE, ACS_CACHE);

    let mut results = Vec::new();
    let mut csv_rows: Vec<(String, String, BTreeMap<String, String>)> = Vec::new();

    for feature in &features {
        let precinct_id = match feature.property_string("PRECINCT") {
            id if id.is_empty() => "UNKNOWN".to_string(),
            id => id,
        };
        let centroid = match geometry::centroid(&feature.geometry) {
            Some(c) => c,
            None => {
                warn!("No usable geometry for precinct {}.", precinct_id);
                ctx.failed_lookups.push(precinct_id);
                continue;
            }
        };

        let tract = match client.resolve_tract(&precinct_id, centroid.lat, centroid.lon, &mut ctx) {
            Some(t) => t,
            None => continue,
        };
        ctx.tract_to_precinct
            .entry(tract.clone())
            .or_default()
            .push(precinct_id.clone());

        // A failed batch abandons the rest of this tract's fetches; the
        // row still goes out with whatever fields were gathered.
        if !client.fetch_tract_profile(&tract, &precinct_id, &variable_names, &query, &mut ctx) {
            warn!("Partial ACS data for precinct {} (tract {}).", precinct_id, tract);
        }

        // Re-key the raw variable names by their human labels.
        let acs_data = ctx.acs_cache.get(&tract).cloned().unwrap_or_default();
        let mut readable = BTreeMap::new();
        for (name, label) in &all_vars {
            if let Some(value) = acs_data.get(name) {
                readable.insert(label.clone(), value.clone());
            }
        }

        results.push(json!({
            "Precinct_ID": precinct_id,
            "Census_Tract": tract,
            "ACS_2022": readable,
        }));
        csv_rows.push((precinct_id.clone(), tract.clone(), readable));
        info!("Finished processing precinct {} mapped to census tract {}", precinct_id, tract);
    }

    ctx.save_all();
    fs::write(TRACT_TO_PRECINCT, serde_json::to_string_pretty(&ctx.tract_to_precinct)?)?;
    fs::write(OUTPUT_JSON, serde_json::to_string_pretty(&results)?)?;

    // Wide CSV: one row per precinct, one column per (deduplicated) label.
    let mut labels: Vec<&String> = Vec::new();
    let mut seen = HashSet::new();
    for (_, label) in &all_vars {
        if seen.insert(label) {
            labels.push(label);
        }
    }
    let mut writer = csv::Writer::from_path(OUTPUT_CSV)?;
    let mut header = vec!["Precinct_ID", "Census_Tract"];
    header.extend(labels.iter().map(|l| l.as_str()));
    writer.write_record(&header)?;
    for (precinct_id, tract, readable) in &csv_rows {
        let mut row = vec![precinct_id.as_str(), tract.as_str()];
        row.extend(
            labels
                .iter()
                .map(|label| readable.get(*label).map(String::as_str).unwrap_or("")),
        );
        writer.write_record(&row)?;
    }
    writer.flush()?;

    info!("Processing complete.");
    let unique_tracts: HashSet<&String> = ctx.tract_cache.values().collect();
    info!("Unique tracts resolved: {}", unique_tracts.len());
    info!("Failed lookups: {} precincts.", ctx.failed_lookups.len());
    for precinct in &ctx.failed_lookups {
        error!(" - {}", precinct);
    }
    Ok(())
}
