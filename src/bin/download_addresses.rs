use canvass_scraper_lib::addresses::{collect_addresses, ChunkDownloader};
use canvass_scraper_lib::geometry::FeatureCollection;
use canvass_scraper_lib::logger;

use std::error::Error;
use std::path::Path;
use std::time::Duration;
use log::info;

const REST_URL: &str =
    "https://arcgis.gis.lacounty.gov/arcgis/rest/services/DRP/GISNET_Public/MapServer/402/query";
const BOUNDARY_URL: &str =
    "https://open-data-torranceca.hub.arcgis.com/datasets/3bda3af1a3f04b2cb5d3a419eca36924_0.geojson";
const CHUNK_DIR: &str = "cams_chunks";
const FINAL_CSV: &str = "torrance_knockable_addresses.csv";

fn main() -> Result<(), Box<dyn Error>> {
    logger::init();

    let downloader = ChunkDownloader::new(REST_URL, Path::new(CHUNK_DIR));
    let saved = downloader.download_all()?;
    info!("Chunked download finished; {} new rows saved.", saved);

    info!("Fetching city boundary...");
    let http = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(60))
        .build()?;
    let boundary: FeatureCollection = http.get(BOUNDARY_URL).send()?.error_for_status()?.json()?;
    let boundary_geometry = &boundary
        .features
        .first()
        .ok_or("boundary response contained no features")?
        .geometry;

    info!("Reassembling chunks and clipping to the city boundary...");
    let addresses = collect_addresses(Path::new(CHUNK_DIR), boundary_geometry)?;

    let mut writer = csv::Writer::from_path(FINAL_CSV)?;
    for address in &addresses {
        writer.serialize(address)?;
    }
    writer.flush()?;

    info!("Done! Wrote {} unique knockable addresses to {}", addresses.len(), FINAL_CSV);
    Ok(())
}
