use canvass_scraper_lib::addresses::filter_city_addresses;
use canvass_scraper_lib::logger;

use std::error::Error;
use std::path::Path;
use log::{info, error};

const INPUT_FILE: &str = "source.geojson.gz";
const OUTPUT_FILE: &str = "torrance_addresses.csv";
const CITY: &str = "torrance";

fn main() -> Result<(), Box<dyn Error>> {
    logger::init();
    let written = filter_city_addresses(Path::new(INPUT_FILE), Path::new(OUTPUT_FILE), CITY)?;
    if written > 0 {
        info!("Wrote {} {} addresses to {}", written, CITY, OUTPUT_FILE);
    } else {
        error!("No valid addresses found or file is malformed.");
    }
    Ok(())
}
