use canvass_scraper_lib::census::decode_tract;
use canvass_scraper_lib::logger;

use std::error::Error;
use std::fs;
use log::info;
use serde_json::json;

const INPUT_FILE: &str = "unique_tracts.json";
const OUTPUT_FILE: &str = "tract_number_mapping.json";

fn main() -> Result<(), Box<dyn Error>> {
    logger::init();

    let fips_codes: Vec<String> = serde_json::from_str(&fs::read_to_string(INPUT_FILE)?)?;

    let mut mappings = Vec::new();
    for fips_code in &fips_codes {
        let tract_number = decode_tract(fips_code);
        info!("{} -> Census Tract {}", fips_code, tract_number);
        mappings.push(json!({
            "fips_code": fips_code,
            "tract_number": tract_number,
            "formatted": format!("Census Tract {}", tract_number),
        }));
    }

    info!("Total tracts: {}", mappings.len());
    fs::write(OUTPUT_FILE, serde_json::to_string_pretty(&mappings)?)?;
    info!("Mapping saved to: {}", OUTPUT_FILE);
    Ok(())
}
