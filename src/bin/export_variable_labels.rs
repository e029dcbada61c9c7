use canvass_scraper_lib::census::{CensusClient, CensusEndpoints, PROFILE_GROUPS};
use canvass_scraper_lib::logger;

use std::error::Error;
use log::info;

const OUTPUT_FILE: &str = "acs_variable_labels.csv";

fn main() -> Result<(), Box<dyn Error>> {
    logger::init();

    let client = CensusClient::new(CensusEndpoints::default());
    let labels = client.variable_labels(&PROFILE_GROUPS)?;

    let mut writer = csv::Writer::from_path(OUTPUT_FILE)?;
    writer.write_record(["Variable", "Label"])?;
    for (name, label) in &labels {
        writer.write_record([name, label])?;
    }
    writer.flush()?;

    info!("Exported {} variables to {}", labels.len(), OUTPUT_FILE);
    Ok(())
}
