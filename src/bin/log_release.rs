use canvass_scraper_lib::logger;
use canvass_scraper_lib::telemetry::{require_env, DatadogClient, EventRequest};

use std::error::Error;
use log::info;

fn main() -> Result<(), Box<dyn Error>> {
    logger::init();

    let version = require_env("RM_RELEASE_VERSION")?;
    let event = EventRequest {
        title: format!("Canvass iOS App Version {} Released", version),
        text: format!("Rollout for Canvass iOS version {} has been initiated.", version),
        tags: vec![
            "source:bitrise".to_string(),
            "project:ios".to_string(),
            "service:canvass-ios".to_string(),
            "environment:production".to_string(),
        ],
    };

    DatadogClient::from_env()?.submit_event(&event)?;
    info!("Release event submitted for version {}.", version);
    Ok(())
}
