use canvass_scraper_lib::logger;
use canvass_scraper_lib::telemetry::{require_env, scan_project, DatadogClient, LogItem};

use std::error::Error;
use std::path::PathBuf;
use log::info;

const EVENTS_SUBDIR: &str = "Packages/Telemetry/Sources/Telemetry/Service/Events";
const EXCLUDED_DIRECTORIES: [&str; 2] = ["BuildTools", "_EXTERNAL_LIBRARIES"];

fn main() -> Result<(), Box<dyn Error>> {
    logger::init();

    let project_dir = PathBuf::from(require_env("BITRISE_SOURCE_DIR")?);
    let events_dir = project_dir.join(EVENTS_SUBDIR);

    let metrics = scan_project(&project_dir, &events_dir, &EXCLUDED_DIRECTORIES)?;
    info!(
        "Scanned {} files / {} lines; {} event definitions, {} test functions.",
        metrics.total_files,
        metrics.total_lines,
        metrics.events.len(),
        metrics.tests_by_domain.values().sum::<usize>()
    );

    let client = DatadogClient::from_env()?;
    client.submit_log(&LogItem {
        ddsource: "ios".to_string(),
        ddtags: "env:production".to_string(),
        message: metrics.payload().to_string(),
        service: "canvass-ios".to_string(),
    })?;
    Ok(())
}
