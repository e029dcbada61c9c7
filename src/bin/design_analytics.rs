use canvass_scraper_lib::logger;
use canvass_scraper_lib::telemetry::{
    require_env, scan_design_usage, DatadogClient, MetricPoint, MetricResource, MetricSeries,
};

use std::error::Error;
use std::path::PathBuf;
use chrono::Utc;
use log::info;

const DESIGN_SUBDIR: &str = "Packages/DesignSystem";
const EXCLUDED_SUBDIR: &str = "Maven/_CORE/_UTILITIES/_PLAYBOOK";

fn main() -> Result<(), Box<dyn Error>> {
    logger::init();

    let project_dir = PathBuf::from(require_env("BITRISE_SOURCE_DIR")?);
    let usage = scan_design_usage(
        &project_dir,
        &project_dir.join(DESIGN_SUBDIR),
        &project_dir.join(EXCLUDED_SUBDIR),
    )?;

    let timestamp = Utc::now().timestamp();
    let series: Vec<MetricSeries> = usage
        .iter()
        .map(|(view, count)| MetricSeries {
            metric: format!("designSystemUsage.iOS.{}", view),
            intake_type: 0,
            points: vec![MetricPoint { timestamp, value: *count as f64 }],
            tags: Vec::new(),
            resources: vec![MetricResource {
                name: "dummyhost".to_string(),
                resource_type: "host".to_string(),
            }],
        })
        .collect();

    info!("Submitting {} design-system usage series.", series.len());
    DatadogClient::from_env()?.submit_metrics(&series)?;
    Ok(())
}
