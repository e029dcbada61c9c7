use canvass_scraper_lib::logger;
use canvass_scraper_lib::telemetry::{
    parse_target_coverage, parse_total_coverage, require_env, DatadogClient, MetricPoint,
    MetricSeries,
};

use std::env;
use std::error::Error;
use std::fs;
use chrono::Utc;
use log::{info, warn};

fn main() -> Result<(), Box<dyn Error>> {
    logger::init();

    let scheme = require_env("BITRISE_SCHEME")?;
    let mut tags = vec![
        format!("workflow_name:{}", require_env("BITRISE_TRIGGERED_WORKFLOW_TITLE")?),
        format!("branch:{}", require_env("BITRISE_GIT_BRANCH")?),
        format!("commit:{}", require_env("BITRISE_GIT_COMMIT")?),
        format!("build_number:{}", require_env("BITRISE_BUILD_NUMBER")?),
        format!("build_slug:{}", require_env("BITRISE_BUILD_SLUG")?),
        format!("trigger_method:{}", require_env("BITRISE_TRIGGER_METHOD")?),
        format!("triggered_by:{}", require_env("BITRISE_TRIGGER_BY")?),
        format!("app_title:{}", require_env("BITRISE_APP_TITLE")?),
        format!("scheme:{}", scheme),
    ];
    match env::var("BITRISE_GIT_TAG") {
        Ok(release_tag) => tags.push(format!("release_tag:{}", release_tag)),
        Err(_) => info!("Release tag not found."),
    }

    // The readout from the coverage step is a sentence, not a number.
    let readout = require_env("TOTAL_COVERAGE_READOUT")?;
    let mut coverage: Vec<(String, f64)> = Vec::new();
    match parse_total_coverage(&readout) {
        Some(total) => coverage.push(("TotalCoverage".to_string(), total)),
        None => warn!("Could not parse total coverage from readout: {}", readout),
    }

    let report_path = format!("{}-coverage-report.json", scheme);
    coverage.extend(parse_target_coverage(&fs::read_to_string(&report_path)?));

    let timestamp = Utc::now().timestamp();
    let series: Vec<MetricSeries> = coverage
        .into_iter()
        .map(|(target, value)| MetricSeries {
            metric: format!("ci.codeCoverage.iOS.{}.{}", scheme, target),
            intake_type: 0,
            points: vec![MetricPoint { timestamp, value }],
            tags: tags.clone(),
            resources: Vec::new(),
        })
        .collect();

    info!("Submitting {} coverage series.", series.len());
    DatadogClient::from_env()?.submit_metrics(&series)?;
    Ok(())
}
