use std::collections::BTreeMap;
use std::env;
use std::path::Path;
use std::time::Duration;
use regex::Regex;
use reqwest::blocking::Client;
use serde::Serialize;
use serde_json::json;
use log::{info, warn};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("missing required environment variable {0}")]
    MissingEnv(String),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("intake rejected the payload: {0}")]
    Rejected(reqwest::StatusCode),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub fn require_env(name: &str) -> Result<String, TelemetryError> {
    env::var(name).map_err(|_| TelemetryError::MissingEnv(name.to_string()))
}

#[derive(Debug, Serialize)]
pub struct LogItem {
    pub ddsource: String,
    pub ddtags: String,
    pub message: String,
    pub service: String,
}

#[derive(Debug, Serialize)]
pub struct MetricPoint {
    pub timestamp: i64,
    pub value: f64,
}

#[derive(Debug, Serialize)]
pub struct MetricResource {
    pub name: String,
    #[serde(rename = "type")]
    pub resource_type: String,
}

#[derive(Debug, Serialize)]
pub struct MetricSeries {
    pub metric: String,
    #[serde(rename = "type")]
    pub intake_type: u8,
    pub points: Vec<MetricPoint>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<MetricResource>,
}

#[derive(Debug, Serialize)]
pub struct EventRequest {
    pub title: String,
    pub text: String,
    pub tags: Vec<String>,
}

/// Thin client for the observability backend's intake endpoints. Only the
/// payload assembly and the authenticated POST live here.
pub struct DatadogClient {
    http: Client,
    api_key: String,
    pub logs_url: String,
    pub metrics_url: String,
    pub events_url: String,
}

impl DatadogClient {
    pub fn new(api_key: String, site: &str) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to build telemetry HTTP client");
        DatadogClient {
            http,
            api_key,
            logs_url: format!("https://http-intake.logs.{}/api/v2/logs", site),
            metrics_url: format!("https://api.{}/api/v2/series", site),
            events_url: format!("https://api.{}/api/v1/events", site),
        }
    }

    pub fn from_env() -> Result<Self, TelemetryError> {
        let api_key = require_env("DATADOG_API_KEY")?;
        Ok(DatadogClient::new(api_key, "datadoghq.com"))
    }

    fn post(&self, url: &str, body: &serde_json::Value) -> Result<(), TelemetryError> {
        let response = self
            .http
            .post(url)
            .header("DD-API-KEY", &self.api_key)
            .json(body)
            .send()?;
        if !response.status().is_success() {
            return Err(TelemetryError::Rejected(response.status()));
        }
        info!("Submitted telemetry payload to {}", url);
        Ok(())
    }

    pub fn submit_log(&self, item: &LogItem) -> Result<(), TelemetryError> {
        self.post(&self.logs_url, &json!([item]))
    }

    pub fn submit_metrics(&self, series: &[MetricSeries]) -> Result<(), TelemetryError> {
        self.post(&self.metrics_url, &json!({ "series": series }))
    }

    pub fn submit_event(&self, event: &EventRequest) -> Result<(), TelemetryError> {
        self.post(&self.events_url, &json!(event))
    }
}

/// Pulls the percentage out of a coverage readout like
/// `"Total coverage: 57.3% (lines)"`.
pub fn parse_total_coverage(readout: &str) -> Option<f64> {
    let (_, rest) = readout.split_once(": ")?;
    let (percentage, _) = rest.split_once('%')?;
    percentage.trim().parse().ok()
}

/// Per-target line coverage from a report of `{"name", "lineCoverage"}`
/// objects. Entries missing either field are dropped.
pub fn parse_target_coverage(report: &str) -> Vec<(String, f64)> {
    let parsed: Vec<serde_json::Value> = match serde_json::from_str(report) {
        Ok(v) => v,
        Err(e) => {
            warn!("Unreadable coverage report: {}", e);
            return Vec::new();
        }
    };
    parsed
        .into_iter()
        .filter_map(|item| {
            let name = item.get("name")?.as_str()?.to_string();
            let coverage = item.get("lineCoverage")?.as_f64()?;
            Some((name, coverage))
        })
        .collect()
}

#[derive(Debug, Default)]
pub struct ProjectMetrics {
    pub total_files: usize,
    pub total_lines: usize,
    pub tests_by_domain: BTreeMap<String, usize>,
    pub test_runs_by_domain: BTreeMap<String, usize>,
    /// Event definitions as (defining file stem, event name).
    pub events: Vec<(String, String)>,
    pub usage_by_domain: BTreeMap<String, usize>,
}

impl ProjectMetrics {
    pub fn payload(&self) -> serde_json::Value {
        json!({
            "message": "project_metrics_payload",
            "telemetry": {
                "total_event_domains": self.usage_by_domain.len(),
                "total_event_definitions": self.events.len(),
                "total_event_usages": self.usage_by_domain.values().sum::<usize>(),
                "usage_by_domain": self.usage_by_domain,
            },
            "tests": {
                "total_tests": self.tests_by_domain.values().sum::<usize>(),
                "total_test_runs": self.test_runs_by_domain.values().sum::<usize>(),
                "tests_by_domain": self.tests_by_domain,
                "test_runs_by_domain": self.test_runs_by_domain,
            },
            "total_lines": self.total_lines,
            "total_files": self.total_files,
        })
    }
}

fn domain_for(root: &Path, file: &Path) -> String {
    let relative = file.strip_prefix(root).unwrap_or(file);
    let mut components = relative.components().filter_map(|c| c.as_os_str().to_str());
    match components.next() {
        Some("Packages") => components.next().unwrap_or("Packages").to_string(),
        Some(first) => first.to_string(),
        None => "root".to_string(),
    }
}

/// Splits on commas at parenthesis/bracket depth zero, so argument lists
/// containing tuples or nested arrays count correctly.
fn split_top_level_commas(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0usize;
    for (i, c) in text.char_indices() {
        match c {
            '(' | '[' => depth += 1,
            ')' | ']' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(text[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        parts.push(tail);
    }
    parts
}

/// Walks an app source tree and aggregates the numbers the nightly metrics
/// job reports: file/line totals, test function and test run counts per
/// top-level domain, and telemetry event definitions with their usages.
pub fn scan_project(
    root: &Path,
    events_dir: &Path,
    excluded_directories: &[&str],
) -> Result<ProjectMetrics, TelemetryError> {
    let mut metrics = ProjectMetrics::default();

    let event_definition = Regex::new(r"let\s+(\w+)\s*=\s*Event").unwrap();
    let test_usage = Regex::new(r"(func test|@Test func).+\(.*?\)").unwrap();
    let test_arguments = Regex::new(r"(?s)@Test\(arguments: \[(.*?)\]\)").unwrap();

    // Event declarations live in Events+*.swift files under the events dir.
    if events_dir.exists() {
        for entry in WalkDir::new(events_dir).into_iter().filter_map(Result::ok) {
            let name = entry.file_name().to_string_lossy();
            if !(name.starts_with("Events+") && name.ends_with(".swift")) {
                continue;
            }
            let stem = name.trim_end_matches(".swift").to_string();
            let content = std::fs::read_to_string(entry.path())?;
            for capture in event_definition.captures_iter(&content) {
                metrics.events.push((stem.clone(), capture[1].to_string()));
            }
        }
    }

    let usage_patterns: Vec<(String, Regex)> = metrics
        .events
        .iter()
        .map(|(stem, event)| {
            (
                stem.clone(),
                Regex::new(&format!(r"Telemetry\..+{}", regex::escape(event))).unwrap(),
            )
        })
        .collect();

    for entry in WalkDir::new(root).into_iter().filter_map(Result::ok) {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("swift") {
            continue;
        }
        let excluded = path.components().any(|c| {
            c.as_os_str()
                .to_str()
                .map_or(false, |s| excluded_directories.contains(&s))
        });
        if excluded {
            continue;
        }

        metrics.total_files += 1;
        let content = std::fs::read_to_string(path)?;
        let domain = domain_for(root, path);
        let in_events_package = path.starts_with(events_dir);

        for line in content.lines() {
            metrics.total_lines += 1;
            if test_usage.is_match(line) {
                *metrics.tests_by_domain.entry(domain.clone()).or_default() += 1;
                *metrics.test_runs_by_domain.entry(domain.clone()).or_default() += 1;
            }
            if !in_events_package {
                for (stem, pattern) in &usage_patterns {
                    if pattern.is_match(line) {
                        *metrics.usage_by_domain.entry(stem.clone()).or_default() += 1;
                    }
                }
            }
        }

        // Parameterized tests run once per argument; the argument list can
        // span lines, so this pass reads the whole file.
        for capture in test_arguments.captures_iter(&content) {
            let runs = split_top_level_commas(&capture[1]).len();
            *metrics.tests_by_domain.entry(domain.clone()).or_default() += 1;
            *metrics.test_runs_by_domain.entry(domain.clone()).or_default() += runs;
        }
    }

    Ok(metrics)
}

/// Counts how often each design-system view is constructed outside the
/// design-system package itself. A view is any type declared `: View {`
/// in a design-system source file; usages are call-style occurrences of
/// the defining file's stem. A synthetic `total` entry sums the rest.
pub fn scan_design_usage(
    root: &Path,
    design_dir: &Path,
    excluded_dir: &Path,
) -> Result<BTreeMap<String, usize>, TelemetryError> {
    let view_declaration = Regex::new(r": View \{").unwrap();

    let mut views = Vec::new();
    if design_dir.exists() {
        for entry in WalkDir::new(design_dir).into_iter().filter_map(Result::ok) {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("swift") {
                continue;
            }
            let content = std::fs::read_to_string(path)?;
            if view_declaration.is_match(&content) {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    views.push(stem.to_string());
                }
            }
        }
    }
    views.sort();
    views.dedup();

    let patterns: Vec<(String, Regex)> = views
        .iter()
        .map(|view| {
            (
                view.clone(),
                Regex::new(&format!(r"\s+{}\(", regex::escape(view))).unwrap(),
            )
        })
        .collect();

    let mut usage: BTreeMap<String, usize> = views.iter().map(|v| (v.clone(), 0)).collect();
    for entry in WalkDir::new(root).into_iter().filter_map(Result::ok) {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("swift") {
            continue;
        }
        if path.starts_with(design_dir) || path.starts_with(excluded_dir) {
            continue;
        }
        let content = std::fs::read_to_string(path)?;
        for line in content.lines() {
            for (view, pattern) in &patterns {
                if pattern.is_match(line) {
                    *usage.entry(view.clone()).or_default() += 1;
                }
            }
        }
    }

    let total: usize = usage.values().sum();
    usage.insert("total".to_string(), total);
    Ok(usage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn total_coverage_readout_parses_to_a_percentage() {
        assert_eq!(parse_total_coverage("Total coverage: 57.3% of lines"), Some(57.3));
        assert_eq!(parse_total_coverage("no percentage here"), None);
    }

    #[test]
    fn target_coverage_report_drops_incomplete_entries() {
        let report = r#"[
            {"name": "Canvass", "lineCoverage": 0.82},
            {"name": "NoCoverage"},
            {"lineCoverage": 0.5}
        ]"#;
        let targets = parse_target_coverage(report);
        assert_eq!(targets, vec![("Canvass".to_string(), 0.82)]);
    }

    #[test]
    fn top_level_comma_split_respects_nesting() {
        assert_eq!(
            split_top_level_commas("1, (2, 3), [4, 5], 6"),
            vec!["1", "(2, 3)", "[4, 5]", "6"]
        );
    }

    #[test]
    fn scan_counts_tests_events_and_usages() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let events_dir = root.join("Packages/Telemetry/Sources/Telemetry/Service/Events");
        fs::create_dir_all(&events_dir).unwrap();
        fs::create_dir_all(root.join("Packages/Auth/Tests")).unwrap();

        fs::write(
            events_dir.join("Events+Auth.swift"),
            "public static let signInTapped = Event(name: \"sign_in\")\n",
        )
        .unwrap();
        fs::write(
            root.join("Packages/Auth/Tests/AuthTests.swift"),
            concat!(
                "func test_signIn() {}\n",
                "@Test func test_signOut() {}\n",
                "@Test(arguments: [1, 2, 3])\n",
                "func test_retry(count: Int) {}\n",
                "Telemetry.shared.track(signInTapped)\n",
            ),
        )
        .unwrap();

        let metrics = scan_project(root, &events_dir, &["BuildTools"]).unwrap();
        assert_eq!(metrics.total_files, 2);
        assert_eq!(metrics.events.len(), 1);
        // Three per-line matches plus one parameterized test declaration.
        assert_eq!(metrics.tests_by_domain.get("Auth"), Some(&4));
        // The parameterized test contributes one run per argument.
        assert_eq!(metrics.test_runs_by_domain.get("Auth"), Some(&6));
        assert_eq!(metrics.usage_by_domain.get("Events+Auth"), Some(&1));

        let payload = metrics.payload();
        assert_eq!(payload["tests"]["total_test_runs"], 6);
        assert_eq!(payload["telemetry"]["total_event_usages"], 1);
    }

    #[test]
    fn design_usage_counts_construction_sites_outside_the_package() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let design_dir = root.join("Packages/DesignSystem");
        let excluded_dir = root.join("Maven/_CORE/_UTILITIES/_PLAYBOOK");
        fs::create_dir_all(design_dir.join("Sources")).unwrap();
        fs::create_dir_all(&excluded_dir).unwrap();
        fs::create_dir_all(root.join("Packages/Home")).unwrap();

        fs::write(
            design_dir.join("Sources/PrimaryButton.swift"),
            "struct PrimaryButton: View {\n    var body: some View { EmptyView() }\n}\n",
        )
        .unwrap();
        fs::write(
            design_dir.join("Sources/Spacing.swift"),
            "enum Spacing {\n    static let small: CGFloat = 4\n}\n",
        )
        .unwrap();
        fs::write(
            root.join("Packages/Home/HomeView.swift"),
            concat!(
                "var body: some View {\n",
                "    PrimaryButton(title: \"Knock\")\n",
                "    PrimaryButton(title: \"Skip\")\n",
                "}\n",
            ),
        )
        .unwrap();
        // Usages inside the playbook directory must not count.
        fs::write(
            excluded_dir.join("Playbook.swift"),
            "    PrimaryButton(title: \"Demo\")\n",
        )
        .unwrap();

        let usage = scan_design_usage(root, &design_dir, &excluded_dir).unwrap();
        assert_eq!(usage.get("PrimaryButton"), Some(&2));
        assert_eq!(usage.get("Spacing"), None);
        assert_eq!(usage.get("total"), Some(&2));
    }

    #[test]
    fn missing_api_key_is_a_hard_configuration_error() {
        env::remove_var("DATADOG_API_KEY");
        assert!(matches!(
            DatadogClient::from_env(),
            Err(TelemetryError::MissingEnv(_))
        ));
    }
}
