use canvass_scraper_lib::logger;

use std::cmp::Ordering;
use std::error::Error;
use std::fs;
use log::{info, warn};
use serde_json::Value;

const INPUT_FILE: &str = "Precinct_ACS_FullOverlay.json";

/// Labels that indicate rent burden or rent costs.
const RENT_BURDEN_KEYWORDS: [&str; 5] = [
    "gross rent as a percentage of household income",
    "selected monthly owner costs as a percentage of household income",
    "renters paying 30 percent or more of income",
    "monthly housing costs",
    "median gross rent",
];

struct PrecinctRow {
    precinct_id: String,
    tract: String,
    fields: Vec<(String, Option<f64>)>,
}

impl PrecinctRow {
    fn value_of(&self, label: &str) -> Option<f64> {
        self.fields
            .iter()
            .find(|(l, _)| l == label)
            .and_then(|(_, v)| *v)
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    logger::init();

    let precincts: Vec<Value> = serde_json::from_str(&fs::read_to_string(INPUT_FILE)?)?;

    let mut rows = Vec::new();
    for entry in &precincts {
        let mut fields = Vec::new();
        if let Some(acs) = entry["ACS_2022"].as_object() {
            for (label, value) in acs {
                let lowered = label.to_lowercase();
                if RENT_BURDEN_KEYWORDS.iter().any(|k| lowered.contains(k)) {
                    let numeric = value.as_str().and_then(|v| v.parse::<f64>().ok());
                    fields.push((label.clone(), numeric));
                }
            }
        }
        rows.push(PrecinctRow {
            precinct_id: entry["Precinct_ID"].as_str().unwrap_or("").to_string(),
            tract: entry["Census_Tract"].as_str().unwrap_or("").to_string(),
            fields,
        });
    }

    // Rank by the first burden-percentage column present in the data.
    let sort_label = rows
        .iter()
        .flat_map(|row| row.fields.iter())
        .map(|(label, _)| label.clone())
        .find(|label| label.to_lowercase().contains("30 percent or more"));
    match &sort_label {
        Some(label) => rows.sort_by(|a, b| {
            let left = a.value_of(label).unwrap_or(f64::NEG_INFINITY);
            let right = b.value_of(label).unwrap_or(f64::NEG_INFINITY);
            right.partial_cmp(&left).unwrap_or(Ordering::Equal)
        }),
        None => warn!("No rent-burden percentage column found; keeping input order."),
    }

    info!("Highest rent burden by precinct:");
    info!("================================");
    for row in &rows {
        let headline = sort_label.as_deref().and_then(|label| row.value_of(label));
        match headline {
            Some(value) => info!(" - {} (tract {}): {}", row.precinct_id, row.tract, value),
            None => info!(" - {} (tract {}): n/a", row.precinct_id, row.tract),
        }
    }
    Ok(())
}
