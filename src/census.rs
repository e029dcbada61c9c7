use std::collections::BTreeMap;
use std::time::Duration;
use reqwest::blocking::Client;
use serde::Deserialize;
use log::{info, warn, error};

use crate::cache::JsonCache;

/// ACS data-profile groups carrying the demographic, economic, housing and
/// social characteristics used for precinct enrichment.
pub const PROFILE_GROUPS: [&str; 4] = ["DP02", "DP03", "DP04", "DP05"];

pub const DEFAULT_CHUNK_SIZE: usize = 40;

/// Remote endpoints, overridable so tests can point at a local listener.
pub struct CensusEndpoints {
    pub fcc_block_find: String,
    pub acs_profile: String,
    pub profile_groups_base: String,
}

impl Default for CensusEndpoints {
    fn default() -> Self {
        CensusEndpoints {
            fcc_block_find: "https://geo.fcc.gov/api/census/block/find".to_string(),
            acs_profile: "https://api.census.gov/data/2022/acs/acs5/profile".to_string(),
            profile_groups_base: "https://api.census.gov/data/2022/acs/acs5/profile/groups"
                .to_string(),
        }
    }
}

/// Query constants for the ACS profile endpoint.
pub struct AcsQuery {
    pub state: String,
    pub county: String,
    pub api_key: String,
    pub chunk_size: usize,
}

/// Run state owned by the enrichment loop: the three disk caches, the
/// tract-to-precinct mapping, and the per-run failure list. Passed into
/// each call explicitly; nothing here is process-global.
pub struct EnrichmentContext {
    pub tract_cache: JsonCache<String>,
    pub chunk_cache: JsonCache<BTreeMap<String, String>>,
    pub acs_cache: JsonCache<BTreeMap<String, String>>,
    pub tract_to_precinct: BTreeMap<String, Vec<String>>,
    pub failed_lookups: Vec<String>,
}

impl EnrichmentContext {
    pub fn load(tract_path: &str, chunk_path: &str, acs_path: &str) -> Self {
        EnrichmentContext {
            tract_cache: JsonCache::load(tract_path),
            chunk_cache: JsonCache::load(chunk_path),
            acs_cache: JsonCache::load(acs_path),
            tract_to_precinct: BTreeMap::new(),
            failed_lookups: Vec::new(),
        }
    }

    pub fn save_all(&self) {
        self.tract_cache.save();
        self.chunk_cache.save();
        self.acs_cache.save();
    }
}

pub struct CensusClient {
    http: Client,
    pub endpoints: CensusEndpoints,
}

#[derive(Deserialize)]
struct GroupMetadata {
    variables: BTreeMap<String, VariableMeta>,
}

#[derive(Deserialize)]
struct VariableMeta {
    label: String,
}

#[derive(Deserialize)]
struct BlockFindResponse {
    #[serde(rename = "Block")]
    block: Option<BlockInfo>,
}

#[derive(Deserialize)]
struct BlockInfo {
    #[serde(rename = "FIPS")]
    fips: Option<String>,
}

impl CensusClient {
    pub fn new(endpoints: CensusEndpoints) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to build census HTTP client");
        CensusClient { http, endpoints }
    }

    /// Fetches every estimate variable (names not ending in `M`, which are
    /// margins of error) for the given profile groups, as (name, label)
    /// pairs in name order.
    pub fn variable_labels(&self, groups: &[&str]) -> Result<Vec<(String, String)>, reqwest::Error> {
        let mut vars = Vec::new();
        for group in groups {
            let url = format!("{}/{}.json", self.endpoints.profile_groups_base, group);
            info!("Fetching variable metadata for group {}", group);
            let meta: GroupMetadata = self.http.get(&url).send()?.error_for_status()?.json()?;
            for (name, variable) in meta.variables {
                if !name.ends_with('M') {
                    vars.push((name, variable.label));
                }
            }
        }
        Ok(vars)
    }

    /// Resolves the census tract containing a point, memoized per precinct.
    /// A lookup failure records the precinct in the failure list and returns
    /// None; the caller moves on to the next precinct.
    pub fn resolve_tract(
        &self,
        precinct_id: &str,
        lat: f64,
        lon: f64,
        ctx: &mut EnrichmentContext,
    ) -> Option<String> {
        if let Some(tract) = ctx.tract_cache.get(precinct_id) {
            info!(
                "Using cached tract {} for precinct {} at lat={}, lon={}",
                tract, precinct_id, lat, lon
            );
            return Some(tract.clone());
        }

        info!("Querying FCC for centroid lat={}, lon={}...", lat, lon);
        let response = match self
            .http
            .get(&self.endpoints.fcc_block_find)
            .query(&[
                ("latitude", lat.to_string()),
                ("longitude", lon.to_string()),
                ("format", "json".to_string()),
            ])
            .send()
        {
            Ok(r) => r,
            Err(e) => {
                error!("FCC request failed for precinct {}: {}", precinct_id, e);
                ctx.failed_lookups.push(precinct_id.to_string());
                return None;
            }
        };

        if !response.status().is_success() {
            error!(
                "Error fetching FCC block for precinct {} at lat={}, lon={}. Status: {}",
                precinct_id,
                lat,
                lon,
                response.status()
            );
            ctx.failed_lookups.push(precinct_id.to_string());
            return None;
        }

        let fips = response
            .json::<BlockFindResponse>()
            .ok()
            .and_then(|r| r.block)
            .and_then(|b| b.fips);
        let fips = match fips {
            Some(f) if f.len() >= 11 => f,
            _ => {
                error!("No FIPS found for precinct {} in FCC response.", precinct_id);
                ctx.failed_lookups.push(precinct_id.to_string());
                return None;
            }
        };

        let tract = fips[..11].to_string();
        ctx.tract_cache.insert(precinct_id.to_string(), tract.clone());
        ctx.tract_cache.save();
        info!(
            "Resolved tract {} for precinct {} at centroid lat={}, lon={}",
            tract, precinct_id, lat, lon
        );
        Some(tract)
    }

    /// Fetches every variable batch for one tract, consulting the chunk
    /// cache first. Both caches are persisted after each fetched batch. On
    /// a failed batch the precinct goes to the failure list and the
    /// remaining batches for this tract are abandoned; fields gathered so
    /// far stay in the aggregate cache, and other precincts are
    /// unaffected. Returns whether all batches were satisfied.
    pub fn fetch_tract_profile(
        &self,
        tract: &str,
        precinct_id: &str,
        variable_names: &[String],
        query: &AcsQuery,
        ctx: &mut EnrichmentContext,
    ) -> bool {
        let mut accumulated = ctx.acs_cache.get(tract).cloned().unwrap_or_default();

        for batch in chunk_fields(variable_names, query.chunk_size) {
            let key = chunk_cache_key(tract, &batch);
            if let Some(cached) = ctx.chunk_cache.get(&key) {
                info!("Skipping cached chunk for tract {}", tract);
                accumulated.extend(cached.clone());
                continue;
            }

            info!(
                "Fetching ACS data for tract {} with {} variables...",
                tract,
                batch.len()
            );
            let mut params = vec![
                ("get".to_string(), batch.join(",")),
                ("for".to_string(), format!("tract:{}", &tract[tract.len() - 6..])),
                (
                    "in".to_string(),
                    format!("state:{} county:{}", query.state, query.county),
                ),
            ];
            if !query.api_key.is_empty() {
                params.push(("key".to_string(), query.api_key.clone()));
            }

            let response = match self
                .http
                .get(&self.endpoints.acs_profile)
                .query(&params)
                .send()
            {
                Ok(r) => r,
                Err(e) => {
                    error!("ACS request failed for {}: {}", precinct_id, e);
                    ctx.failed_lookups.push(precinct_id.to_string());
                    ctx.acs_cache.insert(tract.to_string(), accumulated);
                    return false;
                }
            };
            if !response.status().is_success() {
                error!(
                    "Error fetching chunk for {}: {}",
                    precinct_id,
                    response.status()
                );
                ctx.failed_lookups.push(precinct_id.to_string());
                ctx.acs_cache.insert(tract.to_string(), accumulated);
                return false;
            }

            // Row-oriented response: first row is the header, second the values.
            let rows: Vec<Vec<Option<String>>> = match response.json() {
                Ok(r) => r,
                Err(e) => {
                    error!("Malformed ACS response for {}: {}", precinct_id, e);
                    ctx.failed_lookups.push(precinct_id.to_string());
                    ctx.acs_cache.insert(tract.to_string(), accumulated);
                    return false;
                }
            };
            let (headers, values) = match (rows.first(), rows.get(1)) {
                (Some(h), Some(v)) => (h, v),
                _ => {
                    warn!("ACS returned no data rows for tract {}", tract);
                    ctx.failed_lookups.push(precinct_id.to_string());
                    ctx.acs_cache.insert(tract.to_string(), accumulated);
                    return false;
                }
            };

            let mut chunk_fields_map = BTreeMap::new();
            for (header, value) in headers.iter().zip(values.iter()) {
                if let Some(name) = header {
                    chunk_fields_map
                        .insert(name.clone(), value.clone().unwrap_or_default());
                }
            }
            info!("Retrieved {} ACS fields for this chunk.", chunk_fields_map.len());

            accumulated.extend(chunk_fields_map.clone());
            ctx.chunk_cache.insert(key, chunk_fields_map);
            ctx.acs_cache.insert(tract.to_string(), accumulated.clone());
            ctx.chunk_cache.save();
            ctx.acs_cache.save();
        }

        ctx.acs_cache.insert(tract.to_string(), accumulated);
        true
    }
}

/// Partitions a field list into consecutive batches of at most `size`,
/// keeping the caller's order. `ceil(n / size)` batches; together they
/// cover the input exactly once.
pub fn chunk_fields(fields: &[String], size: usize) -> Vec<Vec<String>> {
    fields.chunks(size.max(1)).map(|c| c.to_vec()).collect()
}

/// Cache key for one batch: the tract plus the batch's field names sorted,
/// so a hit does not depend on the caller's iteration order.
pub fn chunk_cache_key(tract: &str, batch: &[String]) -> String {
    let mut sorted: Vec<&str> = batch.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    format!("{}|{}", tract, sorted.join("|"))
}

/// Decodes an 11-digit tract FIPS to the human tract number: the last six
/// digits over 100, with trailing zeros and a bare dot stripped.
pub fn decode_tract(fips_code: &str) -> String {
    if fips_code.len() < 6 {
        return fips_code.to_string();
    }
    let tract_code = &fips_code[fips_code.len() - 6..];
    let n: u32 = match tract_code.parse() {
        Ok(n) => n,
        Err(_) => return tract_code.to_string(),
    };
    let whole = n / 100;
    let frac = n % 100;
    if frac == 0 {
        whole.to_string()
    } else {
        format!("{}.{:02}", whole, frac)
            .trim_end_matches('0')
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    fn fields(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("DP02_{:04}E", i)).collect()
    }

    #[test]
    fn chunking_yields_ceil_batches_covering_input_once() {
        let input = fields(87);
        let batches = chunk_fields(&input, 40);
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].len(), 40);
        assert_eq!(batches[1].len(), 40);
        assert_eq!(batches[2].len(), 7);

        let mut flattened: Vec<String> = batches.into_iter().flatten().collect();
        assert_eq!(flattened.len(), 87);
        flattened.sort();
        flattened.dedup();
        assert_eq!(flattened.len(), 87);
    }

    #[test]
    fn chunk_key_is_order_independent() {
        let a = vec!["DP02_0002E".to_string(), "DP02_0001E".to_string()];
        let b = vec!["DP02_0001E".to_string(), "DP02_0002E".to_string()];
        assert_eq!(chunk_cache_key("06037650503", &a), chunk_cache_key("06037650503", &b));
        assert_eq!(
            chunk_cache_key("06037650503", &a),
            "06037650503|DP02_0001E|DP02_0002E"
        );
    }

    #[test]
    fn tract_decoding_strips_trailing_zeros() {
        assert_eq!(decode_tract("06037650103"), "6501.03");
        assert_eq!(decode_tract("06037214600"), "2146");
        assert_eq!(decode_tract("06037650310"), "6503.1");
    }

    /// Serves one canned HTTP response per expected connection, in order.
    fn serve(responses: Vec<(u16, String)>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            for (status, body) in responses {
                let (mut stream, _) = listener.accept().unwrap();
                let mut buf = [0u8; 8192];
                let _ = stream.read(&mut buf);
                let reason = if status == 200 { "OK" } else { "Internal Server Error" };
                let response = format!(
                    "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    reason,
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes());
            }
        });
        format!("http://{}", addr)
    }

    fn test_context(dir: &std::path::Path) -> EnrichmentContext {
        EnrichmentContext::load(
            dir.join("tract_cache.json").to_str().unwrap(),
            dir.join("chunk_cache.json").to_str().unwrap(),
            dir.join("acs_cache.json").to_str().unwrap(),
        )
    }

    fn test_query() -> AcsQuery {
        AcsQuery {
            state: "06".to_string(),
            county: "037".to_string(),
            api_key: String::new(),
            chunk_size: 40,
        }
    }

    #[test]
    fn server_error_isolates_one_precinct_and_spares_the_rest() {
        let acs_body = r#"[["DP02_0001E","state","county","tract"],["1432","06","037","650503"]]"#;
        let base = serve(vec![
            (500, "{}".to_string()),
            (200, acs_body.to_string()),
        ]);

        let client = CensusClient::new(CensusEndpoints {
            fcc_block_find: format!("{}/fcc", base),
            acs_profile: format!("{}/acs", base),
            profile_groups_base: format!("{}/groups", base),
        });

        let dir = tempfile::tempdir().unwrap();
        let mut ctx = test_context(dir.path());
        let vars = vec!["DP02_0001E".to_string()];

        let first = client.fetch_tract_profile("06037650101", "0650054A", &vars, &test_query(), &mut ctx);
        assert!(!first);
        assert_eq!(ctx.failed_lookups, vec!["0650054A".to_string()]);

        let second = client.fetch_tract_profile("06037650503", "0650033B", &vars, &test_query(), &mut ctx);
        assert!(second);
        assert_eq!(ctx.failed_lookups.len(), 1);
        let fetched = ctx.acs_cache.get("06037650503").unwrap();
        assert_eq!(fetched.get("DP02_0001E").map(String::as_str), Some("1432"));
    }

    #[test]
    fn failed_batch_keeps_the_fields_gathered_before_it() {
        let acs_body = r#"[["DP02_0001E","state","county","tract"],["1432","06","037","650503"]]"#;
        let base = serve(vec![
            (200, acs_body.to_string()),
            (500, "{}".to_string()),
        ]);
        let client = CensusClient::new(CensusEndpoints {
            fcc_block_find: format!("{}/fcc", base),
            acs_profile: format!("{}/acs", base),
            profile_groups_base: format!("{}/groups", base),
        });

        let dir = tempfile::tempdir().unwrap();
        let mut ctx = test_context(dir.path());
        // 41 fields at chunk size 40: the second batch hits the 500.
        let vars = fields(41);

        let ok = client.fetch_tract_profile("06037650503", "0650054A", &vars, &test_query(), &mut ctx);
        assert!(!ok);
        assert_eq!(ctx.failed_lookups, vec!["0650054A".to_string()]);
        let partial = ctx.acs_cache.get("06037650503").unwrap();
        assert_eq!(partial.get("DP02_0001E").map(String::as_str), Some("1432"));
    }

    #[test]
    fn cached_chunk_skips_the_remote_call() {
        // No responses queued: any remote call would fail the fetch.
        let base = serve(vec![]);
        let client = CensusClient::new(CensusEndpoints {
            fcc_block_find: format!("{}/fcc", base),
            acs_profile: format!("{}/acs", base),
            profile_groups_base: format!("{}/groups", base),
        });

        let dir = tempfile::tempdir().unwrap();
        let mut ctx = test_context(dir.path());
        let vars = vec!["DP02_0001E".to_string()];

        let mut cached = BTreeMap::new();
        cached.insert("DP02_0001E".to_string(), "99".to_string());
        ctx.chunk_cache
            .insert(chunk_cache_key("06037650503", &vars), cached);

        let ok = client.fetch_tract_profile("06037650503", "0650054A", &vars, &test_query(), &mut ctx);
        assert!(ok);
        assert!(ctx.failed_lookups.is_empty());
        assert_eq!(
            ctx.acs_cache.get("06037650503").unwrap().get("DP02_0001E").map(String::as_str),
            Some("99")
        );
    }

    #[test]
    fn resolved_tract_is_memoized_per_precinct() {
        let fcc_body = r#"{"Block":{"FIPS":"060376505031001"}}"#;
        let base = serve(vec![(200, fcc_body.to_string())]);
        let client = CensusClient::new(CensusEndpoints {
            fcc_block_find: format!("{}/fcc", base),
            acs_profile: format!("{}/acs", base),
            profile_groups_base: format!("{}/groups", base),
        });

        let dir = tempfile::tempdir().unwrap();
        let mut ctx = test_context(dir.path());

        let tract = client.resolve_tract("0650054A", 33.83, -118.34, &mut ctx);
        assert_eq!(tract.as_deref(), Some("06037650503"));

        // Second call must hit the cache; the server has no responses left.
        let again = client.resolve_tract("0650054A", 33.83, -118.34, &mut ctx);
        assert_eq!(again.as_deref(), Some("06037650503"));
        assert!(ctx.failed_lookups.is_empty());
    }

    #[test]
    fn failed_fcc_lookup_goes_to_the_failure_list() {
        let base = serve(vec![(500, "{}".to_string())]);
        let client = CensusClient::new(CensusEndpoints {
            fcc_block_find: format!("{}/fcc", base),
            acs_profile: format!("{}/acs", base),
            profile_groups_base: format!("{}/groups", base),
        });

        let dir = tempfile::tempdir().unwrap();
        let mut ctx = test_context(dir.path());
        assert!(client.resolve_tract("0650099Z", 33.8, -118.3, &mut ctx).is_none());
        assert_eq!(ctx.failed_lookups, vec!["0650099Z".to_string()]);
    }
}
