//! On-disk record of a run: inputs, every HTTP exchange, and the report.
//!
//! Credentials never reach disk. Request headers are not recorded at all, and
//! secret-looking body fields are replaced with [`REDACTED`]. Text bodies have
//! every secret value seen earlier in the run scrubbed, along with anything
//! shaped like `password=...` or `"token": "..."`.

use crate::http::{HttpMethod, ResponseBody};
use crate::model::{RunPolicy, Scenario, ScenarioReport};
use crate::runner::{RunnerError, RunnerResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

pub const REDACTED: &str = "<redacted>";

/// Body fields whose values are replaced before writing.
const SECRET_FIELDS: [&str; 4] = ["password", "access_token", "refresh_token", "token"];

pub const EXCHANGES_FILE: &str = "exchanges.jsonl";

#[derive(Clone, Debug)]
pub struct ArtifactsWriterConfig {
    pub dir: PathBuf,
    pub overwrite: bool,
}

/// One request/response pair, as written to `exchanges.jsonl`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExchangeRecord {
    pub step_index: usize,
    pub step_name: String,
    pub method: HttpMethod,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_body: Option<Value>,
    /// `None` when no response was received.
    pub status: Option<u16>,
    pub elapsed_ms: u64,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_body: Option<ResponseBody>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct ArtifactsWriter {
    dir: PathBuf,
    exchanges: fs::File,
    exchange_count: usize,
    checksums: BTreeMap<String, String>,
    secrets: BTreeSet<String>,
}

impl ArtifactsWriter {
    pub fn new(config: ArtifactsWriterConfig) -> RunnerResult<Self> {
        if config.dir.exists() {
            if !config.overwrite {
                return Err(RunnerError::config(
                    "E_CONFIG",
                    "artifacts directory exists and overwrite is disabled",
                    serde_json::json!({"dir": config.dir}),
                ));
            }
        } else {
            fs::create_dir_all(&config.dir)
                .map_err(|err| RunnerError::io("E_IO", "failed to create artifacts dir", err))?;
        }
        let exchanges = fs::File::create(config.dir.join(EXCHANGES_FILE))
            .map_err(|err| RunnerError::io("E_IO", "failed to create exchanges log", err))?;
        Ok(Self {
            dir: config.dir,
            exchanges,
            exchange_count: 0,
            checksums: BTreeMap::new(),
            secrets: BTreeSet::new(),
        })
    }

    #[must_use]
    pub fn exchange_count(&self) -> usize {
        self.exchange_count
    }

    pub fn write_scenario(&mut self, scenario: &Scenario) -> RunnerResult<()> {
        let mut value = crate::scenario::to_json_value(scenario)?;
        collect_secrets(&value, &mut self.secrets);
        redact_secrets(&mut value);
        self.write_json("scenario.json", &value)
    }

    pub fn write_policy(&mut self, policy: &RunPolicy) -> RunnerResult<()> {
        self.write_json("policy.json", policy)
    }

    pub fn write_report(&mut self, report: &ScenarioReport) -> RunnerResult<()> {
        self.write_json("report.json", &crate::report::to_dict(report))
    }

    pub fn write_exchange(&mut self, record: &ExchangeRecord) -> RunnerResult<()> {
        let mut record = record.clone();
        if let Some(body) = record.request_body.as_mut() {
            collect_secrets(body, &mut self.secrets);
            redact_secrets(body);
        }
        match record.response_body.as_mut() {
            Some(ResponseBody::Json(body)) => {
                collect_secrets(body, &mut self.secrets);
                redact_secrets(body);
            }
            Some(ResponseBody::Text(text)) => *text = redact_text(text, &self.secrets),
            None => {}
        }
        if let Some(error) = record.error.as_mut() {
            *error = redact_text(error, &self.secrets);
        }
        let data = serde_json::to_vec(&record)
            .map_err(|err| RunnerError::io("E_PROTOCOL", "failed to serialize exchange", err))?;
        self.exchanges
            .write_all(&data)
            .map_err(|err| RunnerError::io("E_IO", "failed to write exchanges log", err))?;
        self.exchanges
            .write_all(b"\n")
            .map_err(|err| RunnerError::io("E_IO", "failed to write exchanges log", err))?;
        self.exchanges
            .flush()
            .map_err(|err| RunnerError::io("E_IO", "failed to flush exchanges log", err))?;
        self.exchange_count += 1;
        self.record_checksum(EXCHANGES_FILE)
    }

    fn write_json<T: Serialize>(&mut self, name: &str, value: &T) -> RunnerResult<()> {
        let path = self.dir.join(name);
        let data = serde_json::to_vec_pretty(value)
            .map_err(|err| RunnerError::io("E_PROTOCOL", "failed to serialize", err))?;
        fs::write(&path, data)
            .map_err(|err| RunnerError::io("E_IO", "failed to write artifact", err))?;
        self.record_checksum(name)
    }

    fn record_checksum(&mut self, name: &str) -> RunnerResult<()> {
        let checksum = compute_checksum(&self.dir.join(name))?;
        self.checksums.insert(name.to_string(), checksum);
        self.write_checksums()
    }

    fn write_checksums(&self) -> RunnerResult<()> {
        let data = serde_json::to_vec_pretty(&self.checksums)
            .map_err(|err| RunnerError::io("E_PROTOCOL", "failed to serialize checksums", err))?;
        fs::write(self.dir.join("checksums.json"), data)
            .map_err(|err| RunnerError::io("E_IO", "failed to write checksums", err))
    }
}

/// Replace the values of secret-looking keys, at any depth.
pub fn redact_secrets(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, entry) in map.iter_mut() {
                if SECRET_FIELDS.contains(&key.to_ascii_lowercase().as_str()) && !entry.is_null() {
                    *entry = Value::String(REDACTED.to_string());
                } else {
                    redact_secrets(entry);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(redact_secrets),
        _ => {}
    }
}

/// String values of secret-looking keys, at any depth.
fn collect_secrets(value: &Value, out: &mut BTreeSet<String>) {
    match value {
        Value::Object(map) => {
            for (key, entry) in map {
                match entry {
                    Value::String(secret)
                        if SECRET_FIELDS.contains(&key.to_ascii_lowercase().as_str())
                            && !secret.is_empty()
                            && secret != REDACTED =>
                    {
                        out.insert(secret.clone());
                    }
                    _ => collect_secrets(entry, out),
                }
            }
        }
        Value::Array(items) => items.iter().for_each(|item| collect_secrets(item, out)),
        _ => {}
    }
}

fn secret_assignment() -> Option<&'static regex::Regex> {
    static PATTERN: OnceLock<Option<regex::Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            regex::Regex::new(
                r#"(?i)("?(?:password|access_token|refresh_token|token)"?\s*[:=]\s*"?)([^"&\s,;}]+)"#,
            )
            .ok()
        })
        .as_ref()
}

/// Scrub known secret values and `key=value` style secrets from free text.
pub fn redact_text(text: &str, secrets: &BTreeSet<String>) -> String {
    let mut scrubbed = secrets
        .iter()
        .fold(text.to_string(), |acc, secret| acc.replace(secret.as_str(), REDACTED));
    if let Some(pattern) = secret_assignment() {
        scrubbed = pattern
            .replace_all(&scrubbed, format!("${{1}}{REDACTED}").as_str())
            .into_owned();
    }
    scrubbed
}

fn compute_checksum(path: &Path) -> RunnerResult<String> {
    let data = fs::read(path).map_err(|err| RunnerError::io("E_IO", "failed to read file", err))?;
    Ok(format!("{:016x}", fnv1a_hash(&data)))
}

fn fnv1a_hash(data: &[u8]) -> u64 {
    const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0100_0000_01b3;

    data.iter().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(FNV_PRIME)
    })
}
