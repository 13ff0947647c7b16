//! Container Linux Config to Ignition
//!
//! The `ct` postprocessor: user data written as a Container Linux Config
//! (YAML, snake_case keys) is converted to an Ignition 2.2.0 JSON document.
//! Only the sections that map directly onto Ignition are accepted.

use serde_json::{Map, Value, json};
use thiserror::Error;

/// Ignition spec version emitted
pub const IGNITION_VERSION: &str = "2.2.0";

/// Filesystem assumed for files, directories and links that name none
const DEFAULT_FILESYSTEM: &str = "root";

const SECTIONS: &[&str] = &["ignition", "storage", "systemd", "networkd", "passwd"];

#[derive(Debug, Error)]
pub enum TranspileError {
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("config must be a mapping")]
    NotAMapping,

    #[error("unsupported config section {0:?}")]
    UnsupportedSection(String),

    #[error("{0} entry is missing a path")]
    MissingPath(&'static str),

    #[error("file {0} has both inline and remote contents")]
    AmbiguousContents(String),

    #[error("failed to encode config: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Convert a Container Linux Config into Ignition JSON.
pub fn transpile(config: &str) -> Result<String, TranspileError> {
    let parsed: Value = if config.trim().is_empty() {
        Value::Null
    } else {
        serde_yaml::from_str(config)?
    };
    let sections = match parsed {
        Value::Null => Map::new(),
        Value::Object(map) => map,
        _ => return Err(TranspileError::NotAMapping),
    };

    let mut ignition = json!({
        "ignition": {
            "config": {},
            "security": {"tls": {}},
            "timeouts": {},
            "version": IGNITION_VERSION,
        },
        "networkd": {},
        "passwd": {},
        "storage": {},
        "systemd": {},
    });

    for (name, section) in sections {
        if !SECTIONS.contains(&name.as_str()) {
            return Err(TranspileError::UnsupportedSection(name));
        }
        let mut section = camel_case_keys(section);
        match name.as_str() {
            "storage" => convert_storage(&mut section)?,
            "ignition" => {
                // The emitted version always wins
                if let Value::Object(map) = &mut section {
                    map.remove("version");
                }
            }
            _ => {}
        }
        if let (Some(Value::Object(target)), Value::Object(map)) = (ignition.get_mut(&name), section) {
            target.extend(map);
        }
    }

    Ok(serde_json::to_string(&ignition)?)
}

/// `ssh_authorized_keys` -> `sshAuthorizedKeys`, recursively.
fn camel_case_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| (camel_case(&key), camel_case_keys(value)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(camel_case_keys).collect()),
        other => other,
    }
}

fn camel_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut upper = false;
    for c in key.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

fn convert_storage(storage: &mut Value) -> Result<(), TranspileError> {
    for (kind, label) in [("files", "file"), ("directories", "directory"), ("links", "link")] {
        let Some(Value::Array(entries)) = storage.get_mut(kind) else {
            continue;
        };
        for entry in entries.iter_mut() {
            let Value::Object(entry) = entry else {
                continue;
            };
            if !entry.get("path").is_some_and(Value::is_string) {
                return Err(TranspileError::MissingPath(label));
            }
            entry
                .entry("filesystem")
                .or_insert_with(|| Value::String(DEFAULT_FILESYSTEM.to_string()));
            if kind == "files" {
                convert_file_contents(entry)?;
            }
        }
    }
    Ok(())
}

fn convert_file_contents(file: &mut Map<String, Value>) -> Result<(), TranspileError> {
    let path = file
        .get("path")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let Some(Value::Object(contents)) = file.remove("contents") else {
        return Ok(());
    };

    let inline = contents.get("inline").and_then(Value::as_str);
    let remote = contents.get("remote").and_then(Value::as_object);
    let converted = match (inline, remote) {
        (Some(_), Some(_)) => return Err(TranspileError::AmbiguousContents(path)),
        (Some(inline), None) => json!({
            "source": format!("data:,{}", urlencoding::encode(inline)),
            "verification": {},
        }),
        (None, Some(remote)) => {
            let mut converted = Map::new();
            if let Some(url) = remote.get("url") {
                converted.insert("source".to_string(), url.clone());
            }
            if let Some(compression) = remote.get("compression") {
                converted.insert("compression".to_string(), compression.clone());
            }
            let hash = remote
                .get("verification")
                .and_then(|v| v.get("hash"))
                .and_then(|hash| {
                    let function = hash.get("function")?.as_str()?;
                    let sum = hash.get("sum")?.as_str()?;
                    Some(format!("{}-{}", function, sum))
                });
            let verification = match hash {
                Some(hash) => json!({ "hash": hash }),
                None => json!({}),
            };
            converted.insert("verification".to_string(), verification);
            Value::Object(converted)
        }
        (None, None) => json!({ "verification": {} }),
    };
    file.insert("contents".to_string(), converted);
    Ok(())
}
