//! Container label parsing
//!
//! Turns a container's raw label map into a typed [`ParsedLabels`] per the
//! `<prefix>.enable`/`host`/`port`/`tls`/`entrypoint` contract. A container
//! with `enable` absent or false yields `Ok(None)` — silently skipped, not an
//! error. Malformed values (non-numeric port, non-boolean flag, empty host
//! list) yield `Err`, which the synchronizer logs at `warn` and treats as
//! "skip this container's whole registration", never a per-host partial
//! failure.

use std::collections::HashMap;
use std::fmt;

/// A malformed label value on an otherwise-enabled container
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelError {
    /// `<prefix>.enable=true` but `<prefix>.host` is absent or empty
    EmptyHost,
    /// `<prefix>.port` did not parse as a `u16`
    InvalidPort(String),
    /// A boolean-valued label held something other than `true`/`false`
    InvalidBool { label: String, value: String },
}

impl fmt::Display for LabelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LabelError::EmptyHost => write!(f, "enabled container has no host label"),
            LabelError::InvalidPort(v) => write!(f, "invalid port label value: {}", v),
            LabelError::InvalidBool { label, value } => {
                write!(f, "invalid boolean value for {}: {}", label, value)
            }
        }
    }
}

impl std::error::Error for LabelError {}

/// Typed view of a container's devproxy labels, once `enable=true` is confirmed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLabels {
    /// Vhosts this container should answer for
    pub hosts: Vec<String>,
    /// Target port inside the container, if the label overrides auto-detection
    pub port: Option<u16>,
    /// Whether HTTPS termination applies (a `false` value downgrades to plain
    /// HTTP-over-HTTP forwarding)
    pub tls: bool,
    /// Named TCP entrypoint to route through instead of HTTPS, if set
    pub entrypoint: Option<String>,
}

impl ParsedLabels {
    /// Parse `labels` using keys namespaced under `prefix` (e.g. `devproxy`).
    ///
    /// Returns `Ok(None)` when the container has not opted in via
    /// `<prefix>.enable=true`.
    pub fn from_map(prefix: &str, labels: &HashMap<String, String>) -> Result<Option<Self>, LabelError> {
        let key = |name: &str| format!("{prefix}.{name}");

        let enabled = labels
            .get(&key("enable"))
            .map(|v| parse_bool(v).unwrap_or(false))
            .unwrap_or(false);
        if !enabled {
            return Ok(None);
        }

        let hosts: Vec<String> = labels
            .get(&key("host"))
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        if hosts.is_empty() {
            return Err(LabelError::EmptyHost);
        }

        let port = match labels.get(&key("port")) {
            Some(v) => Some(v.parse::<u16>().map_err(|_| LabelError::InvalidPort(v.clone()))?),
            None => None,
        };

        let tls = match labels.get(&key("tls")) {
            Some(v) => parse_bool(v).ok_or_else(|| LabelError::InvalidBool {
                label: "tls".to_string(),
                value: v.clone(),
            })?,
            None => true,
        };

        let entrypoint = labels.get(&key("entrypoint")).cloned();

        Ok(Some(ParsedLabels {
            hosts,
            port,
            tls,
            entrypoint,
        }))
    }
}

fn parse_bool(v: &str) -> Option<bool> {
    match v {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}
