#![forbid(unsafe_code)]

use std::collections::BTreeMap;

/// Flat `key=value` property set. Keys are dotted lowercase (`plugins.timeseries.flush.period`).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Configuration {
    properties: BTreeMap<String, String>,
}

impl Configuration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(properties: BTreeMap<String, String>) -> Self {
        Self { properties }
    }

    /// Parses `key=value` lines; blank lines and `#` comments are skipped.
    pub fn parse_properties(text: &str) -> Self {
        let mut properties = BTreeMap::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            properties.insert(key.trim().to_string(), value.trim().to_string());
        }
        Self { properties }
    }

    /// `PREFIX_SOME_KEY_NAME=v` becomes `some.key.name=v`. Dashed keys are still found through
    /// the dash-to-dot fallback in [`Configuration::get`].
    pub fn from_env(prefix: &str) -> Self {
        Self::from_vars(prefix, std::env::vars())
    }

    pub fn from_vars(prefix: &str, vars: impl IntoIterator<Item = (String, String)>) -> Self {
        let mut properties = BTreeMap::new();
        for (key, value) in vars {
            let Some(rest) = key.strip_prefix(prefix) else {
                continue;
            };
            let rest = rest.trim_start_matches('_');
            if rest.is_empty() {
                continue;
            }
            properties.insert(rest.to_ascii_lowercase().replace('_', "."), value);
        }
        Self { properties }
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(key.into(), value.into());
    }

    pub fn merge(mut self, other: Configuration) -> Self {
        self.properties.extend(other.properties);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        if let Some(value) = self.properties.get(key) {
            return Some(value.as_str());
        }
        // Env-derived keys lose their dashes.
        let dotted = key.replace('-', ".");
        self.properties.get(&dotted).map(String::as_str)
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.get(key).map(|v| v.trim().to_ascii_lowercase()) {
            Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => true,
            Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => false,
            _ => default,
        }
    }

    pub fn get_i64(&self, key: &str, default: i64) -> i64 {
        self.get(key)
            .and_then(|v| v.trim().parse::<i64>().ok())
            .unwrap_or(default)
    }

    pub fn get_usize(&self, key: &str, default: usize) -> usize {
        self.get(key)
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(default)
    }
}
