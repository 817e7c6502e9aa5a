//! Application settings.
//!
//! | Variable | Field | Default |
//! |---|---|---|
//! | `STRATA_ENV` | [`Settings::env`] | `development` |
//! | `STRATA_PROXY` | [`Settings::proxy`] | `false` |
//! | `STRATA_SUBDOMAIN_OFFSET` | [`Settings::subdomain_offset`] | `2` |
//! | `STRATA_SILENT` | [`Settings::silent`] | `false` |

use serde::Serialize;
use tracing::warn;

/// Process-wide configuration read by every request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Trust `X-Forwarded-Proto`, `X-Forwarded-Host` and `X-Forwarded-For`.
    ///
    /// Trust is all-or-nothing: the immediate peer is not checked against
    /// a list of known proxies.
    pub proxy: bool,
    /// Number of trailing hostname labels that form the application's domain.
    pub subdomain_offset: usize,
    /// Environment tag, e.g. `development` or `production`.
    pub env: String,
    /// Suppress the default error log.
    #[serde(skip)]
    pub silent: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            proxy: false,
            subdomain_offset: 2,
            env: "development".to_owned(),
            silent: false,
        }
    }
}

impl Settings {
    /// Defaults overridden by the `STRATA_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut settings = Self::default();
        if let Some(env) = lookup("STRATA_ENV").filter(|v| !v.is_empty()) {
            settings.env = env;
        }
        if let Some(v) = lookup("STRATA_PROXY") {
            settings.proxy = parse_flag("STRATA_PROXY", &v).unwrap_or(settings.proxy);
        }
        if let Some(v) = lookup("STRATA_SILENT") {
            settings.silent = parse_flag("STRATA_SILENT", &v).unwrap_or(settings.silent);
        }
        if let Some(v) = lookup("STRATA_SUBDOMAIN_OFFSET") {
            match v.trim().parse() {
                Ok(offset) => settings.subdomain_offset = offset,
                Err(_) => warn!(value = %v, "ignoring invalid STRATA_SUBDOMAIN_OFFSET"),
            }
        }
        settings
    }
}

fn parse_flag(key: &str, value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => {
            warn!(key, value, "ignoring invalid boolean setting");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from(vars: &[(&str, &str)]) -> Settings {
        let vars: HashMap<String, String> =
            vars.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect();
        Settings::from_lookup(|k| vars.get(k).cloned())
    }

    #[test]
    fn defaults_without_variables() {
        assert_eq!(from(&[]), Settings::default());
    }

    #[test]
    fn variables_override_defaults() {
        let s = from(&[
            ("STRATA_ENV", "production"),
            ("STRATA_PROXY", "true"),
            ("STRATA_SUBDOMAIN_OFFSET", "3"),
            ("STRATA_SILENT", "1"),
        ]);
        assert_eq!(s.env, "production");
        assert!(s.proxy);
        assert_eq!(s.subdomain_offset, 3);
        assert!(s.silent);
    }

    #[test]
    fn garbage_keeps_defaults() {
        let s = from(&[("STRATA_PROXY", "maybe"), ("STRATA_SUBDOMAIN_OFFSET", "-1")]);
        assert!(!s.proxy);
        assert_eq!(s.subdomain_offset, 2);
    }

    #[test]
    fn serializes_public_settings() {
        let v = serde_json::to_value(Settings::default()).unwrap();
        assert_eq!(v, serde_json::json!({"proxy": false, "subdomainOffset": 2, "env": "development"}));
    }
}
