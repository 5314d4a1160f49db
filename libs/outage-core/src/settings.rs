use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::ip_list::split_entries;

pub const ALLOWED_IPS: &str = "allowed_ips";
pub const ALLOWED_IPS_FORCED: &str = "allowed_ips_forced";
pub const CSS: &str = "css";
pub const DEFAULT_AUTOSTART: &str = "default_autostart";
pub const DEFAULT_DESCRIPTION: &str = "default_description";
pub const DEFAULT_DURATION: &str = "default_duration";
pub const DEFAULT_TITLE: &str = "default_title";
pub const DEFAULT_WARNING_DURATION: &str = "default_warning_duration";
pub const REMOVE_SELECTORS: &str = "remove_selectors";

/// Keys operators may change through the settings API.
pub const EDITABLE_KEYS: [&str; 8] = [
    ALLOWED_IPS,
    CSS,
    DEFAULT_AUTOSTART,
    DEFAULT_DESCRIPTION,
    DEFAULT_DURATION,
    DEFAULT_TITLE,
    DEFAULT_WARNING_DURATION,
    REMOVE_SELECTORS,
];

const DEFAULT_CSS: &str = "#outage-banner { position: relative; z-index: 9999; padding: .75em 1em; \
font-family: sans-serif; text-align: center; color: #fff; background: #c0392b; } \
#outage-banner.outage-warning { background: #d35400; } \
#outage-banner .outage-preview { font-weight: bold; margin-right: .5em; }";

/// Site-wide outage settings with defaults applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutageSettings {
    pub allowed_ips: String,
    pub allowed_ips_forced: String,
    pub css: String,
    pub default_autostart: bool,
    pub default_description: String,
    /// Seconds.
    pub default_duration: i64,
    pub default_title: String,
    /// Seconds.
    pub default_warning_duration: i64,
    pub remove_selectors: String,
}

impl Default for OutageSettings {
    fn default() -> Self {
        Self {
            allowed_ips: String::new(),
            allowed_ips_forced: String::new(),
            css: DEFAULT_CSS.to_string(),
            default_autostart: false,
            default_description: "This site will be unavailable from {{start}} for {{duration}} \
                                  while we perform scheduled maintenance."
                .to_string(),
            default_duration: 60 * 60,
            default_title: "System maintenance from {{start}} to {{stop}}".to_string(),
            default_warning_duration: 60 * 60,
            remove_selectors: ".usermenu, .logininfo, .homelink".to_string(),
        }
    }
}

impl OutageSettings {
    /// Overlays stored values; blank or unparsable values keep the default.
    pub fn from_values(values: &HashMap<String, String>) -> Self {
        let mut settings = Self::default();
        let get = |key: &str| stored(values, key);

        if let Some(v) = get(ALLOWED_IPS) {
            settings.allowed_ips = v.to_string();
        }
        if let Some(v) = get(ALLOWED_IPS_FORCED) {
            settings.allowed_ips_forced = v.to_string();
        }
        if let Some(v) = get(CSS) {
            settings.css = v.to_string();
        }
        if let Some(v) = get(DEFAULT_AUTOSTART).and_then(parse_bool) {
            settings.default_autostart = v;
        }
        if let Some(v) = get(DEFAULT_DESCRIPTION) {
            settings.default_description = v.to_string();
        }
        if let Some(v) = get(DEFAULT_DURATION).and_then(|v| v.parse::<i64>().ok()).filter(|v| *v > 0) {
            settings.default_duration = v;
        }
        if let Some(v) = get(DEFAULT_TITLE) {
            settings.default_title = v.to_string();
        }
        if let Some(v) = get(DEFAULT_WARNING_DURATION)
            .and_then(|v| v.parse::<i64>().ok())
            .filter(|v| *v >= 0)
        {
            settings.default_warning_duration = v;
        }
        if let Some(v) = get(REMOVE_SELECTORS) {
            settings.remove_selectors = v.to_string();
        }
        settings
    }

    /// Own entries followed by the forced ones; forced entries cannot be edited away.
    pub fn resolved_allowed_ips(&self) -> Vec<String> {
        split_entries(&self.allowed_ips)
            .chain(split_entries(&self.allowed_ips_forced))
            .map(str::to_string)
            .collect()
    }
}

fn stored<'a>(values: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    values
        .get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
