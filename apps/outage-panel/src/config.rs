use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum GateMode {
    /// Blocked callers get the maintenance response.
    #[default]
    Enforce,
    /// Blocked callers get the check diagnostics instead, nothing is halted.
    Diagnostic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PanelConfig {
    pub listen_port: u16,
    /// Absent means in-memory stores.
    pub database_url: Option<String>,
    pub admin_token: String,
    pub admin_path: String,
    pub gate_path: PathBuf,
    pub fallback_page_path: PathBuf,
    pub upstream_url: Option<String>,
    pub cookie_path: String,
    pub cookie_secure: bool,
    pub cookie_http_only: bool,
    pub retry_after_secs: u64,
    pub gate_mode: GateMode,
    pub trust_forwarded_headers: bool,
    pub machine_path_prefixes: Vec<String>,
    /// Site-wide allow-list entries that outage settings cannot remove.
    pub allowed_ips_forced: String,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            listen_port: 8080,
            database_url: None,
            admin_token: String::new(),
            admin_path: "/admin".to_string(),
            gate_path: PathBuf::from("./data/maintenance.json"),
            fallback_page_path: PathBuf::from("./data/maintenance.html"),
            upstream_url: None,
            cookie_path: "/".to_string(),
            cookie_secure: true,
            cookie_http_only: true,
            retry_after_secs: 300,
            gate_mode: GateMode::Enforce,
            trust_forwarded_headers: false,
            machine_path_prefixes: vec!["/api/".to_string(), "/webservice/".to_string()],
            allowed_ips_forced: String::new(),
        }
    }
}

impl PanelConfig {
    pub fn load() -> Result<Self> {
        let config_paths = ["/etc/outage/panel.toml", "./panel.toml"];

        for path in config_paths {
            if let Ok(contents) = fs::read_to_string(path) {
                tracing::info!("Loading config from {}", path);
                return Ok(toml::from_str::<Self>(&contents)?.normalized());
            }
        }

        tracing::info!("Loading config from environment");
        Ok(Self::from_env().normalized())
    }

    fn from_env() -> Self {
        let defaults = Self::default();
        let var = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());
        let flag = |key: &str, default: bool| {
            var(key)
                .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(default)
        };

        Self {
            listen_port: var("LISTEN_PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.listen_port),
            database_url: var("DATABASE_URL"),
            admin_token: var("ADMIN_TOKEN").unwrap_or_default(),
            admin_path: var("ADMIN_PATH").unwrap_or(defaults.admin_path),
            gate_path: var("GATE_PATH").map(PathBuf::from).unwrap_or(defaults.gate_path),
            fallback_page_path: var("FALLBACK_PAGE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.fallback_page_path),
            upstream_url: var("UPSTREAM_URL"),
            cookie_path: var("COOKIE_PATH").unwrap_or(defaults.cookie_path),
            cookie_secure: flag("COOKIE_SECURE", defaults.cookie_secure),
            cookie_http_only: flag("COOKIE_HTTP_ONLY", defaults.cookie_http_only),
            retry_after_secs: var("RETRY_AFTER_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.retry_after_secs),
            gate_mode: match var("GATE_MODE").as_deref() {
                Some("diagnostic") => GateMode::Diagnostic,
                _ => GateMode::Enforce,
            },
            trust_forwarded_headers: flag("TRUST_FORWARDED_HEADERS", defaults.trust_forwarded_headers),
            machine_path_prefixes: defaults.machine_path_prefixes,
            allowed_ips_forced: var("ALLOWED_IPS_FORCED")
                .map(|v| v.replace(',', "\n"))
                .unwrap_or_default(),
        }
    }

    fn normalized(mut self) -> Self {
        if !self.admin_path.starts_with('/') {
            self.admin_path = format!("/{}", self.admin_path);
        }
        self.admin_path = self.admin_path.trim_end_matches('/').to_string();
        if !self.cookie_path.starts_with('/') {
            self.cookie_path = format!("/{}", self.cookie_path);
        }
        if let Some(url) = &self.upstream_url {
            self.upstream_url = Some(url.trim_end_matches('/').to_string());
        }
        if self.admin_token.trim().is_empty() {
            tracing::warn!("ADMIN_TOKEN is empty: operator API and previews are disabled");
        }
        self
    }
}
