use anyhow::{Context, Result};
use askama::Template;
use chrono::{DateTime, Utc};
use outage_core::{GatePolicy, Outage, OutageSettings};
use reqwest::Client;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::PanelConfig;
use crate::utils::{insert_after_body_open, insert_before_head_close, remove_if_exists, write_atomic};

#[derive(Template)]
#[template(path = "maintenance.html")]
struct MaintenancePageTemplate<'a> {
    title: &'a str,
    description: &'a str,
    back_at: &'a str,
}

#[derive(Template)]
#[template(path = "maintenance_notice.html")]
struct MaintenanceNoticeTemplate<'a> {
    title: &'a str,
    description: &'a str,
    back_at: &'a str,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GateUpdate {
    Written(GatePolicy),
    Removed,
    /// Nothing to install and nothing was installed.
    Unchanged,
}

/// Turns the relevant outage into the gate artifact and its fallback page.
pub struct GateCompiler {
    gate_path: PathBuf,
    page_path: PathBuf,
    upstream_url: Option<String>,
    http: Client,
}

impl GateCompiler {
    pub fn new(config: &PanelConfig, http: Client) -> Self {
        Self {
            gate_path: config.gate_path.clone(),
            page_path: config.fallback_page_path.clone(),
            upstream_url: config.upstream_url.clone(),
            http,
        }
    }

    pub async fn update_gate(
        &self,
        outage: Option<&Outage>,
        now: DateTime<Utc>,
        settings: &OutageSettings,
    ) -> Result<GateUpdate> {
        let Some(outage) = outage else {
            return self.remove().await;
        };
        if outage.has_ended(now) {
            debug!("Outage #{} has ended, removing gate", outage.id);
            return self.remove().await;
        }
        if !outage.autostart {
            debug!("Outage #{} is not set to autostart, removing gate", outage.id);
            return self.remove().await;
        }

        let policy = GatePolicy::compile(outage, &settings.resolved_allowed_ips());
        if !policy.has_checks() {
            debug!("Outage #{} has no access policy, removing gate", outage.id);
            return self.remove().await;
        }

        let page = self.render_fallback_page(outage, settings).await?;
        write_atomic(&self.page_path, page.as_bytes())
            .await
            .context("Failed to write maintenance fallback page")?;

        let artifact = policy.to_artifact()?;
        write_atomic(&self.gate_path, artifact.as_bytes())
            .await
            .context("Failed to write maintenance gate")?;

        info!(
            "Gate compiled for outage #{} (ip policy: {}, key policy: {})",
            outage.id,
            policy.has_ip_policy(),
            policy.has_key_policy()
        );
        Ok(GateUpdate::Written(policy))
    }

    async fn remove(&self) -> Result<GateUpdate> {
        let removed_gate = remove_if_exists(&self.gate_path).await?;
        let removed_page = remove_if_exists(&self.page_path).await?;
        if removed_gate || removed_page {
            info!("Maintenance gate removed");
            Ok(GateUpdate::Removed)
        } else {
            Ok(GateUpdate::Unchanged)
        }
    }

    async fn render_fallback_page(&self, outage: &Outage, settings: &OutageSettings) -> Result<String> {
        let title = outage.display_title();
        let description = outage.display_description();
        let back_at = outage.stop_time.format("%Y-%m-%d %H:%M UTC").to_string();

        if let Some(upstream) = &self.upstream_url {
            match self.fetch_front_page(upstream).await {
                Ok(html) => {
                    let notice = MaintenanceNoticeTemplate {
                        title: &title,
                        description: &description,
                        back_at: &back_at,
                    }
                    .render()?;
                    return Ok(snapshot_page(&html, &notice, &settings.remove_selectors));
                }
                Err(e) => warn!("Falling back to built-in maintenance page: {:#}", e),
            }
        }

        Ok(MaintenancePageTemplate {
            title: &title,
            description: &description,
            back_at: &back_at,
        }
        .render()?)
    }

    async fn fetch_front_page(&self, upstream: &str) -> Result<String> {
        let response = self
            .http
            .get(format!("{}/", upstream))
            .timeout(Duration::from_secs(10))
            .send()
            .await?
            .error_for_status()?;

        Ok(response.text().await?)
    }
}

/// Upstream front page with the configured selectors hidden and the notice on top.
fn snapshot_page(html: &str, notice: &str, remove_selectors: &str) -> String {
    let selectors = remove_selectors.trim();
    let html = if selectors.is_empty() {
        html.to_string()
    } else {
        let style = format!("<style>{} {{ display: none !important; }}</style>", selectors);
        insert_before_head_close(html, &style)
    };
    insert_after_body_open(&html, notice)
}
