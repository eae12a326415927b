use anyhow::{Context, Result};

use crate::naming;

pub const DEFAULT_SERVICE_NAME: &str = "io-gateway";
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;
pub const DEFAULT_BACKLOG_LIMIT: usize = 10_000;

/// Output format for the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Gateway configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Domain prefix for the well-known channel names.
    pub domain: String,
    /// Name this gateway announces itself under.
    pub service_name: String,
    /// Buffer size of each in-process channel.
    pub channel_capacity: usize,
    /// Max facts held while no route is known.
    pub backlog_limit: usize,
    pub log_format: LogFormat,
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let domain = std::env::var("FACTGATE_DOMAIN").context("FACTGATE_DOMAIN is required")?;
        Self::new(
            domain,
            std::env::var("FACTGATE_SERVICE_NAME").ok(),
            std::env::var("FACTGATE_CHANNEL_CAPACITY").ok(),
            std::env::var("FACTGATE_BACKLOG_LIMIT").ok(),
            std::env::var("LOG_FORMAT").ok(),
        )
    }

    fn new(
        domain: String,
        service_name: Option<String>,
        channel_capacity: Option<String>,
        backlog_limit: Option<String>,
        log_format: Option<String>,
    ) -> Result<Self> {
        let domain = domain.trim().to_string();
        if domain.is_empty() {
            anyhow::bail!("FACTGATE_DOMAIN must not be blank");
        }

        let channel_capacity = match channel_capacity {
            Some(v) => v
                .parse()
                .with_context(|| format!("FACTGATE_CHANNEL_CAPACITY must be a number, got {v:?}"))?,
            None => DEFAULT_CHANNEL_CAPACITY,
        };
        if channel_capacity == 0 {
            anyhow::bail!("FACTGATE_CHANNEL_CAPACITY must be positive");
        }

        let backlog_limit = match backlog_limit {
            Some(v) => v
                .parse()
                .with_context(|| format!("FACTGATE_BACKLOG_LIMIT must be a number, got {v:?}"))?,
            None => DEFAULT_BACKLOG_LIMIT,
        };

        let log_format = match log_format.as_deref() {
            Some(f) if f.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        Ok(Self {
            domain,
            service_name: service_name
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_SERVICE_NAME.to_string()),
            channel_capacity,
            backlog_limit,
            log_format,
        })
    }

    pub fn presence_channel(&self) -> String {
        naming::presence_channel(&self.domain)
    }

    pub fn routing_plan_evolution_channel(&self) -> String {
        naming::routing_plan_evolution_channel(&self.domain)
    }

    pub fn inbound_channel(&self) -> String {
        naming::gateway_inbound_channel(&self.domain)
    }

    /// Log the loaded configuration. Nothing here is secret; channel names are shown in full.
    pub fn log_redacted(&self) {
        tracing::info!("Config loaded:");
        tracing::info!("  FACTGATE_DOMAIN: {}", self.domain);
        tracing::info!("  FACTGATE_SERVICE_NAME: {}", self.service_name);
        tracing::info!("  FACTGATE_CHANNEL_CAPACITY: {}", self.channel_capacity);
        tracing::info!("  FACTGATE_BACKLOG_LIMIT: {}", self.backlog_limit);
        tracing::info!("  inbound channel: {}", self.inbound_channel());
        tracing::info!("  presence channel: {}", self.presence_channel());
        tracing::info!(
            "  routing plan evolution channel: {}",
            self.routing_plan_evolution_channel()
        );
    }
}
