use std::{path::PathBuf, time::Duration};

use anyhow::{Result, bail};
use clap::{Args, ValueEnum};

use crate::fx::{Backoff, FxConfig};

#[derive(Debug, Clone, Args)]
pub struct Config {
    /// Base URL of the upstream rate service
    #[arg(long, env = "FX_URL", default_value = "http://localhost:8080")]
    pub fx_url: String,

    /// Per-attempt timeout in seconds
    #[arg(long, env = "FX_TIMEOUT", default_value_t = 3.0)]
    pub fx_timeout: f64,

    /// Maximum attempts per rate lookup
    #[arg(long, env = "FX_RETRIES", default_value_t = 3)]
    pub fx_retries: u32,

    #[arg(long, env = "FX_BACKOFF_MS", default_value_t = 200)]
    pub fx_backoff_ms: u64,

    #[arg(long, env = "FX_JITTER_MS", default_value_t = 100)]
    pub fx_jitter_ms: u64,

    #[arg(long, env = "DATABASE_PATH", default_value = "payments.db")]
    pub database_path: PathBuf,

    #[arg(long, env = "PORT", default_value_t = 8000)]
    pub port: u16,

    /// Concurrent payment processors
    #[arg(long, env = "WORKERS", default_value_t = 4)]
    pub workers: usize,
}

impl Config {
    pub fn fx(&self) -> Result<FxConfig> {
        let timeout = match Duration::try_from_secs_f64(self.fx_timeout) {
            Ok(timeout) if !timeout.is_zero() => timeout,
            _ => bail!(
                "FX_TIMEOUT must be a positive number of seconds, got {}",
                self.fx_timeout
            ),
        };

        if self.fx_retries == 0 {
            bail!("FX_RETRIES must be at least 1");
        }

        Ok(FxConfig {
            base_url: self.fx_url.clone(),
            timeout,
            max_retries: self.fx_retries,
            backoff: Backoff::new(
                Duration::from_millis(self.fx_backoff_ms),
                Duration::from_millis(self.fx_jitter_ms),
            ),
        })
    }
}

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

pub fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}
