//! Subscriber construction for the CLI.
//!
//! The subscriber is handed to the engine as a `Dispatch`; nothing is
//! installed globally. Logs go to stderr so scripts on stdout stay clean.

use std::io;

use tracing::Dispatch;
use tracing_subscriber::{fmt::Layer, layer::SubscriberExt, EnvFilter};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: String,
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl LoggingConfig {
    pub fn from_verbosity(verbose: u8, json_format: bool) -> Self {
        let level = match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        };
        Self {
            level: level.to_string(),
            json_format,
        }
    }

    /// Filter directives; `RUST_LOG` wins when set
    pub fn env_filter(&self) -> String {
        format!(
            "elif_migrations={level},elif_migrations_cli={level},sqlx=warn",
            level = self.level
        )
    }

    pub fn build_dispatch(&self) -> anyhow::Result<Dispatch> {
        let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(self.env_filter()))?;

        let dispatch = if self.json_format {
            Dispatch::new(
                tracing_subscriber::registry()
                    .with(filter)
                    .with(Layer::new().with_writer(io::stderr).json()),
            )
        } else {
            Dispatch::new(
                tracing_subscriber::registry()
                    .with(filter)
                    .with(Layer::new().with_writer(io::stderr).with_target(false)),
            )
        };
        Ok(dispatch)
    }
}
