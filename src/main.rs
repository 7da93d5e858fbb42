mod cli;

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use figname::api::{Api, HttpApi};
use figname::commands::{self, analyze::AnalyzeConfig, name::NameConfig};
use figname::config;
use figname::replay::{ReplayApi, ReplayCase};
use tracing_subscriber::prelude::*;

use cli::{Cli, Command};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::registry()
        .with(log_filter())
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let mut config = config::load(&cli.config)?;
    if let Some(server) = cli.server {
        config.api.base_url = server;
    }
    let api: Arc<dyn Api> = match cli.replay {
        Some(ref path) => Arc::new(ReplayApi::new(load_case(path)?)),
        None => Arc::new(HttpApi::new(&config.api).context("failed to build HTTP client")?),
    };

    let outcome = match cli.command {
        Command::Analyze { design } => {
            commands::analyze::analyze(
                api,
                AnalyzeConfig {
                    url: design.url,
                    token: design.figma_token,
                    context: Some(design.context).filter(|c| !c.is_empty()),
                },
                std::io::stdout(),
            )
            .await
        }
        Command::Name {
            design,
            vlm_api_key,
            provider,
            platform,
            pages,
            overrides,
            json,
        } => {
            let overrides = overrides
                .map(|raw| serde_json::from_str::<serde_json::Value>(&raw))
                .transpose()
                .context("--overrides is not valid JSON")?;
            commands::name::name(
                api,
                config.stream,
                NameConfig {
                    url: design.url,
                    token: design.figma_token,
                    api_key: vlm_api_key,
                    provider: provider.unwrap_or(config.naming.provider),
                    platform: platform.unwrap_or(config.naming.platform),
                    context: design.context,
                    pages,
                    overrides,
                    json,
                },
                std::io::stdout(),
            )
            .await?
        }
    };

    Ok(outcome.exit_code())
}

/// `RUST_LOG` wins; `FIGNAME_LOG` takes a bare level; default `warn`.
fn log_filter() -> tracing_subscriber::EnvFilter {
    let level = if let Ok(v) = std::env::var("RUST_LOG") {
        v
    } else if let Ok(v) = std::env::var("FIGNAME_LOG") {
        match v.as_str() {
            "silent" => "off".to_string(),
            other => other.to_string(),
        }
    } else {
        "warn".to_string()
    };

    tracing_subscriber::EnvFilter::try_new(level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"))
}

fn load_case(path: &Path) -> Result<ReplayCase> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .with_context(|| format!("invalid replay case path {}", path.display()))?;
    ReplayCase::load(dir, name)
}
