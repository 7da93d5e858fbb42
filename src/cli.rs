use std::path::PathBuf;

use clap::{Parser, Subcommand};
use figname::config::CONFIG_PATH;

#[derive(Parser, Debug)]
#[command(
    name = "figname",
    about = "Analyze a design file and name its layers with live progress",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file.
    #[arg(long, global = true, default_value = CONFIG_PATH)]
    pub config: PathBuf,

    /// Server origin, overriding `api.base_url`.
    #[arg(long, global = true)]
    pub server: Option<String>,

    /// Replay a recorded case (path without extension) instead of calling a server.
    #[arg(long, global = true, value_name = "CASE")]
    pub replay: Option<PathBuf>,
}

/// Design-file access shared by every command.
#[derive(clap::Args, Debug)]
pub struct DesignOpts {
    /// Design file URL (`.../file/<key>/...` or `.../design/<key>/...`).
    #[arg(value_name = "URL")]
    pub url: String,

    /// Personal access token for the design tool.
    #[arg(long, env = "FIGMA_TOKEN", hide_env_values = true)]
    pub figma_token: String,

    /// Free-text description of the product, passed to the model.
    #[arg(long, default_value = "")]
    pub context: String,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Analyze a design file and print its structure.
    Analyze {
        #[command(flatten)]
        design: DesignOpts,
    },

    /// Analyze, then name every layer and print the suggestions.
    Name {
        #[command(flatten)]
        design: DesignOpts,

        /// Vision model API key.
        #[arg(long, env = "VLM_API_KEY", hide_env_values = true)]
        vlm_api_key: String,

        /// Vision model provider (default from config).
        #[arg(long)]
        provider: Option<String>,

        /// Target platform naming convention (default from config).
        #[arg(long)]
        platform: Option<String>,

        /// Only name these pages (node id or name). Repeatable.
        #[arg(long = "page", value_name = "PAGE")]
        pages: Vec<String>,

        /// Pipeline overrides as a JSON object, forwarded to the server.
        #[arg(long, value_name = "JSON")]
        overrides: Option<String>,

        /// Print the results as JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
}
