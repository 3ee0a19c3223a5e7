use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "hdhomerun-epg", about = "HDHomeRun EPG fetcher: caches guide windows and serves XMLTV")]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, short, global = true, default_value = "config.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate the configuration file
    Validate,

    /// Fetch the guide once and write the XMLTV file
    Generate {
        /// Write XMLTV output to this file (defaults to guide.output_filename)
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Delete all cached guide chunks
    ClearCache,
}
