use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a single ffmpeg command, e.g. `ffrun run -version`
    Run {
        /// Print lifecycle events as JSON lines instead of the log view
        #[arg(long)]
        json: bool,

        /// Command line passed to ffmpeg, split on whitespace
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, num_args = 0..)]
        command: Vec<String>,
    },

    /// Read commands from stdin, one per line, and run them
    Shell,

    /// Show the binary load state for this host
    Info,

    /// Write the default configuration file
    Init {
        /// Output path
        #[arg(short, long, default_value = "ffrun.toml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}
