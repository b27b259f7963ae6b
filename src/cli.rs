//! CLI argument parsing using clap v4
//!
//! Defines the command-line interface for modelport.

use clap::{Parser, Subcommand};

/// modelport - start, probe and load local inference backends
///
/// Finds backend executables in an asset directory, starts them on a local
/// port, waits until they answer and asks them to load a model.
#[derive(Parser, Debug)]
#[command(name = "modelport")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Load a model, with one backend or greedily across all of them
    Load {
        /// Model name (also the file name under the model directory)
        #[arg(short, long)]
        model: String,

        /// Backend to use; without it every installed backend is tried in order
        #[arg(short, long)]
        backend: Option<String>,

        /// Model file relative to the model directory (default: the model name)
        #[arg(long)]
        model_file: Option<String>,

        /// Extra backend as NAME:URI (executable path or listening endpoint)
        #[arg(short, long = "external", value_name = "NAME:URI")]
        external: Vec<String>,

        /// Stop every other backend first
        #[arg(long)]
        single_active: bool,

        /// Use a fresh client handle instead of the shared one
        #[arg(long)]
        per_call: bool,

        /// Keep backends running until Ctrl+C
        #[arg(long)]
        hold: bool,

        /// Path to configuration file
        #[arg(short, long, env = "MODELPORT_CONFIG")]
        config: Option<String>,
    },

    /// List installed backends in the order a greedy load tries them
    Backends {
        /// Path to configuration file
        #[arg(short, long, env = "MODELPORT_CONFIG")]
        config: Option<String>,

        /// Asset directory to scan instead of the configured one
        #[arg(short, long)]
        asset_dir: Option<String>,
    },

    /// Display version and build information
    Version,

    /// Configuration management
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

/// Configuration subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum ConfigSubcommand {
    /// Display the current configuration
    Show {
        /// Path to configuration file
        #[arg(short, long, env = "MODELPORT_CONFIG")]
        config: Option<String>,
    },

    /// Initialize a new configuration file
    Init {
        /// Path where to create the config file
        #[arg(short, long)]
        path: Option<String>,

        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Validate a configuration file
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long, env = "MODELPORT_CONFIG")]
        config: Option<String>,
    },
}
