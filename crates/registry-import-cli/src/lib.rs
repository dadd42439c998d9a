//! Registry Import CLI Library
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//!
//! Operator client for the registry import server.
//!
//! # Overview
//!
//! - **Upload**: stream a CSV or XML file into a waiting import job (`regimport upload`)
//! - **Watch**: follow job status over the status stream, reconnecting with
//!   backoff when the connection drops (`regimport watch`)

pub mod api;
pub mod commands;
pub mod error;
pub mod progress;
pub mod sse;
pub mod watch;

// Re-export commonly used types
pub use error::{CliError, Result};
pub use watch::{StatusWatcher, WatchEvent};

use clap::{Parser, Subcommand};
use registry_common::types::SubscriptionScope;
use std::path::PathBuf;

/// regimport - upload files to the registry import server and follow their progress
#[derive(Parser, Debug)]
#[command(name = "regimport")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Server URL
    #[arg(
        long,
        env = "REGISTRY_SERVER_URL",
        default_value = "http://localhost:8000",
        global = true
    )]
    pub server_url: String,

    /// API token sent as a bearer credential
    #[arg(long, env = "REGISTRY_TOKEN", global = true, hide_env_values = true)]
    pub token: Option<String>,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Upload a data file into an import job waiting for it
    Upload {
        /// Slug of the import job
        #[arg(short, long = "job")]
        job: String,

        /// CSV or XML file to upload
        file: PathBuf,
    },

    /// Follow import job status changes
    Watch {
        /// Comma separated job ids to track
        #[arg(long, default_value = "")]
        ids: String,

        /// Which events to receive
        #[arg(long, default_value = "updates_for_ids_only", value_parser = parse_scope)]
        scope: SubscriptionScope,

        /// Exit once every tracked job reaches a terminal status
        #[arg(long)]
        until_done: bool,
    },
}

fn parse_scope(raw: &str) -> std::result::Result<SubscriptionScope, String> {
    raw.parse().map_err(|e: registry_common::RegistryError| e.to_string())
}
