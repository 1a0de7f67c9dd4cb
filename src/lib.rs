pub mod choice;
pub mod cli;
pub mod concat;
pub mod data;
pub mod error;
pub mod expr;
pub mod guess;
pub mod import;
pub mod io_utils;
pub mod manager;
pub mod probe;
pub mod process;
pub mod recordset;
pub mod schema;
pub mod table;
pub mod transform;

use std::{env, sync::OnceLock};

use anyhow::Result;
use clap::Parser;
use log::LevelFilter;

use crate::cli::{Cli, Commands};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("tablecast", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Probe(args) => probe::execute(&args),
        Commands::Import(args) => import::execute(&args),
        Commands::Process(args) => process::execute(&args),
        Commands::Concat(args) => concat::execute(&args),
    }
}
