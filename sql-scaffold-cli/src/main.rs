pub mod codegen;
mod commands;
pub mod config;

use std::error::Error;

use clap::*;
use commands::{Check, Draft, Generate, Init, Preview, Schema};

#[derive(Parser)]
#[command(name = "sql-scaffold", bin_name = "sql-scaffold")]
enum Command {
    /// Write a configuration template to the working directory.
    Init(Init),
    /// Show the schema of the configured database.
    Schema(Schema),
    /// Generate the data-access module and, with a profile, its importer.
    Generate(Generate),
    /// Check a profile against the database schema.
    Check(Check),
    /// Run a profile over a CSV file without writing anything.
    Preview(Preview),
    /// Draft a profile from the header and records of a CSV file.
    Draft(Draft),
}

fn main() -> Result<(), Box<dyn Error>> {
    let command = Command::parse();
    match command {
        Command::Init(args) => args.run(),
        Command::Schema(args) => args.run(),
        Command::Generate(args) => args.run(),
        Command::Check(args) => args.run(),
        Command::Preview(args) => args.run(),
        Command::Draft(args) => args.run(),
    }
}
