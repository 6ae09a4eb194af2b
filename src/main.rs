// src/main.rs

use anyhow::Result;
use clap::Parser;
use std::process::ExitCode;
use tracing::error;

mod cli;

use cli::Cli;
use constructor::{BuildReport, Error};

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize tracing subscriber for logging
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let code = match e.downcast_ref::<Error>() {
                Some(err) => {
                    error!("{} error: {}", err.component(), err);
                    err.exit_code()
                }
                None => {
                    error!("{:#}", e);
                    3
                }
            };
            ExitCode::from(code as u8)
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    if cli.print_options {
        print!("{}", constructor::recipe::schema::describe());
        return Ok(());
    }

    let options = cli.options();
    if cli.clean {
        match constructor::clean(&options)? {
            Some(dir) => println!("Removed {}", dir.display()),
            None => println!("Nothing to clean"),
        }
        return Ok(());
    }

    let report = constructor::build(&options)?;
    if options.dry_run {
        print!("{}", constructor::describe_plans(&report.plans));
    }
    print_summary(&report);
    Ok(())
}

fn print_summary(report: &BuildReport) {
    for installer in &report.installers {
        println!("Installer: {}", installer.display());
    }
    for output in &report.outputs {
        println!("Output: {}", output.display());
    }
    if let Some(dir) = &report.staging_dir {
        println!("Staging directory kept at {}", dir.display());
    }
    if !report.warnings.is_empty() {
        println!();
        println!("Warnings ({}):", report.warnings.len());
        for warning in &report.warnings {
            println!("  - {}", warning);
        }
    }
}
