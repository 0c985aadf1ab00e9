use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use wxarchive::{
    cli::{dispatch, CliArgs},
    prompt::{AutoConfirm, TerminalPrompt},
    Config, DriverRegistry,
};

fn init_logging(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn main() -> ExitCode {
    let args = CliArgs::parse();

    let verb = match args.verb() {
        Ok(verb) => verb,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::from(e.exit_code() as u8);
        }
    };

    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let level = args.log_level.as_deref().unwrap_or(&config.logging.level);
    init_logging(level, config.logging.json);

    let registry = DriverRegistry::with_defaults();
    let result = if args.no_prompt {
        dispatch(verb, &args, &config, &registry, &mut AutoConfirm)
    } else {
        dispatch(verb, &args, &config, &registry, &mut TerminalPrompt::stdio())
    };

    match result {
        Ok(outcome) => {
            println!("{}", outcome);
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "operation failed");
            eprintln!("Error: {}", e);
            ExitCode::from(e.exit_code() as u8)
        }
    }
}
