use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use std::ffi::OsString;
use std::process::ExitCode;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sandbox_harness::config::{Environment, Settings};
use sandbox_harness::installer::Installation;
use sandbox_harness::runner::{cli_args, run_one_shot};
use sandbox_harness::stdio::StdioConfig;

#[derive(Parser)]
#[command(name = "sandbox-harness")]
#[command(
    about = "Run the near-sandbox binary, installing it first if needed",
    disable_help_flag = true,
    disable_version_flag = true
)]
struct Cli {
    /// Arguments passed to near-sandbox verbatim
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<OsString>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let env = Environment::from_process();

    // Stdout belongs to the forwarded binary.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if env.debug {
            EnvFilter::new("sandbox_harness=debug")
        } else {
            EnvFilter::new("sandbox_harness=warn")
        }
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match run(cli_args(cli.args), &env).await {
        Ok(code) => ExitCode::from(u8::try_from(code & 0xff).unwrap_or(1)),
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Vec<OsString>, env: &Environment) -> Result<i32> {
    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    let settings = Settings::load(&cwd)?;
    let installation = Installation::from_settings(&settings, env).await?;
    let code = run_one_shot(&installation, &args, &StdioConfig::inherit()).await?;
    Ok(code)
}
