use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};

use tunneler_core::tracing_init::init_tracing;
use tunneler_core::{Probe, Teardown, TunnelSpec, TunnelStatus, Verifier, system_lifecycle};

/// Bad command line (sysexits `EX_USAGE`).
const EXIT_USAGE: u8 = 64;
/// Failure that carries no code of its own (sysexits `EX_SOFTWARE`).
const EXIT_OTHER: u8 = 70;

/// Create, check and destroy a local ssh port-forward.
#[derive(Debug, Parser)]
#[command(name = "tunneler", version, about)]
struct Cli {
    /// Settings file (JSON), layered over ~/.config/tunneler/settings.json
    #[arg(long, global = true, env = "TUNNELER_CONFIG")]
    config: Option<PathBuf>,

    /// Log level when RUST_LOG is unset (e.g. "info", "debug", "warn")
    #[arg(long, global = true, default_value = "warn", env = "TUNNELER_LOG_LEVEL")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, global = true, env = "TUNNELER_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Make sure the tunnel is up; exits 1 if it already was, 2 if it was created
    Activate,
    /// Stop the tunnel process; exits 0 if one was stopped
    Destroy,
    /// Probe the local port once; exits 0 if reachable
    Verify,
    /// Print the ssh command and the signature used to find it
    Show,
}

fn load_spec(config: Option<&PathBuf>) -> tunneler_core::Result<TunnelSpec> {
    let config = tunneler_core::load_config(config.map(PathBuf::as_path))?;
    TunnelSpec::try_from(&config)
}

#[allow(clippy::print_stdout)]
fn run(cli: &Cli) -> Result<ExitCode> {
    let spec = load_spec(cli.config.as_ref())?;

    let code = match cli.command {
        Commands::Activate => {
            let status = system_lifecycle(&spec).ensure()?;
            match status {
                TunnelStatus::AlreadyActive => println!("tunnel already active"),
                TunnelStatus::Created => println!("tunnel created"),
            }
            ExitCode::from(status.code())
        }
        Commands::Destroy => {
            if Teardown::new(&spec).destroy()? {
                println!("tunnel process terminated");
                ExitCode::SUCCESS
            } else {
                println!("no tunnel process terminated");
                ExitCode::FAILURE
            }
        }
        Commands::Verify => {
            let up = Verifier::new(&spec).is_up();
            println!("{}", if up { "up" } else { "down" });
            if up { ExitCode::SUCCESS } else { ExitCode::FAILURE }
        }
        Commands::Show => {
            let command = tunneler_core::commands::tunnel_command(&spec);
            println!("command:   {command}");
            println!("signature: {}", tunneler_core::CommandSignature::normalize(&command));
            println!(
                "verify={} destroy={} create={}",
                spec.verify, spec.destroy, spec.creation
            );
            ExitCode::SUCCESS
        }
    };
    Ok(code)
}

/// Exit status for a failed run; tunnel errors carry their own code.
///
/// `activate` succeeds with 1 or 2, so no failure may use either.
fn failure_code(err: &anyhow::Error) -> ExitCode {
    let code = err
        .downcast_ref::<tunneler_core::Error>()
        .map_or(EXIT_OTHER, tunneler_core::Error::exit_code);
    ExitCode::from(code)
}

/// Exit status for a command line clap rejected (or `--help`/`--version`).
fn usage_code(err: &clap::Error) -> ExitCode {
    if err.use_stderr() {
        ExitCode::from(EXIT_USAGE)
    } else {
        ExitCode::SUCCESS
    }
}

#[allow(clippy::print_stderr)]
fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return usage_code(&e);
        }
    };
    init_tracing(&cli.log_level, cli.log_json);

    match run(&cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{e}");
            failure_code(&e)
        }
    }
}
