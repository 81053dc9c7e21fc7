#![deny(rust_2018_idioms)]

use std::{
	env::{split_paths, var, var_os},
	io::Write,
	path::PathBuf,
	process::ExitCode,
	time::Duration,
};

use clap::{ArgAction, Parser, ValueHint};
use miette::{IntoDiagnostic, Result};
use procvisor::{LaunchOptions, Signal, Supervisor, SupervisorConfig, TerminationReason};
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Run a program under supervision, streaming its output.
#[derive(Debug, Parser)]
#[command(name = "procvisor", version)]
struct Args {
	/// Run the program in this directory
	#[arg(short = 'C', long, value_hint = ValueHint::DirPath, value_name = "DIR")]
	directory: Option<PathBuf>,

	/// Stop the program after this many seconds
	#[arg(long, value_name = "SECS")]
	timeout: Option<f64>,

	/// Signal to stop the program with on timeout
	#[arg(long, default_value = "SIGTERM", value_name = "SIGNAL")]
	signal: Signal,

	/// Set diagnostic log level
	///
	/// Use multiple times to increase verbosity, up to '-vvvv'. Setting $RUST_LOG also works, and
	/// takes precedence.
	#[arg(long, short, action = ArgAction::Count)]
	verbose: u8,

	/// The program to run, as a path or a name to look up in $PATH
	#[arg(value_hint = ValueHint::CommandName)]
	program: PathBuf,

	/// Arguments to pass to the program
	#[arg(trailing_var_arg = true, allow_hyphen_values = true)]
	args: Vec<String>,
}

fn init_logging(verbose: u8) {
	if var("RUST_LOG").is_ok() {
		match tracing_subscriber::fmt()
			.with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
			.with_writer(std::io::stderr)
			.try_init()
		{
			Ok(()) => warn!("logging configured from RUST_LOG"),
			Err(e) => eprintln!("Failed to initialise logging with RUST_LOG, falling back\n{e}"),
		}
		return;
	}

	if verbose == 0 {
		return;
	}

	let mut builder = tracing_subscriber::fmt()
		.with_writer(std::io::stderr)
		.with_env_filter(match verbose {
			1 => "warn",
			2 => "info",
			3 => "debug",
			_ => "trace",
		});

	if verbose > 2 {
		use tracing_subscriber::fmt::format::FmtSpan;
		builder = builder.with_span_events(FmtSpan::NEW | FmtSpan::CLOSE);
	}

	match builder.try_init() {
		Ok(()) => info!("logging initialised"),
		Err(e) => eprintln!("Failed to initialise logging, continuing with none\n{e}"),
	}
}

fn resolve_program(program: PathBuf) -> PathBuf {
	if program.components().count() > 1 {
		return program;
	}

	var_os("PATH")
		.and_then(|paths| {
			split_paths(&paths)
				.map(|dir| dir.join(&program))
				.find(|candidate| candidate.is_file())
		})
		.unwrap_or(program)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
	let args = Args::parse();
	init_logging(args.verbose);
	debug!(?args, "parsed arguments");

	let program = resolve_program(args.program);
	let mut config = SupervisorConfig::builder();
	if let Some(dir) = args.directory {
		config.working_directory(dir);
	}
	let config = config.build().into_diagnostic()?;

	let supervisor = Supervisor::with_config(program, config)?;
	supervisor
		.on_output(|text| {
			let mut out = std::io::stdout().lock();
			out.write_all(text.as_bytes()).ok();
			out.flush().ok();
		})?
		.on_error(|text| eprint!("{text}"))?;

	let (stdin, _) = supervisor.launch(&args.args, LaunchOptions::default())?;
	stdin.close().await?;

	let termination = match args.timeout {
		None => supervisor.wait().await?,
		Some(secs) => {
			let timeout = Duration::try_from_secs_f64(secs).into_diagnostic()?;
			tokio::select! {
				termination = supervisor.wait() => termination?,
				() = sleep(timeout) => {
					warn!(?timeout, signal = %args.signal, "timed out, stopping program");
					supervisor.signal(args.signal).await?;
					supervisor.wait().await?
				}
			}
		}
	};

	// let the output readers finish before reporting
	supervisor.stdout().read_to_end().await.ok();
	supervisor.stderr().read_to_end().await.ok();

	info!(%termination, "program ended");
	match termination.reason {
		TerminationReason::NormalExit => Ok(ExitCode::from(
			u8::try_from(termination.status).unwrap_or(1),
		)),
		TerminationReason::UncaughtSignal => {
			eprintln!("procvisor: program {termination}");
			Ok(ExitCode::from(128_u8.saturating_add(
				u8::try_from(termination.status).unwrap_or(u8::MAX),
			)))
		}
	}
}
