use std::path::PathBuf;

use miette::Diagnostic;
use nix::errno::Errno;
use thiserror::Error;

use crate::Signal;

use super::SyncIoError;

/// Errors raised by a [`Process`](crate::Process).
///
/// Configuration and state errors are raised synchronously by the call which violates the
/// contract. Signal races are retried before [`SignalDeliveryFailed`](Self::SignalDeliveryFailed)
/// is surfaced.
#[derive(Debug, Diagnostic, Error)]
#[non_exhaustive]
pub enum ProcessError {
	/// The launch path does not reference a file the current user can execute.
	#[error("{} is not a valid executable", path.display())]
	#[diagnostic(
		code(procvisor::config::invalid_executable),
		help("the path must point to an existing regular file with the executable bit set")
	)]
	InvalidExecutable {
		/// The path which was given.
		path: PathBuf,
	},

	/// `launch` was called on a process that was already launched.
	#[error("process was already launched")]
	#[diagnostic(code(procvisor::state::already_launched))]
	AlreadyLaunched,

	/// The operation needs a launched process.
	#[error("process was never launched")]
	#[diagnostic(code(procvisor::state::not_launched))]
	NotLaunched,

	/// The operation needs a running process.
	#[error("process is not running")]
	#[diagnostic(code(procvisor::state::not_running))]
	NotRunning,

	/// `suspend` was called while the process was already suspended.
	#[error("process is already suspended")]
	#[diagnostic(
		code(procvisor::state::already_suspended),
		help("use suspend_stacking() to suspend more than once")
	)]
	AlreadySuspended,

	/// `resume` was called while the suspend count was zero.
	#[error("process is not suspended")]
	#[diagnostic(code(procvisor::state::not_suspended))]
	NotSuspended,

	/// The process could not be found while sending a signal, and kept on reporting as running
	/// for the whole retry budget.
	#[error("could not deliver {signal} to pid {pid} after {attempts} attempts")]
	#[diagnostic(code(procvisor::signal::delivery_failed))]
	SignalDeliveryFailed {
		/// The signal that was being sent.
		signal: Signal,

		/// The process identifier it was sent to.
		pid: u32,

		/// How many times delivery was attempted.
		attempts: u32,
	},

	/// The signal is not valid on this platform.
	#[error("unsupported signal: {0}")]
	#[diagnostic(code(procvisor::signal::unsupported))]
	UnsupportedSignal(Signal),

	/// The OS refused to deliver a signal.
	#[error("sending {signal} to pid {pid}: {err}")]
	#[diagnostic(code(procvisor::signal::os))]
	Signal {
		/// The signal that was being sent.
		signal: Signal,

		/// The process identifier it was sent to.
		pid: u32,

		/// The underlying error.
		#[source]
		err: Errno,
	},

	/// A bare [`Process`](crate::Process) was launched without [`StdioMode::Inherit`](crate::StdioMode::Inherit).
	#[error("a bare process cannot pipe its standard streams")]
	#[diagnostic(
		code(procvisor::config::no_pipes),
		help("launch with StdioMode::Inherit, or use a Supervisor to capture the streams")
	)]
	NoPipes,

	/// The OS could not report how the process ended.
	#[error("waiting on pid {pid}: {err}")]
	#[diagnostic(code(procvisor::wait))]
	Wait {
		/// The process identifier it had.
		pid: u32,

		/// The underlying error.
		#[source]
		err: SyncIoError,
	},

	/// The OS could not launch the process.
	#[error("spawning {}: {err}", program.display())]
	#[diagnostic(code(procvisor::spawn))]
	Spawn {
		/// The program that was being launched.
		program: PathBuf,

		/// The underlying error.
		#[source]
		err: SyncIoError,
	},
}
