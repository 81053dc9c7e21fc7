use std::{fmt, os::unix::process::ExitStatusExt, process::ExitStatus};

use crate::Signal;

/// Why a process stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TerminationReason {
	/// The process went through the standard exit path (returned from main, called `exit`).
	NormalExit,

	/// The process was killed by a signal it did not handle.
	UncaughtSignal,
}

/// How a process ended: its exit status and the reason for it.
///
/// For a [`NormalExit`](TerminationReason::NormalExit) the status is the exit code; for an
/// [`UncaughtSignal`](TerminationReason::UncaughtSignal) it is the number of the signal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Termination {
	/// The exit code or the signal number.
	pub status: i32,

	/// How to interpret `status`.
	pub reason: TerminationReason,
}

impl Termination {
	/// A normal exit with the given code.
	#[must_use]
	pub const fn exited(code: i32) -> Self {
		Self {
			status: code,
			reason: TerminationReason::NormalExit,
		}
	}

	/// Death by the given signal number.
	#[must_use]
	pub const fn signaled(signal: i32) -> Self {
		Self {
			status: signal,
			reason: TerminationReason::UncaughtSignal,
		}
	}

	/// Whether the process exited normally with status zero.
	#[must_use]
	pub const fn success(self) -> bool {
		matches!(self.reason, TerminationReason::NormalExit) && self.status == 0
	}

	/// The signal that killed the process, if any.
	#[must_use]
	pub fn signal(self) -> Option<Signal> {
		match self.reason {
			TerminationReason::UncaughtSignal => Some(Signal::from(self.status)),
			TerminationReason::NormalExit => None,
		}
	}
}

impl From<ExitStatus> for Termination {
	fn from(es: ExitStatus) -> Self {
		match (es.code(), es.signal()) {
			(Some(code), _) => Self::exited(code),
			(None, Some(signal)) => Self::signaled(signal),
			// neither code nor signal is only possible for stopped/continued statuses, which
			// waiting for termination never reports
			(None, None) => Self::exited(0),
		}
	}
}

impl fmt::Display for Termination {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self.reason {
			TerminationReason::NormalExit => write!(f, "exited with status {}", self.status),
			TerminationReason::UncaughtSignal => {
				write!(f, "killed by {}", Signal::from(self.status))
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn classifies_wait_statuses() {
		// raw wait(2) statuses: exit code in the high byte, signal number in the low bits
		assert_eq!(
			Termination::from(ExitStatus::from_raw(0)),
			Termination::exited(0)
		);
		assert_eq!(
			Termination::from(ExitStatus::from_raw(1 << 8)),
			Termination::exited(1)
		);
		assert_eq!(
			Termination::from(ExitStatus::from_raw(9)),
			Termination::signaled(9)
		);
	}

	#[test]
	fn signal_deaths_report_their_signal() {
		let end = Termination::signaled(15);
		assert!(!end.success());
		assert_eq!(end.signal(), Some(Signal::Terminate));
		assert_eq!(end.to_string(), "killed by SIGTERM");
		assert_eq!(Termination::exited(3).signal(), None);
		assert!(Termination::exited(0).success());
	}
}
