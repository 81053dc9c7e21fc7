use crate::error::{ProcessError, SyncIoError};

use super::Termination;

/// Where a process is in its lifecycle.
///
/// `Created → Launching → Running → Terminated`, or `Launching → FailedToStart` if the OS refuses
/// to start it, or `Running → Lost` if the OS cannot say how it ended. Only `Created` can be
/// launched; the last three are final.
#[derive(Clone, Debug)]
pub enum Phase {
	/// Configured, not launched.
	Created,

	/// The launch request is being issued.
	Launching,

	/// Running (or suspended).
	Running {
		/// The OS process identifier.
		pid: u32,
	},

	/// The OS could not start the process.
	FailedToStart {
		/// Why.
		error: SyncIoError,
	},

	/// The process ended.
	Terminated {
		/// The OS process identifier it had.
		pid: u32,

		/// How it ended.
		termination: Termination,
	},

	/// Waiting on the process failed, so how it ended is unknown.
	Lost {
		/// The OS process identifier it had.
		pid: u32,

		/// Why.
		error: SyncIoError,
	},
}

/// What a change in suspension asks of the OS.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SuspendAction {
	Stop,
	Continue,
	Nothing,
}

#[derive(Clone, Debug)]
pub(crate) struct ProcessState {
	pub phase: Phase,
	pub suspend_count: u32,
}

impl Default for ProcessState {
	fn default() -> Self {
		Self {
			phase: Phase::Created,
			suspend_count: 0,
		}
	}
}

impl ProcessState {
	pub fn pid(&self) -> Option<u32> {
		match self.phase {
			Phase::Running { pid } | Phase::Terminated { pid, .. } | Phase::Lost { pid, .. } => {
				Some(pid)
			}
			_ => None,
		}
	}

	pub fn running_pid(&self) -> Option<u32> {
		match self.phase {
			Phase::Running { pid } => Some(pid),
			_ => None,
		}
	}

	pub fn termination(&self) -> Option<Termination> {
		match self.phase {
			Phase::Terminated { termination, .. } => Some(termination),
			_ => None,
		}
	}

	/// Whether `wait` has nothing left to wait for.
	pub const fn is_settled(&self) -> bool {
		matches!(
			self.phase,
			Phase::Terminated { .. } | Phase::FailedToStart { .. } | Phase::Lost { .. }
		)
	}

	pub fn begin_launch(&mut self) -> Result<(), ProcessError> {
		if matches!(self.phase, Phase::Created) {
			self.phase = Phase::Launching;
			Ok(())
		} else {
			Err(ProcessError::AlreadyLaunched)
		}
	}

	/// Single-level suspension: only from a count of zero.
	pub fn suspend(&mut self) -> Result<SuspendAction, ProcessError> {
		self.running_pid().ok_or(ProcessError::NotRunning)?;
		if self.suspend_count > 0 {
			return Err(ProcessError::AlreadySuspended);
		}

		self.suspend_count = 1;
		Ok(SuspendAction::Stop)
	}

	/// Stacking suspension: always counts, always stops.
	pub fn suspend_stacking(&mut self) -> Result<SuspendAction, ProcessError> {
		self.running_pid().ok_or(ProcessError::NotRunning)?;
		self.suspend_count = self.suspend_count.saturating_add(1);
		Ok(SuspendAction::Stop)
	}

	pub fn resume(&mut self) -> Result<SuspendAction, ProcessError> {
		self.running_pid().ok_or(ProcessError::NotRunning)?;
		self.suspend_count = self
			.suspend_count
			.checked_sub(1)
			.ok_or(ProcessError::NotSuspended)?;

		Ok(if self.suspend_count == 0 {
			SuspendAction::Continue
		} else {
			SuspendAction::Nothing
		})
	}

	/// Record the end of the process. Only the first termination sticks.
	pub fn terminate(&mut self, termination: Termination) -> bool {
		let Phase::Running { pid } = self.phase else {
			return false;
		};

		self.phase = Phase::Terminated { pid, termination };
		self.suspend_count = 0;
		true
	}

	/// Record that the end of the process cannot be known. Only from `Running`.
	pub fn lose(&mut self, error: SyncIoError) -> bool {
		let Phase::Running { pid } = self.phase else {
			return false;
		};

		self.phase = Phase::Lost { pid, error };
		self.suspend_count = 0;
		true
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn running() -> ProcessState {
		ProcessState {
			phase: Phase::Running { pid: 42 },
			suspend_count: 0,
		}
	}

	#[test]
	fn launches_once() {
		let mut state = ProcessState::default();
		assert!(state.begin_launch().is_ok());
		assert!(matches!(
			state.begin_launch(),
			Err(ProcessError::AlreadyLaunched)
		));
		assert!(matches!(
			running().begin_launch(),
			Err(ProcessError::AlreadyLaunched)
		));
	}

	#[test]
	fn single_level_suspend() {
		let mut state = running();
		assert_eq!(state.suspend().unwrap(), SuspendAction::Stop);
		assert!(matches!(
			state.suspend(),
			Err(ProcessError::AlreadySuspended)
		));
		assert_eq!(state.resume().unwrap(), SuspendAction::Continue);
		assert!(matches!(state.resume(), Err(ProcessError::NotSuspended)));
		assert_eq!(state.suspend_count, 0);
	}

	#[test]
	fn stacked_suspends_need_as_many_resumes() {
		let mut state = running();
		state.suspend_stacking().unwrap();
		state.suspend_stacking().unwrap();
		assert_eq!(state.suspend_count, 2);
		assert!(matches!(
			state.suspend(),
			Err(ProcessError::AlreadySuspended)
		));
		assert_eq!(state.resume().unwrap(), SuspendAction::Nothing);
		assert_eq!(state.resume().unwrap(), SuspendAction::Continue);
	}

	#[test]
	fn suspension_needs_a_running_process() {
		let mut state = ProcessState::default();
		assert!(matches!(state.suspend(), Err(ProcessError::NotRunning)));
		assert!(matches!(state.resume(), Err(ProcessError::NotRunning)));
	}

	#[test]
	fn termination_is_write_once() {
		let mut state = running();
		state.suspend_stacking().unwrap();
		assert!(state.terminate(Termination::exited(0)));
		assert!(!state.terminate(Termination::signaled(9)));
		assert_eq!(state.termination(), Some(Termination::exited(0)));
		assert_eq!(state.pid(), Some(42));
		assert_eq!(state.running_pid(), None);
		assert_eq!(state.suspend_count, 0);
		assert!(state.is_settled());
	}

	#[test]
	fn lost_processes_are_settled_without_a_termination() {
		let mut state = running();
		state.suspend().unwrap();
		let error = crate::error::sync_io_error(std::io::Error::other("wait failed"));
		assert!(state.lose(error.clone()));
		assert!(!state.lose(error.clone()));
		assert!(!state.terminate(Termination::exited(0)));

		assert!(matches!(state.phase, Phase::Lost { pid: 42, .. }));
		assert_eq!(state.termination(), None);
		assert_eq!(state.running_pid(), None);
		assert_eq!(state.pid(), Some(42));
		assert_eq!(state.suspend_count, 0);
		assert!(state.is_settled());
		assert!(!ProcessState::default().lose(error));
	}
}
