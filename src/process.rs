//! A handle to one external process.
//!
//! A [`Process`] is configured once with an executable, its arguments and a working directory,
//! launched at most once, and then tracked until it ends. Ending is observed by a background task
//! which records the [`Termination`] and publishes it on the dispatcher as a
//! [`Terminated`](EventName::Terminated) event with the process as source.
//!
//! This is the low-level handle; the [`Supervisor`](crate::Supervisor) combines it with the
//! standard streams.

use std::{
	ffi::OsString,
	fmt,
	path::{Path, PathBuf},
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc, Mutex, MutexGuard, PoisonError,
	},
};

use nix::{
	errno::Errno,
	sys::signal::{kill, Signal as NixSignal},
	unistd::{access, AccessFlags, Pid},
};
use tokio::{
	process::{Child, Command},
	sync::watch,
	time::sleep,
};
use tracing::{debug, error, trace, warn};

use crate::{
	config::{LaunchOptions, SignalRetry, StdioMode, SupervisorConfig},
	dispatch::{Callback, Dispatcher, Notifier, SubscriptionHandle},
	error::{sync_io_error, ProcessError, SyncIoError},
	event::{EventName, NotificationEvent, Payload, SourceId},
	stream::Pipes,
	Signal,
};

use self::state::{ProcessState, SuspendAction};

#[doc(inline)]
pub use self::{
	state::Phase,
	termination::{Termination, TerminationReason},
};

mod state;
mod termination;

struct Inner {
	id: SourceId,
	executable: PathBuf,
	arguments: Mutex<Vec<OsString>>,
	working_directory: Mutex<PathBuf>,
	dispatcher: Dispatcher,
	signal_retry: SignalRetry,
	state: watch::Sender<ProcessState>,
}

/// Handle to one external process.
///
/// This is a cheap handle: clones control the same process and share its source identity.
#[derive(Clone)]
pub struct Process(Arc<Inner>);

impl fmt::Debug for Process {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Process")
			.field("id", &self.0.id)
			.field("executable", &self.0.executable)
			.field("phase", &self.0.state.borrow().phase)
			.finish_non_exhaustive()
	}
}

impl Notifier for Process {
	const EVENTS: &'static [EventName] = &[EventName::Terminated];

	fn source_id(&self) -> SourceId {
		self.0.id
	}
}

impl Process {
	/// Configure a process with a private dispatcher and default settings.
	///
	/// Fails with [`InvalidExecutable`](ProcessError::InvalidExecutable) if `path` is not a file
	/// the current user can execute. The working directory defaults to the current directory.
	pub fn new<I, S>(
		path: impl Into<PathBuf>,
		args: I,
		working_directory: Option<PathBuf>,
	) -> Result<Self, ProcessError>
	where
		I: IntoIterator<Item = S>,
		S: Into<OsString>,
	{
		let config = SupervisorConfig {
			working_directory,
			..SupervisorConfig::default()
		};
		Self::with_config(path, args, &config)
	}

	/// Configure a process from a supervisor configuration.
	pub fn with_config<I, S>(
		path: impl Into<PathBuf>,
		args: I,
		config: &SupervisorConfig,
	) -> Result<Self, ProcessError>
	where
		I: IntoIterator<Item = S>,
		S: Into<OsString>,
	{
		let executable = path.into();
		check_executable(&executable)?;

		let working_directory = config.working_directory.clone().unwrap_or_else(|| {
			std::env::current_dir().unwrap_or_else(|err| {
				warn!(%err, "cannot read the current directory, using `.`");
				PathBuf::from(".")
			})
		});

		let (state, _) = watch::channel(ProcessState::default());
		let process = Self(Arc::new(Inner {
			id: SourceId::next(),
			executable,
			arguments: Mutex::new(args.into_iter().map(Into::<OsString>::into).collect()),
			working_directory: Mutex::new(working_directory),
			dispatcher: config.dispatcher.clone().unwrap_or_default(),
			signal_retry: config.signal_retry,
			state,
		}));

		debug!(id = ?process.0.id, executable = ?process.0.executable, "process configured");
		Ok(process)
	}

	/// The identity this process publishes its events under.
	pub fn id(&self) -> SourceId {
		self.0.id
	}

	/// The dispatcher this process publishes on.
	#[must_use]
	pub fn dispatcher(&self) -> &Dispatcher {
		&self.0.dispatcher
	}

	/// Launch the process, with extra arguments after those given at construction.
	///
	/// A bare process has no pipes to offer, so its child can only inherit this process's standard
	/// streams, and `options` must say so with [`StdioMode::Inherit`]. Anything else fails with
	/// [`NoPipes`](ProcessError::NoPipes) and leaves the process unlaunched; use a
	/// [`Supervisor`](crate::Supervisor) to capture the streams.
	///
	/// Returns as soon as the OS has been asked to start the process. Fails with
	/// [`AlreadyLaunched`](ProcessError::AlreadyLaunched) on any call after the first, including
	/// after a launch which failed. Must be called within a Tokio runtime.
	pub fn launch<I, S>(&self, args: I, options: &LaunchOptions) -> Result<(), ProcessError>
	where
		I: IntoIterator<Item = S>,
		S: Into<OsString>,
	{
		if options.stdio != StdioMode::Inherit {
			return Err(ProcessError::NoPipes);
		}

		self.launch_with(args, options, None)
	}

	pub(crate) fn launch_with<I, S>(
		&self,
		args: I,
		options: &LaunchOptions,
		pipes: Option<&Pipes>,
	) -> Result<(), ProcessError>
	where
		I: IntoIterator<Item = S>,
		S: Into<OsString>,
	{
		let mut began = Ok(());
		self.0.state.send_if_modified(|state| {
			began = state.begin_launch();
			began.is_ok()
		});
		began?;

		if let Some(dir) = &options.working_directory {
			*self
				.0
				.working_directory
				.lock()
				.unwrap_or_else(PoisonError::into_inner) = dir.clone();
		}

		let arguments = {
			let mut arguments = self.arguments_mut();
			arguments.extend(args.into_iter().map(Into::<OsString>::into));
			arguments.clone()
		};
		let working_directory = self.pwd();

		let mut command = Command::new(&self.0.executable);
		command
			.args(&arguments)
			.current_dir(&working_directory)
			.envs(options.env.iter().map(|(key, value)| (key, value)));

		let piped = pipes.filter(|_| options.stdio == StdioMode::Piped);
		if piped.is_some() {
			Pipes::configure(&mut command);
		}

		reset_sigmask(&mut command);

		trace!(id = ?self.0.id, ?command, "spawning");
		let spawned = command
			.spawn()
			.and_then(|child| match child.id() {
				Some(pid) => Ok((child, pid)),
				None => Err(std::io::Error::other("process ended before its id was read")),
			});

		let (mut child, pid) = match spawned {
			Ok(spawned) => spawned,
			Err(err) => {
				let err = sync_io_error(err);
				error!(id = ?self.0.id, %err, "failed to launch");
				self.0.state.send_modify(|state| {
					state.phase = Phase::FailedToStart { error: err.clone() };
				});
				self.0.dispatcher.unsubscribe_source(self.0.id);
				if let Some(pipes) = pipes {
					pipes.detach();
				}
				return Err(ProcessError::Spawn {
					program: self.0.executable.clone(),
					err,
				});
			}
		};

		match (pipes, piped) {
			(_, Some(pipes)) => pipes.attach(&mut child),
			(Some(pipes), None) => pipes.detach(),
			(None, None) => {}
		}

		self.0
			.state
			.send_modify(|state| state.phase = Phase::Running { pid });
		debug!(id = ?self.0.id, pid, executable = ?self.0.executable, ?arguments, "launched");

		tokio::spawn(self.clone().watch_exit(child, pid));
		Ok(())
	}

	async fn watch_exit(self, mut child: Child, pid: u32) {
		let termination = match child.wait().await {
			Ok(status) => Termination::from(status),
			Err(err) => {
				error!(id = ?self.0.id, pid, %err, "waiting on process failed, its end is unknown");
				self.lose(sync_io_error(err));
				return;
			}
		};

		let mut recorded = false;
		self.0.state.send_if_modified(|state| {
			recorded = state.terminate(termination);
			recorded
		});

		if recorded {
			debug!(id = ?self.0.id, pid, %termination, "process ended");
			self.0.dispatcher.publish(
				self.0.id,
				EventName::Terminated,
				Payload::Terminated(termination),
			);
		}

		self.0.dispatcher.unsubscribe_source(self.0.id);
	}

	/// Give up on observing the end of the process.
	///
	/// Waiters get the error, and termination subscribers are dropped without being called.
	fn lose(&self, error: SyncIoError) {
		self.0.state.send_if_modified(|state| state.lose(error));
		self.0.dispatcher.unsubscribe_source(self.0.id);
	}

	/// Call `callback` once the process has ended.
	///
	/// If it already has, the callback is called immediately with the recorded termination. In
	/// either case it is called exactly once. If the process failed to start, or its end could not
	/// be observed, the callback is never called. The subscription is removed once the process is
	/// past the point of ending.
	pub fn on_terminated(
		&self,
		callback: impl Fn(&NotificationEvent) + Send + Sync + 'static,
	) -> SubscriptionHandle {
		let fired = AtomicBool::new(false);
		let callback: Callback = Arc::new(move |event: &NotificationEvent| {
			if !fired.swap(true, Ordering::SeqCst) {
				callback(event);
			}
		});

		let handle =
			self.0
				.dispatcher
				.subscribe_id(self.0.id, EventName::Terminated, callback.clone());

		// the exit watcher may have retired this source before the subscription went in
		let state = self.0.state.borrow().clone();
		if let Some(termination) = state.termination() {
			callback(&NotificationEvent::new(
				self.0.id,
				EventName::Terminated,
				Payload::Terminated(termination),
			));
		}
		if state.is_settled() {
			self.0.dispatcher.unsubscribe(handle);
		}

		handle
	}

	/// Wait for the process to end.
	///
	/// Fails with [`NotLaunched`](ProcessError::NotLaunched) if the process was never launched,
	/// with the spawn error if it failed to start, and with [`Wait`](ProcessError::Wait) if the OS
	/// could not report how it ended.
	pub async fn wait(&self) -> Result<Termination, ProcessError> {
		let mut rx = self.0.state.subscribe();
		if matches!(rx.borrow().phase, Phase::Created) {
			return Err(ProcessError::NotLaunched);
		}

		let phase = rx
			.wait_for(ProcessState::is_settled)
			.await
			.map_err(|_| ProcessError::NotRunning)?
			.phase
			.clone();

		match phase {
			Phase::Terminated { termination, .. } => Ok(termination),
			Phase::FailedToStart { error } => Err(ProcessError::Spawn {
				program: self.0.executable.clone(),
				err: error,
			}),
			Phase::Lost { pid, error } => Err(ProcessError::Wait { pid, err: error }),
			_ => Err(ProcessError::NotRunning),
		}
	}

	/// Send a signal to the process.
	///
	/// Does nothing if the process is not running. If the OS reports that there is no such process
	/// while this handle still considers it running, which happens in the short window after a
	/// launch, delivery is retried as configured by [`SignalRetry`]; running out of tries fails
	/// with [`SignalDeliveryFailed`](ProcessError::SignalDeliveryFailed).
	pub async fn signal(&self, signal: Signal) -> Result<(), ProcessError> {
		let sig = signal
			.to_nix()
			.ok_or(ProcessError::UnsupportedSignal(signal))?;
		let retry = self.0.signal_retry;
		let attempts = retry.attempts.max(1);
		let mut last_pid = 0;

		for attempt in 0..attempts {
			let Some(pid) = self.running_pid() else {
				debug!(id = ?self.0.id, %signal, "process not running, not signalling");
				return Ok(());
			};
			last_pid = pid;

			match send_signal(pid, sig) {
				Ok(()) => {
					debug!(id = ?self.0.id, pid, %signal, "signal sent");
					return Ok(());
				}
				Err(Errno::ESRCH) => {
					if attempt + 1 < attempts {
						let backoff = retry.backoff(attempt);
						warn!(id = ?self.0.id, pid, %signal, ?backoff, "no such process yet, retrying");
						sleep(backoff).await;
					}
				}
				Err(err) => return Err(ProcessError::Signal { signal, pid, err }),
			}
		}

		if self.is_running() {
			Err(ProcessError::SignalDeliveryFailed {
				signal,
				pid: last_pid,
				attempts,
			})
		} else {
			Ok(())
		}
	}

	/// Send `SIGINT`.
	pub async fn interrupt(&self) -> Result<(), ProcessError> {
		self.signal(Signal::Interrupt).await
	}

	/// Send `SIGTERM`. Use [`signal`](Self::signal) to send another signal.
	pub async fn kill(&self) -> Result<(), ProcessError> {
		self.signal(Signal::Terminate).await
	}

	/// Suspend the process.
	///
	/// Fails with [`AlreadySuspended`](ProcessError::AlreadySuspended) if it already is, by this
	/// or by [`suspend_stacking`](Self::suspend_stacking).
	pub fn suspend(&self) -> Result<(), ProcessError> {
		self.change_suspension(ProcessState::suspend)
	}

	/// Suspend the process, counting how many times this was done.
	///
	/// The process runs again after as many calls to [`resume`](Self::resume).
	pub fn suspend_stacking(&self) -> Result<(), ProcessError> {
		self.change_suspension(ProcessState::suspend_stacking)
	}

	/// Undo one suspension.
	///
	/// Fails with [`NotSuspended`](ProcessError::NotSuspended) if the process isn't suspended.
	pub fn resume(&self) -> Result<(), ProcessError> {
		self.change_suspension(ProcessState::resume)
	}

	fn change_suspension(
		&self,
		change: fn(&mut ProcessState) -> Result<SuspendAction, ProcessError>,
	) -> Result<(), ProcessError> {
		let mut outcome = Err(ProcessError::NotRunning);
		let mut pid = 0;
		let mut count = 0;
		self.0.state.send_if_modified(|state| {
			outcome = change(state);
			pid = state.running_pid().unwrap_or_default();
			count = state.suspend_count;
			outcome.is_ok()
		});

		let sig = match outcome? {
			SuspendAction::Stop => NixSignal::SIGSTOP,
			SuspendAction::Continue => NixSignal::SIGCONT,
			SuspendAction::Nothing => {
				debug!(id = ?self.0.id, pid, count, "still suspended");
				return Ok(());
			}
		};

		debug!(id = ?self.0.id, pid, count, signal = %sig, "changing suspension");
		send_signal(pid, sig).map_err(|err| ProcessError::Signal {
			signal: Signal::from_nix(sig),
			pid,
			err,
		})
	}

	/// Whether the process was launched and hasn't ended yet. Suspended processes are running.
	#[must_use]
	pub fn is_running(&self) -> bool {
		self.running_pid().is_some()
	}

	fn running_pid(&self) -> Option<u32> {
		self.0.state.borrow().running_pid()
	}

	/// The OS process identifier, once launched.
	#[must_use]
	pub fn pid(&self) -> Option<u32> {
		self.0.state.borrow().pid()
	}

	/// Where the process is in its lifecycle.
	#[must_use]
	pub fn phase(&self) -> Phase {
		self.0.state.borrow().phase.clone()
	}

	/// How the process ended, once it has.
	#[must_use]
	pub fn termination(&self) -> Option<Termination> {
		self.0.state.borrow().termination()
	}

	/// The exit code, or the number of the signal which killed the process. `None` until it ends.
	#[must_use]
	pub fn status(&self) -> Option<i32> {
		self.termination().map(|t| t.status)
	}

	/// Why the process ended. `None` until it does.
	#[must_use]
	pub fn reason(&self) -> Option<TerminationReason> {
		self.termination().map(|t| t.reason)
	}

	/// Whether the process is currently suspended.
	#[must_use]
	pub fn is_suspended(&self) -> bool {
		self.suspend_count() > 0
	}

	/// How many suspensions are outstanding.
	#[must_use]
	pub fn suspend_count(&self) -> u32 {
		self.0.state.borrow().suspend_count
	}

	/// The directory the process runs (or will run) in.
	#[must_use]
	pub fn pwd(&self) -> PathBuf {
		self.0
			.working_directory
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.clone()
	}

	/// The path to the executable.
	#[must_use]
	pub fn executable(&self) -> &Path {
		&self.0.executable
	}

	/// The arguments, including those added at launch.
	#[must_use]
	pub fn arguments(&self) -> Vec<OsString> {
		self.arguments_mut().clone()
	}

	fn arguments_mut(&self) -> MutexGuard<'_, Vec<OsString>> {
		self.0.arguments.lock().unwrap_or_else(PoisonError::into_inner)
	}
}

fn check_executable(path: &Path) -> Result<(), ProcessError> {
	let is_file = path.metadata().is_ok_and(|meta| meta.is_file());
	if is_file && access(path, AccessFlags::X_OK).is_ok() {
		Ok(())
	} else {
		debug!(?path, is_file, "not an executable");
		Err(ProcessError::InvalidExecutable {
			path: path.to_owned(),
		})
	}
}

fn send_signal(pid: u32, sig: NixSignal) -> Result<(), Errno> {
	let pid = i32::try_from(pid).map_err(|_| Errno::EINVAL)?;
	kill(Pid::from_raw(pid), sig)
}

/// Unblocks all signals in the child but `SIGHUP`, so that nohup works.
///
/// The signal mask is inherited across exec, so anything blocked in this process would otherwise
/// stay blocked in the child.
fn reset_sigmask(command: &mut Command) {
	use nix::sys::signal::{sigprocmask, SigSet, SigmaskHow};

	// SAFETY: sigprocmask is async-signal-safe, and nothing here allocates.
	unsafe {
		command.pre_exec(|| {
			let mut newset = SigSet::all();
			newset.remove(NixSignal::SIGHUP);
			sigprocmask(SigmaskHow::SIG_UNBLOCK, Some(&newset), None)?;
			Ok(())
		});
	}
}
