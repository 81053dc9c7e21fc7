//! The supervisor facade: a process and its three standard streams.

use std::{
	ffi::OsString,
	fmt,
	future::Future,
	path::{Path, PathBuf},
	sync::{Mutex, OnceLock, PoisonError},
};

use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::{
	config::{LaunchOptions, StdioMode, SupervisorConfig},
	dispatch::{Dispatcher, SubscriptionHandle},
	error::{StreamError, SupervisorError},
	event::NotificationEvent,
	process::{Phase, Process, Termination, TerminationReason},
	stream::{Pipes, Stream, StreamKind},
	Signal,
};

type OnDone = Box<dyn FnOnce(String, String, &NotificationEvent) + Send + 'static>;

struct Completion {
	on_done: OnDone,
	terminated: oneshot::Receiver<NotificationEvent>,
}

/// Supervises one external process.
///
/// A supervisor owns a [`Process`] and, once they are first needed, a set of [`Pipes`] for its
/// standard streams. Callbacks for output, error output and termination are subscriptions on
/// the supervisor's [`Dispatcher`], which is private unless one was passed in the configuration.
///
/// Those subscriptions are removed as their sources finish: the stream ones when each stream ends,
/// the termination ones once the process has ended (or failed to start). Dropping a supervisor
/// which was never launched removes them straight away. A shared dispatcher therefore doesn't
/// accumulate subscriptions from supervisors which have come and gone.
///
/// ```no_run
/// # use procvisor::{LaunchOptions, Supervisor};
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), procvisor::error::SupervisorError> {
/// let supervisor = Supervisor::new("/bin/ls")?;
/// supervisor.on_output(|text| print!("{text}"))?;
/// supervisor.launch(["-l", "/"], LaunchOptions::default())?;
/// let termination = supervisor.wait().await?;
/// assert!(termination.success());
/// # Ok(())
/// # }
/// ```
pub struct Supervisor {
	process: Process,
	dispatcher: Dispatcher,
	chunk_size: usize,
	pipes: OnceLock<Pipes>,
	completion: Mutex<Option<Completion>>,
}

impl fmt::Debug for Supervisor {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Supervisor")
			.field("process", &self.process)
			.field("pipes", &self.pipes.get())
			.finish_non_exhaustive()
	}
}

/// What [`Supervisor::capture`] returns.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Captured {
	/// Everything the process wrote to its standard output.
	pub output: String,

	/// Everything the process wrote to its standard error.
	pub error_output: String,

	/// How the process ended.
	pub termination: Termination,
}

impl Supervisor {
	/// Supervise the executable at `path`, with default configuration.
	///
	/// Fails with [`InvalidExecutable`](crate::error::ProcessError::InvalidExecutable) if the
	/// path is not executable.
	pub fn new(path: impl Into<PathBuf>) -> Result<Self, SupervisorError> {
		Self::with_config(path, SupervisorConfig::default())
	}

	/// Supervise the executable at `path`.
	pub fn with_config(
		path: impl Into<PathBuf>,
		config: SupervisorConfig,
	) -> Result<Self, SupervisorError> {
		let dispatcher = config.dispatcher.clone().unwrap_or_default();
		let config = SupervisorConfig {
			dispatcher: Some(dispatcher.clone()),
			..config
		};

		let process = Process::with_config(path, Vec::<OsString>::new(), &config)?;
		Ok(Self {
			process,
			dispatcher,
			chunk_size: config.chunk_size(),
			pipes: OnceLock::new(),
			completion: Mutex::new(None),
		})
	}

	/// Supervise the executable at `path`, and call `on_done` when it has ended.
	///
	/// `on_done` receives the complete standard output, the complete standard error, and the
	/// [`Terminated`](crate::event::EventName::Terminated) event. Pipes are provisioned right
	/// away and both output streams are read from the moment of launch, so a process writing a
	/// lot of output cannot block on a full pipe. If the process fails to start, `on_done` is not
	/// called.
	///
	/// As the outputs have to be captured, launching such a supervisor with
	/// [`StdioMode::Inherit`] fails with [`NotProvisioned`](StreamError::NotProvisioned).
	pub fn with_completion(
		path: impl Into<PathBuf>,
		config: SupervisorConfig,
		on_done: impl FnOnce(String, String, &NotificationEvent) + Send + 'static,
	) -> Result<Self, SupervisorError> {
		let supervisor = Self::with_config(path, config)?;
		supervisor.pipes();

		let (tx, terminated) = oneshot::channel();
		let tx = Mutex::new(Some(tx));
		let _ = supervisor.process.on_terminated(move |event| {
			if let Some(tx) = tx.lock().unwrap_or_else(PoisonError::into_inner).take() {
				let _ = tx.send(event.clone());
			}
		});

		*supervisor
			.completion
			.lock()
			.unwrap_or_else(PoisonError::into_inner) = Some(Completion {
			on_done: Box::new(on_done),
			terminated,
		});
		Ok(supervisor)
	}

	/// Launch and wait for the executable at `path`, returning its output.
	///
	/// Standard input is closed right after launch.
	pub async fn capture<I, S>(path: impl Into<PathBuf>, args: I) -> Result<Captured, SupervisorError>
	where
		I: IntoIterator<Item = S>,
		S: Into<OsString>,
	{
		let supervisor = Self::new(path)?;
		let (stdin, stdout) = supervisor.launch(args, LaunchOptions::default())?;
		stdin.close().await?;

		let stderr = supervisor.stderr();
		let (output, error_output, termination) = tokio::join!(
			stdout.read_to_end(),
			stderr.read_to_end(),
			supervisor.wait()
		);

		Ok(Captured {
			output: output?,
			error_output: error_output?,
			termination: termination?,
		})
	}

	fn pipes(&self) -> &Pipes {
		self.pipes
			.get_or_init(|| Pipes::new(&self.dispatcher, self.chunk_size))
	}

	/// Launch the process.
	///
	/// Pipes are provisioned first if they weren't already, so no output is lost. Returns the
	/// standard input and standard output streams for direct use. Must be called within a Tokio
	/// runtime.
	///
	/// If this supervisor was made [with a completion](Self::with_completion), launching with
	/// [`StdioMode::Inherit`] fails with [`NotProvisioned`](StreamError::NotProvisioned) and the
	/// process is left unlaunched.
	pub fn launch<I, S>(
		&self,
		args: I,
		options: LaunchOptions,
	) -> Result<(Stream, Stream), SupervisorError>
	where
		I: IntoIterator<Item = S>,
		S: Into<OsString>,
	{
		let pipes = self.pipes();
		let mut pending = self
			.completion
			.lock()
			.unwrap_or_else(PoisonError::into_inner);

		if pending.is_some() && options.stdio == StdioMode::Inherit {
			return Err(StreamError::NotProvisioned {
				kind: StreamKind::Stdout,
			}
			.into());
		}

		// full reads are armed before the child can write anything
		let drains = pending
			.is_some()
			.then(|| (drain(&pipes.stdout), drain(&pipes.stderr)));

		self.process.launch_with(args, &options, Some(pipes))?;

		if let (Some(completion), Some((stdout, stderr))) = (pending.take(), drains) {
			debug!(id = ?self.process.id(), "draining output for completion");
			tokio::spawn(complete(stdout, stderr, completion));
		}

		Ok((pipes.stdin.clone(), pipes.stdout.clone()))
	}

	/// Call `callback` with every chunk the process writes to its standard output.
	///
	/// Each call arms an independent reader. Returns `self` for chaining.
	///
	/// A reader only sees what is read after it was armed. Arm it before [`launch`](Self::launch)
	/// to see all output: once the stream is being read, by another reader or by the completion of
	/// a supervisor made [`with_completion`](Self::with_completion), earlier chunks are gone.
	pub fn on_output(
		&self,
		callback: impl Fn(&str) + Send + Sync + 'static,
	) -> Result<&Self, SupervisorError> {
		let _ = self.pipes().stdout.read_chunked(callback)?;
		Ok(self)
	}

	/// Call `callback` with every chunk the process writes to its standard error.
	///
	/// Each call arms an independent reader. Returns `self` for chaining. Like
	/// [`on_output`](Self::on_output), it only sees what is read after it was armed.
	pub fn on_error(
		&self,
		callback: impl Fn(&str) + Send + Sync + 'static,
	) -> Result<&Self, SupervisorError> {
		let _ = self.pipes().stderr.read_chunked(callback)?;
		Ok(self)
	}

	/// Call `callback` with the [`Terminated`](crate::event::EventName::Terminated) event once
	/// the process has ended, or immediately if it already has.
	pub fn on_done(&self, callback: impl Fn(&NotificationEvent) + Send + Sync + 'static) -> &Self {
		let handle: SubscriptionHandle = self.process.on_terminated(callback);
		debug!(id = ?self.process.id(), ?handle, "subscribed to termination");
		self
	}

	/// The standard input stream.
	pub fn stdin(&self) -> Stream {
		self.pipes().stdin.clone()
	}

	/// The standard output stream.
	pub fn stdout(&self) -> Stream {
		self.pipes().stdout.clone()
	}

	/// The standard error stream.
	pub fn stderr(&self) -> Stream {
		self.pipes().stderr.clone()
	}

	/// The process handle.
	#[must_use]
	pub const fn process(&self) -> &Process {
		&self.process
	}

	/// The dispatcher the process and its streams publish on.
	#[must_use]
	pub const fn dispatcher(&self) -> &Dispatcher {
		&self.dispatcher
	}

	/// Wait for the process to end. See [`Process::wait`].
	pub async fn wait(&self) -> Result<Termination, SupervisorError> {
		Ok(self.process.wait().await?)
	}

	/// Suspend the process. See [`Process::suspend`].
	pub fn suspend(&self) -> Result<(), SupervisorError> {
		Ok(self.process.suspend()?)
	}

	/// Suspend the process, stacking. See [`Process::suspend_stacking`].
	pub fn suspend_stacking(&self) -> Result<(), SupervisorError> {
		Ok(self.process.suspend_stacking()?)
	}

	/// Undo one suspension. See [`Process::resume`].
	pub fn resume(&self) -> Result<(), SupervisorError> {
		Ok(self.process.resume()?)
	}

	/// Send `SIGINT`. Does nothing if the process isn't running.
	pub async fn interrupt(&self) -> Result<(), SupervisorError> {
		Ok(self.process.interrupt().await?)
	}

	/// Send `SIGTERM`. Does nothing if the process isn't running.
	pub async fn kill(&self) -> Result<(), SupervisorError> {
		Ok(self.process.kill().await?)
	}

	/// Send a signal. Does nothing if the process isn't running. See [`Process::signal`].
	pub async fn signal(&self, signal: Signal) -> Result<(), SupervisorError> {
		Ok(self.process.signal(signal).await?)
	}

	/// Whether the process is running.
	#[must_use]
	pub fn is_running(&self) -> bool {
		self.process.is_running()
	}

	/// The OS process identifier, once launched.
	#[must_use]
	pub fn pid(&self) -> Option<u32> {
		self.process.pid()
	}

	/// The exit code or terminating signal number, once ended.
	#[must_use]
	pub fn status(&self) -> Option<i32> {
		self.process.status()
	}

	/// Why the process ended, once it has.
	#[must_use]
	pub fn reason(&self) -> Option<TerminationReason> {
		self.process.reason()
	}

	/// Whether the process is suspended.
	#[must_use]
	pub fn is_suspended(&self) -> bool {
		self.process.is_suspended()
	}

	/// How many suspensions are outstanding.
	#[must_use]
	pub fn suspend_count(&self) -> u32 {
		self.process.suspend_count()
	}

	/// The working directory.
	#[must_use]
	pub fn pwd(&self) -> PathBuf {
		self.process.pwd()
	}

	/// The executable path.
	#[must_use]
	pub fn executable(&self) -> &Path {
		self.process.executable()
	}

	/// The arguments given at launch.
	#[must_use]
	pub fn arguments(&self) -> Vec<OsString> {
		self.process.arguments()
	}
}

impl Drop for Supervisor {
	fn drop(&mut self) {
		// once launched, the process and its streams retire their own subscriptions as they end
		if !matches!(self.process.phase(), Phase::Created) {
			return;
		}

		let mut removed = self.dispatcher.unsubscribe_source(self.process.id());
		if let Some(pipes) = self.pipes.get() {
			removed += self.dispatcher.unsubscribe_source(pipes.stdout.id());
			removed += self.dispatcher.unsubscribe_source(pipes.stderr.id());
		}
		debug!(id = ?self.process.id(), removed, "dropped unlaunched supervisor");
	}
}

async fn complete(
	stdout: impl Future<Output = String>,
	stderr: impl Future<Output = String>,
	completion: Completion,
) {
	let Completion {
		on_done,
		terminated,
	} = completion;

	let (output, error_output, event) = tokio::join!(stdout, stderr, terminated);

	match event {
		Ok(event) => on_done(output, error_output, &event),
		Err(_) => warn!("termination subscription went away, not calling on_done"),
	}
}

fn drain(stream: &Stream) -> impl Future<Output = String> + Send + 'static {
	let kind = stream.kind();
	let read = stream.read_to_end();
	async move {
		read.await.unwrap_or_else(|err| {
			warn!(%kind, %err, "output for on_done is incomplete");
			String::new()
		})
	}
}
