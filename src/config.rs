//! Configuration for supervisors and launches.

use std::{ffi::OsString, path::PathBuf, time::Duration};

use derive_builder::Builder;

use crate::dispatch::Dispatcher;

/// Configuration for a [`Supervisor`](crate::Supervisor).
///
/// Use [`SupervisorConfig::builder()`] to build one. All fields have defaults, so
/// `SupervisorConfig::default()` is equivalent to building with no options set.
#[derive(Builder, Clone, Debug)]
#[builder(default)]
#[non_exhaustive]
pub struct SupervisorConfig {
	/// The directory the process runs in.
	///
	/// Defaults to the current directory at the time the supervisor is constructed. Can be
	/// overridden per launch with [`LaunchOptions::working_directory`].
	#[builder(setter(into, strip_option))]
	pub working_directory: Option<PathBuf>,

	/// The dispatcher to publish events on.
	///
	/// Pass a clone of the same dispatcher to several supervisors to share one bus between them.
	/// When unset the supervisor makes its own.
	#[builder(setter(strip_option))]
	pub dispatcher: Option<Dispatcher>,

	/// How to retry signals sent while the process is not yet visible to the OS.
	pub signal_retry: SignalRetry,

	/// The maximum amount of bytes read from an output stream at once.
	///
	/// Zero means the default, 8 KiB.
	#[builder(default = "DEFAULT_CHUNK_SIZE")]
	pub chunk_size: usize,
}

/// The default for [`SupervisorConfig::chunk_size`].
pub const DEFAULT_CHUNK_SIZE: usize = 8192;

impl Default for SupervisorConfig {
	fn default() -> Self {
		Self {
			working_directory: None,
			dispatcher: None,
			signal_retry: SignalRetry::default(),
			chunk_size: DEFAULT_CHUNK_SIZE,
		}
	}
}

impl SupervisorConfig {
	/// Start building a configuration.
	#[must_use]
	pub fn builder() -> SupervisorConfigBuilder {
		SupervisorConfigBuilder::default()
	}

	pub(crate) fn chunk_size(&self) -> usize {
		if self.chunk_size == 0 {
			DEFAULT_CHUNK_SIZE
		} else {
			self.chunk_size
		}
	}
}

/// Retry budget for signals which race a process starting up.
///
/// Right after launch the process identifier may not be visible to the OS yet, and sending it a
/// signal fails with "no such process". That is retried for as long as the process is still
/// considered running, waiting `initial_backoff` and then twice as long each time (up to
/// `max_backoff`), for at most `attempts` tries in total.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SignalRetry {
	/// Total tries, including the first. Zero is treated as one.
	pub attempts: u32,

	/// Wait before the first retry.
	pub initial_backoff: Duration,

	/// Upper bound of the wait between retries.
	pub max_backoff: Duration,
}

impl Default for SignalRetry {
	fn default() -> Self {
		Self {
			attempts: 5,
			initial_backoff: Duration::from_millis(10),
			max_backoff: Duration::from_millis(200),
		}
	}
}

impl SignalRetry {
	/// The wait before retry number `retry` (starting at zero).
	#[must_use]
	pub fn backoff(&self, retry: u32) -> Duration {
		self.initial_backoff
			.saturating_mul(2_u32.saturating_pow(retry))
			.min(self.max_backoff)
	}
}

/// What to do with the child's standard streams.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StdioMode {
	/// Pipe all three streams so they can be read and written through the supervisor.
	#[default]
	Piped,

	/// Let the child inherit this process's streams. Reading from them then fails with
	/// [`NotProvisioned`](crate::error::StreamError::NotProvisioned).
	Inherit,
}

/// Per-launch options.
#[derive(Clone, Debug, Default)]
#[non_exhaustive]
pub struct LaunchOptions {
	/// Overrides the working directory set at construction.
	pub working_directory: Option<PathBuf>,

	/// Standard stream handling.
	pub stdio: StdioMode,

	/// Extra environment variables for the child, on top of the inherited environment.
	pub env: Vec<(OsString, OsString)>,
}

impl LaunchOptions {
	/// Run in this directory instead.
	#[must_use]
	pub fn working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
		self.working_directory = Some(dir.into());
		self
	}

	/// Set the standard stream handling.
	#[must_use]
	pub const fn stdio(mut self, stdio: StdioMode) -> Self {
		self.stdio = stdio;
		self
	}

	/// Add an environment variable.
	#[must_use]
	pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
		self.env.push((key.into(), value.into()));
		self
	}
}
