//! Error types.
//!
//! Errors are split by the component that raises them: [`ProcessError`] for the process handle
//! (configuration, lifecycle state, and signal delivery), [`StreamError`] for the standard stream
//! wrappers, and [`SupervisorError`] which the facade returns and which wraps both.

use std::{io, sync::Arc};

use miette::Diagnostic;
use thiserror::Error;

use crate::config::SupervisorConfigBuilderError;

#[doc(inline)]
pub use process::*;
#[doc(inline)]
pub use specialised::*;
#[doc(inline)]
pub use stream::*;

mod process;
mod specialised;
mod stream;

/// Convenience type for a [`std::io::Error`] which can be shared across threads and tasks.
///
/// Reads and spawns happen in background tasks but their failures are reported to every caller
/// that asks afterwards, so the same error needs to be handed out more than once.
pub type SyncIoError = Arc<io::Error>;

/// Make a [`SyncIoError`] from a [`std::io::Error`].
#[must_use]
pub fn sync_io_error(err: io::Error) -> SyncIoError {
	Arc::new(err)
}

/// Errors returned by the [`Supervisor`](crate::Supervisor) facade.
#[derive(Debug, Diagnostic, Error)]
#[non_exhaustive]
pub enum SupervisorError {
	/// An error from the process handle.
	#[error(transparent)]
	#[diagnostic(transparent)]
	Process(#[from] ProcessError),

	/// An error from one of the standard streams.
	#[error(transparent)]
	#[diagnostic(transparent)]
	Stream(#[from] StreamError),

	/// The supervisor configuration could not be built.
	#[error("configuration: {0}")]
	#[diagnostic(code(procvisor::config::build))]
	Config(#[from] SupervisorConfigBuilderError),
}
