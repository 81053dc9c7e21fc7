use miette::Diagnostic;
use thiserror::Error;

use crate::stream::StreamKind;

use super::SyncIoError;

/// Errors raised by a [`Stream`](crate::Stream).
#[derive(Debug, Diagnostic, Error)]
#[non_exhaustive]
pub enum StreamError {
	/// The process was launched without a pipe for this stream.
	#[error("{kind} was not provisioned with a pipe")]
	#[diagnostic(
		code(procvisor::stream::not_provisioned),
		help("launch with StdioMode::Piped to capture the child's standard streams")
	)]
	NotProvisioned {
		/// Which stream.
		kind: StreamKind,
	},

	/// Reading was attempted on the write end of a pipe.
	#[error("{kind} cannot be read from")]
	#[diagnostic(code(procvisor::stream::not_readable))]
	NotReadable {
		/// Which stream.
		kind: StreamKind,
	},

	/// Writing was attempted on the read end of a pipe.
	#[error("{kind} cannot be written to")]
	#[diagnostic(code(procvisor::stream::not_writable))]
	NotWritable {
		/// Which stream.
		kind: StreamKind,
	},

	/// The write end was already closed.
	#[error("{kind} is closed")]
	#[diagnostic(code(procvisor::stream::closed))]
	Closed {
		/// Which stream.
		kind: StreamKind,
	},

	/// The OS reported an error while reading or writing.
	#[error("io({kind}): {err}")]
	#[diagnostic(code(procvisor::stream::io))]
	Io {
		/// Which stream.
		kind: StreamKind,

		/// The underlying error.
		#[source]
		err: SyncIoError,
	},
}
