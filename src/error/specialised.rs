use miette::{Diagnostic, SourceSpan};
use thiserror::Error;

/// Error when parsing a [`Signal`](crate::Signal) from a string.
#[derive(Debug, Diagnostic, Error)]
#[error("invalid signal `{input}`: {reason}")]
#[diagnostic(code(procvisor::signal::parse))]
pub struct SignalParseError {
	#[source_code]
	input: String,

	reason: &'static str,

	#[label = "not a signal name or number"]
	span: SourceSpan,
}

impl SignalParseError {
	pub(crate) fn new(input: &str, reason: &'static str) -> Self {
		Self {
			input: input.to_owned(),
			reason,
			span: (0, input.len()).into(),
		}
	}

	/// The string which failed to parse.
	#[must_use]
	pub fn input(&self) -> &str {
		&self.input
	}
}
