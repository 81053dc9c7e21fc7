use std::process::Stdio;

use tokio::process::{Child, Command};
use tracing::debug;

use crate::dispatch::Dispatcher;

use super::{Endpoint, Stream, StreamKind};

/// The three standard streams of one process.
///
/// Pipes are always provisioned as a set, so that no stream of a supervised child is silently
/// inherited from the parent. Until the process is launched the streams exist but have nothing
/// attached: reads started early wait for the launch and so see all output from the first byte.
#[derive(Clone, Debug)]
pub struct Pipes {
	/// The child's standard input, writable.
	pub stdin: Stream,

	/// The child's standard output, readable.
	pub stdout: Stream,

	/// The child's standard error, readable.
	pub stderr: Stream,
}

impl Pipes {
	pub(crate) fn new(dispatcher: &Dispatcher, chunk_size: usize) -> Self {
		let pipes = Self {
			stdin: Stream::new(StreamKind::Stdin, dispatcher.clone(), chunk_size),
			stdout: Stream::new(StreamKind::Stdout, dispatcher.clone(), chunk_size),
			stderr: Stream::new(StreamKind::Stderr, dispatcher.clone(), chunk_size),
		};
		debug!(
			stdin = ?pipes.stdin.id(),
			stdout = ?pipes.stdout.id(),
			stderr = ?pipes.stderr.id(),
			"provisioned pipes"
		);
		pipes
	}

	/// Ask for all three streams to be piped.
	pub(crate) fn configure(command: &mut Command) {
		command
			.stdin(Stdio::piped())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped());
	}

	/// Hand the child's pipe endpoints over to the streams.
	pub(crate) fn attach(&self, child: &mut Child) {
		self.stdin.attach(child.stdin.take().map(Endpoint::Write));
		self.stdout.attach(
			child
				.stdout
				.take()
				.map(|out| Endpoint::Read(Box::new(out))),
		);
		self.stderr.attach(
			child
				.stderr
				.take()
				.map(|err| Endpoint::Read(Box::new(err))),
		);
	}

	/// Mark all three streams as never provisioned.
	pub(crate) fn detach(&self) {
		self.stdin.attach(None);
		self.stdout.attach(None);
		self.stderr.attach(None);
	}
}
