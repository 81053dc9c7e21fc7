//! Notification records delivered by the [`Dispatcher`](crate::Dispatcher).

use std::{
	fmt,
	num::NonZeroU64,
	sync::{
		atomic::{AtomicU64, Ordering},
		Arc,
	},
};

use crate::process::Termination;

/// Unique opaque identifier for a notification source.
///
/// Every [`Process`](crate::Process) and [`Stream`](crate::Stream) gets its own on creation, so two
/// processes launched from the same path never share subscriptions. Clones of a source share its
/// identifier.
#[must_use]
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(NonZeroU64);

static NEXT_SOURCE: AtomicU64 = AtomicU64::new(1);

impl SourceId {
	pub(crate) fn next() -> Self {
		let id = NEXT_SOURCE.fetch_add(1, Ordering::Relaxed);
		Self(NonZeroU64::new(id).unwrap_or(NonZeroU64::MIN))
	}

	/// The raw identifier, for logging.
	#[must_use]
	pub const fn get(self) -> u64 {
		self.0.get()
	}
}

impl fmt::Debug for SourceId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "#{}", self.0)
	}
}

/// Symbolic names of the events sources publish.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventName {
	/// A stream produced newly available output.
	DataChunk,

	/// A stream reached end-of-file; no more chunks will follow.
	EndOfStream,

	/// A process ended.
	Terminated,
}

/// What an event carries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
	/// No data.
	Empty,

	/// A slice of stream output.
	Chunk {
		/// The bytes as read from the OS, including any held-over partial UTF-8 sequence.
		bytes: Arc<[u8]>,

		/// The decoded text.
		text: Arc<str>,
	},

	/// How a process ended.
	Terminated(Termination),
}

/// An immutable notification, created once at publish time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NotificationEvent {
	/// The logical source of the event.
	pub source: SourceId,

	/// What happened.
	pub name: EventName,

	/// Associated data.
	pub payload: Payload,
}

impl NotificationEvent {
	/// Make a new event.
	pub const fn new(source: SourceId, name: EventName, payload: Payload) -> Self {
		Self {
			source,
			name,
			payload,
		}
	}

	/// The decoded text of a chunk event.
	#[must_use]
	pub fn text(&self) -> Option<&str> {
		match &self.payload {
			Payload::Chunk { text, .. } => Some(text),
			_ => None,
		}
	}

	/// The termination recorded by a [`Terminated`](EventName::Terminated) event.
	#[must_use]
	pub const fn termination(&self) -> Option<Termination> {
		match self.payload {
			Payload::Terminated(termination) => Some(termination),
			_ => None,
		}
	}
}
