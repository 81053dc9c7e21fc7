//! Wrappers around the standard streams of a supervised process.
//!
//! A [`Stream`] owns one pipe endpoint: the write end of the child's stdin, or the read end of its
//! stdout or stderr. Readable streams are read from the OS by a single background task, the
//! _pump_, started by the first read of any kind. The pump publishes every chunk it reads as a
//! [`DataChunk`](EventName::DataChunk) event with the stream as source, keeps a copy of everything
//! it read, and publishes [`EndOfStream`](EventName::EndOfStream) once the pipe is closed. Chunked
//! readers are subscriptions to those events; full reads wait for the end of the stream and return
//! the cached text, so the OS stream is consumed once no matter how many readers there are.
//!
//! Output is only kept in memory once a full read has been asked for: a stream consumed only in
//! chunks (say, a `tail -f` forwarded to a callback) holds nothing beyond the chunk being
//! delivered. Once the stream has ended, all subscriptions to it are removed from the dispatcher.

use std::{
	fmt,
	future::Future,
	sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use tokio::{
	io::{AsyncRead, AsyncReadExt, AsyncWriteExt},
	process::ChildStdin,
	sync::{watch, Mutex as AsyncMutex},
};
use tracing::{debug, trace, warn};

use crate::{
	dispatch::{Dispatcher, Notifier, SubscriptionHandle},
	error::{sync_io_error, StreamError, SyncIoError},
	event::{EventName, NotificationEvent, Payload, SourceId},
};

use self::decode::{decode_full, ChunkDecoder};

#[doc(inline)]
pub use self::pipes::Pipes;

mod decode;
mod pipes;

/// Which standard stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StreamKind {
	/// Standard input, written by the supervisor and read by the child.
	Stdin,

	/// Standard output, written by the child.
	Stdout,

	/// Standard error, written by the child.
	Stderr,
}

impl StreamKind {
	/// Whether the supervisor holds the read end of this stream.
	#[must_use]
	pub const fn is_readable(self) -> bool {
		matches!(self, Self::Stdout | Self::Stderr)
	}
}

impl fmt::Display for StreamKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Self::Stdin => "stdin",
			Self::Stdout => "stdout",
			Self::Stderr => "stderr",
		})
	}
}

/// How a readable stream is being consumed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ReadMode {
	/// Nothing has read from the stream yet.
	#[default]
	Idle,

	/// A background read is in progress.
	Chunked,

	/// The stream reached its end. This is final.
	Drained,
}

/// The pipe endpoint a stream wraps.
pub enum Endpoint {
	/// The read end of an output pipe.
	Read(Box<dyn AsyncRead + Send + Unpin>),

	/// The write end of the input pipe.
	Write(ChildStdin),
}

impl Endpoint {
	/// The read end, if this is one.
	#[must_use]
	pub fn read_endpoint(self) -> Option<Box<dyn AsyncRead + Send + Unpin>> {
		match self {
			Self::Read(reader) => Some(reader),
			Self::Write(_) => None,
		}
	}

	/// The write end, if this is one.
	#[must_use]
	pub fn write_endpoint(&mut self) -> Option<&mut ChildStdin> {
		match self {
			Self::Read(_) => None,
			Self::Write(writer) => Some(writer),
		}
	}
}

impl fmt::Debug for Endpoint {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Read(_) => f.write_str("Endpoint::Read"),
			Self::Write(_) => f.write_str("Endpoint::Write"),
		}
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Attachment {
	/// The process has not been launched yet.
	Pending,
	Ready,
	/// The process was launched without a pipe for this stream.
	Absent,
}

#[derive(Clone, Debug)]
struct StreamState {
	attachment: Attachment,
	mode: ReadMode,
	pumping: bool,
	retain: bool,
	closed: bool,
	text: Option<Arc<str>>,
	error: Option<SyncIoError>,
}

struct Inner {
	id: SourceId,
	kind: StreamKind,
	dispatcher: Dispatcher,
	chunk_size: usize,
	endpoint: Mutex<Option<Endpoint>>,
	write_lock: AsyncMutex<()>,
	state: watch::Sender<StreamState>,
}

/// One standard stream of a supervised process.
///
/// This is a cheap handle: clones refer to the same stream, and share its source identity.
#[derive(Clone)]
pub struct Stream(Arc<Inner>);

impl fmt::Debug for Stream {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let state = self.0.state.borrow();
		f.debug_struct("Stream")
			.field("id", &self.0.id)
			.field("kind", &self.0.kind)
			.field("attachment", &state.attachment)
			.field("mode", &state.mode)
			.finish_non_exhaustive()
	}
}

impl Notifier for Stream {
	const EVENTS: &'static [EventName] = &[EventName::DataChunk, EventName::EndOfStream];

	fn source_id(&self) -> SourceId {
		self.0.id
	}
}

impl Stream {
	pub(crate) fn new(kind: StreamKind, dispatcher: Dispatcher, chunk_size: usize) -> Self {
		let (state, _) = watch::channel(StreamState {
			attachment: Attachment::Pending,
			mode: ReadMode::Idle,
			pumping: false,
			retain: false,
			closed: false,
			text: None,
			error: None,
		});

		Self(Arc::new(Inner {
			id: SourceId::next(),
			kind,
			dispatcher,
			chunk_size: chunk_size.max(1),
			endpoint: Mutex::new(None),
			write_lock: AsyncMutex::new(()),
			state,
		}))
	}

	/// The identity this stream publishes its events under.
	pub fn id(&self) -> SourceId {
		self.0.id
	}

	/// Which standard stream this is.
	#[must_use]
	pub fn kind(&self) -> StreamKind {
		self.0.kind
	}

	/// How the stream is being read.
	#[must_use]
	pub fn mode(&self) -> ReadMode {
		self.0.state.borrow().mode
	}

	/// Whether the process was launched with a pipe for this stream.
	///
	/// Returns `None` before launch.
	#[must_use]
	pub fn is_provisioned(&self) -> Option<bool> {
		match self.0.state.borrow().attachment {
			Attachment::Pending => None,
			Attachment::Ready => Some(true),
			Attachment::Absent => Some(false),
		}
	}

	fn endpoint(&self) -> MutexGuard<'_, Option<Endpoint>> {
		self.0.endpoint.lock().unwrap_or_else(PoisonError::into_inner)
	}

	pub(crate) fn attach(&self, endpoint: Option<Endpoint>) {
		let attachment = if endpoint.is_some() {
			Attachment::Ready
		} else {
			Attachment::Absent
		};

		*self.endpoint() = endpoint;
		self.0.state.send_modify(|state| state.attachment = attachment);
		trace!(id = ?self.0.id, kind = %self.0.kind, ?attachment, "stream attached");
	}

	/// Read the stream in the background, calling `on_chunk` with the text of every chunk.
	///
	/// Each chunk is also published on the dispatcher as a
	/// [`DataChunk`](EventName::DataChunk) event, and the callback is such a subscription: it is
	/// called synchronously by the reader, which waits for it before reading further. Once the
	/// stream ends the callback is not called again, and its subscription is removed. Several
	/// chunked readers can be armed on the same stream; each sees every chunk read after it was
	/// armed, and none of the chunks read before. Arming a reader on a stream which has already
	/// ended succeeds, but the callback never fires.
	///
	/// Can be called before launch, in which case reading begins as soon as the process starts.
	pub fn read_chunked(
		&self,
		on_chunk: impl Fn(&str) + Send + Sync + 'static,
	) -> Result<SubscriptionHandle, StreamError> {
		self.check_readable()?;

		let handle = self.0.dispatcher.subscribe(
			self,
			EventName::DataChunk,
			move |event: &NotificationEvent| {
				if let Some(text) = event.text() {
					on_chunk(text);
				}
			},
		);

		self.start_pump();

		// the reader may have retired this source before the subscription went in
		if self.mode() == ReadMode::Drained {
			self.0.dispatcher.unsubscribe(handle);
		}

		Ok(handle)
	}

	/// Read the whole stream and return it as text.
	///
	/// The result is cached: the OS stream is only read once and later calls return the same text.
	/// Text is decoded as UTF-8, or as Latin-1 if it isn't valid UTF-8.
	///
	/// Output is kept from the moment this is called, not from when the returned future is first
	/// polled. If the stream was already being read in chunks, what was read before that is not
	/// part of the result; call this before launch to be sure to get everything.
	///
	/// This resolves when the child closes its end of the pipe, which is usually when it exits.
	/// Must be called within a Tokio runtime.
	pub fn read_to_end(
		&self,
	) -> impl Future<Output = Result<String, StreamError>> + Send + 'static {
		let armed = self.check_readable();
		if armed.is_ok() {
			self.0.state.send_modify(|state| state.retain = true);
			self.start_pump();
		}

		let stream = self.clone();
		async move {
			armed?;
			stream.wait_drained().await
		}
	}

	async fn wait_drained(&self) -> Result<String, StreamError> {
		let mut rx = self.0.state.subscribe();
		let state = rx
			.wait_for(|state| {
				state.mode == ReadMode::Drained || state.attachment == Attachment::Absent
			})
			.await
			.map_err(|_| StreamError::Closed { kind: self.0.kind })?
			.clone();

		if state.attachment == Attachment::Absent {
			return Err(StreamError::NotProvisioned { kind: self.0.kind });
		}

		if let Some(err) = state.error {
			return Err(StreamError::Io {
				kind: self.0.kind,
				err,
			});
		}

		Ok(state.text.as_deref().unwrap_or_default().to_owned())
	}

	/// Read the whole stream in the background, then call `callback` with the result.
	///
	/// See [`read_to_end`](Self::read_to_end).
	pub fn read_to_end_in_background(
		&self,
		callback: impl FnOnce(Result<String, StreamError>) + Send + 'static,
	) {
		let read = self.read_to_end();
		tokio::spawn(async move { callback(read.await) });
	}

	/// Write to the child's standard input.
	///
	/// Waits for the process to be launched. Concurrent writes are serialised.
	pub async fn write_all(&self, data: impl AsRef<[u8]>) -> Result<(), StreamError> {
		let kind = self.0.kind;
		if kind.is_readable() {
			return Err(StreamError::NotWritable { kind });
		}

		self.wait_attached().await?;
		let _lock = self.0.write_lock.lock().await;

		// The endpoint is taken out of the sync mutex for the duration of the write; the write lock
		// keeps anyone else from observing it missing.
		let mut endpoint = self.endpoint().take();
		let result = match endpoint.as_mut().and_then(Endpoint::write_endpoint) {
			None => Err(StreamError::Closed { kind }),
			Some(stdin) => {
				let data = data.as_ref();
				trace!(id = ?self.0.id, len = data.len(), "writing to stdin");
				let written = match stdin.write_all(data).await {
					Ok(()) => stdin.flush().await,
					Err(err) => Err(err),
				};
				written.map_err(|err| StreamError::Io {
					kind,
					err: sync_io_error(err),
				})
			}
		};
		*self.endpoint() = endpoint;
		result
	}

	/// Close the child's standard input, signalling end of input to it.
	///
	/// Closing twice is harmless.
	pub async fn close(&self) -> Result<(), StreamError> {
		let kind = self.0.kind;
		if kind.is_readable() {
			return Err(StreamError::NotWritable { kind });
		}

		self.wait_attached().await?;
		let _lock = self.0.write_lock.lock().await;
		drop(self.endpoint().take());
		self.0.state.send_modify(|state| state.closed = true);
		debug!(id = ?self.0.id, "closed stdin");
		Ok(())
	}

	/// Whether [`close`](Self::close) was called.
	#[must_use]
	pub fn is_closed(&self) -> bool {
		self.0.state.borrow().closed
	}

	fn check_readable(&self) -> Result<(), StreamError> {
		let kind = self.0.kind;
		if !kind.is_readable() {
			return Err(StreamError::NotReadable { kind });
		}

		if self.0.state.borrow().attachment == Attachment::Absent {
			return Err(StreamError::NotProvisioned { kind });
		}

		Ok(())
	}

	async fn wait_attached(&self) -> Result<(), StreamError> {
		let kind = self.0.kind;
		let mut rx = self.0.state.subscribe();
		let attachment = rx
			.wait_for(|state| state.attachment != Attachment::Pending)
			.await
			.map_err(|_| StreamError::Closed { kind })?
			.attachment;

		if attachment == Attachment::Absent {
			Err(StreamError::NotProvisioned { kind })
		} else {
			Ok(())
		}
	}

	fn start_pump(&self) {
		let start = self.0.state.send_if_modified(|state| {
			if state.pumping {
				false
			} else {
				state.pumping = true;
				state.mode = ReadMode::Chunked;
				true
			}
		});

		if start {
			let stream = self.clone();
			tokio::spawn(async move { stream.pump().await });
		}
	}

	async fn pump(self) {
		if self.wait_attached().await.is_err() {
			self.0.dispatcher.unsubscribe_source(self.0.id);
			return;
		}

		let Some(mut reader) = self.endpoint().take().and_then(Endpoint::read_endpoint) else {
			warn!(id = ?self.0.id, kind = %self.0.kind, "readable stream has no read end");
			self.0
				.state
				.send_modify(|state| state.attachment = Attachment::Absent);
			self.0.dispatcher.unsubscribe_source(self.0.id);
			return;
		};

		debug!(id = ?self.0.id, kind = %self.0.kind, "reading stream");
		let mut buf = vec![0; self.0.chunk_size];
		let mut all = Vec::new();
		let mut decoder = ChunkDecoder::default();
		let mut error = None;

		loop {
			match reader.read(&mut buf).await {
				Ok(0) => break,
				Ok(n) => {
					if self.0.state.borrow().retain {
						all.extend_from_slice(&buf[..n]);
					}
					if let Some(decoded) = decoder.decode(&buf[..n]) {
						self.publish_chunk(decoded.bytes, decoded.text);
					}
				}
				Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
				Err(err) => {
					warn!(id = ?self.0.id, kind = %self.0.kind, %err, "read failed, ending stream");
					error = Some(sync_io_error(err));
					break;
				}
			}
		}

		if let Some(decoded) = decoder.finish() {
			self.publish_chunk(decoded.bytes, decoded.text);
		}

		// subscribers to the end of the stream run before full reads resolve
		self.0
			.dispatcher
			.publish(self.0.id, EventName::EndOfStream, Payload::Empty);

		let text: Arc<str> = decode_full(&all).into();
		debug!(id = ?self.0.id, kind = %self.0.kind, len = all.len(), "stream drained");
		self.0.state.send_modify(|state| {
			state.mode = ReadMode::Drained;
			state.text = Some(text);
			state.error = error;
		});

		// nothing is published for this stream after its end
		self.0.dispatcher.unsubscribe_source(self.0.id);
	}

	fn publish_chunk(&self, bytes: Vec<u8>, text: String) {
		trace!(id = ?self.0.id, kind = %self.0.kind, len = bytes.len(), "chunk");
		self.0.dispatcher.publish(
			self.0.id,
			EventName::DataChunk,
			Payload::Chunk {
				bytes: bytes.into(),
				text: text.into(),
			},
		);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn stream(kind: StreamKind) -> Stream {
		Stream::new(kind, Dispatcher::new(), 4)
	}

	#[tokio::test]
	async fn chunks_then_cached_text() {
		let out = stream(StreamKind::Stdout);
		let chunks = Arc::new(Mutex::new(Vec::new()));
		let _ = out
			.read_chunked({
				let chunks = chunks.clone();
				move |text| chunks.lock().unwrap().push(text.to_owned())
			})
			.unwrap();
		assert_eq!(out.mode(), ReadMode::Chunked);

		let full = out.read_to_end();
		out.attach(Some(Endpoint::Read(Box::new(&b"hello world"[..]))));
		assert_eq!(full.await.unwrap(), "hello world");
		assert_eq!(out.read_to_end().await.unwrap(), "hello world");
		assert_eq!(out.mode(), ReadMode::Drained);
		assert_eq!(chunks.lock().unwrap().concat(), "hello world");
		assert_eq!(chunks.lock().unwrap().len(), 3);
	}

	#[tokio::test]
	async fn end_of_stream_is_published_once() {
		let dispatcher = Dispatcher::new();
		let out = Stream::new(StreamKind::Stderr, dispatcher.clone(), 64);
		let ends = Arc::new(Mutex::new(0));
		let _ = dispatcher.subscribe(&out, EventName::EndOfStream, {
			let ends = ends.clone();
			move |_| *ends.lock().unwrap() += 1
		});

		out.attach(Some(Endpoint::Read(Box::new(&b"omg\n"[..]))));
		assert_eq!(out.read_to_end().await.unwrap(), "omg\n");
		assert_eq!(*ends.lock().unwrap(), 1);
	}

	#[tokio::test]
	async fn chunk_only_reads_keep_nothing() {
		let dispatcher = Dispatcher::new();
		let out = Stream::new(StreamKind::Stdout, dispatcher.clone(), 4);
		let chunks = Arc::new(Mutex::new(String::new()));
		let _ = out
			.read_chunked({
				let chunks = chunks.clone();
				move |text| chunks.lock().unwrap().push_str(text)
			})
			.unwrap();

		out.attach(Some(Endpoint::Read(Box::new(&b"streamed away"[..]))));
		let mut rx = out.0.state.subscribe();
		rx.wait_for(|state| state.mode == ReadMode::Drained)
			.await
			.unwrap();

		assert_eq!(*chunks.lock().unwrap(), "streamed away");
		assert_eq!(out.read_to_end().await.unwrap(), "");
		assert!(dispatcher.is_empty());
	}

	#[tokio::test]
	async fn readers_armed_after_the_end_never_fire() {
		let dispatcher = Dispatcher::new();
		let out = Stream::new(StreamKind::Stdout, dispatcher.clone(), 4);
		out.attach(Some(Endpoint::Read(Box::new(&b"done"[..]))));
		assert_eq!(out.read_to_end().await.unwrap(), "done");
		assert!(dispatcher.is_empty());

		let fired = Arc::new(Mutex::new(false));
		let _ = out
			.read_chunked({
				let fired = fired.clone();
				move |_| *fired.lock().unwrap() = true
			})
			.unwrap();

		assert!(dispatcher.is_empty());
		assert_eq!(out.read_to_end().await.unwrap(), "done");
		assert!(!*fired.lock().unwrap());
	}

	#[tokio::test]
	async fn unprovisioned_streams_fail_on_use() {
		let out = stream(StreamKind::Stdout);
		let pending = tokio::spawn({
			let out = out.clone();
			async move { out.read_to_end().await }
		});

		out.attach(None);
		assert!(matches!(
			pending.await.unwrap(),
			Err(StreamError::NotProvisioned {
				kind: StreamKind::Stdout
			})
		));
		assert!(matches!(
			out.read_chunked(|_| {}),
			Err(StreamError::NotProvisioned { .. })
		));
		assert_eq!(out.is_provisioned(), Some(false));
	}

	#[tokio::test]
	async fn direction_is_enforced() {
		let stdin = stream(StreamKind::Stdin);
		assert!(matches!(
			stdin.read_to_end().await,
			Err(StreamError::NotReadable { .. })
		));

		let stdout = stream(StreamKind::Stdout);
		assert!(matches!(
			stdout.write_all("nope").await,
			Err(StreamError::NotWritable { .. })
		));
	}
}
