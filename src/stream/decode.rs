use std::{mem, str};

use tracing::warn;

/// Bytes and the text they decoded to.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct Decoded {
	pub bytes: Vec<u8>,
	pub text: String,
}

/// Incremental decoder for chunked output.
///
/// Text is decoded as UTF-8. A multi-byte sequence split across two reads is held back and
/// completed by the next chunk; a chunk containing genuinely invalid UTF-8 is decoded as Latin-1
/// instead, so that binary output never stops a reader.
#[derive(Debug, Default)]
pub(crate) struct ChunkDecoder {
	pending: Vec<u8>,
}

impl ChunkDecoder {
	/// Decode the next chunk read from the OS.
	///
	/// Returns `None` when everything read so far is the start of an incomplete sequence.
	pub fn decode(&mut self, input: &[u8]) -> Option<Decoded> {
		let mut bytes = mem::take(&mut self.pending);
		bytes.extend_from_slice(input);

		match str::from_utf8(&bytes) {
			Ok(_) => {}
			Err(err) if err.error_len().is_none() => {
				self.pending = bytes.split_off(err.valid_up_to());
			}
			Err(err) => {
				warn!(at = err.valid_up_to(), "invalid utf-8 in output, decoding chunk as latin-1");
				let text = latin1(&bytes);
				return Some(Decoded { bytes, text });
			}
		}

		if bytes.is_empty() {
			return None;
		}

		let text = str::from_utf8(&bytes).map_or_else(|_| latin1(&bytes), str::to_owned);
		Some(Decoded { bytes, text })
	}

	/// Flush whatever is held back at end of stream.
	///
	/// An incomplete sequence can never be completed at this point, so it is decoded as Latin-1.
	pub fn finish(&mut self) -> Option<Decoded> {
		if self.pending.is_empty() {
			return None;
		}

		let bytes = mem::take(&mut self.pending);
		warn!(len = bytes.len(), "output ended inside a utf-8 sequence");
		let text = latin1(&bytes);
		Some(Decoded { bytes, text })
	}
}

/// Decode a complete output, as UTF-8 if possible and Latin-1 otherwise.
pub(crate) fn decode_full(bytes: &[u8]) -> String {
	str::from_utf8(bytes).map_or_else(
		|err| {
			warn!(at = err.valid_up_to(), "invalid utf-8 in output, decoding as latin-1");
			latin1(bytes)
		},
		str::to_owned,
	)
}

fn latin1(bytes: &[u8]) -> String {
	bytes.iter().copied().map(char::from).collect()
}
