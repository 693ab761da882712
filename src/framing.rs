//! Record-separator wire framing.
//!
//! DESIGN
//! ======
//! One logical message on the wire is its UTF-8 JSON payload followed by a
//! single 0x1E byte. No length prefix. A physical read may deliver zero, one,
//! or several logical frames, and may end mid-frame, so [`FrameBuffer`]
//! accumulates bytes across reads and yields complete frames as they close.

use crate::error::ClientError;

/// ASCII record separator; terminates every logical message.
pub const RECORD_SEPARATOR: u8 = 0x1e;

/// Append the record separator to a serialized payload.
#[must_use]
pub fn encode(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(payload.len() + 1);
    frame.extend_from_slice(payload);
    frame.push(RECORD_SEPARATOR);
    frame
}

/// Strip the trailing record separator from a single complete frame.
///
/// # Errors
///
/// Returns [`ClientError::Framing`] when the input does not end with the
/// separator (empty input included).
pub fn decode(frame: &[u8]) -> Result<&[u8], ClientError> {
    match frame.split_last() {
        Some((&RECORD_SEPARATOR, payload)) => Ok(payload),
        _ => Err(ClientError::Framing),
    }
}

/// Incremental frame accumulator for the read path.
///
/// Feed every physical read into [`FrameBuffer::extend`], then drain complete
/// payloads with [`FrameBuffer::next_frame`]. Trailing bytes of an unfinished
/// frame stay buffered for the next read.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: Vec<u8>,
}

impl FrameBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the bytes of one physical read.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pop the next complete payload (separator stripped), if one is buffered.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        let end = self.buf.iter().position(|&b| b == RECORD_SEPARATOR)?;
        let rest = self.buf.split_off(end + 1);
        let mut payload = std::mem::replace(&mut self.buf, rest);
        payload.pop();
        Some(payload)
    }

    /// Whether a complete frame is buffered.
    #[must_use]
    pub fn has_frame(&self) -> bool {
        self.buf.contains(&RECORD_SEPARATOR)
    }

    /// Bytes of the unfinished trailing frame, if any.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.buf.len()
    }
}

#[cfg(test)]
#[path = "framing_test.rs"]
mod tests;
