use bytes::BytesMut;

use mqttlite_packet::{decode_variable_length, DecodeError};

/// Accumulates raw transport bytes and carves off one complete MQTT packet
/// at a time.
///
/// A delivery may carry a fraction of a packet or several packets back to
/// back; completeness is decided from the fixed header's remaining-length
/// field alone.
pub(crate) struct FrameBuffer {
    buffer: BytesMut,
    capacity: usize,
}

impl FrameBuffer {
    pub(crate) fn new(capacity: usize) -> Self {
        FrameBuffer {
            buffer: BytesMut::with_capacity(capacity),
            capacity,
        }
    }

    pub(crate) fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    pub(crate) fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Returns the next complete frame, or `None` until more bytes arrive.
    ///
    /// Frames that declare more than the buffer capacity can never
    /// complete and are reported as truncated.
    pub(crate) fn next_frame(&mut self) -> Result<Option<BytesMut>, DecodeError> {
        if self.buffer.len() < 2 {
            return Ok(None);
        }

        let (remaining_length, remlen_bytes) = match decode_variable_length(&self.buffer[1..])? {
            Some(decoded) => decoded,
            None => return Ok(None),
        };

        let total = 1 + remlen_bytes + remaining_length;
        if total > self.capacity {
            return Err(DecodeError::TruncatedPacket);
        }
        if self.buffer.len() < total {
            return Ok(None);
        }

        Ok(Some(self.buffer.split_to(total)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fractional_delivery() {
        let mut framed = FrameBuffer::new(512);
        let packet = b"\x30\x05\x00\x01t\x68\x69";

        for &byte in &packet[..packet.len() - 1] {
            framed.extend(&[byte]);
            assert_eq!(framed.next_frame(), Ok(None));
        }

        framed.extend(&packet[packet.len() - 1..]);
        assert_eq!(framed.next_frame(), Ok(Some(BytesMut::from(&packet[..]))));
        assert_eq!(framed.next_frame(), Ok(None));
    }

    #[test]
    fn test_coalesced_delivery() {
        let mut framed = FrameBuffer::new(512);
        framed.extend(b"\x20\x02\x00\x00\xd0\x00\x40\x02\x00\x07");

        assert_eq!(
            framed.next_frame(),
            Ok(Some(BytesMut::from(&b"\x20\x02\x00\x00"[..])))
        );
        assert_eq!(framed.next_frame(), Ok(Some(BytesMut::from(&b"\xd0\x00"[..]))));
        assert_eq!(
            framed.next_frame(),
            Ok(Some(BytesMut::from(&b"\x40\x02\x00\x07"[..])))
        );
        assert_eq!(framed.next_frame(), Ok(None));
    }

    #[test]
    fn test_incomplete_length_field_waits() {
        let mut framed = FrameBuffer::new(512);
        framed.extend(b"\x30\xff");
        assert_eq!(framed.next_frame(), Ok(None));

        framed.extend(b"\xff\xff");
        assert_eq!(framed.next_frame(), Ok(None));

        framed.extend(b"\xff");
        assert_eq!(
            framed.next_frame(),
            Err(DecodeError::MalformedRemainingLength)
        );
    }

    #[test]
    fn test_frame_beyond_capacity() {
        let mut framed = FrameBuffer::new(512);
        // declares 600 payload bytes
        framed.extend(b"\x30\xd8\x04");
        assert_eq!(framed.next_frame(), Err(DecodeError::TruncatedPacket));
    }
}
