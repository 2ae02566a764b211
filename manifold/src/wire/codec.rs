//! Wire framing for the TCP backend.
//!
//! One frame on the wire is `[flags: u8][len: u32 BE][payload]`, where
//! flag bit 0 marks a continuation (MORE) frame. A message is the frame
//! run ending at the first frame without MORE. Reserved flag bits must be
//! zero.

use std::io::Read;

use bytes::{BufMut, Bytes, BytesMut};
use manifold_core::error::{ManifoldError, Result};

/// Continuation flag: more frames of the same message follow.
pub const FLAG_MORE: u8 = 0x01;

/// Bytes of header preceding every payload.
pub const HEADER_LEN: usize = 5;

/// Sanity cap on a single frame. Anything larger is a protocol error.
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Append one encoded frame to `dst`.
pub fn encode_frame(dst: &mut BytesMut, payload: &[u8], more: bool) -> Result<()> {
    if payload.len() > MAX_FRAME_SIZE {
        return Err(ManifoldError::FrameTooLarge {
            size: payload.len(),
            max: MAX_FRAME_SIZE,
        });
    }
    dst.reserve(HEADER_LEN + payload.len());
    dst.put_u8(if more { FLAG_MORE } else { 0 });
    dst.put_u32(payload.len() as u32);
    dst.put_slice(payload);
    Ok(())
}

/// Append a whole message: MORE on every frame but the last.
pub fn encode_message(dst: &mut BytesMut, frames: &[Bytes]) -> Result<()> {
    let last = frames.len().saturating_sub(1);
    for (j, frame) in frames.iter().enumerate() {
        encode_frame(dst, frame, j < last)?;
    }
    Ok(())
}

/// A decoded frame.
#[derive(Debug, Clone)]
pub struct WireFrame {
    /// More frames of this message follow
    pub more: bool,
    /// Frame payload
    pub payload: Bytes,
}

/// Stateful frame decoder that survives partial reads.
///
/// `read_frame` pulls from a blocking reader whose read timeout governs
/// responsiveness: a timeout surfaces as `Ok(None)` with all partial state
/// preserved, so the caller can check its stop flag and resume.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    header: [u8; HEADER_LEN],
    header_filled: usize,
    body: BytesMut,
    body_expected: usize,
    more: bool,
    in_body: bool,
}

impl FrameDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Read until one full frame decodes, the reader times out, or the
    /// peer disconnects.
    ///
    /// Returns:
    /// - `Ok(Some(frame))` → frame decoded
    /// - `Ok(None)` → read timed out, call again
    /// - `Err` → peer gone or protocol violation
    pub fn read_frame<R: Read>(&mut self, reader: &mut R) -> Result<Option<WireFrame>> {
        if !self.in_body {
            while self.header_filled < HEADER_LEN {
                match reader.read(&mut self.header[self.header_filled..]) {
                    Ok(0) => return Err(ManifoldError::peer_disconnected("eof in frame header")),
                    Ok(n) => self.header_filled += n,
                    Err(e) if is_timeout(&e) => return Ok(None),
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                    Err(e) => return Err(e.into()),
                }
            }
            let flags = self.header[0];
            if flags & !FLAG_MORE != 0 {
                return Err(ManifoldError::protocol(format!(
                    "reserved flag bits set: {flags:#04x}"
                )));
            }
            let len = u32::from_be_bytes([
                self.header[1],
                self.header[2],
                self.header[3],
                self.header[4],
            ]) as usize;
            if len > MAX_FRAME_SIZE {
                return Err(ManifoldError::FrameTooLarge {
                    size: len,
                    max: MAX_FRAME_SIZE,
                });
            }
            self.more = flags & FLAG_MORE != 0;
            self.body_expected = len;
            self.body.clear();
            self.body.reserve(len);
            self.in_body = true;
        }

        let mut chunk = [0u8; 8192];
        while self.body.len() < self.body_expected {
            let want = (self.body_expected - self.body.len()).min(chunk.len());
            match reader.read(&mut chunk[..want]) {
                Ok(0) => return Err(ManifoldError::peer_disconnected("eof in frame body")),
                Ok(n) => self.body.extend_from_slice(&chunk[..n]),
                Err(e) if is_timeout(&e) => return Ok(None),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }

        self.in_body = false;
        self.header_filled = 0;
        Ok(Some(WireFrame {
            more: self.more,
            payload: self.body.split().freeze(),
        }))
    }
}

fn is_timeout(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io;

    /// Reader that yields its script one item at a time, interleaving
    /// timeouts, to exercise decoder state preservation.
    struct ScriptedReader {
        script: VecDeque<Option<Vec<u8>>>,
    }

    impl Read for ScriptedReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.script.pop_front() {
                Some(Some(bytes)) => {
                    let n = bytes.len().min(buf.len());
                    buf[..n].copy_from_slice(&bytes[..n]);
                    if n < bytes.len() {
                        self.script.push_front(Some(bytes[n..].to_vec()));
                    }
                    Ok(n)
                }
                Some(None) => Err(io::Error::from(io::ErrorKind::WouldBlock)),
                None => Ok(0),
            }
        }
    }

    fn encoded(payload: &[u8], more: bool) -> Vec<u8> {
        let mut buf = BytesMut::new();
        encode_frame(&mut buf, payload, more).unwrap();
        buf.to_vec()
    }

    #[test]
    fn test_round_trip() {
        let mut wire = encoded(b"topic", true);
        wire.extend(encoded(b"payload", false));
        let mut reader = io::Cursor::new(wire);

        let mut decoder = FrameDecoder::new();
        let first = decoder.read_frame(&mut reader).unwrap().unwrap();
        assert!(first.more);
        assert_eq!(first.payload.as_ref(), b"topic");

        let second = decoder.read_frame(&mut reader).unwrap().unwrap();
        assert!(!second.more);
        assert_eq!(second.payload.as_ref(), b"payload");
    }

    #[test]
    fn test_empty_payload() {
        let wire = encoded(b"", false);
        let mut reader = io::Cursor::new(wire);
        let frame = FrameDecoder::new().read_frame(&mut reader).unwrap().unwrap();
        assert!(frame.payload.is_empty());
    }

    #[test]
    fn test_partial_reads_with_timeouts() {
        let wire = encoded(b"split-me", false);
        let mut script: VecDeque<Option<Vec<u8>>> = VecDeque::new();
        for byte in wire {
            script.push_back(Some(vec![byte]));
            script.push_back(None); // timeout after every byte
        }
        let mut reader = ScriptedReader { script };

        let mut decoder = FrameDecoder::new();
        let mut result = None;
        for _ in 0..64 {
            if let Some(frame) = decoder.read_frame(&mut reader).unwrap() {
                result = Some(frame);
                break;
            }
        }
        let frame = result.expect("frame must decode across timeouts");
        assert_eq!(frame.payload.as_ref(), b"split-me");
    }

    #[test]
    fn test_reserved_bits_rejected() {
        let mut wire = encoded(b"x", false);
        wire[0] = 0x80;
        let mut reader = io::Cursor::new(wire);
        let err = FrameDecoder::new().read_frame(&mut reader).unwrap_err();
        assert!(matches!(err, ManifoldError::Protocol(_)));
    }

    #[test]
    fn test_oversize_frame_rejected() {
        let mut wire = vec![0u8];
        wire.extend(u32::MAX.to_be_bytes());
        let mut reader = io::Cursor::new(wire);
        let err = FrameDecoder::new().read_frame(&mut reader).unwrap_err();
        assert!(matches!(err, ManifoldError::FrameTooLarge { .. }));
    }

    #[test]
    fn test_eof_is_disconnect() {
        let wire = encoded(b"x", false);
        let mut reader = io::Cursor::new(wire[..3].to_vec());
        let mut decoder = FrameDecoder::new();
        let err = decoder.read_frame(&mut reader).unwrap_err();
        assert!(matches!(err, ManifoldError::PeerDisconnected(_)));
    }

    #[test]
    fn test_encode_message_flags() {
        let frames = vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")];
        let mut buf = BytesMut::new();
        encode_message(&mut buf, &frames).unwrap();
        assert_eq!(buf[0] & FLAG_MORE, FLAG_MORE);
        // Second frame header sits right after the first frame
        let second_header = HEADER_LEN + 1;
        assert_eq!(buf[second_header] & FLAG_MORE, 0);
    }
}
