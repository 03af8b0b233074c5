//! Length-prefixed framing.
//!
//! A frame is a 4-byte big-endian unsigned length followed by exactly that
//! many payload bytes. Frames carry no checksum; TCP already provides one.

use std::io::{self, Read, Write};

use thiserror::Error;

pub const FRAME_HEADER_LEN: usize = 4;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("stream closed by peer after {read} of {expected} bytes")]
    ClosedByPeer { read: usize, expected: usize },
    #[error("frame too large: max {max_frame_bytes} got {got_bytes}")]
    FrameTooLarge {
        max_frame_bytes: usize,
        got_bytes: usize,
    },
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl FrameError {
    /// True when the other side went away rather than the transport failing
    pub fn is_closed_by_peer(&self) -> bool {
        match self {
            FrameError::ClosedByPeer { .. } => true,
            FrameError::Io(err) => matches!(
                err.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
            ),
            FrameError::FrameTooLarge { .. } => false,
        }
    }
}

pub struct FrameReader<R> {
    reader: R,
    max_frame_bytes: usize,
}

impl<R: Read> FrameReader<R> {
    pub fn new(reader: R, max_frame_bytes: usize) -> Self {
        Self {
            reader,
            max_frame_bytes,
        }
    }

    /// Blocks until one complete frame has been read
    ///
    /// End of stream is reported as [`FrameError::ClosedByPeer`], including
    /// a clean close between frames.
    pub fn read_frame(&mut self) -> Result<Vec<u8>, FrameError> {
        let mut header = [0u8; FRAME_HEADER_LEN];
        self.fill(&mut header)?;

        let length = u32::from_be_bytes(header) as usize;
        if length > self.max_frame_bytes {
            return Err(FrameError::FrameTooLarge {
                max_frame_bytes: self.max_frame_bytes,
                got_bytes: length,
            });
        }

        let mut body = vec![0u8; length];
        self.fill(&mut body)?;
        Ok(body)
    }

    fn fill(&mut self, buf: &mut [u8]) -> Result<(), FrameError> {
        let mut read = 0usize;
        while read < buf.len() {
            match self.reader.read(&mut buf[read..]) {
                Ok(0) => {
                    return Err(FrameError::ClosedByPeer {
                        read,
                        expected: buf.len(),
                    })
                }
                Ok(n) => read += n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }
}

pub struct FrameWriter<W> {
    writer: W,
}

impl<W: Write> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Writes one frame and flushes it
    pub fn write_frame(&mut self, payload: &[u8]) -> Result<usize, FrameError> {
        let frame = encode_frame(payload)?;
        self.writer.write_all(&frame)?;
        self.writer.flush()?;
        Ok(frame.len())
    }
}

pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    let length = u32::try_from(payload.len()).map_err(|_| FrameError::FrameTooLarge {
        max_frame_bytes: u32::MAX as usize,
        got_bytes: payload.len(),
    })?;

    let mut buf = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    buf.extend_from_slice(&length.to_be_bytes());
    buf.extend_from_slice(payload);
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_header_is_big_endian_length() {
        let frame = encode_frame(b"hello").unwrap();
        assert_eq!(&frame[..4], &[0, 0, 0, 5]);
        assert_eq!(&frame[4..], b"hello");
    }

    #[test]
    fn test_reader_returns_frames_in_order() {
        let mut bytes = encode_frame(b"first").unwrap();
        bytes.extend(encode_frame(b"").unwrap());
        bytes.extend(encode_frame(b"third").unwrap());

        let mut reader = FrameReader::new(Cursor::new(bytes), 1024);
        assert_eq!(reader.read_frame().unwrap(), b"first");
        assert_eq!(reader.read_frame().unwrap(), b"");
        assert_eq!(reader.read_frame().unwrap(), b"third");
        assert!(matches!(
            reader.read_frame(),
            Err(FrameError::ClosedByPeer {
                read: 0,
                expected: 4
            })
        ));
    }

    #[test]
    fn test_truncated_header_is_closed_by_peer() {
        let mut reader = FrameReader::new(Cursor::new(vec![0u8, 0]), 1024);
        let err = reader.read_frame().unwrap_err();
        assert!(matches!(
            err,
            FrameError::ClosedByPeer {
                read: 2,
                expected: 4
            }
        ));
        assert!(err.is_closed_by_peer());
    }

    #[test]
    fn test_truncated_body_is_closed_by_peer() {
        let mut frame = encode_frame(b"abcdef").unwrap();
        frame.truncate(FRAME_HEADER_LEN + 3);

        let mut reader = FrameReader::new(Cursor::new(frame), 1024);
        assert!(matches!(
            reader.read_frame(),
            Err(FrameError::ClosedByPeer {
                read: 3,
                expected: 6
            })
        ));
    }

    #[test]
    fn test_reader_rejects_oversize_frame() {
        let frame = encode_frame(&[7u8; 10]).unwrap();
        let mut reader = FrameReader::new(Cursor::new(frame), 5);
        let err = reader.read_frame().unwrap_err();
        assert!(matches!(err, FrameError::FrameTooLarge { got_bytes: 10, .. }));
        assert!(!err.is_closed_by_peer());
    }

    #[test]
    fn test_writer_output_is_readable() {
        let mut out = Vec::new();
        let written = FrameWriter::new(&mut out).write_frame(b"payload").unwrap();
        assert_eq!(written, FRAME_HEADER_LEN + 7);

        let mut reader = FrameReader::new(Cursor::new(out), 1024);
        assert_eq!(reader.read_frame().unwrap(), b"payload");
    }
}
