//! Reader and writer loops that move frames between a socket and the
//! rest of the process.
//!
//! Each loop owns one half of a stream and runs on its own named thread.
//! Errors hit after shutdown was requested are expected and swallowed.

use std::io::{self, BufReader, BufWriter, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::Receiver;

use crate::frame::{FrameError, FrameReader, FrameWriter};

const STREAM_BUFFER_BYTES: usize = 16 * 1024;

/// Spawns the inbound loop: read a frame, hand it to `on_message`, repeat.
pub fn spawn_reader<R, M, E>(
    name: String,
    reader: R,
    max_frame_bytes: usize,
    shutdown: Arc<AtomicBool>,
    mut on_message: M,
    on_error: E,
) -> io::Result<JoinHandle<()>>
where
    R: Read + Send + 'static,
    M: FnMut(Vec<u8>) + Send + 'static,
    E: FnOnce(FrameError) + Send + 'static,
{
    thread::Builder::new().name(name).spawn(move || {
        let buffered = BufReader::with_capacity(STREAM_BUFFER_BYTES, reader);
        let mut frames = FrameReader::new(buffered, max_frame_bytes);
        loop {
            match frames.read_frame() {
                Ok(frame) => {
                    if shutdown.load(Ordering::Acquire) {
                        return;
                    }
                    tracing::trace!("read frame of {} bytes", frame.len());
                    on_message(frame);
                }
                Err(err) => {
                    if !shutdown.load(Ordering::Acquire) {
                        on_error(err);
                    }
                    return;
                }
            }
        }
    })
}

/// Spawns the outbound loop: take the next queued payload, frame it, flush.
///
/// The loop ends when `stop` fires, when every sender of `outgoing` is gone,
/// or on the first write failure.
pub fn spawn_writer<W, E>(
    name: String,
    writer: W,
    outgoing: Receiver<Vec<u8>>,
    stop: Receiver<()>,
    shutdown: Arc<AtomicBool>,
    on_error: E,
) -> io::Result<JoinHandle<()>>
where
    W: Write + Send + 'static,
    E: FnOnce(FrameError) + Send + 'static,
{
    thread::Builder::new().name(name).spawn(move || {
        let mut frames = FrameWriter::new(BufWriter::with_capacity(STREAM_BUFFER_BYTES, writer));
        loop {
            crossbeam::select! {
                recv(stop) -> _ => return,
                recv(outgoing) -> payload => {
                    let Ok(payload) = payload else {
                        return;
                    };
                    if let Err(err) = frames.write_frame(&payload) {
                        if !shutdown.load(Ordering::Acquire) {
                            on_error(err);
                        }
                        return;
                    }
                    tracing::trace!("wrote frame of {} bytes", payload.len());
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::encode_frame;
    use crossbeam::channel::{bounded, unbounded};
    use parking_lot::Mutex;
    use std::io::Cursor;
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_reader_delivers_frames_then_reports_peer_close() {
        let mut bytes = encode_frame(b"one").unwrap();
        bytes.extend(encode_frame(b"two").unwrap());

        let (frames_tx, frames_rx) = unbounded();
        let (errors_tx, errors_rx) = unbounded();
        let handle = spawn_reader(
            "test-reader".to_string(),
            Cursor::new(bytes),
            1024,
            Arc::new(AtomicBool::new(false)),
            move |frame| frames_tx.send(frame).unwrap(),
            move |err| errors_tx.send(err.is_closed_by_peer()).unwrap(),
        )
        .unwrap();
        handle.join().unwrap();

        let frames: Vec<_> = frames_rx.try_iter().collect();
        assert_eq!(frames, vec![b"one".to_vec(), b"two".to_vec()]);
        assert_eq!(errors_rx.try_recv(), Ok(true));
    }

    #[test]
    fn test_reader_swallows_errors_after_shutdown() {
        let (errors_tx, errors_rx) = unbounded::<()>();
        let handle = spawn_reader(
            "test-reader".to_string(),
            Cursor::new(Vec::new()),
            1024,
            Arc::new(AtomicBool::new(true)),
            |_| {},
            move |_| errors_tx.send(()).unwrap(),
        )
        .unwrap();
        handle.join().unwrap();
        assert!(errors_rx.try_recv().is_err());
    }

    #[test]
    fn test_writer_frames_queued_payloads_in_order() {
        let sink = SharedBuf::default();
        let (outgoing_tx, outgoing_rx) = unbounded();
        let (_stop_tx, stop_rx) = bounded::<()>(1);

        outgoing_tx.send(b"alpha".to_vec()).unwrap();
        outgoing_tx.send(b"beta".to_vec()).unwrap();
        drop(outgoing_tx);

        let handle = spawn_writer(
            "test-writer".to_string(),
            sink.clone(),
            outgoing_rx,
            stop_rx,
            Arc::new(AtomicBool::new(false)),
            |err| panic!("unexpected writer error: {err}"),
        )
        .unwrap();
        handle.join().unwrap();

        let mut expected = encode_frame(b"alpha").unwrap();
        expected.extend(encode_frame(b"beta").unwrap());
        assert_eq!(*sink.0.lock(), expected);
    }

    #[test]
    fn test_writer_stops_on_signal() {
        let (_outgoing_tx, outgoing_rx) = unbounded::<Vec<u8>>();
        let (stop_tx, stop_rx) = bounded(1);
        let handle = spawn_writer(
            "test-writer".to_string(),
            SharedBuf::default(),
            outgoing_rx,
            stop_rx,
            Arc::new(AtomicBool::new(false)),
            |_| {},
        )
        .unwrap();

        stop_tx.send_timeout((), Duration::from_secs(1)).unwrap();
        handle.join().unwrap();
    }
}
