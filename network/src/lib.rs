//! # Network
//!
//! TCP plumbing for the mobile execution framework: length-prefixed
//! framing, connections with dedicated reader and writer threads, and a
//! registry that owns every connection and listener of a host.
//!
//! ## Philosophy
//!
//! - **Bytes in, bytes out**: this layer never looks inside a frame
//! - **One socket per identifier**: concurrent lookups share one connection
//! - **Failures are local**: a broken connection tears itself down and
//!   unregisters, nothing else is affected

pub mod connection;
mod error;
pub mod frame;
pub mod listener;
pub mod registry;
pub mod transport;

pub use connection::{ConnectionStateListener, IncomingMessageHandler, TcpConnection};
pub use error::NetworkError;
pub use frame::{encode_frame, FrameError, FrameReader, FrameWriter, FRAME_HEADER_LEN};
pub use listener::Listener;
pub use registry::ConnectionRegistry;
