//! # Core Types
//!
//! This crate defines the identifiers shared by every layer of the mobile
//! execution framework.
//!
//! ## Philosophy
//!
//! - **Plain data**: identifiers are small values with structural equality.
//! - **Local addressing stays local**: auxiliary connection ids never leave
//!   the process; only session and request ids cross the wire.
//!
//! ## Key Types
//!
//! - [`ConnectionId`]: names a connection or listener (address, port, auxiliary id)
//! - [`SessionId`]: names a session shared by two peers
//! - [`RequestId`]: names one request within a session
//! - [`RequestIdentifier`]: correlates a request with its response

pub mod connection_id;
pub mod ids;

pub use connection_id::{ConnectionId, DEFAULT_PORT};
pub use ids::{RequestId, RequestIdentifier, SessionId};
