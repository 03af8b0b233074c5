//! # Inter-Process Communication (IPC)
//!
//! This crate defines the messages exchanged between peers of the mobile
//! execution framework and how they are turned into frame bytes.
//!
//! ## Philosophy
//!
//! - **Messages, not shared memory**: peers only ever exchange envelopes
//! - **Typed, not stringly-typed**: every payload has a concrete struct and kind
//! - **Traceable**: requests and responses share a [`core_types::RequestIdentifier`]
//!
//! ## Architecture
//!
//! A frame carries one [`Envelope`]: a [`MessageKind`] tag plus the payload
//! bytes produced by that kind's [`MessageCodec`]. The [`MasterCodec`] does
//! both steps and reports every failure as a single [`CodecError`].

pub mod codec;
pub mod message;
pub mod typed;

pub use codec::{CodecError, JsonCodec, MasterCodec, MessageCodec, MessageTypeRegistry};
pub use message::{Envelope, EnvelopeCodec, MessageKind};
pub use typed::{
    ExecutionMode, ExecutionOutcome, ExecutionRequest, ExecutionResponse, Message, Ping, Pong,
    ResourceData, ResourceRequest, ResourceResponse, SerializationFormat, WireMessage,
};
