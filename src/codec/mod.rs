//! Codec module - serialization/deserialization for payloads.
//!
//! The wire payload is self-describing MessagePack. Request documents and
//! responses are dynamic (row shapes are caller-defined), so the codec works
//! over `serde_json::Value` as the in-memory document model while any
//! `serde::Serialize` type is accepted for encoding.

mod msgpack;

pub use msgpack::MsgPackCodec;
