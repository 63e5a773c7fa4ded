//! Protocol module - wire format, frames, and stream reassembly.

mod frame;
mod frame_buffer;
mod wire_format;

pub use frame::Frame;
pub use frame_buffer::FrameBuffer;
pub use wire_format::{
    build_frame, Header, DEFAULT_MAX_PAYLOAD_SIZE, FRAME_MARKER, HEADER_SIZE, MAX_TAG,
    PROTOCOL_VERSION,
};
