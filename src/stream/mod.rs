//! Agent `stream-json` handling.
//!
//! The agent CLI writes one JSON object per line on stdout. This module
//! turns that byte stream into typed messages in two steps:
//!
//! - `codec`: incremental line framing ([`NdjsonCodec`] for
//!   [`tokio_util::codec::FramedRead`], [`FrameDecoder`] for synchronous use).
//! - `message`: classification of each decoded value into an [`AgentMessage`].

pub mod codec;
pub mod message;

pub use codec::{Frame, FrameDecoder, NdjsonCodec};
pub use message::{classify, AgentMessage, BlockDelta, BlockStart, StreamEvent};
