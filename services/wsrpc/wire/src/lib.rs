//! JSON-RPC 2.0 wire model and frame splitting for wsrpc.
//!
//! This crate holds everything about the bytes on the socket that does not
//! depend on a live connection:
//!
//! - **Messages**: [`Request`], [`Response`] and [`RequestId`] with the
//!   shape checks a response must pass before it settles a call
//! - **Frame splitting**: [`split_frames`] cuts a text frame that carries
//!   several concatenated JSON documents into individual fragments
//!
//! ## Frame Boundaries
//!
//! ```text
//! }{     }|--|{
//! }][{   }]|--|[{
//! }[{    }|--|[{
//! }]{    }]|--|{
//! ```
//!
//! A single optional CR or LF is allowed between the two halves.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod chunk;
pub mod error;
pub mod message;

// Re-export main types
pub use chunk::{split_frames, FRAME_DELIMITER};
pub use error::WireError;
pub use message::{
    chunk_timeout_payload, message_id, Request, RequestId, Response, ResponseError,
    CHUNK_TIMEOUT_CODE, JSONRPC_VERSION,
};
