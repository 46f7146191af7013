//! GT06-family wire protocol: frame codec, payload decoders and outbound
//! frame builders.
//!
//! This crate is transport-agnostic. The codec operates on buffers, the
//! parsers on byte slices; no I/O happens here.

pub mod codec;
pub mod error;
pub mod frame;
pub mod payload;

pub use codec::{CodecConfig, Gt06Codec};
pub use error::ProtocolError;
pub use frame::Frame;
pub use payload::Payload;
