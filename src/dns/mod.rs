//! DNS Message Decoding
//!
//! This module implements the DNS wire format in a transport agnostic
//! fashion. It decodes a single UDP or TCP payload into a typed message,
//! handling name compression, and can re-encode messages with compression
//! disabled. The decoder performs no I/O and keeps no global state.
//!
//! # Module Structure
//!
//! * `buffer` - low-level cursor over message bytes, name codec
//! * `protocol` - message, header, question and record structures

/// Low-level buffer operations for DNS message handling
pub mod buffer;

/// DNS message structures and wire codec
pub mod protocol;
