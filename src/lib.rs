//! Inquest
//!
//! An SMTP credential auditing and DNS message inspection toolkit.
//!
//! # Features
//!
//! * Concurrent SMTP authentication probing with STARTTLS escalation
//! * AUTH mechanism negotiation (LOGIN, PLAIN, CRAM-MD5, automatic)
//! * Decoder for the DNS wire format, including name compression
//! * Thread-safe domain address cache with per-entry expiry
//!
//! # Architecture
//!
//! The crate is divided into three independent modules:
//! * `smtp` - connection state machine and probing orchestrator
//! * `dns` - transport-agnostic message decoding
//! * `cache` - expiring domain address map shared between workers

/// Thread-safe domain address cache
pub mod cache;

/// DNS message decoding and wire format handling
pub mod dns;

/// SMTP authentication probing
pub mod smtp;
