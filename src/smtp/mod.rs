//! SMTP Authentication Probing
//!
//! This module drives SMTP authentication attempts against a target server
//! and reports per-credential success or failure. A connection task owns a
//! single byte stream and walks the protocol from the greeting through an
//! optional STARTTLS escalation to the AUTH exchange; the prober fans tasks
//! out over a pool of worker threads fed from a shared credential cursor.
//!
//! # Module Structure
//!
//! * `config` - probe configuration records
//! * `connection` - per-credential connection state machine
//! * `prober` - concurrent orchestration and result aggregation
//! * `reply` - reply line framing and parsing helpers
//! * `stream` - TLS-capable byte stream abstraction

/// Configuration records for probes
pub mod config;

/// Single-credential connection task
pub mod connection;

/// Concurrent probing orchestrator
pub mod prober;

/// Reply line parsing helpers
pub mod reply;

/// TLS-capable byte stream abstraction
pub mod stream;
