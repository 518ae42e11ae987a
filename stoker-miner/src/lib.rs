//! Stoker: firmware core for serial-attached SHA-256 mining ASICs.
//!
//! This crate contains the chip-facing half of the miner: the wire protocol
//! codec for the hash-engine chain, PLL frequency control, the per-generation
//! chip tables, and the producer/consumer pipeline that turns pool jobs into
//! chip work and chip nonces into verified shares.
//!
//! The surrounding daemon supplies the pieces this crate deliberately treats
//! as collaborators: the pool session (parsed job notifications in, share
//! submissions out), board power sequencing, and persisted configuration.

pub mod asic;
pub mod cache;
pub mod job_source;
pub mod pipeline;
pub mod tracing;
pub mod transport;
