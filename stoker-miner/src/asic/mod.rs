//! Chip-facing side of the miner: wire protocol, frequency control, and the
//! per-generation behavior tables for the supported hash-engine chips.

pub mod chain;
pub mod crc;
pub mod frame;
pub mod job;
pub mod pll;
pub mod variant;
