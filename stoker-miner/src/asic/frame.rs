//! Framing for the hash-chain serial protocol.
//!
//! Host-to-chip frames open with the preamble `55 AA`, then a flags byte
//! (frame type, broadcast bit, command code), a length byte, the payload, and
//! a checksum. Command frames close with a 5-bit CRC in one byte; work frames
//! close with a 16-bit CRC in two bytes, high byte first. The length byte
//! counts everything after the preamble.
//!
//! Chip-to-host traffic uses the reversed preamble `AA 55` and a fixed
//! 11-byte frame. The decoder treats any other leading byte as loss of frame
//! sync: it discards a single byte and searches again rather than giving up
//! on the stream.

use bitvec::prelude::*;
use bytes::{Buf, BufMut, BytesMut};
use std::{fmt, io};
use strum::FromRepr;
use tokio_util::codec::{Decoder, Encoder};

use super::crc::{crc16, crc5, crc5_is_valid};
use super::job::WorkFrame;
use crate::tracing::prelude::*;

/// Wrapper for formatting byte slices as space-separated hex.
pub(crate) struct HexBytes<'a>(pub &'a [u8]);

impl fmt::Display for HexBytes<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// Errors surfaced while parsing chip replies.
///
/// Both variants are recoverable: the caller discards the offending bytes and
/// lets the decoder hunt for the next preamble.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("bad preamble, expected aa 55")]
    Framing,

    #[error("CRC5 check failed")]
    Checksum,

    #[error("truncated frame: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },
}

/// Chip register addresses that the controller reads or writes.
#[derive(FromRepr, Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum RegisterAddress {
    ChipId = 0x00,
    PllDivider = 0x08,
    NonceRange = 0x10,
    TicketMask = 0x14,
    MiscControl = 0x18,
    UartBaud = 0x28,
    Core = 0x3C,
    AnalogMux = 0x54,
    IoDriverStrength = 0x58,
    VersionMask = 0xA4,
    InitControl = 0xA8,
    MiscSettings = 0xB9,
}

#[repr(u8)]
enum FrameKind {
    Work = 1,
    Command = 2,
}

#[repr(u8)]
enum CommandCode {
    SetChipAddress = 0,
    WriteRegisterOrWork = 1,
    ReadRegister = 2,
    ChainInactive = 3,
}

/// Host-to-chip frames.
#[derive(Debug)]
pub enum Command {
    /// Assign an address to the first unaddressed chip on the chain.
    SetChipAddress { chip_address: u8 },

    /// Put every chip into addressing mode (enables daisy-chain forwarding).
    ChainInactive,

    /// Read a register from one chip or all of them.
    ReadRegister {
        broadcast: bool,
        chip_address: u8,
        register: RegisterAddress,
    },

    /// Write a 32-bit register value to one chip or all of them.
    WriteRegister {
        broadcast: bool,
        chip_address: u8,
        register: RegisterAddress,
        value: [u8; 4],
    },

    /// Send a work item; the chip computes midstates itself.
    Work(WorkFrame),
}

impl Command {
    fn flags(&self) -> u8 {
        let (kind, broadcast, code) = match self {
            Command::SetChipAddress { .. } => {
                (FrameKind::Command, false, CommandCode::SetChipAddress)
            }
            Command::ChainInactive => (FrameKind::Command, true, CommandCode::ChainInactive),
            Command::ReadRegister { broadcast, .. } => {
                (FrameKind::Command, *broadcast, CommandCode::ReadRegister)
            }
            Command::WriteRegister { broadcast, .. } => (
                FrameKind::Command,
                *broadcast,
                CommandCode::WriteRegisterOrWork,
            ),
            Command::Work(_) => (FrameKind::Work, false, CommandCode::WriteRegisterOrWork),
        };

        let mut flags = 0u8;
        let field = flags.view_bits_mut::<Lsb0>();
        field[5..7].store(kind as u8);
        field[4..5].store(broadcast as u8);
        field[0..4].store(code as u8);
        flags
    }

    fn put_payload(&self, dst: &mut BytesMut) {
        match self {
            Command::SetChipAddress { chip_address } => {
                dst.put_u8(*chip_address);
                dst.put_u8(0x00); // reserved
            }
            Command::ChainInactive => {
                dst.put_u8(0x00);
                dst.put_u8(0x00);
            }
            Command::ReadRegister {
                chip_address,
                register,
                ..
            } => {
                dst.put_u8(*chip_address);
                dst.put_u8(*register as u8);
            }
            Command::WriteRegister {
                chip_address,
                register,
                value,
                ..
            } => {
                dst.put_u8(*chip_address);
                dst.put_u8(*register as u8);
                dst.put_slice(value);
            }
            Command::Work(frame) => {
                frame.put_body(dst);
            }
        }
    }
}

/// Raw chip reply, prior to classification.
///
/// Every reply has the same nine-byte shape after the preamble: a 32-bit
/// little-endian nonce field, the midstate/chip byte, the echoed wire job id,
/// a 16-bit version-rolling fragment, and the CRC. Whether the frame is a
/// register reply or a nonce candidate is decided later by
/// [`super::job::classify`], because that distinction depends on field
/// contents, not framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AsicResult {
    pub nonce: u32,
    pub midstate: u8,
    pub wire_job_id: u8,
    pub version_bits: u16,
}

/// Length of every chip-to-host frame, preamble included.
pub const RESPONSE_FRAME_LEN: usize = 11;

const TX_PREAMBLE: [u8; 2] = [0x55, 0xaa];
const RX_PREAMBLE: [u8; 2] = [0xaa, 0x55];

// Length-byte overhead on top of the payload: flags + length + CRC bytes.
const COMMAND_OVERHEAD: u8 = 3;
const WORK_OVERHEAD: u8 = 4;

/// Parse one complete 11-byte reply frame.
///
/// Unlike the streaming [`FrameCodec`], this returns the precise failure so
/// the caller can decide how to resynchronize.
pub fn parse_response(frame: &[u8]) -> Result<AsicResult, FrameError> {
    if frame.len() < RESPONSE_FRAME_LEN {
        return Err(FrameError::Truncated {
            need: RESPONSE_FRAME_LEN,
            have: frame.len(),
        });
    }
    if frame[..2] != RX_PREAMBLE {
        return Err(FrameError::Framing);
    }
    if !crc5_is_valid(&frame[2..RESPONSE_FRAME_LEN]) {
        return Err(FrameError::Checksum);
    }

    let mut body = &frame[2..RESPONSE_FRAME_LEN - 1];
    let nonce = body.get_u32_le();
    let midstate = body.get_u8();
    let wire_job_id = body.get_u8();
    let version_bits = body.get_u16();

    Ok(AsicResult {
        nonce,
        midstate,
        wire_job_id,
        version_bits,
    })
}

/// Streaming codec over the chain transport.
#[derive(Default)]
pub struct FrameCodec;

impl Encoder<Command> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, command: Command, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.put_slice(&TX_PREAMBLE);

        let start = dst.len();
        dst.put_u8(command.flags());
        let length_pos = dst.len();
        dst.put_u8(0); // patched below
        command.put_payload(dst);

        let payload_len = (dst.len() - length_pos - 1) as u8;
        match &command {
            Command::Work(_) => {
                dst[length_pos] = payload_len + WORK_OVERHEAD;
                let crc = crc16(&dst[start..]);
                dst.put_slice(&crc.to_be_bytes());
            }
            _ => {
                dst[length_pos] = payload_len + COMMAND_OVERHEAD;
                let crc = crc5(&dst[start..]);
                dst.put_u8(crc);
            }
        }

        trace!(
            cmd = ?command,
            bytes = dst.len(),
            frame = %HexBytes(dst.as_ref()),
            "TX chain"
        );

        Ok(())
    }
}

impl Decoder for FrameCodec {
    type Item = AsicResult;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Return Ok(Some) for a valid frame, Ok(None) to be called again with
        // more data. Errors would terminate the stream, so invalid bytes are
        // consumed one at a time instead, hunting for the next preamble.
        const CALL_AGAIN: Result<Option<AsicResult>, io::Error> = Ok(None);

        if src.len() < RESPONSE_FRAME_LEN {
            return CALL_AGAIN;
        }

        match parse_response(&src[..RESPONSE_FRAME_LEN]) {
            Ok(result) => {
                trace!(
                    resp = ?result,
                    frame = %HexBytes(&src[..RESPONSE_FRAME_LEN]),
                    "RX chain"
                );
                src.advance(RESPONSE_FRAME_LEN);
                Ok(Some(result))
            }
            Err(FrameError::Checksum) => {
                trace!("Frame sync lost: CRC5 failed, searching for next frame");
                src.advance(1);
                CALL_AGAIN
            }
            Err(_) => {
                src.advance(1);
                CALL_AGAIN
            }
        }
    }
}
