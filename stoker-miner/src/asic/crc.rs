//! Frame checksums for the hash-chain serial protocol.
//!
//! Command and register frames carry a 5-bit CRC in the final byte; work
//! frames carry a 16-bit CRC transmitted big-endian. Both polynomials are
//! fixed by the chip and must match bit-for-bit.

use crc_all::CrcAlgo;

const CRC5_INIT: u8 = 0x1f;

// CRC-5-USB: polynomial 0x05, init 0x1f, no xorout, no reflection.
const CRC5: CrcAlgo<u8> = CrcAlgo::<u8>::new(0x5, 5, CRC5_INIT, 0, false);

/// CRC over everything after the preamble of a command frame.
pub fn crc5(data: &[u8]) -> u8 {
    let mut crc = CRC5_INIT;
    CRC5.update_crc(&mut crc, data);
    CRC5.finish_crc(&crc)
}

/// True when `data` (with its trailing CRC byte included) checks out.
///
/// A CRC computed over data-plus-appended-CRC yields zero for intact frames,
/// so validation does not need to split the buffer.
pub fn crc5_is_valid(data: &[u8]) -> bool {
    crc5(data) == 0
}

const CRC16_INIT: u16 = 0xFFFF;

// CRC-16-CCITT-FALSE: polynomial 0x1021, init 0xFFFF, no xorout, no
// reflection. Used for work frames only.
const CRC16: CrcAlgo<u16> = CrcAlgo::<u16>::new(0x1021, 16, CRC16_INIT, 0, false);

/// CRC over everything after the preamble of a work frame.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc = CRC16_INIT;
    CRC16.update_crc(&mut crc, data);
    CRC16.finish_crc(&crc)
}
