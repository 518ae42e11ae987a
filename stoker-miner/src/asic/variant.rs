//! Per-generation chip behavior tables.
//!
//! The three supported hash-engine generations share one wire protocol but
//! differ in addressing stride, job-id numbering, nonce layout, and bring-up
//! register values. Everything generation-specific lives here as a closed
//! enum plus small constant tables, so the rest of the crate stays
//! generation-agnostic.

use strum::FromRepr;

use super::frame::RegisterAddress;

/// A register write in a bring-up sequence, value in wire byte order.
pub type RegisterWrite = (RegisterAddress, [u8; 4]);

/// The supported chip generations.
///
/// The discriminant doubles as the identity value the chip reports from its
/// chip-id register, so chain enumeration can recover the generation with
/// [`ChipGeneration::from_repr`].
#[derive(FromRepr, Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum ChipGeneration {
    Bm1366 = 0x1366,
    Bm1368 = 0x1368,
    Bm1370 = 0x1370,
}

impl ChipGeneration {
    /// Identity value reported from the chip-id register.
    pub fn chip_id(&self) -> u16 {
        *self as u16
    }

    /// Address slots each chip occupies on the chain.
    ///
    /// Generations with wider internal addressing take four slots, the rest
    /// take two; chain enumeration assigns addresses in these increments.
    pub fn address_stride(&self) -> u8 {
        match self {
            ChipGeneration::Bm1366 => 2,
            ChipGeneration::Bm1368 => 4,
            ChipGeneration::Bm1370 => 2,
        }
    }

    /// Small-core count per chip, used for hash-rate accounting.
    pub fn small_core_count(&self) -> u32 {
        match self {
            ChipGeneration::Bm1366 => 894,
            ChipGeneration::Bm1368 => 1276,
            ChipGeneration::Bm1370 => 2040,
        }
    }

    /// Jobs a chip tracks concurrently.
    ///
    /// Wire ids assigned within one window must not collide; see
    /// [`job_id_encode`](Self::job_id_encode).
    pub fn live_job_window(&self) -> u8 {
        match self {
            ChipGeneration::Bm1366 => 64,
            ChipGeneration::Bm1368 => 16,
            ChipGeneration::Bm1370 => 8,
        }
    }

    /// Map a pipeline sequence number onto the 7-bit wire job id.
    ///
    /// Each generation multiplies by a fixed stride modulo 128. The stride
    /// and the generation's live-job window are chosen together so that no
    /// two ids within one window alias; after wraparound ids do repeat, and
    /// the job cache is what disambiguates them.
    pub fn job_id_encode(&self, sequence: u8) -> u8 {
        let k: u8 = match self {
            ChipGeneration::Bm1366 => 2,
            ChipGeneration::Bm1368 => 24,
            ChipGeneration::Bm1370 => 16,
        };
        sequence.wrapping_mul(k) & 0x7f
    }

    /// Recover the sequence number from an echoed wire job id.
    ///
    /// Left inverse of [`job_id_encode`](Self::job_id_encode) over the
    /// live-job window only; ids outside the window decode to whatever
    /// window-sized value they alias to.
    pub fn job_id_decode(&self, wire_id: u8) -> u8 {
        match self {
            ChipGeneration::Bm1366 => (wire_id >> 1) & 0x3f,
            // 24 = 8 * 3; dividing out the 8 leaves seq * 3 mod 16, and 11
            // is the inverse of 3 mod 16.
            ChipGeneration::Bm1368 => (wire_id >> 3).wrapping_mul(11) & 0x0f,
            ChipGeneration::Bm1370 => (wire_id >> 4) & 0x07,
        }
    }

    /// Which chip on the chain produced this nonce.
    ///
    /// The top byte of the nonce carries the originating chip's address;
    /// dividing by the address stride turns it into a chain index, so the
    /// effective bit offset differs between generations.
    pub fn nonce_to_chip_index(&self, nonce: u32) -> u8 {
        let address = (nonce >> 24) as u8;
        address >> self.address_stride().trailing_zeros()
    }

    /// Ticket-mask register image for a local difficulty threshold.
    ///
    /// Difficulty rounds down to one below the previous power of two (never
    /// up: reporting too many nonces is harmless, too few loses shares).
    /// The register stores the mask with bit order reversed within each byte
    /// and the bytes in reverse order.
    pub fn difficulty_to_mask(&self, difficulty: u32) -> [u8; 4] {
        let mask = if difficulty <= 1 {
            0u32
        } else {
            (1u32 << (31 - difficulty.leading_zeros())) - 1
        };
        let le = mask.to_le_bytes();
        [
            le[3].reverse_bits(),
            le[2].reverse_bits(),
            le[1].reverse_bits(),
            le[0].reverse_bits(),
        ]
    }

    /// Baud-divider register image for the fast link rate used once the
    /// chain is configured. The host UART must be switched to match by the
    /// caller.
    pub fn fast_baud_value(&self) -> [u8; 4] {
        match self {
            ChipGeneration::Bm1366 | ChipGeneration::Bm1368 => [0x11, 0x30, 0x02, 0x00],
            ChipGeneration::Bm1370 => [0x11, 0x30, 0x00, 0x00],
        }
    }

    /// Broadcast register writes sent before chip addresses are assigned.
    pub fn pre_address_writes(&self) -> &'static [RegisterWrite] {
        match self {
            ChipGeneration::Bm1366 => &[
                (RegisterAddress::InitControl, [0x00, 0x00, 0x07, 0x00]),
                (RegisterAddress::MiscControl, [0x00, 0xc1, 0x00, 0x00]),
            ],
            ChipGeneration::Bm1368 => &[
                (RegisterAddress::InitControl, [0x00, 0x00, 0x07, 0x00]),
                (RegisterAddress::MiscControl, [0x00, 0xc1, 0x00, 0xf0]),
            ],
            ChipGeneration::Bm1370 => &[
                (RegisterAddress::InitControl, [0x00, 0x00, 0x07, 0x00]),
                (RegisterAddress::MiscControl, [0x00, 0xc1, 0x00, 0xf0]),
            ],
        }
    }

    /// Broadcast tuning writes sent after addressing, before the clock ramp.
    pub fn tuning_writes(&self) -> &'static [RegisterWrite] {
        match self {
            ChipGeneration::Bm1366 => &[
                (RegisterAddress::Core, [0x80, 0x00, 0x8b, 0x00]),
                (RegisterAddress::Core, [0x80, 0x00, 0x80, 0x18]),
                (RegisterAddress::IoDriverStrength, [0x02, 0x11, 0x11, 0x11]),
                (RegisterAddress::AnalogMux, [0x00, 0x00, 0x00, 0x03]),
            ],
            ChipGeneration::Bm1368 => &[
                (RegisterAddress::Core, [0x80, 0x00, 0x8b, 0x00]),
                (RegisterAddress::Core, [0x80, 0x00, 0x80, 0x0c]),
                (RegisterAddress::Core, [0x80, 0x00, 0x82, 0xaa]),
                (RegisterAddress::IoDriverStrength, [0x02, 0x11, 0x11, 0x11]),
                (RegisterAddress::AnalogMux, [0x02, 0x00, 0x00, 0x00]),
                (RegisterAddress::MiscSettings, [0x80, 0x44, 0x00, 0x00]),
            ],
            ChipGeneration::Bm1370 => &[
                (RegisterAddress::Core, [0x80, 0x00, 0x8d, 0xee]),
                (RegisterAddress::Core, [0x80, 0x00, 0x80, 0x0c]),
                (RegisterAddress::IoDriverStrength, [0x01, 0x11, 0x11, 0x11]),
                (RegisterAddress::AnalogMux, [0x02, 0x00, 0x00, 0x00]),
                (RegisterAddress::MiscSettings, [0x80, 0x44, 0x00, 0x00]),
            ],
        }
    }
}
