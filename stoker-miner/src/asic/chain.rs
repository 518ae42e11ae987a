//! Chain control: enumeration, bring-up, and the running work/result split.
//!
//! A [`Chain`] owns the transport exclusively during bring-up, where command
//! ordering matters and replies are synchronous. Once the chain is hashing,
//! [`Chain::split`] hands the send side to the job producer and the receive
//! side to the result consumer so the two can run concurrently.

use bytes::BytesMut;
use std::time::Duration;
use tokio_util::codec::{Decoder, Encoder};

use super::frame::{AsicResult, Command, FrameCodec, RegisterAddress, RESPONSE_FRAME_LEN};
use super::job::{classify, TaskResult, WorkFrame, VERSION_ROLL_SHIFT};
use super::pll::{ramp_steps, PllError, PllParams};
use super::variant::ChipGeneration;
use crate::tracing::prelude::*;
use crate::transport::{Transport, TransportRx, TransportTx};

/// Clock settle time after each PLL write.
pub const PLL_SETTLE: Duration = Duration::from_millis(100);

/// Pause after addressing commands so the daisy chain can latch.
const ADDRESS_SETTLE: Duration = Duration::from_millis(10);

/// How long to wait for each reply while counting chips.
const ENUMERATE_TIMEOUT: Duration = Duration::from_millis(500);

/// Hash clock the chips wake up at before any PLL write.
pub const POWER_ON_FREQUENCY_MHZ: f64 = 56.25;

#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("chain transport: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Pll(#[from] PllError),

    #[error("no chips answered enumeration")]
    NoChips,
}

/// Mutable chain facts, owned by whoever drives the chain rather than being
/// process-global.
#[derive(Debug, Clone, Copy)]
pub struct ChainState {
    pub frequency_mhz: f64,
    pub chip_count: usize,
}

// Version-rolling register image: enable bits plus the mask fragment the
// chip may roll, big-endian.
fn version_mask_value(mask: u32) -> [u8; 4] {
    let fragment = ((mask >> VERSION_ROLL_SHIFT) as u16).to_be_bytes();
    [0x90, 0x00, fragment[0], fragment[1]]
}

pub struct Chain<T: Transport> {
    transport: T,
    codec: FrameCodec,
    rx_buf: BytesMut,
    pub generation: ChipGeneration,
    pub state: ChainState,
}

impl<T: Transport> Chain<T> {
    pub fn new(transport: T, generation: ChipGeneration) -> Self {
        Chain {
            transport,
            codec: FrameCodec,
            rx_buf: BytesMut::new(),
            generation,
            state: ChainState {
                frequency_mhz: POWER_ON_FREQUENCY_MHZ,
                chip_count: 0,
            },
        }
    }

    async fn send(&mut self, command: Command) -> Result<(), ChainError> {
        let mut frame = BytesMut::new();
        self.codec.encode(command, &mut frame)?;
        self.transport.send(&frame).await?;
        self.transport.flush().await?;
        Ok(())
    }

    async fn write_register(
        &mut self,
        register: RegisterAddress,
        value: [u8; 4],
    ) -> Result<(), ChainError> {
        self.send(Command::WriteRegister {
            broadcast: true,
            chip_address: 0,
            register,
            value,
        })
        .await
    }

    /// Pull the next complete reply off the wire, or `None` on timeout.
    async fn recv_result(&mut self, timeout: Duration) -> Result<Option<AsicResult>, ChainError> {
        loop {
            if let Some(result) = self.codec.decode(&mut self.rx_buf)? {
                return Ok(Some(result));
            }
            if self.rx_buf.len() >= RESPONSE_FRAME_LEN {
                // Decoder is resynchronizing; let it chew further.
                continue;
            }
            let mut chunk = [0u8; 64];
            let n = self.transport.recv(&mut chunk, timeout).await?;
            if n == 0 {
                return Ok(None);
            }
            self.rx_buf.extend_from_slice(&chunk[..n]);
        }
    }

    /// Broadcast a chip-id read and count the replies.
    pub async fn enumerate(&mut self) -> Result<usize, ChainError> {
        self.send(Command::ReadRegister {
            broadcast: true,
            chip_address: 0,
            register: RegisterAddress::ChipId,
        })
        .await?;

        let mut count = 0;
        while let Some(raw) = self.recv_result(ENUMERATE_TIMEOUT).await? {
            match classify(self.generation, raw) {
                TaskResult::RegisterResponse { register: 0x00, data, .. } => {
                    let id = (data >> 16) as u16;
                    match ChipGeneration::from_repr(id) {
                        Some(found) if found == self.generation => count += 1,
                        Some(found) => {
                            warn!(?found, expected = ?self.generation, "Chip generation mismatch");
                            count += 1;
                        }
                        None => warn!(chip_id = id, "Unrecognized chip identity"),
                    }
                }
                other => debug!(?other, "Unexpected reply during enumeration"),
            }
        }

        if count == 0 {
            return Err(ChainError::NoChips);
        }
        info!(count, generation = ?self.generation, "Enumerated hash chain");
        self.state.chip_count = count;
        Ok(count)
    }

    /// Full bring-up: enumerate, configure, address, filter, and ramp.
    ///
    /// Returns the detected chip count. A count that differs from
    /// `expected_chips` is logged and accepted; the chain runs with what
    /// actually answered.
    pub async fn bring_up(
        &mut self,
        version_mask: u32,
        difficulty: u32,
        target_mhz: f64,
        expected_chips: usize,
    ) -> Result<usize, ChainError> {
        let count = self.enumerate().await?;
        if count != expected_chips {
            warn!(
                detected = count,
                expected = expected_chips,
                "Chip count differs from board configuration"
            );
        }

        // The rolling enable is written three times back to back; chips fresh
        // out of reset have been seen to drop the first write.
        for _ in 0..3 {
            self.write_register(RegisterAddress::VersionMask, version_mask_value(version_mask))
                .await?;
        }

        for &(register, value) in self.generation.pre_address_writes() {
            self.write_register(register, value).await?;
        }

        self.send(Command::ChainInactive).await?;
        tokio::time::sleep(ADDRESS_SETTLE).await;
        let stride = self.generation.address_stride();
        for chip in 0..count {
            self.send(Command::SetChipAddress {
                chip_address: chip as u8 * stride,
            })
            .await?;
            tokio::time::sleep(ADDRESS_SETTLE).await;
        }

        for &(register, value) in self.generation.tuning_writes() {
            self.write_register(register, value).await?;
        }

        self.set_difficulty_mask(difficulty).await?;
        self.set_frequency(target_mhz).await?;

        Ok(count)
    }

    /// Switch every chip to the fast link rate.
    ///
    /// The chips change speed as soon as the write latches; the caller must
    /// reconfigure the host UART to [`crate::transport::FAST_CHAIN_BAUD`]
    /// before sending anything else.
    pub async fn set_fast_baud(&mut self) -> Result<(), ChainError> {
        let value = self.generation.fast_baud_value();
        self.write_register(RegisterAddress::UartBaud, value).await
    }

    /// Program the local difficulty filter on every chip.
    pub async fn set_difficulty_mask(&mut self, difficulty: u32) -> Result<(), ChainError> {
        let value = self.generation.difficulty_to_mask(difficulty);
        debug!(difficulty, "Setting chain difficulty mask");
        self.write_register(RegisterAddress::TicketMask, value).await
    }

    /// Ramp the hash clock to `target_mhz` in 6.25 MHz steps.
    ///
    /// A solve failure mid-ramp aborts; steps already written stay applied
    /// and the recorded frequency reflects the last successful one.
    pub async fn set_frequency(&mut self, target_mhz: f64) -> Result<(), ChainError> {
        for step in ramp_steps(self.state.frequency_mhz, target_mhz) {
            let params = match PllParams::solve(step) {
                Ok(params) => params,
                Err(error) => {
                    error!(%error, step, "Frequency ramp aborted");
                    return Err(error.into());
                }
            };
            self.write_register(RegisterAddress::PllDivider, params.register_value())
                .await?;
            self.state.frequency_mhz = params.achieved_mhz();
            tokio::time::sleep(PLL_SETTLE).await;
        }
        info!(frequency = self.state.frequency_mhz, "Hash clock ramped");
        Ok(())
    }

    /// Split into the producer's send half and the consumer's receive half.
    pub fn split(self) -> (WorkSender<T::Tx>, ResultReceiver<T::Rx>) {
        let (tx, rx) = self.transport.split();
        (
            WorkSender {
                tx,
                codec: FrameCodec,
                generation: self.generation,
            },
            ResultReceiver {
                rx,
                codec: FrameCodec,
                rx_buf: self.rx_buf,
                generation: self.generation,
            },
        )
    }
}

/// Send half of a running chain.
pub struct WorkSender<Tx: TransportTx> {
    tx: Tx,
    codec: FrameCodec,
    pub generation: ChipGeneration,
}

impl<Tx: TransportTx> WorkSender<Tx> {
    async fn send(&mut self, command: Command) -> std::io::Result<()> {
        let mut frame = BytesMut::new();
        self.codec.encode(command, &mut frame)?;
        self.tx.send(&frame).await?;
        self.tx.flush().await
    }

    pub async fn send_work(&mut self, frame: WorkFrame) -> std::io::Result<()> {
        self.send(Command::Work(frame)).await
    }

    pub async fn set_difficulty_mask(&mut self, difficulty: u32) -> std::io::Result<()> {
        let value = self.generation.difficulty_to_mask(difficulty);
        self.send(Command::WriteRegister {
            broadcast: true,
            chip_address: 0,
            register: RegisterAddress::TicketMask,
            value,
        })
        .await
    }
}

/// Receive half of a running chain.
pub struct ResultReceiver<Rx: TransportRx> {
    rx: Rx,
    codec: FrameCodec,
    rx_buf: BytesMut,
    pub generation: ChipGeneration,
}

impl<Rx: TransportRx> ResultReceiver<Rx> {
    /// Next classified reply, or `None` when `timeout` passes quietly.
    pub async fn next(&mut self, timeout: Duration) -> std::io::Result<Option<TaskResult>> {
        loop {
            if let Some(raw) = self.codec.decode(&mut self.rx_buf)? {
                return Ok(Some(classify(self.generation, raw)));
            }
            if self.rx_buf.len() >= RESPONSE_FRAME_LEN {
                continue;
            }
            let mut chunk = [0u8; 64];
            let n = self.rx.recv(&mut chunk, timeout).await?;
            if n == 0 {
                return Ok(None);
            }
            self.rx_buf.extend_from_slice(&chunk[..n]);
        }
    }
}
