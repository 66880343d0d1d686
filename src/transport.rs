//! Bus transport collaborator
//!
//! The core only ever talks to the coprocessor through [`BusTransport`]. A real
//! deployment backs it with an I2C adapter; [`SimulatedTransport`] stands in
//! for the device in tests and in the service binary's simulation mode.

use crate::regs::{self, FwStatus};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace, warn};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("Write to {address:#010x} failed: {reason}")]
    Write { address: u32, reason: String },

    #[error("Read from {address:#010x} failed: {reason}")]
    Read { address: u32, reason: String },
}

impl BusError {
    /// Address of the failed transfer
    pub fn address(&self) -> u32 {
        match self {
            Self::Write { address, .. } | Self::Read { address, .. } => *address,
        }
    }
}

/// Register-addressed read/write channel to the coprocessor.
///
/// Implementations are not required to be re-entrant; the device serializes
/// every call behind its bus lock. Block transfers are expressed as one
/// `write` per contiguous chunk.
#[cfg_attr(test, mockall::automock)]
pub trait BusTransport {
    /// Write `bytes` starting at `address`
    fn write(&mut self, address: u32, bytes: &[u8]) -> Result<(), BusError>;

    /// Read one register
    fn read(&mut self, address: u32) -> Result<u8, BusError>;
}

/// Write a control sequence one register at a time, stopping at the first failure
pub fn write_sequence<T: BusTransport + ?Sized>(
    transport: &mut T,
    sequence: &[regs::RegWrite],
) -> Result<(), BusError> {
    for step in sequence {
        trace!("reg {:#04x} <= {:#04x}", step.register, step.value);
        transport.write(step.register, &[step.value])?;
    }
    Ok(())
}

/// One recorded bus call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusCall {
    Write { address: u32, bytes: Vec<u8> },
    Read { address: u32 },
}

/// Recorded bus call and whether the simulated device acknowledged it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusRecord {
    pub call: BusCall,
    pub ok: bool,
}

#[derive(Debug)]
struct SimState {
    registers: HashMap<u32, u8>,
    memory: BTreeMap<u32, Vec<u8>>,
    log: Vec<BusRecord>,
    writes: usize,
    reads: usize,
    fail_write: Option<usize>,
    fail_read: Option<usize>,
    fail_read_address: Option<u32>,
    boot_status: u8,
}

impl SimState {
    fn new() -> Self {
        Self {
            registers: HashMap::new(),
            memory: BTreeMap::new(),
            log: Vec::new(),
            writes: 0,
            reads: 0,
            fail_write: None,
            fail_read: None,
            fail_read_address: None,
            boot_status: 0x01,
        }
    }

    fn is_register(address: u32, bytes: &[u8]) -> bool {
        address <= 0xff && bytes.len() == 1
    }
}

/// In-memory IM401 stand-in.
///
/// Single-byte writes below `0x100` land in the register file, anything else
/// in DSP memory. Once DSP memory has been written the firmware "boots" and
/// publishes the configured boot status in [`regs::FW_STATUS`]. Writing
/// [`regs::RESET`] clears the register file.
///
/// Clones share state, so a test can keep a handle while the device owns the
/// transport.
#[derive(Debug, Clone)]
pub struct SimulatedTransport {
    state: Arc<Mutex<SimState>>,
}

impl Default for SimulatedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedTransport {
    pub fn new() -> Self {
        debug!("Creating simulated IM401 transport");
        Self {
            state: Arc::new(Mutex::new(SimState::new())),
        }
    }

    /// Fail the `n`th write call (1-based)
    pub fn fail_nth_write(&self, n: usize) {
        self.state.lock().fail_write = Some(n);
    }

    /// Fail the `n`th read call (1-based)
    pub fn fail_nth_read(&self, n: usize) {
        self.state.lock().fail_read = Some(n);
    }

    /// Fail every read of `address`
    pub fn fail_reads_at(&self, address: u32) {
        self.state.lock().fail_read_address = Some(address);
    }

    /// Clear all injected faults
    pub fn heal(&self) {
        let mut state = self.state.lock();
        state.fail_write = None;
        state.fail_read = None;
        state.fail_read_address = None;
    }

    /// Raw value the firmware reports in `FW_STATUS` after a memory load
    pub fn set_boot_status(&self, raw: u8) {
        self.state.lock().boot_status = raw;
    }

    pub fn set_register(&self, address: u32, value: u8) {
        self.state.lock().registers.insert(address, value);
    }

    pub fn register(&self, address: u32) -> u8 {
        self.state.lock().registers.get(&address).copied().unwrap_or(0)
    }

    /// Latch a trigger the way the DSP does before pulsing the IRQ line
    pub fn raise_trigger(&self) {
        self.set_register(regs::IRQ_STATUS, 0x01);
    }

    /// Bytes last written to DSP memory at `address`
    pub fn memory_at(&self, address: u32) -> Option<Vec<u8>> {
        self.state.lock().memory.get(&address).cloned()
    }

    pub fn records(&self) -> Vec<BusRecord> {
        self.state.lock().log.clone()
    }

    /// Acknowledged writes, in order
    pub fn writes(&self) -> Vec<(u32, Vec<u8>)> {
        self.state
            .lock()
            .log
            .iter()
            .filter(|record| record.ok)
            .filter_map(|record| match &record.call {
                BusCall::Write { address, bytes } => Some((*address, bytes.clone())),
                BusCall::Read { .. } => None,
            })
            .collect()
    }

    pub fn clear_log(&self) {
        self.state.lock().log.clear();
    }
}

impl BusTransport for SimulatedTransport {
    fn write(&mut self, address: u32, bytes: &[u8]) -> Result<(), BusError> {
        let mut state = self.state.lock();
        state.writes += 1;

        let call = BusCall::Write {
            address,
            bytes: bytes.to_vec(),
        };

        if state.fail_write == Some(state.writes) {
            warn!("Simulated NACK on write #{} to {:#010x}", state.writes, address);
            state.log.push(BusRecord { call, ok: false });
            return Err(BusError::Write {
                address,
                reason: "simulated NACK".to_string(),
            });
        }

        state.log.push(BusRecord { call, ok: true });

        if SimState::is_register(address, bytes) {
            if address == regs::RESET {
                state.registers.clear();
                state.registers.insert(regs::FW_STATUS, 0x00);
            } else {
                state.registers.insert(address, bytes[0]);
            }
        } else {
            state.memory.insert(address, bytes.to_vec());
            let boot = state.boot_status;
            state.registers.insert(regs::FW_STATUS, boot);
            trace!(
                "DSP memory {:#010x} <= {} bytes, fw status {:?}",
                address,
                bytes.len(),
                FwStatus::from_raw(boot)
            );
        }

        Ok(())
    }

    fn read(&mut self, address: u32) -> Result<u8, BusError> {
        let mut state = self.state.lock();
        state.reads += 1;

        let call = BusCall::Read { address };
        let failed =
            state.fail_read == Some(state.reads) || state.fail_read_address == Some(address);

        if failed {
            warn!("Simulated read failure on {:#010x}", address);
            state.log.push(BusRecord { call, ok: false });
            return Err(BusError::Read {
                address,
                reason: "simulated bus error".to_string(),
            });
        }

        state.log.push(BusRecord { call, ok: true });
        Ok(state.registers.get(&address).copied().unwrap_or(0))
    }
}
