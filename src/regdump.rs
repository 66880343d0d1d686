//! Diagnostic register dump

use crate::regs::DUMP_REGISTERS;
use crate::transport::{BusError, BusTransport};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

/// One dumped register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegisterValue {
    pub address: u32,
    pub value: u8,
}

/// Dump aborted at `address`; `partial` holds everything read before it
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Register dump failed at {address:#04x} after {} registers: {source}", .partial.len())]
pub struct DumpError {
    pub address: u32,
    pub partial: Vec<RegisterValue>,
    #[source]
    pub source: BusError,
}

/// Read `addresses` in order
pub fn dump_addresses<T: BusTransport + ?Sized>(
    addresses: &[u32],
    transport: &mut T,
) -> Result<Vec<RegisterValue>, DumpError> {
    let mut values = Vec::with_capacity(addresses.len());

    for &address in addresses {
        match transport.read(address) {
            Ok(value) => values.push(RegisterValue { address, value }),
            Err(source) => {
                return Err(DumpError {
                    address,
                    partial: values,
                    source,
                })
            }
        }
    }

    debug!("Dumped {} registers", values.len());
    Ok(values)
}

/// Read the fixed diagnostic register list
pub fn dump_registers<T: BusTransport + ?Sized>(
    transport: &mut T,
) -> Result<Vec<RegisterValue>, DumpError> {
    dump_addresses(&DUMP_REGISTERS, transport)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regs::{self, DUMP_REGISTER_COUNT};
    use crate::transport::SimulatedTransport;

    #[test]
    fn test_full_dump_follows_list() {
        let mut sim = SimulatedTransport::new();
        sim.set_register(regs::VENDOR_ID, 0x10);

        let values = dump_registers(&mut sim).unwrap();
        assert_eq!(values.len(), DUMP_REGISTER_COUNT);
        assert!(values
            .iter()
            .zip(DUMP_REGISTERS.iter())
            .all(|(v, &a)| v.address == a));
        assert!(values.contains(&RegisterValue {
            address: regs::VENDOR_ID,
            value: 0x10
        }));
    }

    #[test]
    fn test_failure_keeps_partial_results() {
        let mut sim = SimulatedTransport::new();
        sim.fail_nth_read(3);

        let err = dump_registers(&mut sim).unwrap_err();
        assert_eq!(err.address, DUMP_REGISTERS[2]);
        assert_eq!(err.partial.len(), 2);
        assert_eq!(err.partial[1].address, DUMP_REGISTERS[1]);
    }
}
