//! Firmware loader
//!
//! Writes container segments, private data and trigger models to DSP memory.
//! Everything that can be rejected from the input alone (container layout,
//! training headers, training ids) is checked while building a [`LoadPlan`],
//! before the first bus write.

use crate::image::{self, FirmwareContainer, ImageError, TrainingDataHeader, TrainingDataInfo};
use crate::matcher::{self, UnknownTrainingId};
use crate::transport::{BusError, BusTransport};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    #[error("Invalid firmware image: {0}")]
    Image(#[from] ImageError),

    #[error(transparent)]
    UnknownTrainingId(#[from] UnknownTrainingId),

    #[error("Bus write failed after {written} successful writes: {source}")]
    Bus {
        written: usize,
        #[source]
        source: BusError,
    },
}

impl LoadError {
    /// Whether the coprocessor may have been partially written
    pub fn touched_device(&self) -> bool {
        matches!(self, Self::Bus { .. })
    }
}

/// Raw blob written verbatim at a fixed DSP address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateData {
    pub address: u32,
    pub bytes: Vec<u8>,
}

/// Owned inputs of one firmware load
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FirmwareBundle {
    /// Firmware container
    pub container: Vec<u8>,
    /// Private data blobs, written after the segments
    pub private_data: Vec<PrivateData>,
    /// Training blobs (grammar), each with a training header
    pub training: Vec<Vec<u8>>,
}

impl FirmwareBundle {
    pub fn new(container: Vec<u8>) -> Self {
        Self {
            container,
            ..Default::default()
        }
    }

    pub fn with_private_data(mut self, address: u32, bytes: Vec<u8>) -> Self {
        self.private_data.push(PrivateData { address, bytes });
        self
    }

    pub fn with_training(mut self, blob: Vec<u8>) -> Self {
        self.training.push(blob);
        self
    }
}

/// What a planned write carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteSource {
    Segment(usize),
    PrivateData(usize),
    Training(u16),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedWrite<'a> {
    pub source: WriteSource,
    pub address: u32,
    pub bytes: &'a [u8],
}

/// Ordered, fully validated write list
#[derive(Debug, Clone, Default)]
pub struct LoadPlan<'a> {
    writes: Vec<PlannedWrite<'a>>,
    training_index: Option<Vec<TrainingDataInfo>>,
}

impl<'a> LoadPlan<'a> {
    /// Plan the segment writes of `container`
    pub fn for_container(container: &FirmwareContainer<'a>) -> Self {
        let writes = container
            .payloads()
            .enumerate()
            .map(|(index, (segment, bytes))| PlannedWrite {
                source: WriteSource::Segment(index),
                address: segment.target_address,
                bytes,
            })
            .collect();
        Self {
            writes,
            training_index: container.training_index().map(<[_]>::to_vec),
        }
    }

    /// Plan a whole bundle: segments, then private data, then trigger models
    pub fn for_bundle(bundle: &'a FirmwareBundle) -> Result<Self, LoadError> {
        let container = image::parse(&bundle.container)?;
        let mut plan = Self::for_container(&container);

        for (index, blob) in bundle.private_data.iter().enumerate() {
            plan.writes.push(PlannedWrite {
                source: WriteSource::PrivateData(index),
                address: blob.address,
                bytes: &blob.bytes,
            });
        }

        if container.training_index().is_none() {
            if !bundle.training.is_empty() {
                warn!(
                    "Container has no training index, skipping {} training blobs",
                    bundle.training.len()
                );
            }
            return Ok(plan);
        }

        for blob in &bundle.training {
            plan.push_training(container.training_index(), blob)?;
        }

        Ok(plan)
    }

    /// Plan one training blob against the index of an already loaded container
    pub fn for_training(
        index: Option<&[TrainingDataInfo]>,
        blob: &'a [u8],
    ) -> Result<Self, LoadError> {
        let mut plan = Self::default();
        plan.push_training(index, blob)?;
        Ok(plan)
    }

    fn push_training(
        &mut self,
        index: Option<&[TrainingDataInfo]>,
        blob: &'a [u8],
    ) -> Result<(), LoadError> {
        let header = image::parse_training_header(blob)?;
        let address = matcher::resolve_in(index, u32::from(header.id))?;
        let bytes = header.payload(blob).ok_or_else(|| range_error(&header, blob))?;

        self.writes.push(PlannedWrite {
            source: WriteSource::Training(header.id),
            address,
            bytes,
        });
        Ok(())
    }

    /// Training index of the planned container, if any
    pub fn training_index(&self) -> Option<&[TrainingDataInfo]> {
        self.training_index.as_deref()
    }

    pub fn writes(&self) -> &[PlannedWrite<'a>] {
        &self.writes
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.writes.iter().map(|w| w.bytes.len()).sum()
    }
}

fn range_error(header: &TrainingDataHeader, blob: &[u8]) -> ImageError {
    ImageError::RangeInvalid {
        start: header.net_start_offset,
        end: header.net_end_offset,
        len: blob.len(),
    }
}

/// Summary of a completed load
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub writes: usize,
    pub bytes: usize,
}

/// Issue the planned writes in order, aborting on the first failure
pub fn execute<T: BusTransport + ?Sized>(
    plan: &LoadPlan<'_>,
    transport: &mut T,
) -> Result<LoadReport, LoadError> {
    let mut bytes = 0;

    for (written, write) in plan.writes.iter().enumerate() {
        debug!(
            "{:?}: {} bytes -> {:#010x}",
            write.source,
            write.bytes.len(),
            write.address
        );
        transport
            .write(write.address, write.bytes)
            .map_err(|source| LoadError::Bus { written, source })?;
        bytes += write.bytes.len();
    }

    Ok(LoadReport {
        writes: plan.writes.len(),
        bytes,
    })
}

/// Write every segment of `container` to its target address
pub fn load<T: BusTransport + ?Sized>(
    container: &FirmwareContainer<'_>,
    transport: &mut T,
) -> Result<LoadReport, LoadError> {
    execute(&LoadPlan::for_container(container), transport)
}

/// Parse, validate and write a whole bundle
pub fn load_bundle<T: BusTransport + ?Sized>(
    bundle: &FirmwareBundle,
    transport: &mut T,
) -> Result<LoadReport, LoadError> {
    let plan = LoadPlan::for_bundle(bundle)?;
    let report = execute(&plan, transport)?;
    info!(
        "Loaded firmware: {} writes, {} bytes",
        report.writes, report.bytes
    );
    Ok(report)
}
