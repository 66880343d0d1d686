//! Training-data matcher
//!
//! Resolves a trigger-model id to the coprocessor address the container's
//! training index assigns it.

use crate::image::{FirmwareContainer, TrainingDataInfo};
use thiserror::Error;
use tracing::trace;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Unknown training data id {0}")]
pub struct UnknownTrainingId(pub u32);

/// Target address of the first training index entry whose id equals `id`.
///
/// A container without a training index matches nothing.
pub fn resolve(container: &FirmwareContainer<'_>, id: u32) -> Result<u32, UnknownTrainingId> {
    resolve_in(container.training_index(), id)
}

/// [`resolve`] against an index kept apart from its container
pub fn resolve_in(index: Option<&[TrainingDataInfo]>, id: u32) -> Result<u32, UnknownTrainingId> {
    let entry = index
        .unwrap_or_default()
        .iter()
        .find(|entry| entry.id == id)
        .ok_or(UnknownTrainingId(id))?;

    trace!("training id {} -> {:#010x}", id, entry.target_address);
    Ok(entry.target_address)
}
