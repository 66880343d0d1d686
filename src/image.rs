//! Firmware container and training-data image parsing
//!
//! A firmware container packs every binary the DSP needs (IRAM, DRAM, ...)
//! behind a little-endian header:
//!
//! ```text
//! sync:u32  version:u32  segment_count:u32
//! segment_count x { offset:u32  size:u32  target_address:u32 }
//! [ training_count:u32
//!   training_count x { id:u32  target_address:u32 } ]
//! <segment payloads>
//! ```
//!
//! The training sub-header is optional. It is only read when the table region
//! (everything before the first segment payload) still has room for it after
//! the segment table. Payloads are often aligned, so that room may just be
//! fill: a zero count, or an index that would run into the first payload, is
//! taken as "no index".
//!
//! Training blobs (grammar) carry their own 12-byte header locating the net
//! payload inside the blob.

use bytes::Buf;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, trace};

/// Magic value at the start of every firmware container
pub const CONTAINER_SYNC: u32 = 0x2379_5888;

/// Magic value at the start of every training blob
pub const TRAINING_SYNC: u16 = 0x2379;

pub const CONTAINER_HEADER_SIZE: usize = 12;
pub const SEGMENT_ENTRY_SIZE: usize = 12;
pub const TRAINING_COUNT_SIZE: usize = 4;
pub const TRAINING_ENTRY_SIZE: usize = 8;
pub const TRAINING_HEADER_SIZE: usize = 12;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ImageError {
    #[error("Malformed container: {0}")]
    MalformedContainer(String),

    #[error("Segment table of {count} entries does not fit in {len} bytes")]
    SegmentCountInvalid { count: u32, len: usize },

    #[error("Segment {index} ({offset:#x} + {size:#x}) runs past the {len}-byte container")]
    TruncatedSegment {
        index: usize,
        offset: u32,
        size: u32,
        len: usize,
    },

    #[error("Training index of {count} entries does not fit in {len} bytes")]
    TrainingCountInvalid { count: u32, len: usize },

    #[error("Training blob magic {found:#06x} is not 0x2379")]
    BadMagic { found: u16 },

    #[error("Training blob of {len} bytes is shorter than its header")]
    TrainingHeaderTruncated { len: usize },

    #[error("Training payload range {start}..{end} is invalid for a {len}-byte blob")]
    RangeInvalid { start: i32, end: i32, len: usize },
}

/// One loadable chunk of a container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BinarySegmentInfo {
    /// Location of the binary inside the container
    pub offset: u32,
    pub size: u32,
    /// Destination address on the coprocessor
    pub target_address: u32,
}

impl BinarySegmentInfo {
    /// Exclusive end offset, `None` on overflow
    pub fn end(&self) -> Option<usize> {
        (self.offset as usize).checked_add(self.size as usize)
    }
}

/// Training index entry: where the training data with `id` goes on the coprocessor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TrainingDataInfo {
    pub id: u32,
    pub target_address: u32,
}

/// Header of a training blob
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrainingDataHeader {
    pub sync: u16,
    /// Matched against [`TrainingDataInfo::id`]
    pub id: u16,
    /// Start of net.bin relative to the start of the blob
    pub net_start_offset: i32,
    /// End of net.bin relative to the start of the blob
    pub net_end_offset: i32,
}

impl TrainingDataHeader {
    /// Net payload of `blob`, `None` if the header's range does not fit it
    pub fn payload<'b>(&self, blob: &'b [u8]) -> Option<&'b [u8]> {
        let start = usize::try_from(self.net_start_offset).ok()?;
        let end = usize::try_from(self.net_end_offset).ok()?;
        blob.get(start..end)
    }
}

/// Parsed firmware container borrowing the caller's buffer
#[derive(Debug, Clone)]
pub struct FirmwareContainer<'a> {
    buffer: &'a [u8],
    pub sync: u32,
    pub version: u32,
    segments: Vec<BinarySegmentInfo>,
    training_index: Option<Vec<TrainingDataInfo>>,
}

impl<'a> FirmwareContainer<'a> {
    /// Build a container from an already decoded table.
    ///
    /// Segment offsets index into `buffer` directly; every segment is bounds
    /// checked the same way [`parse`] checks them.
    pub fn from_parts(
        buffer: &'a [u8],
        segments: Vec<BinarySegmentInfo>,
        training_index: Option<Vec<TrainingDataInfo>>,
    ) -> Result<Self, ImageError> {
        for (index, segment) in segments.iter().enumerate() {
            check_segment(index, segment, buffer.len())?;
        }

        Ok(Self {
            buffer,
            sync: CONTAINER_SYNC,
            version: 0,
            segments,
            training_index,
        })
    }

    pub fn buffer(&self) -> &'a [u8] {
        self.buffer
    }

    /// Segments in container order
    pub fn segments(&self) -> &[BinarySegmentInfo] {
        &self.segments
    }

    /// Training index in container order, `None` when the container carries no trigger models
    pub fn training_index(&self) -> Option<&[TrainingDataInfo]> {
        self.training_index.as_deref()
    }

    /// Segments paired with their payload bytes, in container order
    pub fn payloads(&self) -> impl Iterator<Item = (&BinarySegmentInfo, &'a [u8])> + '_ {
        let buffer = self.buffer;
        self.segments.iter().map(move |segment| {
            let start = segment.offset as usize;
            (segment, &buffer[start..start + segment.size as usize])
        })
    }

    /// Total payload bytes across all segments
    pub fn payload_len(&self) -> usize {
        self.segments.iter().map(|s| s.size as usize).sum()
    }
}

/// Validate and index a firmware container.
///
/// Pure: no I/O, no bus traffic.
pub fn parse(buffer: &[u8]) -> Result<FirmwareContainer<'_>, ImageError> {
    let len = buffer.len();

    if len < CONTAINER_HEADER_SIZE {
        return Err(ImageError::MalformedContainer(format!(
            "{} bytes is shorter than the {}-byte header",
            len, CONTAINER_HEADER_SIZE
        )));
    }

    let mut cursor = buffer;
    let sync = cursor.get_u32_le();
    if sync != CONTAINER_SYNC {
        return Err(ImageError::MalformedContainer(format!(
            "sync {:#010x} is not {:#010x}",
            sync, CONTAINER_SYNC
        )));
    }

    let version = cursor.get_u32_le();
    let segment_count = cursor.get_u32_le();

    let table_fits = (segment_count as usize)
        .checked_mul(SEGMENT_ENTRY_SIZE)
        .is_some_and(|table| table <= cursor.remaining());
    if !table_fits {
        return Err(ImageError::SegmentCountInvalid {
            count: segment_count,
            len,
        });
    }

    let mut segments = Vec::with_capacity(segment_count as usize);
    for index in 0..segment_count as usize {
        let segment = BinarySegmentInfo {
            offset: cursor.get_u32_le(),
            size: cursor.get_u32_le(),
            target_address: cursor.get_u32_le(),
        };

        check_segment(index, &segment, len)?;

        trace!(
            "segment {}: {:#x}+{:#x} -> {:#010x}",
            index,
            segment.offset,
            segment.size,
            segment.target_address
        );
        segments.push(segment);
    }

    let table_end = len - cursor.remaining();
    let payload_start = segments
        .iter()
        .filter(|s| s.size > 0)
        .map(|s| s.offset as usize)
        .min()
        .unwrap_or(len);

    let training_index = if payload_start >= table_end + TRAINING_COUNT_SIZE {
        let count = cursor.get_u32_le();
        let index_end = (count as usize)
            .checked_mul(TRAINING_ENTRY_SIZE)
            .and_then(|table| table.checked_add(table_end + TRAINING_COUNT_SIZE));

        match index_end {
            _ if count == 0 => None,
            Some(end) if end <= payload_start => Some(read_training_index(&mut cursor, count)),
            // bounded by a payload: alignment fill, not an index
            _ if payload_start < len => {
                debug!(
                    "Ignoring training count {:#x} in {} bytes of table padding",
                    count,
                    payload_start - table_end
                );
                None
            }
            _ => return Err(ImageError::TrainingCountInvalid { count, len }),
        }
    } else {
        None
    };

    debug!(
        "Parsed container v{:#x}: {} segments, {} training entries",
        version,
        segments.len(),
        training_index.as_ref().map_or(0, Vec::len)
    );

    Ok(FirmwareContainer {
        buffer,
        sync,
        version,
        segments,
        training_index,
    })
}

fn check_segment(index: usize, segment: &BinarySegmentInfo, len: usize) -> Result<(), ImageError> {
    if segment.end().is_some_and(|end| end <= len) {
        return Ok(());
    }

    Err(ImageError::TruncatedSegment {
        index,
        offset: segment.offset,
        size: segment.size,
        len,
    })
}

fn read_training_index(cursor: &mut &[u8], count: u32) -> Vec<TrainingDataInfo> {
    let entries: Vec<TrainingDataInfo> = (0..count)
        .map(|_| TrainingDataInfo {
            id: cursor.get_u32_le(),
            target_address: cursor.get_u32_le(),
        })
        .collect();
    trace!("training index: {:?}", entries);
    entries
}

/// Validate the header of a training blob
pub fn parse_training_header(blob: &[u8]) -> Result<TrainingDataHeader, ImageError> {
    let len = blob.len();
    if len < 2 {
        return Err(ImageError::TrainingHeaderTruncated { len });
    }

    let mut cursor = blob;
    let sync = cursor.get_u16_le();
    if sync != TRAINING_SYNC {
        return Err(ImageError::BadMagic { found: sync });
    }

    if len < TRAINING_HEADER_SIZE {
        return Err(ImageError::TrainingHeaderTruncated { len });
    }

    let id = cursor.get_u16_le();
    let start = cursor.get_i32_le();
    let end = cursor.get_i32_le();

    let in_range = start >= 0 && start <= end && end as usize <= len;
    if !in_range {
        return Err(ImageError::RangeInvalid { start, end, len });
    }

    Ok(TrainingDataHeader {
        sync,
        id,
        net_start_offset: start,
        net_end_offset: end,
    })
}
