//! Parts and part layout.
//!
//! A file is split into [`PartLayout::total_parts`] consecutive byte ranges of
//! [`PartLayout::part_size`] bytes (the last one may be shorter). The part size
//! grows beyond the configured chunk size for files that would otherwise need
//! more than [`MAX_PARTS`] parts.

use std::ops::{Range, RangeInclusive};

use serde::{Deserialize, Serialize};

/// Maximum number of parts in one multipart upload.
pub const MAX_PARTS: u32 = 10_000;

/// Default preferred part size (5 MiB, the store's minimum for non-final parts).
pub const DEFAULT_CHUNK_SIZE: u64 = 5 * 1024 * 1024;

/// A part the object store has acknowledged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    /// The part number (1-based, up to 10 000).
    pub part_number: u32,
    /// Size of this part in bytes.
    pub size: u64,
    /// Opaque checksum token returned by the store (the part's `ETag`).
    pub checksum_token: String,
}

/// How a file of a given size is divided into parts.
///
/// # Examples
///
/// ```
/// use ruststack_upload_core::state::PartLayout;
///
/// let layout = PartLayout::new(12, 5);
/// assert_eq!(layout.total_parts(), 3);
/// assert_eq!(layout.range(3), Some(10..12));
/// assert_eq!(layout.range(4), None);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartLayout {
    file_size: u64,
    part_size: u64,
    total_parts: u32,
}

impl PartLayout {
    /// Lay out `file_size` bytes using parts of at least `chunk_size` bytes.
    #[must_use]
    pub fn new(file_size: u64, chunk_size: u64) -> Self {
        let part_size = chunk_size
            .max(1)
            .max(file_size.div_ceil(u64::from(MAX_PARTS)));
        let total_parts = u32::try_from(file_size.div_ceil(part_size))
            .unwrap_or(MAX_PARTS)
            .max(1);
        Self {
            file_size,
            part_size,
            total_parts,
        }
    }

    /// Size of the file in bytes.
    #[must_use]
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Size of every part but the last.
    #[must_use]
    pub fn part_size(&self) -> u64 {
        self.part_size
    }

    /// Number of parts.
    #[must_use]
    pub fn total_parts(&self) -> u32 {
        self.total_parts
    }

    /// Every valid part number, ascending.
    #[must_use]
    pub fn part_numbers(&self) -> RangeInclusive<u32> {
        1..=self.total_parts
    }

    /// Whether `part_number` belongs to this layout.
    #[must_use]
    pub fn contains(&self, part_number: u32) -> bool {
        self.part_numbers().contains(&part_number)
    }

    /// The half-open byte range of `part_number`.
    #[must_use]
    pub fn range(&self, part_number: u32) -> Option<Range<u64>> {
        if !self.contains(part_number) {
            return None;
        }
        let start = u64::from(part_number - 1) * self.part_size;
        let end = (start + self.part_size).min(self.file_size);
        Some(start..end)
    }
}
