//! Range planning for parallel downloads.
//!
//! Splits a resource of known size into contiguous, non-overlapping byte
//! ranges, one per worker. Pure and deterministic; no I/O happens here.

use std::fmt;

/// An inclusive byte range `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Create a new inclusive range.
    pub fn new(start: u64, end: u64) -> Self {
        debug_assert!(start <= end, "range start {} after end {}", start, end);
        Self { start, end }
    }

    /// Number of bytes covered by the range.
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Inclusive ranges always cover at least one byte.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Value for an HTTP `Range` request header.
    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Result of planning a transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangePlan {
    /// Number of workers to launch. Always at least 1.
    pub workers: usize,
    /// Ranges in ascending order, one per worker.
    ///
    /// Empty when the total size is zero (unknown); the single worker
    /// then streams the whole body without a range.
    pub ranges: Vec<ByteRange>,
}

impl RangePlan {
    /// Whether the plan fetches the resource in more than one piece.
    pub fn is_parallel(&self) -> bool {
        self.ranges.len() > 1
    }
}

/// Derive the worker count for a resource.
///
/// `ceil(total_size / min_chunk_size)` clamped to `[1, max_workers]`. Falls
/// back to one worker when ranges are unsupported or the inputs make
/// splitting pointless.
pub fn worker_count(
    total_size: u64,
    min_chunk_size: u64,
    max_workers: usize,
    supports_range: bool,
) -> usize {
    if !supports_range || min_chunk_size == 0 || total_size < min_chunk_size {
        return 1;
    }

    let desired = total_size.div_ceil(min_chunk_size);
    let ceiling = max_workers.max(1) as u64;
    desired.clamp(1, ceiling) as usize
}

/// Plan the byte ranges for a transfer.
///
/// The last range always ends at `total_size - 1`, absorbing any rounding
/// remainder so the partition is exact.
pub fn plan(
    total_size: u64,
    min_chunk_size: u64,
    max_workers: usize,
    supports_range: bool,
) -> RangePlan {
    if total_size == 0 {
        return RangePlan {
            workers: 1,
            ranges: Vec::new(),
        };
    }

    let workers = worker_count(total_size, min_chunk_size, max_workers, supports_range);
    let chunk_size = total_size.div_ceil(workers as u64);

    let mut ranges = Vec::with_capacity(workers);
    for i in 0..workers as u64 {
        let start = i * chunk_size;
        if start >= total_size {
            break;
        }
        let end = if i + 1 == workers as u64 {
            total_size - 1
        } else {
            ((i + 1) * chunk_size - 1).min(total_size - 1)
        };
        ranges.push(ByteRange::new(start, end));
    }

    RangePlan {
        workers: ranges.len(),
        ranges,
    }
}
