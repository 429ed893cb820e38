//! Requested frame indices.
//!
//! A decoder cannot seek to an exact timestamp, so requested times are turned
//! into frame indices up front (`seconds × frame_rate`, truncated) and each
//! decoded frame is matched against the set by its position in the stream.
//!
//! Two timestamps that truncate to the same index collapse into one entry:
//! the frame is persisted once.

use crate::error::FrameCodecError;

/// Sorted, de-duplicated frame indices derived from requested timestamps.
///
/// Immutable after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameSelectionSet {
    indices: Vec<u64>,
    requested: usize,
}

impl FrameSelectionSet {
    /// Build the set from timestamps in seconds.
    ///
    /// Each index is `trunc(t × frame_rate)` computed in `f64`, so a product
    /// that lands just below an integer picks the earlier frame: 4.1 s at
    /// 30 fps is 122.999… and selects frame 122, not 123.
    ///
    /// # Errors
    ///
    /// [`FrameCodecError::InvalidTimestamp`] for a negative or non-finite
    /// timestamp.
    ///
    /// # Example
    ///
    /// ```
    /// use framecodec::FrameSelectionSet;
    ///
    /// let set = FrameSelectionSet::from_timestamps(&[0.5, 1.0, 1.5], 30.0)?;
    /// assert_eq!(set.indices(), &[15, 30, 45]);
    /// # Ok::<(), framecodec::FrameCodecError>(())
    /// ```
    pub fn from_timestamps(timestamps: &[f64], frame_rate: f64) -> Result<Self, FrameCodecError> {
        let mut indices = Vec::with_capacity(timestamps.len());
        for &seconds in timestamps {
            if !seconds.is_finite() || seconds < 0.0 {
                return Err(FrameCodecError::InvalidTimestamp(seconds));
            }
            indices.push((seconds * frame_rate) as u64);
        }
        Ok(Self::from_indices(indices))
    }

    /// Build the set from frame indices directly.
    pub fn from_indices(mut indices: Vec<u64>) -> Self {
        let requested = indices.len();
        indices.sort_unstable();
        indices.dedup();
        if indices.len() < requested {
            log::debug!(
                "{} requested frames share an index with another request",
                requested - indices.len()
            );
        }
        Self { indices, requested }
    }

    /// The distinct indices, ascending.
    pub fn indices(&self) -> &[u64] {
        &self.indices
    }

    /// Whether `index` was requested.
    pub fn contains(&self, index: u64) -> bool {
        self.indices.binary_search(&index).is_ok()
    }

    /// Number of distinct indices.
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// Whether nothing was requested.
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Number of requests collapsed into an existing index.
    pub fn duplicates(&self) -> usize {
        self.requested - self.indices.len()
    }

    /// Indices at or beyond `total_frames`.
    pub fn beyond(&self, total_frames: u64) -> impl Iterator<Item = u64> + '_ {
        self.indices.iter().copied().filter(move |&index| index >= total_frames)
    }
}
