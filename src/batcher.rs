//! Splitting review lists into model-bound batches.
//!
//! Reviews shorter than the configured threshold never reach the model;
//! they are answered immediately as `Insufficient-Text`. Everything else
//! is sliced into contiguous fixed-size batches, preserving input order.

use crate::review::ReviewItem;

/// Result of partitioning a review list.
#[derive(Debug)]
pub struct Partition {
    /// Items too short to classify, in input order.
    pub short: Vec<ReviewItem>,
    /// Model-bound batches, each at most `batch_size` items, in input order.
    pub batches: Vec<Vec<ReviewItem>>,
}

impl Partition {
    /// Total number of items across both sides of the split.
    pub fn len(&self) -> usize {
        self.short.len() + self.batches.iter().map(Vec::len).sum::<usize>()
    }

    /// Whether the partition holds no items at all.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Partition items into short-text items and fixed-size batches.
pub fn partition(items: Vec<ReviewItem>, min_text_len: usize, batch_size: usize) -> Partition {
    let (short, eligible): (Vec<_>, Vec<_>) = items
        .into_iter()
        .partition(|item| item.trimmed().len() < min_text_len);

    let mut batches = Vec::with_capacity(eligible.len().div_ceil(batch_size.max(1)));
    let mut current = Vec::with_capacity(batch_size);
    for item in eligible {
        current.push(item);
        if current.len() == batch_size {
            batches.push(std::mem::replace(&mut current, Vec::with_capacity(batch_size)));
        }
    }
    if !current.is_empty() {
        batches.push(current);
    }

    Partition { short, batches }
}
