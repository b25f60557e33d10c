//! Brightest-N selection of detections.

use crate::detect::peak::{peak_cmp_desc, Peak};
use std::cmp::Ordering;

/// Bounded collector that keeps the strongest peaks by absolute response.
pub(crate) struct TopK {
    capacity: usize,
    kept: Vec<Peak>,
}

impl TopK {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            kept: Vec::with_capacity(capacity),
        }
    }

    /// Adds `peak`, replacing the weakest kept peak once full.
    pub(crate) fn push(&mut self, peak: Peak) {
        if self.kept.len() < self.capacity {
            self.kept.push(peak);
            return;
        }
        let weakest = self
            .kept
            .iter()
            .enumerate()
            .max_by(|(_, x), (_, y)| peak_cmp_desc(x, y))
            .map(|(i, _)| i);
        if let Some(i) = weakest {
            if peak_cmp_desc(&peak, &self.kept[i]) == Ordering::Less {
                self.kept[i] = peak;
            }
        }
    }

    pub(crate) fn into_sorted(mut self) -> Vec<Peak> {
        self.kept.sort_by(peak_cmp_desc);
        self.kept
    }
}

/// Keeps the `n` peaks with the largest `|value|`, strongest first.
pub fn brightest_n(peaks: &[Peak], n: usize) -> Vec<Peak> {
    let mut top = TopK::new(n);
    for &p in peaks {
        top.push(p);
    }
    top.into_sorted()
}

/// The single strongest peak, if any.
pub fn brightest(peaks: &[Peak]) -> Option<Peak> {
    peaks.iter().copied().min_by(peak_cmp_desc)
}
