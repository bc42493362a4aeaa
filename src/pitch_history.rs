use std::collections::VecDeque;

use crate::feature_extractor::Pitch;

/// Rolling window of the most recent pitch values, oldest first.
///
/// Unvoiced values are stored as-is so a trend view shows the gap.
#[derive(Debug, Clone)]
pub struct PitchHistory {
    values: VecDeque<Pitch>,
    capacity: usize,
}

impl PitchHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            values: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, pitch: Pitch) {
        self.values.push_back(pitch);
        while self.values.len() > self.capacity {
            self.values.pop_front();
        }
    }

    pub fn history(&self) -> Vec<Pitch> {
        self.values.iter().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Pitch> {
        self.values.iter()
    }

    pub fn latest(&self) -> Option<Pitch> {
        self.values.back().copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
