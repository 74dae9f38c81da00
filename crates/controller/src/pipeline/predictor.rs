// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Category pattern analyser backing predictive pre-positioning.
//!
//! Production lines often run single-fruit batches, so a continuing streak
//! is the one pattern worth acting on. Config-gated and off by default.

use std::collections::VecDeque;

use crate::types::FruitCategory;

/// History needed before any prediction is offered.
const MIN_HISTORY: usize = 10;
/// Trailing same-category run required to call it a streak.
const STREAK_LEN: usize = 3;
/// Bounded history window.
const HISTORY_CAPACITY: usize = 50;

#[derive(Debug, Default)]
pub struct CategoryPredictor {
    history: VecDeque<FruitCategory>,
    hits: u64,
    misses: u64,
}

impl CategoryPredictor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an observed category.
    pub fn record(&mut self, category: FruitCategory) {
        if self.history.len() >= HISTORY_CAPACITY {
            self.history.pop_front();
        }
        self.history.push_back(category);
    }

    /// Predict the next category: the previous fruit's category, offered
    /// only with sufficient history and a continuing streak.
    pub fn predict(&self) -> Option<FruitCategory> {
        if self.history.len() < MIN_HISTORY {
            return None;
        }
        let last = *self.history.back()?;
        if last == FruitCategory::Unknown {
            return None;
        }
        let streak = self.history.iter().rev().take_while(|&&c| c == last).count();
        (streak >= STREAK_LEN).then_some(last)
    }

    /// Score a resolved prediction for the accuracy metric.
    pub fn resolve(&mut self, predicted: FruitCategory, actual: FruitCategory) {
        if predicted == actual {
            self.hits += 1;
        } else {
            self.misses += 1;
        }
    }

    pub fn accuracy(&self) -> Option<f64> {
        let total = self.hits + self.misses;
        (total > 0).then(|| self.hits as f64 / total as f64)
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }
}

#[cfg(test)]
#[path = "predictor_tests.rs"]
mod tests;
