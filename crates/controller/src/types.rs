// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Domain value types shared across the controller.
//!
//! Category-to-group wiring is compile-time and immutable: two labeler heads
//! per group, one group per fruit category.  All analysis records are
//! immutable once produced.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Labeler heads per group.
pub const LABELERS_PER_GROUP: usize = 2;
/// Number of labeler groups (one per category).
pub const NUM_LABELER_GROUPS: usize = 3;
/// Total labeler heads.
pub const NUM_LABELERS: usize = LABELERS_PER_GROUP * NUM_LABELER_GROUPS;

// -- Fruit categories ---------------------------------------------------------

/// Closed set of fruit categories the vision model can produce.
///
/// `Unknown` is a valid detection outcome but never drives actuation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FruitCategory {
    Apple,
    Pear,
    Lemon,
    Unknown,
}

impl FruitCategory {
    /// All categories that drive actuation, in tie-break precedence order.
    pub const ACTUATED: [FruitCategory; 3] =
        [FruitCategory::Apple, FruitCategory::Pear, FruitCategory::Lemon];

    /// Map a model class id onto a category.
    pub fn from_class_id(class_id: u32) -> Self {
        match class_id {
            0 => Self::Apple,
            1 => Self::Pear,
            2 => Self::Lemon,
            _ => Self::Unknown,
        }
    }

    /// Wire-format class id.
    pub fn class_id(self) -> u32 {
        match self {
            Self::Apple => 0,
            Self::Pear => 1,
            Self::Lemon => 2,
            Self::Unknown => 99,
        }
    }

    /// Display label.
    pub fn label(self) -> &'static str {
        match self {
            Self::Apple => "apple",
            Self::Pear => "pear",
            Self::Lemon => "lemon",
            Self::Unknown => "unknown",
        }
    }

    /// Display colour (hex) for dashboard clients.
    pub fn colour(self) -> &'static str {
        match self {
            Self::Apple => "#e53e3e",
            Self::Pear => "#48bb78",
            Self::Lemon => "#ecc94b",
            Self::Unknown => "#a0aec0",
        }
    }

    /// The labeler group serving this category, if any.
    pub fn group(self) -> Option<u8> {
        match self {
            Self::Apple => Some(0),
            Self::Pear => Some(1),
            Self::Lemon => Some(2),
            Self::Unknown => None,
        }
    }

    /// Category served by a labeler group.
    pub fn from_group(group: u8) -> Option<Self> {
        match group {
            0 => Some(Self::Apple),
            1 => Some(Self::Pear),
            2 => Some(Self::Lemon),
            _ => None,
        }
    }

    /// Labeler head indices for this category's group.
    pub fn labeler_ids(self) -> &'static [usize] {
        match self {
            Self::Apple => &[0, 1],
            Self::Pear => &[2, 3],
            Self::Lemon => &[4, 5],
            Self::Unknown => &[],
        }
    }

    /// Tie-break rank: lower wins (apple > pear > lemon).
    pub fn tie_break_rank(self) -> u8 {
        match self {
            Self::Apple => 0,
            Self::Pear => 1,
            Self::Lemon => 2,
            Self::Unknown => u8::MAX,
        }
    }
}

// -- Detection priorities -----------------------------------------------------

/// Priority of a detection request. Lower value = more urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingPriority {
    Critical,
    High,
    Normal,
    Low,
}

impl ProcessingPriority {
    /// Ordering key: lower value = higher urgency.
    pub fn value(self) -> u8 {
        match self {
            Self::Critical => 0,
            Self::High => 1,
            Self::Normal => 2,
            Self::Low => 3,
        }
    }

    /// Deadline multiplier applied to the base request timeout.
    pub fn deadline_factor(self) -> f64 {
        match self {
            Self::Critical => 2.0,
            Self::High => 1.5,
            Self::Normal => 1.0,
            Self::Low => 0.7,
        }
    }

    /// Whether a request at this priority may evict a lower-priority
    /// pending request when the queue is full.
    pub fn may_evict(self) -> bool {
        matches!(self, Self::Critical | Self::High)
    }
}

// -- Detection results --------------------------------------------------------

/// Axis-aligned bounding box in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BoundingBox {
    pub fn width(&self) -> i32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> i32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> i64 {
        self.width() as i64 * self.height() as i64
    }

    pub fn center(&self) -> (i32, i32) {
        ((self.x1 + self.x2) / 2, (self.y1 + self.y2) / 2)
    }

    pub fn aspect_ratio(&self) -> f64 {
        let h = self.height();
        if h > 0 {
            self.width() as f64 / h as f64
        } else {
            0.0
        }
    }

    /// Distance from the nearest frame edge, normalised by the shorter
    /// frame dimension.
    pub fn edge_distance(&self, frame_width: u32, frame_height: u32) -> f64 {
        let min_dim = frame_width.min(frame_height).max(1) as f64;
        let nearest = self
            .x1
            .min(self.y1)
            .min(frame_width as i32 - self.x2)
            .min(frame_height as i32 - self.y2)
            .max(0);
        nearest as f64 / min_dim
    }
}

/// A single per-fruit detection. Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub class_id: u32,
    pub category: FruitCategory,
    pub confidence: f64,
    pub bbox: BoundingBox,
    pub quality_score: f64,
}

impl Detection {
    /// Build a detection from raw model output, deriving the quality score.
    pub fn from_raw(
        class_id: u32,
        confidence: f64,
        bbox: BoundingBox,
        frame_width: u32,
        frame_height: u32,
    ) -> Self {
        let quality_score = detection_quality_score(
            confidence,
            bbox.area(),
            bbox.aspect_ratio(),
            bbox.edge_distance(frame_width, frame_height),
        );
        Self {
            class_id,
            category: FruitCategory::from_class_id(class_id),
            confidence,
            bbox,
            quality_score,
        }
    }
}

/// Weighted blend of confidence, area, aspect-ratio deviation from 1, and
/// distance from the frame edge. Clamped to [0, 1].
pub fn detection_quality_score(
    confidence: f64,
    area: i64,
    aspect_ratio: f64,
    edge_distance: f64,
) -> f64 {
    let area_factor = (area as f64 / 10_000.0).min(1.0);
    let ratio_factor = 1.0 - (aspect_ratio - 1.0).abs();
    let score =
        confidence * 0.4 + area_factor * 0.2 + ratio_factor * 0.2 + edge_distance * 0.2;
    score.clamp(0.0, 1.0)
}

/// Overall grade of a frame analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisQuality {
    Excellent,
    Good,
    Acceptable,
    Poor,
    Failed,
}

impl AnalysisQuality {
    /// Grade a combined score on the fixed thresholds.
    pub fn from_score(score: f64) -> Self {
        if score >= 0.9 {
            Self::Excellent
        } else if score >= 0.75 {
            Self::Good
        } else if score >= 0.6 {
            Self::Acceptable
        } else {
            Self::Poor
        }
    }

    /// Whether the grade is good enough to drive actuation.
    pub fn usable(self) -> bool {
        matches!(self, Self::Excellent | Self::Good | Self::Acceptable)
    }
}

/// Per-stage timing of one analysis, in milliseconds.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct AnalysisTiming {
    pub preprocess_ms: f64,
    pub inference_ms: f64,
    pub postprocess_ms: f64,
    pub total_ms: f64,
}

/// Immutable per-frame analysis result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameAnalysis {
    pub frame_id: uuid::Uuid,
    /// Content digest used for duplicate detection.
    pub frame_hash: String,
    pub detections: Vec<Detection>,
    pub fruit_count: usize,
    pub timing: AnalysisTiming,
    pub quality: AnalysisQuality,
    /// (width, height) of the analysed frame.
    pub frame_shape: (u32, u32),
    pub lighting_score: f64,
    pub blur_score: f64,
}

impl FrameAnalysis {
    /// Grade a set of detections plus frame quality inputs.
    pub fn grade(detections: &[Detection], lighting_score: f64, blur_score: f64) -> AnalysisQuality {
        if detections.is_empty() {
            return AnalysisQuality::Failed;
        }
        let n = detections.len() as f64;
        let avg_confidence: f64 = detections.iter().map(|d| d.confidence).sum::<f64>() / n;
        let avg_quality: f64 = detections.iter().map(|d| d.quality_score).sum::<f64>() / n;
        let overall =
            avg_confidence * 0.4 + avg_quality * 0.3 + lighting_score * 0.15 + blur_score * 0.15;
        AnalysisQuality::from_score(overall)
    }

    /// Majority category across detections, tie-broken apple > pear > lemon.
    /// Unknown detections never win.
    pub fn majority_category(&self) -> Option<FruitCategory> {
        let mut counts = [0usize; 3];
        for d in &self.detections {
            if let Some(group) = d.category.group() {
                counts[group as usize] += 1;
            }
        }
        FruitCategory::ACTUATED
            .iter()
            .copied()
            .filter(|c| counts[c.group().unwrap_or(0) as usize] > 0)
            .max_by_key(|c| {
                let count = counts[c.group().unwrap_or(0) as usize];
                // Higher count wins; on equal counts the lower tie-break
                // rank wins, so invert it for max_by_key.
                (count, u8::MAX - c.tie_break_rank())
            })
    }
}

// -- Pipeline events and commands ---------------------------------------------

/// An optical trigger edge. Emitted at most once per debounce window.
#[derive(Debug, Clone, Copy)]
pub struct TriggerEvent {
    /// Monotonic timestamp of the qualifying edge.
    pub ts: Instant,
    /// Source GPIO pin.
    pub pin: u8,
}

/// Command to fire a labeler group, produced by the orchestrator.
#[derive(Debug, Clone, Copy)]
pub struct LabelingCommand {
    pub target_group: u8,
    pub duration: Duration,
    pub intensity_pct: f64,
    pub issued_at: Instant,
    /// Stale commands past this instant are dropped without firing.
    pub deadline_at: Instant,
}

impl LabelingCommand {
    pub fn is_stale(&self, now: Instant) -> bool {
        now > self.deadline_at
    }
}

/// Command to divert a fruit into its category bin.
#[derive(Debug, Clone, Copy)]
pub struct DiverterCommand {
    pub category: FruitCategory,
    /// Belt-time from the labeler station to the diverter station.
    pub pre_delay: Duration,
    pub hold: Duration,
}

#[cfg(test)]
#[path = "types_tests.rs"]
mod tests;
