// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Vision model runtime contract.
//!
//! The core is model-agnostic: any runtime honouring [`VisionModel`] plugs
//! in through a [`ModelFactory`]. The mock model backs simulation and
//! tests with deterministic output.

use std::sync::Arc;

use crate::hal::Frame;
use crate::types::BoundingBox;

/// One raw model detection before domain post-processing.
#[derive(Debug, Clone)]
pub struct RawDetection {
    pub class_id: u32,
    pub confidence: f64,
    pub bbox: BoundingBox,
}

/// Contract every model runtime must honour.
pub trait VisionModel: Send {
    fn predict(
        &mut self,
        frame: &Frame,
        confidence_threshold: f64,
    ) -> anyhow::Result<Vec<RawDetection>>;
}

/// Builds a fresh model instance; called once per worker and again on
/// worker rebuild.
pub type ModelFactory = Arc<dyn Fn() -> anyhow::Result<Box<dyn VisionModel>> + Send + Sync>;

/// Deterministic stand-in model: the frame content decides the category,
/// so identical frames always produce identical detections.
pub struct MockModel;

impl MockModel {
    pub fn factory() -> ModelFactory {
        Arc::new(|| Ok(Box::new(MockModel) as Box<dyn VisionModel>))
    }
}

impl VisionModel for MockModel {
    fn predict(
        &mut self,
        frame: &Frame,
        confidence_threshold: f64,
    ) -> anyhow::Result<Vec<RawDetection>> {
        let sum: u64 = frame.data.iter().map(|&b| b as u64).sum();
        let class_id = (sum % 3) as u32;
        let confidence = 0.72 + (sum % 28) as f64 / 100.0;
        if confidence < confidence_threshold {
            return Ok(Vec::new());
        }

        // One centred fruit-sized box.
        let w = frame.width as i32;
        let h = frame.height as i32;
        let bbox = BoundingBox { x1: w / 4, y1: h / 4, x2: w * 3 / 4, y2: h * 3 / 4 };
        Ok(vec![RawDetection { class_id, confidence, bbox }])
    }
}
