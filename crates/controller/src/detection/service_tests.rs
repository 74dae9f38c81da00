// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Service tests run on real time with a multi-threaded runtime: the
//! inference workers are OS threads outside the tokio clock.

use std::sync::Arc;

use super::*;
use crate::detection::model::{MockModel, RawDetection, VisionModel};
use crate::types::BoundingBox;

fn settings() -> AiModelSettings {
    AiModelSettings {
        num_workers: 2,
        request_timeout_s: 2.0,
        max_queue_size: 8,
        ..Default::default()
    }
}

fn frame(fill: u8) -> Frame {
    Frame::new(vec![fill; 64 * 48 * 3], 64, 48)
}

/// Model that fails every prediction.
struct FailingModel;

impl VisionModel for FailingModel {
    fn predict(&mut self, _: &Frame, _: f64) -> anyhow::Result<Vec<RawDetection>> {
        anyhow::bail!("inference backend lost")
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn detect_round_trip() {
    let service = DetectionService::start(settings(), MockModel::factory()).await;
    assert!(service.is_ready());

    let analysis = service.detect(frame(128), ProcessingPriority::High).await.unwrap();
    assert_eq!(analysis.fruit_count, 1);
    assert_eq!(analysis.frame_shape, (64, 48));
    assert!(analysis.quality.usable());
    service.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn duplicate_frames_come_from_the_cache() {
    let service = DetectionService::start(settings(), MockModel::factory()).await;

    let first = service.detect(frame(37), ProcessingPriority::Normal).await.unwrap();
    let second = service.detect(frame(37), ProcessingPriority::Normal).await.unwrap();

    // Byte-identical record, frame id included, straight from the cache.
    assert_eq!(first.frame_id, second.frame_id);
    assert_eq!(first.frame_hash, second.frame_hash);
    assert_eq!(first.detections.len(), second.detections.len());
    assert!(service.status().cache_hits >= 1);
    service.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_load_degrades_instead_of_failing() {
    let factory: ModelFactory = Arc::new(|| anyhow::bail!("model file missing"));
    let service = DetectionService::start(settings(), factory).await;
    assert_eq!(service.state(), DetectorState::Degraded);
    assert!(!service.is_ready());

    let result = service.detect(frame(1), ProcessingPriority::High).await;
    assert!(matches!(result, Err(DetectionError::Unavailable(_))));
    service.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn worker_errors_surface_as_unavailable_and_trigger_rebuild() {
    let factory: ModelFactory = Arc::new(|| Ok(Box::new(FailingModel) as Box<dyn VisionModel>));
    let single = AiModelSettings { num_workers: 1, ..settings() };
    let service = DetectionService::start(single, factory).await;
    assert!(service.is_ready());

    // Unique frames bypass the cache; every one fails inference, which is
    // reported as unavailability rather than a deadline miss.
    for i in 0..6u8 {
        let result = service.detect(frame(i), ProcessingPriority::Normal).await;
        assert!(matches!(result, Err(DetectionError::Unavailable(_))));
    }

    // Five consecutive errors forced a model reload on the lone worker.
    let status = service.status();
    assert_eq!(status.workers.len(), 1);
    assert_eq!(status.workers[0].errors, 6);
    assert!(status.workers[0].rebuilds >= 1);
    service.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn deadline_scales_with_priority() {
    let service = DetectionService::start(settings(), MockModel::factory()).await;
    let critical = service.request_deadline(ProcessingPriority::Critical);
    let normal = service.request_deadline(ProcessingPriority::Normal);
    let low = service.request_deadline(ProcessingPriority::Low);
    assert!(critical > normal);
    assert!(normal > low);
    assert_eq!(normal, std::time::Duration::from_secs_f64(2.0));
    service.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn stopped_service_is_unavailable() {
    let service = DetectionService::start(settings(), MockModel::factory()).await;
    service.stop().await;
    let result = service.detect(frame(9), ProcessingPriority::Critical).await;
    assert!(matches!(result, Err(DetectionError::Unavailable(_))));
}
