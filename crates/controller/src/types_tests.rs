// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn detection(category: FruitCategory, confidence: f64) -> Detection {
    Detection {
        class_id: category.class_id(),
        category,
        confidence,
        bbox: BoundingBox { x1: 100, y1: 100, x2: 200, y2: 200 },
        quality_score: 0.8,
    }
}

fn analysis(detections: Vec<Detection>) -> FrameAnalysis {
    let fruit_count = detections.len();
    FrameAnalysis {
        frame_id: uuid::Uuid::new_v4(),
        frame_hash: "abc".to_owned(),
        detections,
        fruit_count,
        timing: AnalysisTiming::default(),
        quality: AnalysisQuality::Good,
        frame_shape: (640, 480),
        lighting_score: 0.8,
        blur_score: 0.8,
    }
}

// ── category/group wiring ─────────────────────────────────────────────

#[test]
fn group_mapping_is_fixed() {
    assert_eq!(FruitCategory::Apple.labeler_ids(), &[0, 1]);
    assert_eq!(FruitCategory::Pear.labeler_ids(), &[2, 3]);
    assert_eq!(FruitCategory::Lemon.labeler_ids(), &[4, 5]);
    assert_eq!(FruitCategory::Unknown.labeler_ids(), &[] as &[usize]);
}

#[test]
fn group_roundtrip() {
    for category in FruitCategory::ACTUATED {
        let group = category.group().unwrap();
        assert_eq!(FruitCategory::from_group(group), Some(category));
    }
    assert_eq!(FruitCategory::Unknown.group(), None);
    assert_eq!(FruitCategory::from_group(7), None);
}

#[test]
fn unknown_class_id_maps_to_unknown() {
    assert_eq!(FruitCategory::from_class_id(99), FruitCategory::Unknown);
    assert_eq!(FruitCategory::from_class_id(3), FruitCategory::Unknown);
}

// ── priorities ────────────────────────────────────────────────────────

#[test]
fn priority_ordering_matches_urgency() {
    assert!(ProcessingPriority::Critical.value() < ProcessingPriority::High.value());
    assert!(ProcessingPriority::High.value() < ProcessingPriority::Normal.value());
    assert!(ProcessingPriority::Normal.value() < ProcessingPriority::Low.value());
}

#[test]
fn only_high_and_critical_may_evict() {
    assert!(ProcessingPriority::Critical.may_evict());
    assert!(ProcessingPriority::High.may_evict());
    assert!(!ProcessingPriority::Normal.may_evict());
    assert!(!ProcessingPriority::Low.may_evict());
}

// ── quality scoring ───────────────────────────────────────────────────

#[test]
fn quality_score_is_clamped() {
    assert_eq!(detection_quality_score(2.0, 1_000_000, 1.0, 2.0), 1.0);
    assert!(detection_quality_score(0.0, 0, 5.0, 0.0) >= 0.0);
}

#[test]
fn perfect_detection_scores_high() {
    // Full confidence, large square box far from the edge.
    let score = detection_quality_score(1.0, 10_000, 1.0, 1.0);
    assert!(score > 0.99);
}

#[test]
fn grade_thresholds() {
    assert_eq!(AnalysisQuality::from_score(0.95), AnalysisQuality::Excellent);
    assert_eq!(AnalysisQuality::from_score(0.8), AnalysisQuality::Good);
    assert_eq!(AnalysisQuality::from_score(0.65), AnalysisQuality::Acceptable);
    assert_eq!(AnalysisQuality::from_score(0.3), AnalysisQuality::Poor);
}

#[test]
fn empty_detections_grade_failed() {
    assert_eq!(FrameAnalysis::grade(&[], 1.0, 1.0), AnalysisQuality::Failed);
}

// ── majority category ─────────────────────────────────────────────────

#[test]
fn majority_wins() {
    let a = analysis(vec![
        detection(FruitCategory::Pear, 0.9),
        detection(FruitCategory::Pear, 0.8),
        detection(FruitCategory::Apple, 0.95),
    ]);
    assert_eq!(a.majority_category(), Some(FruitCategory::Pear));
}

#[test]
fn tie_breaks_apple_over_pear_over_lemon() {
    let a = analysis(vec![
        detection(FruitCategory::Lemon, 0.9),
        detection(FruitCategory::Pear, 0.9),
    ]);
    assert_eq!(a.majority_category(), Some(FruitCategory::Pear));

    let a = analysis(vec![
        detection(FruitCategory::Apple, 0.5),
        detection(FruitCategory::Lemon, 0.99),
    ]);
    assert_eq!(a.majority_category(), Some(FruitCategory::Apple));
}

#[test]
fn unknown_never_wins() {
    let a = analysis(vec![
        detection(FruitCategory::Unknown, 0.99),
        detection(FruitCategory::Unknown, 0.98),
    ]);
    assert_eq!(a.majority_category(), None);
}

#[test]
fn empty_has_no_majority() {
    assert_eq!(analysis(vec![]).majority_category(), None);
}

// ── bounding boxes ────────────────────────────────────────────────────

#[test]
fn bbox_geometry() {
    let b = BoundingBox { x1: 10, y1: 20, x2: 110, y2: 70 };
    assert_eq!(b.width(), 100);
    assert_eq!(b.height(), 50);
    assert_eq!(b.area(), 5000);
    assert_eq!(b.center(), (60, 45));
    assert!((b.aspect_ratio() - 2.0).abs() < f64::EPSILON);
}

#[test]
fn edge_distance_normalised_by_short_dimension() {
    let b = BoundingBox { x1: 48, y1: 100, x2: 200, y2: 200 };
    // Nearest edge is x1=48; short dimension 480.
    let d = b.edge_distance(640, 480);
    assert!((d - 0.1).abs() < 1e-9);
}

#[test]
fn edge_distance_clamps_out_of_frame_boxes() {
    let b = BoundingBox { x1: -5, y1: 0, x2: 700, y2: 500 };
    assert_eq!(b.edge_distance(640, 480), 0.0);
}

// ── commands ──────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn labeling_command_staleness() {
    let now = Instant::now();
    let cmd = LabelingCommand {
        target_group: 0,
        duration: Duration::from_secs(2),
        intensity_pct: 100.0,
        issued_at: now,
        deadline_at: now + Duration::from_secs(5),
    };
    assert!(!cmd.is_stale(now));
    assert!(cmd.is_stale(now + Duration::from_secs(6)));
}
