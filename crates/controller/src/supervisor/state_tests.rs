// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use SystemState::*;

#[test]
fn normal_lifecycle_is_allowed() {
    for (from, to) in [
        (Offline, Initialising),
        (Initialising, Idle),
        (Idle, Running),
        (Running, Processing),
        (Processing, Running),
        (Running, Idle),
        (Idle, ShuttingDown),
        (ShuttingDown, Offline),
    ] {
        assert!(transition_allowed(from, to), "{from:?} -> {to:?}");
    }
}

#[test]
fn emergency_stop_is_legal_from_any_state() {
    for from in [
        Offline,
        Initialising,
        Idle,
        Running,
        Processing,
        Recovery,
        ShuttingDown,
        Error,
    ] {
        assert!(transition_allowed(from, EmergencyStop), "{from:?}");
    }
}

#[test]
fn recovery_bridges_back_to_idle() {
    assert!(transition_allowed(EmergencyStop, Recovery));
    assert!(transition_allowed(Error, Recovery));
    assert!(transition_allowed(Recovery, Idle));
    // No shortcut straight back to running.
    assert!(!transition_allowed(EmergencyStop, Running));
    assert!(!transition_allowed(EmergencyStop, Idle));
}

#[test]
fn illegal_jumps_are_rejected() {
    assert!(!transition_allowed(Offline, Running));
    assert!(!transition_allowed(Idle, Processing));
    assert!(!transition_allowed(Error, Running));
    assert!(!transition_allowed(Offline, Idle));
}

#[test]
fn handle_enforces_the_table() {
    let handle = StateHandle::new();
    assert_eq!(handle.current(), Offline);

    handle.transition(Initialising).unwrap();
    handle.transition(Idle).unwrap();
    handle.transition(Running).unwrap();

    let err = handle.transition(Initialising).unwrap_err();
    assert_eq!(err.1, Running);
    assert_eq!(handle.current(), Running);
}

#[test]
fn self_transition_is_a_noop() {
    let handle = StateHandle::new();
    handle.transition(Offline).unwrap();
    assert_eq!(handle.current(), Offline);
}

#[test]
fn watch_observers_see_transitions() {
    let handle = StateHandle::new();
    let rx = handle.subscribe();
    handle.transition(Initialising).unwrap();
    assert_eq!(*rx.borrow(), Initialising);
}

#[test]
fn processing_marks_require_running() {
    let handle = StateHandle::new();
    assert!(!handle.enter_processing());

    handle.transition(Initialising).unwrap();
    handle.transition(Idle).unwrap();
    handle.transition(Running).unwrap();
    assert!(handle.enter_processing());
    assert_eq!(handle.current(), Processing);
    assert!(Processing.accepts_triggers());

    handle.exit_processing();
    assert_eq!(handle.current(), Running);
    // Exit outside processing is ignored.
    handle.exit_processing();
    assert_eq!(handle.current(), Running);
}
