// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Hardware abstraction: typed handles over GPIO lines, PWM channels and
//! camera frames.
//!
//! The real GPIO driver and camera are external collaborators; this module
//! defines their contracts and ships a simulation backend that honours the
//! same interfaces, selected by a single decision at startup.  Higher layers
//! never know which backend is active.

pub mod camera;
pub mod gpio;
pub mod sim;

use std::sync::Arc;

use crate::config::{CameraKind, CameraSettings};
use crate::error::HalError;

pub use camera::{Frame, FrameSource, MockCamera};
pub use gpio::{DigitalOut, GpioBackend, PwmOut, RawEdge};
pub use sim::SimGpio;

/// The backend pair the controller runs on.
#[derive(Clone)]
pub struct Hal {
    pub gpio: Arc<dyn GpioBackend>,
    pub camera: Arc<dyn FrameSource>,
}

impl Hal {
    /// Select backends at startup. Real USB/CSI drivers register through
    /// [`Hal::with_backends`]; without one the simulation backend is used so
    /// every higher layer runs unchanged.
    pub fn select(camera: &CameraSettings) -> Self {
        let gpio: Arc<dyn GpioBackend> = Arc::new(SimGpio::new());
        if camera.kind != CameraKind::Mock {
            tracing::warn!(
                kind = ?camera.kind,
                "no hardware camera driver registered, falling back to mock frames"
            );
        }
        tracing::info!("hardware backends: simulation GPIO, mock camera");
        let camera: Arc<dyn FrameSource> =
            Arc::new(MockCamera::new(camera.width, camera.height, camera.fps));
        Self { gpio, camera }
    }

    /// Wire explicit backends (hardware drivers or test doubles).
    pub fn with_backends(gpio: Arc<dyn GpioBackend>, camera: Arc<dyn FrameSource>) -> Self {
        Self { gpio, camera }
    }

    /// Open a digital output handle.
    pub fn digital_out(&self, pin: u8, active_high: bool) -> Result<DigitalOut, HalError> {
        DigitalOut::open(Arc::clone(&self.gpio), pin, active_high)
    }

    /// Open a PWM output handle.
    pub fn pwm_out(&self, pin: u8, frequency_hz: f64) -> Result<PwmOut, HalError> {
        PwmOut::open(Arc::clone(&self.gpio), pin, frequency_hz)
    }
}
