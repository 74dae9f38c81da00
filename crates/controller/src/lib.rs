// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! VisiFruit: real-time coordination layer for a fruit labeling and
//! classification line.

pub mod actuator;
pub mod api;
pub mod belt;
pub mod config;
pub mod detection;
pub mod diverter;
pub mod error;
pub mod hal;
pub mod labeler;
pub mod metrics;
pub mod pipeline;
pub mod positioner;
pub mod supervisor;
pub mod trigger;
pub mod types;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::belt::Belt;
use crate::config::{Cli, Config, RunMode};
use crate::detection::{DetectionService, MockModel, ModelFactory};
use crate::diverter::DiverterBank;
use crate::hal::Hal;
use crate::labeler::LabelerManager;
use crate::metrics::{MemoryMetricsStore, MetricsStore};
use crate::pipeline::orchestrator::{Orchestrator, PipelineConfig};
use crate::positioner::Positioner;
use crate::supervisor::{AlertBus, Components, StateHandle, Supervisor, SupervisorHandle};
use crate::trigger::TriggerSource;

/// Process exit code for SIGINT, per convention.
pub const EXIT_SIGINT: i32 = 130;

/// A fully wired controller, ready to initialise.
pub struct System {
    pub supervisor: Supervisor,
    pub handle: SupervisorHandle,
    pub shutdown: CancellationToken,
}

impl System {
    /// Wire every component. The caller picks the backends, the model
    /// runtime, and the resolved topology mode; everything else follows the
    /// configuration.
    pub async fn build(
        config: Config,
        hal: Hal,
        factory: ModelFactory,
        mode: RunMode,
    ) -> anyhow::Result<Self> {
        let shutdown = CancellationToken::new();
        let state = StateHandle::new();

        let alerts = Arc::new(AlertBus::new());
        let metrics = Arc::new(MemoryMetricsStore::default());
        alerts.attach_store(Arc::clone(&metrics) as Arc<dyn MetricsStore>);

        let detector =
            Arc::new(DetectionService::start(config.ai_model_settings.clone(), factory).await);
        let belt = Arc::new(Belt::new(&hal, &config.conveyor_belt_settings)?);
        let motor = {
            let m = &config.motor_controller_settings;
            crate::actuator::DcMotor::new(
                hal.pwm_out(m.pwm_pin, 1000.0)?,
                hal.digital_out(m.dir_pin1, true)?,
                hal.digital_out(m.dir_pin2, true)?,
                Some(hal.digital_out(m.enable_pin, true)?),
            )
        };
        let positioner = Arc::new(Positioner::new(motor));
        let labelers = Arc::new(LabelerManager::new(labeler::build_heads(
            &hal,
            config.labeler_settings.base_pin,
        )?));
        let diverters = Arc::new(DiverterBank::new(&hal, &config.diverter_settings)?);

        if config.sensor_settings.trigger.direct_fire {
            tracing::warn!("trigger direct-fire configured but no applicator stepper is wired");
        }
        let triggers = TriggerSource::spawn(
            Arc::clone(&hal.gpio),
            config.sensor_settings.trigger.clone(),
            Arc::clone(&alerts),
            shutdown.clone(),
            None,
        )?;

        let mut pipeline_config = PipelineConfig::from_config(&config);
        if mode == RunMode::Prototype {
            // Single-labeler / 3-servo topology: one group, nothing to
            // pre-position.
            pipeline_config.prototype = true;
            pipeline_config.predictive_positioning = false;
        }

        let orchestrator = Orchestrator::new(
            Arc::clone(&detector),
            Arc::clone(&hal.camera),
            Arc::clone(&positioner),
            Arc::clone(&labelers),
            Arc::clone(&diverters),
            Arc::clone(&belt),
            triggers.clone(),
            Arc::clone(&alerts),
            Arc::clone(&metrics) as Arc<dyn MetricsStore>,
            state.clone(),
            pipeline_config,
            shutdown.clone(),
        );
        let orchestrator_handle = orchestrator.handle();
        tokio::spawn(Arc::clone(&orchestrator).run());

        let components = Arc::new(Components {
            camera: Arc::clone(&hal.camera),
            belt,
            positioner,
            labelers,
            diverters,
            detector,
            triggers,
            orchestrator: orchestrator_handle,
            alerts,
            metrics,
        });

        supervisor::watchdog::spawn_watchdog(
            Arc::clone(&components),
            state.clone(),
            shutdown.clone(),
        );

        let (supervisor, handle) = Supervisor::new(components, state, shutdown.clone());
        Ok(Self { supervisor, handle, shutdown })
    }
}

/// Run the controller until shutdown. Returns the process exit code.
pub async fn run(cli: Cli) -> anyhow::Result<i32> {
    let mode = cli.mode.resolve(&cli.config);
    let mut config = Config::load(&cli.config)?;
    if let Some(host) = cli.host {
        config.api_settings.host = host;
    }
    if let Some(port) = cli.port {
        config.api_settings.port = port;
    }
    tracing::info!(
        mode = ?mode,
        installation = %config.system_settings.installation_id,
        "starting {}",
        config.system_settings.system_name
    );

    let hal = Hal::select(&config.camera_settings);
    let api_settings = config.api_settings.clone();
    let System { supervisor, handle, shutdown } =
        System::build(config, hal, MockModel::factory(), mode).await?;

    supervisor.initialise().await?;
    let supervisor_task = tokio::spawn(supervisor.run());

    // SIGINT triggers an orderly shutdown and the conventional exit code.
    let interrupted = Arc::new(std::sync::atomic::AtomicBool::new(false));
    {
        let handle = handle.clone();
        let interrupted = Arc::clone(&interrupted);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received, shutting down");
                interrupted.store(true, std::sync::atomic::Ordering::Release);
                let _ = handle.shutdown().await;
            }
        });
    }

    if api_settings.enabled {
        let addr = format!("{}:{}", api_settings.host, api_settings.port);
        let router = api::build_router(handle.clone());
        let listener = TcpListener::bind(&addr).await?;
        tracing::info!("supervisory api listening on {addr}");
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown.clone().cancelled_owned())
            .await?;
    } else {
        shutdown.cancelled().await;
    }

    let _ = supervisor_task.await;
    if interrupted.load(std::sync::atomic::Ordering::Acquire) {
        Ok(EXIT_SIGINT)
    } else {
        Ok(0)
    }
}
