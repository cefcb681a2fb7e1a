use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use scanwarden_model::{
    Filter, RuntimeSchedule, Scan, ScanConfig, ScanConfigId, ScanConfigPatch, ScanState,
};

use crate::backend::{BackendClient, Query};
use crate::config::ScanConfigWatcherConfig;
use crate::error::{OrchestratorError, Result};
use crate::reconcile::{PollSource, Reconcile, start_controller};

use super::schedule::{OperationTime, ScanConfigSchedule, ScheduleState, ScheduleWindow};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScanConfigReconcileEvent {
    pub scan_config_id: ScanConfigId,
}

impl fmt::Display for ScanConfigReconcileEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ScanConfigID={}", self.scan_config_id)
    }
}

/// Starts scans for scan configs whose operation time has come and moves
/// their schedule forward.
pub struct ScanConfigWatcher<B> {
    backend: Arc<B>,
    config: ScanConfigWatcherConfig,
}

impl<B> fmt::Debug for ScanConfigWatcher<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanConfigWatcher")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<B: BackendClient> ScanConfigWatcher<B> {
    pub const NAME: &'static str = "ScanConfigWatcher";

    pub fn new(backend: Arc<B>, config: ScanConfigWatcherConfig) -> Self {
        Self { backend, config }
    }

    pub fn start(self: Arc<Self>, cancel: &CancellationToken) -> Vec<JoinHandle<()>> {
        let controller = self.config.controller;
        start_controller::<ScanConfigReconcileEvent, _>(Self::NAME, self, controller, cancel)
    }

    async fn disable(&self, config: &ScanConfig) -> Result<()> {
        tracing::debug!(target: "scan::scan_config", scan_config_id = %config.id, "disabling scan config");
        self.backend
            .patch::<ScanConfig>(
                config.id,
                ScanConfigPatch {
                    disabled: Some(true),
                    ..Default::default()
                },
            )
            .await?;
        Ok(())
    }

    async fn reschedule(&self, config: &ScanConfig, schedule: &ScanConfigSchedule) -> Result<()> {
        let operation_time = Self::operation_time(config, schedule)?;
        let next = operation_time.next_after(schedule.window.next().start());
        tracing::debug!(
            target: "scan::scan_config",
            scan_config_id = %config.id,
            operation_time = %next,
            "rescheduling scan config"
        );
        self.backend
            .patch::<ScanConfig>(
                config.id,
                ScanConfigPatch {
                    scheduled: Some(RuntimeSchedule {
                        cron_line: config
                            .scheduled
                            .as_ref()
                            .and_then(|scheduled| scheduled.cron_line.clone()),
                        operation_time: Some(next.time()),
                    }),
                    ..Default::default()
                },
            )
            .await?;
        Ok(())
    }

    async fn reconcile_due(&self, config: &ScanConfig, schedule: &ScanConfigSchedule) -> Result<()> {
        self.create_scan(config).await?;
        if Self::operation_time(config, schedule)?.is_recurring() {
            self.reschedule(config, schedule).await
        } else {
            self.disable(config).await
        }
    }

    /// Posts a new scan unless one started by `config` is still running.
    async fn create_scan(&self, config: &ScanConfig) -> Result<()> {
        let filter = Filter::all([
            Filter::eq("scanConfig/id", config.id),
            Filter::ne("status/state", ScanState::Done),
            Filter::ne("status/state", ScanState::Failed),
        ]);
        let running: Vec<Scan> = self
            .backend
            .list(&Query::filtered(filter).select(["id"]))
            .await?;
        if !running.is_empty() {
            tracing::warn!(
                target: "scan::scan_config",
                scan_config_id = %config.id,
                running = running.len(),
                "skipping scan config with a scan already in progress"
            );
            return Ok(());
        }

        match self.backend.post(Scan::from_config(config, Utc::now())).await {
            Ok(scan) => {
                tracing::info!(target: "scan::scan_config", scan_config_id = %config.id, scan_id = %scan.id, "scan created for scan config");
                Ok(())
            }
            Err(err) if err.is_conflict() => {
                tracing::debug!(target: "scan::scan_config", scan_config_id = %config.id, "scan already exists");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    fn operation_time<'a>(
        config: &ScanConfig,
        schedule: &'a ScanConfigSchedule,
    ) -> Result<&'a OperationTime> {
        schedule.operation_time.as_ref().ok_or_else(|| {
            OrchestratorError::Internal(format!(
                "ScanConfig {} is {} without an operation time",
                config.id, schedule.state
            ))
        })
    }
}

#[async_trait]
impl<B: BackendClient> PollSource<ScanConfigReconcileEvent> for ScanConfigWatcher<B> {
    async fn get_items(&self) -> Result<Vec<ScanConfigReconcileEvent>> {
        let configs: Vec<ScanConfig> = self
            .backend
            .list(&Query::filtered(Filter::eq("disabled", false)).select(["id", "name"]))
            .await?;
        tracing::debug!(target: "scan::scan_config", count = configs.len(), "fetched enabled scan configs");
        Ok(configs
            .into_iter()
            .map(|config| ScanConfigReconcileEvent {
                scan_config_id: config.id,
            })
            .collect())
    }
}

#[async_trait]
impl<B: BackendClient> Reconcile<ScanConfigReconcileEvent> for ScanConfigWatcher<B> {
    async fn reconcile(&self, event: &ScanConfigReconcileEvent) -> Result<()> {
        let config = match self.backend.get::<ScanConfig>(event.scan_config_id).await {
            Ok(config) => config,
            Err(err) if err.is_not_found() => {
                tracing::debug!(target: "scan::scan_config", scan_config_id = %event.scan_config_id, "scan config no longer exists");
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };

        let window = ScheduleWindow::new(Utc::now(), self.config.schedule_window());
        let schedule = ScanConfigSchedule::new(&config, window)?;
        tracing::trace!(target: "scan::scan_config", scan_config_id = %config.id, %schedule, "reconciling scan config");

        match schedule.state {
            ScheduleState::Disabled | ScheduleState::NotDue => Ok(()),
            ScheduleState::Unscheduled => self.disable(&config).await,
            ScheduleState::Due => self.reconcile_due(&config, &schedule).await,
            ScheduleState::Overdue => self.reschedule(&config, &schedule).await,
        }
    }
}
