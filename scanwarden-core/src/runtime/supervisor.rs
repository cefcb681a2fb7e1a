use std::any::type_name;
use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use scanwarden_model::{ProviderId, ProviderRecord, ProviderRecordPatch};

use crate::backend::BackendClient;
use crate::config::OrchestratorConfig;
use crate::discovery::Discoverer;
use crate::error::{OrchestratorError, Result};
use crate::findings::AssetScanProcessor;
use crate::provider::Provider;
use crate::watcher::{
    AssetScanEstimationWatcher, AssetScanWatcher, ScanConfigWatcher, ScanEstimationWatcher,
    ScanWatcher,
};

/// Owns the watchers, the asset scan processor and the discoverer of one
/// process and controls their lifetime through a shared cancellation token.
pub struct Orchestrator<B, P> {
    config: OrchestratorConfig,
    backend: Arc<B>,
    provider: Arc<P>,
    display_name: String,
    provider_id: Mutex<Option<ProviderId>>,
    shutdown_token: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl<B, P> fmt::Debug for Orchestrator<B, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let running = self
            .handles
            .try_lock()
            .map(|handles| handles.len())
            .unwrap_or_default();

        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("display_name", &self.display_name)
            .field("backend_type", &type_name::<B>())
            .field("provider_type", &type_name::<P>())
            .field("running_tasks", &running)
            .field("shutdown_cancelled", &self.shutdown_token.is_cancelled())
            .finish()
    }
}

impl<B: BackendClient, P: Provider> Orchestrator<B, P> {
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn backend(&self) -> Arc<B> {
        Arc::clone(&self.backend)
    }

    pub fn provider(&self) -> Arc<P> {
        Arc::clone(&self.provider)
    }

    /// Backend ID of this orchestrator's provider, once registered.
    pub async fn provider_id(&self) -> Option<ProviderId> {
        *self.provider_id.lock().await
    }

    /// Registers the provider, then spawns every controller. Calling it a
    /// second time is an error.
    pub async fn start(&self) -> Result<()> {
        let mut handles = self.handles.lock().await;
        if !handles.is_empty() {
            return Err(OrchestratorError::Internal(
                "orchestrator already started".into(),
            ));
        }
        if self.shutdown_token.is_cancelled() {
            return Err(OrchestratorError::Internal(
                "orchestrator has been shut down".into(),
            ));
        }

        let provider_id = self.register_provider().await?;
        *self.provider_id.lock().await = Some(provider_id);

        let cancel = &self.shutdown_token;
        let backend = &self.backend;
        let provider = &self.provider;
        let config = &self.config;

        handles.extend(
            Arc::new(ScanConfigWatcher::new(
                Arc::clone(backend),
                config.scan_config_watcher,
            ))
            .start(cancel),
        );
        handles.extend(
            Arc::new(ScanWatcher::new(Arc::clone(backend), config.scan_watcher)).start(cancel),
        );
        handles.extend(
            Arc::new(AssetScanWatcher::new(
                Arc::clone(backend),
                Arc::clone(provider),
                config.asset_scan_watcher,
            ))
            .start(cancel),
        );
        handles.extend(
            Arc::new(ScanEstimationWatcher::new(
                Arc::clone(backend),
                config.scan_estimation_watcher,
            ))
            .start(cancel),
        );
        handles.extend(
            Arc::new(AssetScanEstimationWatcher::new(
                Arc::clone(backend),
                Arc::clone(provider),
                config.asset_scan_estimation_watcher,
            ))
            .start(cancel),
        );
        handles.extend(
            Arc::new(AssetScanProcessor::new(
                Arc::clone(backend),
                config.asset_scan_processor,
            ))
            .start(cancel),
        );

        if config.discovery.enabled {
            let discoverer = Arc::new(Discoverer::new(
                Arc::clone(backend),
                Arc::clone(provider),
                config.discovery,
            ));
            handles.push(discoverer.spawn(cancel.child_token()));
        } else {
            tracing::info!(target: "scan::runtime", "asset discovery disabled");
        }

        tracing::info!(
            target: "scan::runtime",
            provider_id = %provider_id,
            provider = %self.provider.kind(),
            tasks = handles.len(),
            "orchestrator started"
        );
        Ok(())
    }

    /// Records this provider with the backend, refreshing the heartbeat of an
    /// existing registration.
    async fn register_provider(&self) -> Result<ProviderId> {
        let now = Utc::now();
        let record = ProviderRecord {
            id: ProviderId::new(),
            display_name: self.display_name.clone(),
            kind: self.provider.kind(),
            last_heartbeat_time: Some(now),
        };

        let err = match self.backend.post(record).await {
            Ok(record) => {
                tracing::info!(target: "scan::runtime", provider_id = %record.id, display_name = %record.display_name, "registered provider");
                return Ok(record.id);
            }
            Err(err) => err,
        };
        let existing = match err.conflicting::<ProviderRecord>() {
            Some(existing) => existing?,
            None => return Err(err.into()),
        };

        self.backend
            .patch::<ProviderRecord>(
                existing.id,
                ProviderRecordPatch {
                    last_heartbeat_time: Some(now),
                },
            )
            .await?;
        tracing::info!(target: "scan::runtime", provider_id = %existing.id, display_name = %existing.display_name, "provider already registered; refreshed heartbeat");
        Ok(existing.id)
    }

    /// Cancels every controller and waits for each task, giving each at most
    /// the configured shutdown timeout.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!(target: "scan::runtime", "initiating orchestrator shutdown");
        self.shutdown_token.cancel();

        let handles = std::mem::take(&mut *self.handles.lock().await);
        let timeout = self.config.shutdown_timeout();
        let mut stuck = 0usize;
        for handle in handles {
            match tokio::time::timeout(timeout, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    tracing::warn!(target: "scan::runtime", error = %err, "controller task failed");
                }
                Err(_) => {
                    stuck += 1;
                    tracing::warn!(target: "scan::runtime", timeout_ms = timeout.as_millis() as u64, "controller task did not stop in time");
                }
            }
        }

        if stuck > 0 {
            return Err(OrchestratorError::Timeout(timeout));
        }
        tracing::info!(target: "scan::runtime", "orchestrator shutdown complete");
        Ok(())
    }
}

/// Assembles an [`Orchestrator`] from its configuration and collaborators.
pub struct OrchestratorBuilder<B, P> {
    config: OrchestratorConfig,
    backend: Option<Arc<B>>,
    provider: Option<Arc<P>>,
    display_name: Option<String>,
}

impl<B, P> fmt::Debug for OrchestratorBuilder<B, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("OrchestratorBuilder");
        debug.field("config", &self.config);
        debug.field("backend_set", &self.backend.is_some());
        debug.field("provider_set", &self.provider.is_some());
        debug.field("display_name", &self.display_name);
        debug.finish()
    }
}

impl<B: BackendClient, P: Provider> OrchestratorBuilder<B, P> {
    pub fn new(config: OrchestratorConfig) -> Self {
        Self {
            config,
            backend: None,
            provider: None,
            display_name: None,
        }
    }

    pub fn with_backend(mut self, backend: Arc<B>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_provider(mut self, provider: Arc<P>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Name the provider registers under. Defaults to `scanwarden-<kind>`.
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn build(self) -> Result<Orchestrator<B, P>> {
        let backend = self
            .backend
            .ok_or_else(|| OrchestratorError::Internal("backend dependency missing".into()))?;
        let provider = self
            .provider
            .ok_or_else(|| OrchestratorError::Internal("provider dependency missing".into()))?;
        let display_name = self
            .display_name
            .unwrap_or_else(|| format!("scanwarden-{}", provider.kind()));

        Ok(Orchestrator {
            config: self.config,
            backend,
            provider,
            display_name,
            provider_id: Mutex::new(None),
            shutdown_token: CancellationToken::new(),
            handles: Mutex::new(Vec::new()),
        })
    }
}
