//! Provider that treats the subdirectories of configured roots as assets.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use scanwarden_config::LocalProviderSettings;
use scanwarden_core::provider::{
    AssetDiscoverer, DiscoverySender, Provider, ProviderError, ProviderResult, ScanJobConfig,
};
use scanwarden_model::{
    Asset, AssetInfo, AssetScanId, AssetScanStats, AssetScanTemplate, DirInfo, Estimation,
    ProviderKind, ScanFamily,
};

/// Scan throughput assumed when no earlier scan of the asset recorded one.
const DEFAULT_BYTES_PER_SEC: i64 = 64 * 1024 * 1024;
const DISCOVERY_BUFFER: usize = 64;

#[derive(Debug, Clone)]
struct ScanJob {
    path: PathBuf,
    started_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug)]
pub struct LocalDirProvider {
    roots: Vec<PathBuf>,
    location: String,
    jobs: DashMap<AssetScanId, ScanJob>,
}

impl LocalDirProvider {
    pub fn new(settings: &LocalProviderSettings) -> Self {
        let location = settings.location.clone().unwrap_or_else(|| {
            std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
        });
        Self {
            roots: settings.roots.clone(),
            location,
            jobs: DashMap::new(),
        }
    }

    /// Number of scan jobs started and not yet removed.
    pub fn active_jobs(&self) -> usize {
        self.jobs.len()
    }

    fn dir_path(asset: &Asset) -> ProviderResult<PathBuf> {
        match &asset.asset_info {
            AssetInfo::Dir(dir) => Ok(PathBuf::from(&dir.dir_name)),
            other => Err(ProviderError::fatal(format!(
                "local provider cannot handle {} assets",
                other.kind()
            ))),
        }
    }
}

async fn list_roots(
    roots: Vec<PathBuf>,
    location: String,
    sender: &DiscoverySender,
    cancel: &CancellationToken,
) -> ProviderResult<()> {
    for root in roots {
        let mut entries = tokio::fs::read_dir(&root)
            .await
            .with_context(|| format!("failed to read discovery root {}", root.display()))?;
        loop {
            let entry = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(ProviderError::fatal("discovery cancelled"));
                }
                entry = entries.next_entry() => entry
                    .with_context(|| format!("failed to list {}", root.display()))?,
            };
            let Some(entry) = entry else { break };
            let file_type = entry
                .file_type()
                .await
                .with_context(|| format!("failed to stat {}", entry.path().display()))?;
            if !file_type.is_dir() {
                continue;
            }
            let info = AssetInfo::Dir(DirInfo {
                dir_name: entry.path().display().to_string(),
                location: Some(location.clone()),
            });
            if !sender.send(info).await {
                return Ok(());
            }
        }
    }
    Ok(())
}

/// Total size in bytes of every regular file below `root`. Unreadable
/// subtrees are skipped.
async fn tree_size(root: &Path) -> ProviderResult<i64> {
    let mut total: u64 = 0;
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if dir == root => {
                return Err(ProviderError::fatal(format!(
                    "cannot read {}: {err}",
                    root.display()
                )));
            }
            Err(err) => {
                tracing::debug!(target: "scanwarden::local", path = %dir.display(), error = %err, "skipping unreadable directory");
                continue;
            }
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            if metadata.is_dir() {
                pending.push(entry.path());
            } else if metadata.is_file() {
                total = total.saturating_add(metadata.len());
            }
        }
    }
    Ok(i64::try_from(total).unwrap_or(i64::MAX))
}

/// Bytes per second observed for one family in an earlier scan, if any.
fn observed_throughput(stats: &AssetScanStats, family: ScanFamily) -> Option<i64> {
    stats.get(&family)?.iter().find_map(|input| {
        let size = input.size?;
        let scan_time = input.scan_time.as_ref()?;
        let seconds = (scan_time.end_time? - scan_time.start_time?).num_seconds();
        (seconds > 0 && size > 0).then(|| size / seconds)
    })
}

#[async_trait]
impl Provider for LocalDirProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Local
    }

    async fn discover_assets(&self, cancel: CancellationToken) -> AssetDiscoverer {
        let (sender, discoverer) = AssetDiscoverer::channel(DISCOVERY_BUFFER);
        let roots = self.roots.clone();
        let location = self.location.clone();
        tokio::spawn(async move {
            let result = list_roots(roots, location, &sender, &cancel).await;
            sender.finish(result);
        });
        discoverer
    }

    async fn estimate(
        &self,
        stats: &AssetScanStats,
        asset: &Asset,
        template: &AssetScanTemplate,
    ) -> ProviderResult<Estimation> {
        let path = Self::dir_path(asset)?;
        let size = tree_size(&path).await?;

        let duration = template
            .families
            .enabled()
            .map(|family| {
                let throughput = observed_throughput(stats, family).unwrap_or(DEFAULT_BYTES_PER_SEC);
                size / throughput.max(1)
            })
            .sum();

        Ok(Estimation {
            cost: Some(0.0),
            size: Some(size),
            duration: Some(duration),
            cost_breakdown: Vec::new(),
        })
    }

    async fn run_asset_scan(&self, config: &ScanJobConfig) -> ProviderResult<()> {
        let path = Self::dir_path(&config.asset)?;
        match tokio::fs::metadata(&path).await {
            Ok(metadata) if metadata.is_dir() => {}
            Ok(_) => {
                return Err(ProviderError::fatal(format!(
                    "{} is not a directory",
                    path.display()
                )));
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(ProviderError::fatal(format!(
                    "{} no longer exists",
                    path.display()
                )));
            }
            Err(err) => {
                return Err(ProviderError::retryable(
                    format!("cannot stat {}: {err}", path.display()),
                    Duration::from_secs(30),
                ));
            }
        }

        if self.jobs.contains_key(&config.asset_scan_id) {
            return Ok(());
        }
        tracing::info!(
            target: "scanwarden::local",
            asset_scan_id = %config.asset_scan_id,
            path = %path.display(),
            "scan job ready"
        );
        self.jobs.insert(
            config.asset_scan_id,
            ScanJob {
                path,
                started_at: chrono::Utc::now(),
            },
        );
        Ok(())
    }

    async fn remove_asset_scan(&self, config: &ScanJobConfig) -> ProviderResult<()> {
        if let Some((_, job)) = self.jobs.remove(&config.asset_scan_id) {
            tracing::info!(
                target: "scanwarden::local",
                asset_scan_id = %config.asset_scan_id,
                path = %job.path.display(),
                ran_for_secs = (chrono::Utc::now() - job.started_at).num_seconds(),
                "scan job removed"
            );
        }
        Ok(())
    }
}
