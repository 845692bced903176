use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::reload_blocking;
use crate::localizer::{DynamicLocalizer, ReloadOutcome};

/// Reloads the catalog when the resource file's mtime changes.
pub struct ResourceWatcher {
    localizer: Arc<DynamicLocalizer>,
    path: PathBuf,
    min_check_interval: Duration,
    state: AsyncMutex<WatchState>,
}

#[derive(Debug)]
struct WatchState {
    last_check_at: Instant,
    last_mtime: Option<SystemTime>,
}

async fn file_mtime(path: &std::path::Path) -> Option<SystemTime> {
    tokio::fs::metadata(path)
        .await
        .ok()
        .and_then(|m| m.modified().ok())
}

impl ResourceWatcher {
    /// Call after the first load so the current file is not reloaded twice.
    pub async fn new(
        localizer: Arc<DynamicLocalizer>,
        path: PathBuf,
        min_check_interval: Duration,
    ) -> Self {
        let last_mtime = file_mtime(&path).await;
        Self {
            localizer,
            path,
            min_check_interval,
            state: AsyncMutex::new(WatchState {
                last_check_at: Instant::now()
                    .checked_sub(min_check_interval)
                    .unwrap_or_else(Instant::now),
                last_mtime,
            }),
        }
    }

    /// Reload if the file changed, at most once per `min_check_interval`.
    /// Returns the outcome when a reload happened.
    pub async fn maybe_reload(&self) -> Option<ReloadOutcome> {
        {
            let mut st = self.state.lock().await;
            if st.last_check_at.elapsed() < self.min_check_interval {
                return None;
            }
            st.last_check_at = Instant::now();
        }
        self.reload_if_changed().await
    }

    /// Reload if the file changed since the last check, without throttling.
    pub async fn reload_if_changed(&self) -> Option<ReloadOutcome> {
        let last_mtime = {
            let mut st = self.state.lock().await;
            st.last_check_at = Instant::now();
            st.last_mtime
        };

        let mtime = file_mtime(&self.path).await;
        if mtime == last_mtime {
            return None;
        }
        debug!(path = ?self.path, "resource file changed, reloading");

        let outcome = match reload_blocking(Arc::clone(&self.localizer)).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!("resource reload task failed: {}", err);
                return None;
            }
        };

        let mut st = self.state.lock().await;
        st.last_mtime = mtime;
        Some(outcome)
    }

    /// Poll forever at `min_check_interval`. The ticker already paces the
    /// checks, so a late tick never skips one.
    pub fn spawn(self) -> JoinHandle<()> {
        let watcher = Arc::new(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(watcher.min_check_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                watcher.reload_if_changed().await;
            }
        })
    }
}

/// Reload unconditionally every `every`.
pub fn spawn_periodic_reload(localizer: Arc<DynamicLocalizer>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(err) = reload_blocking(Arc::clone(&localizer)).await {
                warn!("periodic reload task failed: {}", err);
            }
        }
    })
}
