//! Hot-reload of the configuration file
//!
//! - Uses `notify` for filesystem events on the config directory
//! - Validates the whole file before applying anything
//! - An invalid file leaves the running configuration untouched
//! - Detection and OneBot sections apply live; logging and the HTTP bind
//!   address only take effect after a restart

use chrono::{DateTime, Utc};
use glidewatch_core::logging::TracingConfig;
use glidewatch_core::{ConfigError, ConfigHandle, DetectionConfig};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::{AppConfig, HttpConfig, OneBotConfig};
use crate::error::ServerError;

/// Editors often emit several events per save.
const DEBOUNCE: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HotReloadStatus {
    pub enabled: bool,
    pub watched_file: Option<PathBuf>,
    pub reload_count: u32,
    pub last_reload_success: bool,
    pub last_reload_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

pub struct ConfigReloader {
    path: PathBuf,
    detection: Arc<ConfigHandle<DetectionConfig>>,
    onebot: Arc<ConfigHandle<OneBotConfig>>,
    logging: TracingConfig,
    http: HttpConfig,
    status: Mutex<HotReloadStatus>,
}

impl ConfigReloader {
    pub fn new(
        path: impl Into<PathBuf>,
        startup: &AppConfig,
        detection: Arc<ConfigHandle<DetectionConfig>>,
        onebot: Arc<ConfigHandle<OneBotConfig>>,
    ) -> Self {
        let path = path.into();
        Self {
            status: Mutex::new(HotReloadStatus {
                watched_file: Some(path.clone()),
                ..Default::default()
            }),
            path,
            detection,
            onebot,
            logging: startup.logging.clone(),
            http: startup.http.clone(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the file and swap in the new detection and OneBot sections.
    pub fn reload(&self) -> Result<(), ConfigError> {
        match AppConfig::load(&self.path) {
            Ok(config) => {
                if config.logging != self.logging {
                    warn!("Logging settings changed; restart to apply them");
                }
                if config.http != self.http {
                    warn!(bind = %config.http.bind, "HTTP bind address changed; restart to apply it");
                }
                self.detection.replace(config.detection);
                self.onebot.replace(config.onebot);

                let mut status = self.status.lock();
                status.reload_count += 1;
                status.last_reload_success = true;
                status.last_reload_at = Some(Utc::now());
                status.last_error = None;
                info!(
                    path = %self.path.display(),
                    count = status.reload_count,
                    "Configuration reloaded"
                );
                Ok(())
            }
            Err(e) => {
                let mut status = self.status.lock();
                status.last_reload_success = false;
                status.last_reload_at = Some(Utc::now());
                status.last_error = Some(e.to_string());
                error!(path = %self.path.display(), "Config reload failed, keeping current settings: {}", e);
                Err(e)
            }
        }
    }

    pub fn status(&self) -> HotReloadStatus {
        self.status.lock().clone()
    }

    fn set_watching(&self, enabled: bool) {
        self.status.lock().enabled = enabled;
    }
}

/// Keeps the filesystem watcher and its reload task alive.
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl Drop for ConfigWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Watch the config file's directory and reload on changes to the file.
pub fn watch(reloader: Arc<ConfigReloader>) -> Result<ConfigWatcher, ServerError> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
        let _ = tx.send(res);
    })?;

    let dir = reloader
        .path()
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();
    watcher.watch(&dir, RecursiveMode::NonRecursive)?;
    let file_name = reloader.path().file_name().map(|n| n.to_os_string());

    reloader.set_watching(true);
    info!(path = %reloader.path().display(), "Hot-reload enabled");

    let task = tokio::spawn(async move {
        while let Some(res) = rx.recv().await {
            match res {
                Ok(event) if touches(&event, file_name.as_ref()) => {
                    tokio::time::sleep(DEBOUNCE).await;
                    while rx.try_recv().is_ok() {}
                    // Failures are logged and recorded in the status
                    let _ = reloader.reload();
                }
                Ok(_) => {}
                Err(e) => warn!("File watcher error: {}", e),
            }
        }
    });

    Ok(ConfigWatcher {
        _watcher: watcher,
        task,
    })
}

fn touches(event: &Event, file_name: Option<&OsString>) -> bool {
    let Some(file_name) = file_name else {
        return false;
    };
    matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_))
        && event
            .paths
            .iter()
            .any(|p| p.file_name() == Some(file_name.as_os_str()))
}
