//! Runtime wiring: builds the core components and drives their periodic work.
//!
//! ```text
//!  tick (tick_interval_ms)        → DetectionEngine::evaluate
//!  ban sweep (ban_sweep_interval) → BanStore::sweep_expired
//!  dedup sweep                    → ChunkAttributor::sweep
//!  event pump                     → host events in arrival order
//! ```
//!
//! Every task stops on the shared shutdown signal.

use glidewatch_core::{
    BanStore, ChunkAttributor, Clock, ConfigHandle, DetectionConfig, DetectionEngine,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::api::ApiState;
use crate::bridge::{create_bridge, EventPump, EventSender, HostRegistry, KickQueue};
use crate::config::{AppConfig, OneBotConfig};
use crate::hotreload::ConfigReloader;
use crate::metrics::ServerMetrics;
use crate::notifier::{self, NotifierHandle, OneBotTransport, SHUTDOWN_GRACE};

pub struct GuardRuntime {
    engine: Arc<DetectionEngine>,
    attributor: Arc<ChunkAttributor>,
    registry: Arc<HostRegistry>,
    directives: Arc<KickQueue>,
    reloader: Arc<ConfigReloader>,
    metrics: Arc<ServerMetrics>,
    events: EventSender,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    notifier: NotifierHandle,
}

impl GuardRuntime {
    /// Build every component and spawn the background tasks. Must be called
    /// from inside a tokio runtime.
    pub fn start(
        config: AppConfig,
        config_path: impl Into<PathBuf>,
        transport: Arc<dyn OneBotTransport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let detection = Arc::new(ConfigHandle::new(config.detection.clone()));
        let onebot: Arc<ConfigHandle<OneBotConfig>> =
            Arc::new(ConfigHandle::new(config.onebot.clone()));
        let metrics = ServerMetrics::new();

        notifier::log_startup(&config.onebot);
        let (sink, notifier) = notifier::spawn_notifier(onebot.clone(), transport, metrics.clone());

        let registry = Arc::new(HostRegistry::new());
        let directives = Arc::new(KickQueue::new(registry.clone()));
        let bans = Arc::new(BanStore::new(
            detection.clone(),
            directives.clone(),
            clock.clone(),
        ));
        let engine = Arc::new(DetectionEngine::new(
            detection.clone(),
            bans.clone(),
            registry.clone(),
            directives.clone(),
            sink,
            clock.clone(),
        ));
        let attributor = Arc::new(ChunkAttributor::new(
            detection.clone(),
            registry.clone(),
            engine.clone(),
            clock,
        ));
        let reloader = Arc::new(ConfigReloader::new(
            config_path,
            &config,
            detection.clone(),
            onebot,
        ));

        let (shutdown, shutdown_rx) = watch::channel(false);
        let mut tasks = Vec::new();

        let tick_engine = engine.clone();
        let tick_metrics = metrics.clone();
        tasks.push(spawn_periodic(
            "tick",
            period_of(&detection, DetectionConfig::tick_period),
            move || {
                let started = Instant::now();
                let report = tick_engine.evaluate();
                tick_metrics.record_tick(&report, started.elapsed().as_micros() as u64);
                if report.detections > 0 || report.suppressed > 0 || report.reclaimed > 0 {
                    debug!(?report, "Evaluation pass");
                }
            },
            shutdown_rx.clone(),
        ));

        tasks.push(spawn_periodic(
            "ban sweep",
            period_of(&detection, DetectionConfig::ban_sweep_period),
            move || {
                let removed = bans.sweep_expired();
                if removed > 0 {
                    info!(removed, "Expired bans removed");
                }
            },
            shutdown_rx.clone(),
        ));

        let sweep_attributor = attributor.clone();
        tasks.push(spawn_periodic(
            "dedup sweep",
            period_of(&detection, DetectionConfig::dedup_sweep_period),
            move || {
                let removed = sweep_attributor.sweep();
                if removed > 0 {
                    debug!(removed, "Stale chunk keys removed");
                }
            },
            shutdown_rx.clone(),
        ));

        let (events, events_rx) = create_bridge();
        let pump = EventPump::new(
            engine.clone(),
            attributor.clone(),
            registry.clone(),
            metrics.clone(),
        );
        tasks.push(tokio::spawn(pump.run(events_rx, shutdown_rx)));

        info!(
            window_secs = config.detection.time_window_secs,
            threshold = config.detection.continuous_threshold,
            ban_minutes = config.detection.ban_duration_minutes,
            "Detection runtime started"
        );

        Self {
            engine,
            attributor,
            registry,
            directives,
            reloader,
            metrics,
            events,
            shutdown,
            tasks,
            notifier,
        }
    }

    pub fn api_state(&self) -> ApiState {
        ApiState {
            engine: self.engine.clone(),
            attributor: self.attributor.clone(),
            registry: self.registry.clone(),
            directives: self.directives.clone(),
            events: self.events.clone(),
            reloader: self.reloader.clone(),
            metrics: self.metrics.clone(),
        }
    }

    pub fn reloader(&self) -> Arc<ConfigReloader> {
        self.reloader.clone()
    }

    /// Stop the background tasks, then give the notifier its grace period.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            let _ = task.await;
        }
        self.notifier.shutdown(SHUTDOWN_GRACE).await;
        info!("Detection runtime stopped");
    }
}

/// Period read from the live detection config on every tick.
fn period_of(
    config: &Arc<ConfigHandle<DetectionConfig>>,
    read: fn(&DetectionConfig) -> Duration,
) -> impl Fn() -> Duration + Send + 'static {
    let config = config.clone();
    move || read(&config.current())
}

fn ticker(period: Duration) -> Interval {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

/// Run `work` every `period()`. The interval is rebuilt when the period
/// changes after a config reload.
fn spawn_periodic<P, W>(
    name: &'static str,
    period: P,
    mut work: W,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()>
where
    P: Fn() -> Duration + Send + 'static,
    W: FnMut() + Send + 'static,
{
    tokio::spawn(async move {
        let mut current = period();
        let mut timer = ticker(current);
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = timer.tick() => {
                    work();
                    let next = period();
                    if next != current {
                        info!(task = name, ?next, "Interval changed");
                        current = next;
                        timer = ticker(current);
                        // The first tick of a fresh interval fires immediately
                        timer.tick().await;
                    }
                }
            }
        }
        debug!(task = name, "Periodic task stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::WsTransport;
    use glidewatch_core::SystemClock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_periodic_runs_and_stops() {
        let (tx, rx) = watch::channel(false);
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let task = spawn_periodic(
            "test",
            || Duration::from_millis(20),
            move || {
                counter.fetch_add(1, Ordering::Relaxed);
            },
            rx,
        );

        tokio::time::sleep(Duration::from_millis(110)).await;
        tx.send(true).unwrap();
        task.await.unwrap();
        let after_stop = runs.load(Ordering::Relaxed);
        assert!(after_stop >= 2, "ran {after_stop} times");

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(runs.load(Ordering::Relaxed), after_stop);
    }

    #[tokio::test]
    async fn test_runtime_starts_and_shuts_down() {
        let runtime = GuardRuntime::start(
            AppConfig::default(),
            "config/absent.json",
            Arc::new(WsTransport),
            Arc::new(SystemClock),
        );
        let state = runtime.api_state();
        assert_eq!(state.engine.tracked_actors(), 0);
        runtime.shutdown().await;
    }
}
