//! OneBot notifier: relays detections and bans to chat groups and users
//!
//! The core calls the sink synchronously from its tick. Messages are rendered
//! there and pushed onto a bounded queue; a dispatcher task fans each one out
//! to every configured target with a bounded number of calls in flight.
//! Delivery failures are logged and counted, never surfaced to the core.

pub mod transport;

use glidewatch_core::{ConfigHandle, MessageTemplates, NotificationSink};
use rand::seq::SliceRandom;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

pub use transport::{Endpoint, OneBotRequest, OneBotResponse, OneBotTransport, WsTransport};

use crate::config::OneBotConfig;
use crate::error::NotifyError;
use crate::metrics::ServerMetrics;

/// Time the dispatcher gets to finish queued deliveries on shutdown.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

pub struct OneBotNotifier {
    tx: mpsc::Sender<String>,
    config: Arc<ConfigHandle<OneBotConfig>>,
    metrics: Arc<ServerMetrics>,
}

impl OneBotNotifier {
    pub(crate) fn new(
        tx: mpsc::Sender<String>,
        config: Arc<ConfigHandle<OneBotConfig>>,
        metrics: Arc<ServerMetrics>,
    ) -> Self {
        Self {
            tx,
            config,
            metrics,
        }
    }

    fn enqueue(&self, text: String) {
        match self.tx.try_send(text) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("OneBot queue full, notification dropped");
                self.metrics.record_notification_dropped();
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("OneBot dispatcher stopped, notification dropped");
            }
        }
    }
}

fn pick(templates: &[String]) -> Option<&String> {
    templates.choose(&mut rand::thread_rng())
}

impl NotificationSink for OneBotNotifier {
    fn notify_detection(
        &self,
        actor_name: &str,
        window_secs: u64,
        chunk_count: usize,
        continuous_count: u32,
    ) {
        let config = self.config.current();
        if !config.enabled {
            return;
        }
        let Some(template) = pick(&config.messages.detection) else {
            return;
        };
        let secs = window_secs.to_string();
        let chunks = chunk_count.to_string();
        let count = continuous_count.to_string();
        let text = MessageTemplates::render(
            template,
            &[
                ("%player%", actor_name),
                ("%time%", &secs),
                ("%chunks%", &chunks),
                ("%count%", &count),
            ],
        );
        self.enqueue(text);
    }

    fn notify_ban(&self, actor_name: &str) {
        let config = self.config.current();
        if !config.enabled {
            return;
        }
        let Some(template) = pick(&config.messages.ban) else {
            return;
        };
        self.enqueue(MessageTemplates::render(template, &[("%player%", actor_name)]));
    }
}

/// Owns the dispatcher task.
pub struct NotifierHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl NotifierHandle {
    /// Stop accepting work, let queued deliveries finish for up to `grace`,
    /// then abort whatever is left.
    pub async fn shutdown(self, grace: Duration) {
        let _ = self.shutdown.send(true);
        let mut task = self.task;
        match tokio::time::timeout(grace, &mut task).await {
            Ok(_) => debug!("OneBot dispatcher finished"),
            Err(_) => {
                warn!(?grace, "OneBot dispatcher did not finish in time, aborting");
                task.abort();
            }
        }
    }
}

/// Start the dispatcher and return the sink the core writes into.
///
/// Queue capacity and the in-flight limit are read once here; the remaining
/// settings are read per message and follow reloads.
pub fn spawn_notifier(
    config: Arc<ConfigHandle<OneBotConfig>>,
    transport: Arc<dyn OneBotTransport>,
    metrics: Arc<ServerMetrics>,
) -> (Arc<OneBotNotifier>, NotifierHandle) {
    let current = config.current();
    let (tx, rx) = mpsc::channel(current.queue_capacity.max(1));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let dispatcher = Dispatcher {
        config: config.clone(),
        transport,
        metrics: metrics.clone(),
        permits: Arc::new(Semaphore::new(current.max_in_flight.max(1))),
        in_flight: JoinSet::new(),
    };
    let task = tokio::spawn(dispatcher.run(rx, shutdown_rx));

    let notifier = Arc::new(OneBotNotifier::new(tx, config, metrics));
    (
        notifier,
        NotifierHandle {
            shutdown: shutdown_tx,
            task,
        },
    )
}

struct Dispatcher {
    config: Arc<ConfigHandle<OneBotConfig>>,
    transport: Arc<dyn OneBotTransport>,
    metrics: Arc<ServerMetrics>,
    permits: Arc<Semaphore>,
    in_flight: JoinSet<()>,
}

impl Dispatcher {
    async fn run(mut self, mut rx: mpsc::Receiver<String>, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                job = rx.recv() => match job {
                    Some(text) => self.fan_out(text).await,
                    None => break,
                },
                Some(joined) = self.in_flight.join_next(), if !self.in_flight.is_empty() => {
                    if let Err(e) = joined {
                        warn!("OneBot delivery task failed: {}", e);
                    }
                }
            }
        }

        // Drain what was queued before shutdown
        rx.close();
        while let Some(text) = rx.recv().await {
            self.fan_out(text).await;
        }
        while self.in_flight.join_next().await.is_some() {}
    }

    async fn fan_out(&mut self, text: String) {
        let config = self.config.current();
        if !config.enabled {
            return;
        }
        let endpoint = Endpoint {
            url: config.ws_url.clone(),
            access_token: config.access_token.clone(),
        };
        let timeout = config.connect_timeout();

        let mut any = false;
        for target in config.targets() {
            any = true;
            let Ok(permit) = self.permits.clone().acquire_owned().await else {
                return;
            };
            let request = OneBotRequest::for_target(target, &text);
            self.in_flight.spawn(deliver(
                self.transport.clone(),
                endpoint.clone(),
                request,
                timeout,
                self.metrics.clone(),
                permit,
            ));
        }
        if !any {
            debug!("No OneBot targets configured, notification skipped");
        }
    }
}

async fn deliver(
    transport: Arc<dyn OneBotTransport>,
    endpoint: Endpoint,
    request: OneBotRequest,
    timeout: Duration,
    metrics: Arc<ServerMetrics>,
    _permit: OwnedSemaphorePermit,
) {
    let action = request.action.clone();
    let outcome = match tokio::time::timeout(timeout, transport.call(&endpoint, request)).await {
        Ok(Ok(response)) => response.into_result(),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(NotifyError::Timeout(timeout)),
    };

    match outcome {
        Ok(()) => {
            metrics.record_notification(true);
            debug!(%action, "OneBot message delivered");
        }
        Err(e) if e.is_quiet() => {
            metrics.record_notification(false);
            debug!(%action, "OneBot endpoint unreachable: {}", e);
        }
        Err(e) => {
            metrics.record_notification(false);
            warn!(%action, "OneBot delivery failed: {}", e);
        }
    }
}

/// Log the notifier state at startup.
pub fn log_startup(config: &OneBotConfig) {
    if config.enabled {
        info!(
            url = %config.ws_url,
            targets = config.targets().count(),
            "OneBot notifications enabled"
        );
    } else {
        debug!("OneBot notifications disabled");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::Ordering;

    #[derive(Default)]
    struct MockTransport {
        calls: Mutex<Vec<(Endpoint, OneBotRequest)>>,
        reply: Mutex<Option<String>>,
        refuse: bool,
    }

    #[async_trait]
    impl OneBotTransport for MockTransport {
        async fn call(
            &self,
            endpoint: &Endpoint,
            request: OneBotRequest,
        ) -> Result<OneBotResponse, NotifyError> {
            self.calls.lock().push((endpoint.clone(), request));
            if self.refuse {
                return Err(NotifyError::ConnectionRefused("os error 111".into()));
            }
            let reply = self
                .reply
                .lock()
                .clone()
                .unwrap_or_else(|| r#"{"status":"ok"}"#.to_string());
            Ok(OneBotResponse::parse(&reply)?.unwrap_or_default())
        }
    }

    fn enabled_config() -> OneBotConfig {
        OneBotConfig {
            enabled: true,
            access_token: Some("secret".into()),
            group_ids: vec![111, 0],
            private_ids: vec![222, -1],
            messages: crate::config::OneBotMessages {
                detection: vec!["%player% %chunks% in %time%s (#%count%)".into()],
                ban: vec!["%player% banned".into()],
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_detection_fans_out_to_positive_targets() {
        let transport = Arc::new(MockTransport::default());
        let metrics = ServerMetrics::new();
        let config = Arc::new(ConfigHandle::new(enabled_config()));
        let (notifier, handle) = spawn_notifier(config, transport.clone(), metrics.clone());

        notifier.notify_detection("Steve", 30, 130, 2);
        handle.shutdown(SHUTDOWN_GRACE).await;

        let calls = transport.calls.lock();
        assert_eq!(calls.len(), 2);
        let actions: Vec<&str> = calls.iter().map(|(_, r)| r.action.as_str()).collect();
        assert!(actions.contains(&"send_group_msg"));
        assert!(actions.contains(&"send_private_msg"));
        for (endpoint, request) in calls.iter() {
            assert_eq!(endpoint.access_token.as_deref(), Some("secret"));
            assert_eq!(request.params["message"], "Steve 130 in 30s (#2)");
        }
        assert_eq!(metrics.notifications_sent.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn test_disabled_sends_nothing() {
        let transport = Arc::new(MockTransport::default());
        let config = Arc::new(ConfigHandle::new(OneBotConfig {
            enabled: false,
            ..enabled_config()
        }));
        let (notifier, handle) = spawn_notifier(config, transport.clone(), ServerMetrics::new());

        notifier.notify_ban("Steve");
        handle.shutdown(SHUTDOWN_GRACE).await;
        assert!(transport.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_rejection_and_refusal_count_as_failures() {
        let rejecting = Arc::new(MockTransport {
            reply: Mutex::new(Some(r#"{"status":"failed","msg":"muted"}"#.into())),
            ..Default::default()
        });
        let metrics = ServerMetrics::new();
        let config = Arc::new(ConfigHandle::new(enabled_config()));
        let (notifier, handle) = spawn_notifier(config.clone(), rejecting, metrics.clone());
        notifier.notify_ban("Steve");
        handle.shutdown(SHUTDOWN_GRACE).await;
        assert_eq!(metrics.notification_failures.load(Ordering::Relaxed), 2);

        let refusing = Arc::new(MockTransport {
            refuse: true,
            ..Default::default()
        });
        let metrics = ServerMetrics::new();
        let (notifier, handle) = spawn_notifier(config, refusing, metrics.clone());
        notifier.notify_ban("Steve");
        handle.shutdown(SHUTDOWN_GRACE).await;
        assert_eq!(metrics.notification_failures.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.notifications_sent.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_full_queue_drops() {
        let (tx, _rx) = mpsc::channel(1);
        let metrics = ServerMetrics::new();
        let notifier = OneBotNotifier::new(
            tx,
            Arc::new(ConfigHandle::new(enabled_config())),
            metrics.clone(),
        );
        notifier.notify_ban("a");
        notifier.notify_ban("b");
        assert_eq!(metrics.notifications_dropped.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_templates_follow_reload() {
        let transport = Arc::new(MockTransport::default());
        let config = Arc::new(ConfigHandle::new(enabled_config()));
        let (notifier, handle) =
            spawn_notifier(config.clone(), transport.clone(), ServerMetrics::new());

        let mut updated = enabled_config();
        updated.messages.ban = vec!["%player% is out".into()];
        updated.private_ids.clear();
        config.replace(updated);

        notifier.notify_ban("Alex");
        handle.shutdown(SHUTDOWN_GRACE).await;

        let calls = transport.calls.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1.params["message"], "Alex is out");
    }
}
