use chrono::{DateTime, Utc};
use livewatch_common::ApiStatus;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::registry::MonitoringApi;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionHealth {
    pub api: ApiStatus,
    pub last_checked: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Default for ConnectionHealth {
    fn default() -> Self {
        Self {
            api: ApiStatus::Unknown,
            last_checked: None,
            detail: None,
        }
    }
}

pub struct HealthMonitor {
    api: Arc<dyn MonitoringApi>,
    check_interval: Duration,
}

pub struct HealthHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    report: watch::Receiver<ConnectionHealth>,
}

impl HealthHandle {
    pub fn current(&self) -> ConnectionHealth {
        self.report.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<ConnectionHealth> {
        self.report.clone()
    }

    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!("Health monitor ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for HealthHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl HealthMonitor {
    pub fn new(api: Arc<dyn MonitoringApi>, check_interval: Duration) -> Self {
        Self { api, check_interval }
    }

    pub async fn check(&self) -> ConnectionHealth {
        match self.api.health().await {
            Ok(response) => ConnectionHealth {
                api: response.api_status(),
                last_checked: Some(Utc::now()),
                detail: None,
            },
            Err(e) => ConnectionHealth {
                api: ApiStatus::Offline,
                last_checked: Some(Utc::now()),
                detail: Some(e.to_string()),
            },
        }
    }

    pub fn spawn(self) -> HealthHandle {
        let cancel = CancellationToken::new();
        let (tx, rx) = watch::channel(ConnectionHealth::default());
        let task = tokio::spawn(self.run(tx, cancel.clone()));

        HealthHandle {
            cancel,
            task: Some(task),
            report: rx,
        }
    }

    async fn run(self, tx: watch::Sender<ConnectionHealth>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.check_interval);
        info!("Starting health monitor with interval: {:?}", self.check_interval);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let report = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                report = self.check() => report,
            };

            let previous = tx.borrow().api;
            if report.api != previous {
                match report.api {
                    ApiStatus::Online => info!("Monitoring API is online"),
                    _ => warn!(
                        "Monitoring API is {:?}: {}",
                        report.api,
                        report.detail.as_deref().unwrap_or("unexpected status")
                    ),
                }
            }
            tx.send_replace(report);
        }
    }
}
