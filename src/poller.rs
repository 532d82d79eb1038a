use crate::checker::{CheckOutcome, Checker};
use crate::config::PollSettings;
use crate::error::PollError;
use crate::models::{EventKind, LastCheck, NewCheckResult, ServiceWithLastCheck};
use crate::notifier::Notifier;
use crate::storage::ServiceStore;
use crate::transition::evaluate;
use futures::future::join_all;
use std::sync::Arc;
use tokio::select;
use tokio::sync::{Mutex, mpsc};
use tokio::time::{Interval, MissedTickBehavior, interval};
use tracing::{error, info, warn};

/// Runs poll cycles: load, check everything, then persist, evaluate and
/// notify per service.
pub struct Poller {
    services: Arc<dyn ServiceStore>,
    checker: Checker,
    notifier: Notifier,
    in_flight: Mutex<()>,
}

/// A notification decided during a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleEvent {
    pub service_id: String,
    pub event: EventKind,
}

/// Summary of one completed cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub checked: usize,
    pub recorded: usize,
    pub persist_failures: usize,
    pub events: Vec<CycleEvent>,
}

enum ServiceOutcome {
    Recorded(Option<CycleEvent>),
    PersistFailed,
}

impl Poller {
    pub fn new(services: Arc<dyn ServiceStore>, checker: Checker, notifier: Notifier) -> Self {
        Self {
            services,
            checker,
            notifier,
            in_flight: Mutex::new(()),
        }
    }

    /// Runs one full cycle. Only a failure to load the service set is
    /// returned; everything after that is isolated per service.
    ///
    /// Cycles are serialized: a call made while another cycle is running
    /// waits for it to finish.
    pub async fn run_poll_cycle(&self) -> Result<CycleReport, PollError> {
        let _guard = self.in_flight.lock().await;
        info!("Starting poll cycle");

        let services = self.services.list_services_with_last_check()?;
        if services.is_empty() {
            info!("No services to poll");
            return Ok(CycleReport::default());
        }

        info!("Polling {} services", services.len());
        let outcomes = join_all(
            services
                .iter()
                .map(|entry| self.checker.check(&entry.service)),
        )
        .await;

        let processed = join_all(
            services
                .iter()
                .zip(outcomes)
                .map(|(entry, outcome)| self.record_and_notify(entry, outcome)),
        )
        .await;

        let mut report = CycleReport {
            checked: services.len(),
            ..CycleReport::default()
        };
        for outcome in processed {
            match outcome {
                ServiceOutcome::Recorded(event) => {
                    report.recorded += 1;
                    report.events.extend(event);
                }
                ServiceOutcome::PersistFailed => report.persist_failures += 1,
            }
        }

        info!(
            "Poll cycle completed. Recorded {} results ({} failed to persist)",
            report.recorded, report.persist_failures
        );
        Ok(report)
    }

    async fn record_and_notify(
        &self,
        entry: &ServiceWithLastCheck,
        outcome: CheckOutcome,
    ) -> ServiceOutcome {
        let service = &entry.service;
        let result = NewCheckResult {
            service_id: service.id.clone(),
            status: outcome.status,
            latency_ms: outcome.latency_ms,
            detected_version: outcome.detected_version,
            error_message: outcome.error_message,
        };

        if let Err(err) = self.services.create_check_result(&result) {
            error!("Failed to record check result for {}: {err}", service.name);
            return ServiceOutcome::PersistFailed;
        }

        let current = LastCheck {
            status: result.status,
            detected_version: result.detected_version,
        };
        let Some(transition) = evaluate(entry.last_check.as_ref(), &current) else {
            return ServiceOutcome::Recorded(None);
        };

        info!(
            "{} transitioned {} -> {} ({})",
            service.name, transition.previous_status, transition.current_status, transition.event
        );
        let report = self.notifier.dispatch(service, &transition).await;
        if report.failed > 0 {
            warn!(
                "{} of {} notifications failed for {}",
                report.failed, report.attempted, service.name
            );
        }

        ServiceOutcome::Recorded(Some(CycleEvent {
            service_id: service.id.clone(),
            event: transition.event,
        }))
    }
}

pub enum PollCommand {
    RefreshNow,
}

/// Cloneable entry point for requesting a cycle on demand.
#[derive(Clone)]
pub struct PollerHandle {
    sender: mpsc::Sender<PollCommand>,
}

impl PollerHandle {
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<PollCommand>) {
        let (sender, receiver) = mpsc::channel(buffer);
        (Self { sender }, receiver)
    }

    pub async fn refresh(&self) -> Result<(), PollError> {
        self.sender
            .send(PollCommand::RefreshNow)
            .await
            .map_err(|_| PollError::ChannelClosed)
    }
}

/// Drives the poller from the timer and from manual refresh commands until
/// every [`PollerHandle`] is dropped. One cycle always runs at startup, even
/// with the timer disabled.
pub async fn run_polling_loop(
    poller: Arc<Poller>,
    settings: PollSettings,
    mut receiver: mpsc::Receiver<PollCommand>,
) {
    let mut ticker = if settings.enabled {
        info!(
            "Starting polling engine (interval: {:?})",
            settings.poll_interval
        );
        let mut ticker = interval(settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Some(ticker)
    } else {
        info!("Scheduled polling disabled; serving manual refreshes only");
        run_logged(&poller).await;
        None
    };

    loop {
        select! {
            _ = next_tick(&mut ticker) => {
                run_logged(&poller).await;
            }
            cmd = receiver.recv() => {
                match cmd {
                    Some(PollCommand::RefreshNow) => {
                        info!("Manual refresh requested");
                        run_logged(&poller).await;
                    }
                    None => {
                        warn!("Polling command channel closed; stopping loop");
                        break;
                    }
                }
            }
        }
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

async fn run_logged(poller: &Poller) {
    if let Err(err) = poller.run_poll_cycle().await {
        error!("Poll cycle aborted: {err}");
    }
}
