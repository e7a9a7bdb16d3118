//! Scheduler module for running measurement cycles and raising alerts.

mod aggregate;

pub use aggregate::*;

use crate::alert::{evaluate, Alerter};
use crate::config::Config;
use crate::probe::{probe_target, Probe};
use crate::store::{AlertThresholds, LatestResult, LatestResultStore, TargetSet};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

/// Drives measure -> aggregate -> publish -> alert cycles.
///
/// Scheduled and on-demand cycles share one admission gate, so only one
/// cycle probes the targets at a time.
pub struct Scheduler {
    targets: Arc<TargetSet>,
    probe: Arc<dyn Probe>,
    latest: Arc<LatestResultStore>,
    alerter: Option<Arc<Alerter>>,
    thresholds: AlertThresholds,
    interval: Duration,
    on_demand_timeout: Duration,
    cycle_gate: Mutex<()>,
    stop_tx: watch::Sender<bool>,
}

impl Scheduler {
    /// Create a scheduler. Alerts are evaluated only when `alerter` is set.
    pub fn new(
        config: &Config,
        targets: TargetSet,
        probe: Arc<dyn Probe>,
        latest: Arc<LatestResultStore>,
        alerter: Option<Arc<Alerter>>,
    ) -> Self {
        let (stop_tx, _) = watch::channel(false);

        Self {
            targets: Arc::new(targets),
            probe,
            latest,
            alerter,
            thresholds: config.thresholds(),
            interval: config.poll_interval(),
            on_demand_timeout: config.on_demand_timeout(),
            cycle_gate: Mutex::new(()),
            stop_tx,
        }
    }

    /// The currently published snapshot.
    pub fn latest(&self) -> LatestResult {
        self.latest.read()
    }

    /// Run one full cycle and return what it published.
    pub async fn run_cycle(&self) -> LatestResult {
        let _admitted = self.cycle_gate.lock().await;

        // Each cycle gets its own measurement list; targets are never mutated.
        let mut measurements = Vec::with_capacity(self.targets.len());
        for target in self.targets.iter() {
            let raw = probe_target(self.probe.as_ref(), target).await;
            measurements.push(TargetMeasurement {
                target_id: target.id,
                raw,
            });
        }

        let result = aggregate(&measurements);
        self.latest.publish(result.clone());

        if let Some(alerter) = &self.alerter {
            for alert in evaluate(&result, &self.thresholds) {
                alerter.add_alert(alert);
            }
            // Fire and forget; failures are logged by the alerter.
            let _ = alerter.dispatch();
        }

        result
    }

    /// Run an out-of-band cycle for a request handler.
    ///
    /// If the cycle cannot finish within the on-demand timeout the previous
    /// snapshot is returned instead. Nothing is published by an abandoned
    /// cycle because publishing is its last step.
    pub async fn trigger_now(&self) -> LatestResult {
        tracing::debug!("Requested to test connection speed");

        match tokio::time::timeout(self.on_demand_timeout, self.run_cycle()).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    "On-demand measurement did not finish within {:?}, returning previous result",
                    self.on_demand_timeout
                );
                self.latest()
            }
        }
    }

    /// Start polling in the background.
    ///
    /// The first cycle runs immediately; each following one starts
    /// `interval` after the previous one ended. A stop request is honoured
    /// while waiting; a cycle already running is allowed to finish.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let scheduler = self.clone();
        let mut stop_rx = self.stop_tx.subscribe();

        tracing::info!(
            "Starting scheduler with {} targets, interval {:?}",
            self.targets.len(),
            self.interval
        );

        tokio::spawn(async move {
            loop {
                if *stop_rx.borrow_and_update() {
                    break;
                }

                scheduler.run_cycle().await;

                tracing::debug!("Waiting {:?} before next poll", scheduler.interval);
                tokio::select! {
                    _ = stop_rx.changed() => {
                        if *stop_rx.borrow() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(scheduler.interval) => {}
                }
            }

            tracing::info!("Scheduler stopped");
        })
    }

    /// Ask the polling task to exit.
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }
}
