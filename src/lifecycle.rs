//! Service lifecycle: run the HTTP surface and the poller together, then
//! shut both down within a bounded time.

use crate::alert::Alerter;
use crate::config::Config;
use crate::scheduler::Scheduler;
use crate::web::Server;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::{JoinError, JoinHandle};

/// How shutdown ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ShutdownOutcome {
    /// Everything quiesced within the bound.
    Graceful,
    /// The bound elapsed and remaining work was aborted.
    TimedOut(Duration),
    /// Something failed while stopping; remaining work was aborted.
    Failed(String),
}

pub struct Lifecycle {
    scheduler: Arc<Scheduler>,
    alerter: Option<Arc<Alerter>>,
    app_name: String,
    shutdown_timeout: Duration,
}

impl Lifecycle {
    pub fn new(config: &Config, scheduler: Arc<Scheduler>, alerter: Option<Arc<Alerter>>) -> Self {
        Self {
            scheduler,
            alerter,
            app_name: config.app_name.clone(),
            shutdown_timeout: config.shutdown_timeout(),
        }
    }

    /// Serve on `listener` and poll until `signal` resolves, then shut down.
    pub async fn run<S>(self, listener: TcpListener, signal: S) -> ShutdownOutcome
    where
        S: Future<Output = ()>,
    {
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let server = Server::new(self.scheduler.clone());
        let mut server_task = tokio::spawn(async move {
            server
                .serve(listener, async {
                    let _ = stop_rx.await;
                })
                .await
        });

        let poller_task = self.scheduler.start();

        // The signal future is polled from here on, so handlers are installed
        // before the start notice goes out.
        tokio::pin!(signal);
        tracing::info!("{} running!", self.app_name);
        let signalled = tokio::select! {
            _ = self.notify(format!("Running {}", self.app_name)) => false,
            _ = &mut signal => true,
        };

        let early_exit = if signalled {
            tracing::info!("Shutdown signal received");
            None
        } else {
            tokio::select! {
                _ = &mut signal => {
                    tracing::info!("Shutdown signal received");
                    None
                }
                joined = &mut server_task => Some(joined),
            }
        };

        let _ = stop_tx.send(());
        self.scheduler.stop();

        let outcome = match early_exit {
            None => quiesce(Some(server_task), poller_task, self.shutdown_timeout).await,
            Some(joined) => {
                let early = describe_server_exit(joined)
                    .unwrap_or_else(|| "HTTP server exited before shutdown was requested".to_string());
                tracing::error!("{}", early);
                match quiesce(None, poller_task, self.shutdown_timeout).await {
                    ShutdownOutcome::Graceful => ShutdownOutcome::Failed(early),
                    other => other,
                }
            }
        };

        match &outcome {
            ShutdownOutcome::Graceful => tracing::info!("Graceful shutdown complete"),
            ShutdownOutcome::TimedOut(bound) => tracing::error!(
                "Graceful shutdown did not complete within {:?}, forced termination",
                bound
            ),
            ShutdownOutcome::Failed(e) => {
                tracing::error!("Graceful shutdown did not complete: {}", e)
            }
        }

        self.notify(format!("Shutting down {}", self.app_name)).await;
        outcome
    }

    async fn notify(&self, text: String) {
        if let Some(alerter) = &self.alerter {
            alerter.add_message(text);
            alerter.flush().await;
        }
    }
}

/// Wait up to `bound` for the server and poller tasks, aborting whatever is
/// still running once it elapses.
async fn quiesce(
    mut server: Option<JoinHandle<std::io::Result<()>>>,
    mut poller: JoinHandle<()>,
    bound: Duration,
) -> ShutdownOutcome {
    let joined = tokio::time::timeout(bound, async {
        let server_exit = match server.as_mut() {
            Some(handle) => describe_server_exit(handle.await),
            None => None,
        };
        let poller_exit = (&mut poller)
            .await
            .err()
            .map(|e| format!("poller task failed: {}", e));
        (server_exit, poller_exit)
    })
    .await;

    match joined {
        Ok((None, None)) => ShutdownOutcome::Graceful,
        Ok((server_exit, poller_exit)) => {
            let errors: Vec<String> = server_exit.into_iter().chain(poller_exit).collect();
            ShutdownOutcome::Failed(errors.join("; "))
        }
        Err(_) => {
            if let Some(handle) = &server {
                handle.abort();
            }
            poller.abort();
            ShutdownOutcome::TimedOut(bound)
        }
    }
}

/// Error text for a server task that ended badly, `None` for a clean exit.
fn describe_server_exit(joined: Result<std::io::Result<()>, JoinError>) -> Option<String> {
    match joined {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(format!("HTTP server error: {}", e)),
        Err(e) => Some(format!("HTTP server task failed: {}", e)),
    }
}

/// Resolve on SIGINT or SIGTERM (Ctrl-C outside unix).
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
                    _ = sigint.recv() => tracing::info!("Received SIGINT"),
                }
                return;
            }
            (Err(e), _) | (_, Err(e)) => {
                tracing::error!("Failed to install signal handlers: {}, using Ctrl-C only", e);
            }
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::tests::RecordingNotifier;
    use crate::alert::{AlertMessage, Notifier, NotifyError};
    use crate::scheduler::tests::{targets, test_config, FakeProbe};
    use crate::store::LatestResultStore;
    use async_trait::async_trait;
    use std::sync::atomic::Ordering;
    use std::time::Instant;

    /// Takes its time delivering every batch.
    struct SlowNotifier {
        delay: Duration,
    }

    #[async_trait]
    impl Notifier for SlowNotifier {
        async fn send(&self, _messages: &[AlertMessage]) -> Result<(), NotifyError> {
            tokio::time::sleep(self.delay).await;
            Ok(())
        }
    }

    fn lifecycle(
        probe: Arc<FakeProbe>,
        config: &Config,
        alerter: Option<Arc<Alerter>>,
    ) -> Lifecycle {
        let scheduler = Arc::new(Scheduler::new(
            config,
            targets(1),
            probe,
            Arc::new(LatestResultStore::new()),
            alerter.clone(),
        ));
        Lifecycle::new(config, scheduler, alerter)
    }

    #[tokio::test]
    async fn test_graceful_shutdown() {
        let notifier = Arc::new(RecordingNotifier::default());
        let alerter = Arc::new(Alerter::new(notifier.clone()));
        let config = Config {
            app_name: "Home Link".to_string(),
            ..test_config()
        };
        let lifecycle = lifecycle(
            Arc::new(FakeProbe::new(80.0, 20.0, Duration::ZERO)),
            &config,
            Some(alerter),
        );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (signal_tx, signal_rx) = oneshot::channel::<()>();
        let running = tokio::spawn(lifecycle.run(listener, async {
            let _ = signal_rx.await;
        }));

        let body: String = reqwest::get(format!("http://{}/", addr))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body, "Internet SpeedTest");

        signal_tx.send(()).unwrap();
        assert_eq!(running.await.unwrap(), ShutdownOutcome::Graceful);

        let batches = notifier.batches.lock().unwrap();
        let texts: Vec<&str> = batches.iter().flatten().map(|m| m.text.as_str()).collect();
        assert_eq!(texts.first(), Some(&"Running Home Link"));
        assert_eq!(texts.last(), Some(&"Shutting down Home Link"));
    }

    #[tokio::test]
    async fn test_polling_starts_while_start_notice_is_slow() {
        let alerter = Arc::new(Alerter::new(Arc::new(SlowNotifier {
            delay: Duration::from_secs(2),
        })));
        let probe = Arc::new(FakeProbe::new(80.0, 20.0, Duration::ZERO));
        let lifecycle = lifecycle(probe.clone(), &test_config(), Some(alerter));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (signal_tx, signal_rx) = oneshot::channel::<()>();
        let running = tokio::spawn(lifecycle.run(listener, async {
            let _ = signal_rx.await;
        }));

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);

        // Signal arrives while the start notice is still in flight
        signal_tx.send(()).unwrap();
        assert_eq!(running.await.unwrap(), ShutdownOutcome::Graceful);
    }

    #[tokio::test]
    async fn test_shutdown_is_bounded() {
        let config = Config {
            shutdown_timeout: 1,
            on_demand_timeout: 600,
            ..test_config()
        };
        // Every measurement outlives the shutdown bound
        let lifecycle = lifecycle(
            Arc::new(FakeProbe::new(80.0, 20.0, Duration::from_secs(300))),
            &config,
            None,
        );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (signal_tx, signal_rx) = oneshot::channel::<()>();
        let running = tokio::spawn(lifecycle.run(listener, async {
            let _ = signal_rx.await;
        }));

        // An in-flight request that will not finish on its own
        let request = tokio::spawn(reqwest::get(format!("http://{}/testSpeedNow", addr)));
        tokio::time::sleep(Duration::from_millis(200)).await;

        let started = Instant::now();
        signal_tx.send(()).unwrap();
        let outcome = running.await.unwrap();

        assert_eq!(outcome, ShutdownOutcome::TimedOut(Duration::from_secs(1)));
        assert!(started.elapsed() < Duration::from_secs(10));
        request.abort();
    }

    #[tokio::test]
    async fn test_quiesce_reports_server_error() {
        let server = tokio::spawn(async {
            Err::<(), _>(std::io::Error::new(std::io::ErrorKind::Other, "accept failed"))
        });
        let poller = tokio::spawn(async {});

        match quiesce(Some(server), poller, Duration::from_secs(5)).await {
            ShutdownOutcome::Failed(e) => assert!(e.contains("accept failed")),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_quiesce_times_out_and_aborts() {
        let server = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(300)).await;
            Ok(())
        });
        let poller = tokio::spawn(async {});

        let outcome = quiesce(Some(server), poller, Duration::from_millis(50)).await;
        assert_eq!(outcome, ShutdownOutcome::TimedOut(Duration::from_millis(50)));
    }
}
