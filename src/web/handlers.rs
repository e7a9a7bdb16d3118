//! HTTP request handlers.

use super::AppState;
use crate::store::LatestResult;

use axum::{extract::State, Json};

/// Liveness message.
pub async fn handle_index() -> Json<&'static str> {
    Json("Internet SpeedTest")
}

/// Return the latest published result without measuring.
pub async fn handle_get_latest_result(State(state): State<AppState>) -> Json<LatestResult> {
    tracing::debug!("Retrieving last speedtest results");
    Json(state.scheduler.latest())
}

/// Measure now and return the fresh result, or the previous one if the
/// measurement cannot complete in time.
pub async fn handle_test_speed_now(State(state): State<AppState>) -> Json<LatestResult> {
    Json(state.scheduler.trigger_now().await)
}

#[cfg(test)]
mod tests {
    use super::super::Server;
    use crate::scheduler::tests::{targets, test_config, FakeProbe};
    use crate::scheduler::Scheduler;
    use crate::store::{LatestResult, LatestResultStore};
    use std::sync::Arc;
    use std::time::Duration;

    async fn spawn_server(probe: FakeProbe) -> (String, Arc<LatestResultStore>) {
        let latest = Arc::new(LatestResultStore::new());
        let scheduler = Arc::new(Scheduler::new(
            &test_config(),
            targets(1),
            Arc::new(probe),
            latest.clone(),
            None,
        ));
        let server = Server::new(scheduler);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            server.serve(listener, std::future::pending()).await.unwrap();
        });

        (format!("http://{}", addr), latest)
    }

    #[tokio::test]
    async fn test_index() {
        let (base, _) = spawn_server(FakeProbe::new(1.0, 1.0, Duration::ZERO)).await;
        let body: String = reqwest::get(format!("{}/", base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body, "Internet SpeedTest");
    }

    #[tokio::test]
    async fn test_get_latest_result_does_not_measure() {
        let (base, latest) = spawn_server(FakeProbe::new(1.0, 1.0, Duration::ZERO)).await;
        let published = LatestResult {
            down_speed: 42.0,
            down_speed_str: "Download: 42.00 Mbit/s".to_string(),
            ..Default::default()
        };
        latest.publish(published.clone());

        let result: LatestResult = reqwest::get(format!("{}/getLatestResult", base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(result, published);
    }

    #[tokio::test]
    async fn test_speed_now_measures_and_publishes() {
        let (base, latest) = spawn_server(FakeProbe::new(88.0, 22.0, Duration::ZERO)).await;

        let response = reqwest::get(format!("{}/testSpeedNow", base)).await.unwrap();
        assert!(response.status().is_success());
        let result: LatestResult = response.json().await.unwrap();

        assert_eq!(result.down_speed, 88.0);
        assert_eq!(result.up_speed_str, "Upload: 22.00 Mbit/s");
        let stored = latest.read();
        assert_eq!(stored.last_query, result.last_query);
        assert_eq!(stored.down_speed_str, result.down_speed_str);
    }
}
