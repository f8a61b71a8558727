use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::probe::{ProbeError, StateProber};
use crate::scheduler::is_running_state;
use crate::store::JobId;

#[derive(Debug, Deserialize)]
struct JobStatusBody {
    state: Option<String>,
}

/// Asks another agent's `/job-status/{id}` endpoint, for jobs whose
/// scheduler lives on a different node.
#[derive(Debug, Clone)]
pub struct RemoteProber {
    client: reqwest::Client,
    base_url: String,
}

impl RemoteProber {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn status_url(&self, job_id: &JobId) -> String {
        format!("{}/job-status/{}", self.base_url, job_id)
    }

    async fn probe(&self, job_id: &JobId) -> Result<String, ProbeError> {
        let body: JobStatusBody = self
            .client
            .get(self.status_url(job_id))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        body.state
            .filter(|s| !s.trim().is_empty())
            .ok_or(ProbeError::MissingState)
    }
}

#[async_trait]
impl StateProber for RemoteProber {
    async fn is_running(&self, job_id: &JobId) -> bool {
        match self.probe(job_id).await {
            Ok(state) => {
                tracing::debug!(job_id = %job_id, state, "Probed remote job state");
                is_running_state(&state)
            }
            Err(e) => {
                tracing::debug!(job_id = %job_id, error = %e, "Remote probe failed, assuming not running");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::Path, http::StatusCode, routing::get, Json, Router};
    use serde_json::json;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn job(raw: &str) -> JobId {
        JobId::parse(raw).unwrap()
    }

    #[test]
    fn builds_status_url() {
        let prober = RemoteProber::new("http://10.0.0.5:5003/", Duration::from_secs(1)).unwrap();
        assert_eq!(
            prober.status_url(&job("42")),
            "http://10.0.0.5:5003/job-status/42"
        );
    }

    #[tokio::test]
    async fn reads_state_field() {
        let app = Router::new().route(
            "/job-status/:id",
            get(|Path(id): Path<String>| async move {
                let state = if id == "1" { "RUNNING" } else { "COMPLETED" };
                Json(json!({ "jobId": id, "state": state }))
            }),
        );
        let base = serve(app).await;
        let prober = RemoteProber::new(base, Duration::from_secs(2)).unwrap();

        assert!(prober.is_running(&job("1")).await);
        assert!(!prober.is_running(&job("2")).await);
    }

    #[tokio::test]
    async fn missing_field_fails_closed() {
        let app = Router::new().route(
            "/job-status/:id",
            get(|| async { Json(json!({ "jobId": "1" })) }),
        );
        let base = serve(app).await;
        let prober = RemoteProber::new(base, Duration::from_secs(2)).unwrap();
        assert!(!prober.is_running(&job("1")).await);
    }

    #[tokio::test]
    async fn error_status_fails_closed() {
        let app = Router::new().route(
            "/job-status/:id",
            get(|| async {
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "state": "RUNNING" })),
                )
            }),
        );
        let base = serve(app).await;
        let prober = RemoteProber::new(base, Duration::from_secs(2)).unwrap();
        assert!(!prober.is_running(&job("1")).await);
    }

    #[tokio::test]
    async fn slow_endpoint_fails_closed() {
        let app = Router::new().route(
            "/job-status/:id",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Json(json!({ "state": "RUNNING" }))
            }),
        );
        let base = serve(app).await;
        let prober = RemoteProber::new(base, Duration::from_millis(100)).unwrap();
        let start = std::time::Instant::now();
        assert!(!prober.is_running(&job("1")).await);
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn unreachable_endpoint_fails_closed() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let prober =
            RemoteProber::new(format!("http://{}", addr), Duration::from_millis(200)).unwrap();
        assert!(!prober.is_running(&job("1")).await);
    }
}
