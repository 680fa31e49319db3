//! HTTP client for the mission kernel.
//!
//! Dispatchers and workers that do not own the kernel database speak the
//! same verb set over HTTP (`KERNEL_URL`). Lease staleness arrives as HTTP
//! 409 and missing missions as 404; everything else non-2xx is a backend
//! error.

use std::time::Duration;

use serde_json::Value;
use uuid::Uuid;

use roastd_core::mission::{Mission, MissionRequest};
use roastd_core::queue::{LeaseOutcome, MissionQueue, SubmitOutcome};
use roastd_core::trace::{Trace, TraceSink};
use roastd_core::{QueueError, SinkError};

/// Client for the kernel HTTP surface.
#[derive(Debug, Clone)]
pub struct KernelClient {
    base_url: String,
    http: reqwest::Client,
}

impl KernelClient {
    /// Build a client for `base_url` (no trailing slash required).
    pub fn new(base_url: impl Into<String>) -> Result<Self, QueueError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| QueueError::Backend {
                reason: format!("http client: {e}"),
            })?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            http,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn post_json(
        &self,
        path: &str,
        body: &Value,
    ) -> Result<reqwest::Response, QueueError> {
        self.http
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| QueueError::Backend {
                reason: format!("kernel request failed: {e}"),
            })
    }

    /// Map the shared lease-verb response shape.
    async fn lease_outcome(
        response: reqwest::Response,
        mission_id: Uuid,
    ) -> Result<LeaseOutcome, QueueError> {
        match response.status().as_u16() {
            200 => Ok(LeaseOutcome::Ok),
            409 => Ok(LeaseOutcome::Stale),
            404 => Err(QueueError::NotFound { mission_id }),
            status => Err(QueueError::Backend {
                reason: format!("kernel returned {status}"),
            }),
        }
    }
}

#[async_trait::async_trait]
impl MissionQueue for KernelClient {
    async fn submit(&self, request: MissionRequest) -> Result<SubmitOutcome, QueueError> {
        let body = serde_json::to_value(&request).map_err(|e| QueueError::InvalidRequest {
            reason: e.to_string(),
        })?;
        let response = self.post_json("/missions", &body).await?;

        match response.status().as_u16() {
            // 201 created, 409 deduped — both carry the outcome body.
            201 | 409 => response
                .json::<SubmitOutcome>()
                .await
                .map_err(|e| QueueError::Backend {
                    reason: format!("bad submit response: {e}"),
                }),
            400 => Err(QueueError::InvalidRequest {
                reason: response.text().await.unwrap_or_default(),
            }),
            status => Err(QueueError::Backend {
                reason: format!("kernel returned {status}"),
            }),
        }
    }

    async fn claim(
        &self,
        agent_name: &str,
        goals: &[String],
    ) -> Result<Option<Mission>, QueueError> {
        let body = serde_json::json!({ "agentName": agent_name, "goals": goals });
        let response = self.post_json("/missions/claim", &body).await?;

        match response.status().as_u16() {
            200 => response
                .json::<Mission>()
                .await
                .map(Some)
                .map_err(|e| QueueError::Backend {
                    reason: format!("bad claim response: {e}"),
                }),
            204 => Ok(None),
            status => Err(QueueError::Backend {
                reason: format!("kernel returned {status}"),
            }),
        }
    }

    async fn heartbeat(
        &self,
        mission_id: Uuid,
        lease_id: Uuid,
    ) -> Result<LeaseOutcome, QueueError> {
        let body = serde_json::json!({ "leaseId": lease_id });
        let response = self
            .post_json(&format!("/missions/{mission_id}/heartbeat"), &body)
            .await?;
        Self::lease_outcome(response, mission_id).await
    }

    async fn complete(
        &self,
        mission_id: Uuid,
        lease_id: Uuid,
        result_meta: Value,
    ) -> Result<LeaseOutcome, QueueError> {
        let body = serde_json::json!({ "leaseId": lease_id, "summary": result_meta });
        let response = self
            .post_json(&format!("/missions/{mission_id}/complete"), &body)
            .await?;
        Self::lease_outcome(response, mission_id).await
    }

    async fn fail(
        &self,
        mission_id: Uuid,
        lease_id: Uuid,
        error: &str,
        retryable: bool,
    ) -> Result<LeaseOutcome, QueueError> {
        let body = serde_json::json!({
            "leaseId": lease_id,
            "error": error,
            "retryable": retryable,
        });
        let response = self
            .post_json(&format!("/missions/{mission_id}/fail"), &body)
            .await?;
        Self::lease_outcome(response, mission_id).await
    }
}

#[async_trait::async_trait]
impl TraceSink for KernelClient {
    async fn record(&self, trace: &Trace) -> Result<(), SinkError> {
        let body = serde_json::to_value(trace).map_err(|e| SinkError::Backend {
            reason: e.to_string(),
        })?;
        let response = self
            .post_json("/traces", &body)
            .await
            .map_err(|e| SinkError::Backend {
                reason: e.to_string(),
            })?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(SinkError::Backend {
                reason: format!("kernel returned {}", response.status().as_u16()),
            })
        }
    }
}
