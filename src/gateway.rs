use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use std::fmt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::candidate::IceCandidate;

// ---------------------------------------------------------------------------
// Remote resource handles
// ---------------------------------------------------------------------------

/// Opaque id of a remote processing-graph container, scoped to one
/// (room, track type). Owned exclusively by the presenter's track session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PipelineHandle(String);

/// Opaque id of a remote media termination point (publishing or
/// subscribing), bound to one pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EndpointHandle(String);

macro_rules! handle_impls {
    ($name:ident) => {
        impl $name {
            pub fn id(&self) -> &str {
                &self.0
            }
        }
        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }
        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

handle_impls!(PipelineHandle);
handle_impls!(EndpointHandle);

// ---------------------------------------------------------------------------
// GatewayError
// ---------------------------------------------------------------------------

/// A remote negotiation call failed. Failures are always surfaced as typed
/// errors — never as silent no-ops.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The media engine itself could not be reached.
    #[error("media engine unreachable: {0}")]
    Unavailable(String),

    /// The engine refused the operation (e.g. a malformed offer).
    #[error("media engine rejected the operation: {0}")]
    Rejected(String),

    /// The engine failed while executing the operation.
    #[error("media engine error: {0}")]
    Remote(String),
}

/// Channel on which the gateway delivers locally discovered candidates for
/// one endpoint. Registered at endpoint creation; dropping the receiver (or
/// releasing the endpoint) stops delivery deterministically.
pub type CandidateTx = mpsc::UnboundedSender<IceCandidate>;

// ---------------------------------------------------------------------------
// MediaGateway trait
// ---------------------------------------------------------------------------

/// Control-plane contract of the external media-processing engine.
///
/// Every operation is asynchronous, individually fallible, and may take
/// arbitrary time. Release operations are idempotent.
#[async_trait]
pub trait MediaGateway: Send + Sync {
    async fn create_pipeline(&self) -> Result<PipelineHandle, GatewayError>;

    /// Create an endpoint inside `pipeline`. `candidates` is the delivery
    /// channel for local candidates discovered after `gather_candidates`.
    async fn create_endpoint(
        &self,
        pipeline: &PipelineHandle,
        candidates: CandidateTx,
    ) -> Result<EndpointHandle, GatewayError>;

    /// Submit an SDP offer; returns the engine's SDP answer.
    async fn process_offer(
        &self,
        endpoint: &EndpointHandle,
        offer: &str,
    ) -> Result<String, GatewayError>;

    async fn add_candidate(
        &self,
        endpoint: &EndpointHandle,
        candidate: &IceCandidate,
    ) -> Result<(), GatewayError>;

    /// Begin asynchronous local-candidate discovery for `endpoint`.
    async fn gather_candidates(&self, endpoint: &EndpointHandle) -> Result<(), GatewayError>;

    /// Connect `sink` as a consumer of `source`'s media.
    async fn connect(
        &self,
        source: &EndpointHandle,
        sink: &EndpointHandle,
    ) -> Result<(), GatewayError>;

    async fn release_endpoint(&self, endpoint: &EndpointHandle) -> Result<(), GatewayError>;

    async fn release_pipeline(&self, pipeline: &PipelineHandle) -> Result<(), GatewayError>;
}

// ---------------------------------------------------------------------------
// HttpMediaGateway — reqwest client for the engine's control API
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct CreatedResource {
    id: String,
}

#[derive(Deserialize)]
struct OfferAnswer {
    #[serde(rename = "sdpAnswer")]
    sdp_answer: String,
}

/// JSON/HTTP client for the media engine.
///
/// Discovered local candidates flow back asynchronously: the engine POSTs
/// them to our `/hooks/candidates` callback, and [`deliver_candidate`]
/// routes each one into the channel registered at endpoint creation.
///
/// No request timeout is configured on purpose — a stalled negotiation holds
/// its resources until the owning connection disconnects.
///
/// [`deliver_candidate`]: HttpMediaGateway::deliver_candidate
pub struct HttpMediaGateway {
    base_url: String,
    callback_url: String,
    client: reqwest::Client,
    listeners: DashMap<String, CandidateTx>,
}

impl HttpMediaGateway {
    pub fn new(base_url: impl Into<String>, callback_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            base_url,
            callback_url: callback_url.into(),
            client: reqwest::Client::new(),
            listeners: DashMap::new(),
        }
    }

    /// Route one engine-discovered candidate to the endpoint's channel.
    /// Unknown endpoint ids are dropped silently (the endpoint was already
    /// released; late candidates after teardown are not an error).
    pub fn deliver_candidate(&self, endpoint_id: &str, candidate: IceCandidate) {
        match self.listeners.get(endpoint_id) {
            Some(tx) => {
                let _ = tx.send(candidate);
            }
            None => {
                debug!(endpoint_id, "dropping candidate for unknown endpoint");
            }
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<T, GatewayError> {
        let response = self
            .client
            .post(self.url(path))
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;
        let status = response.status();
        if status.is_success() {
            response
                .json::<T>()
                .await
                .map_err(|e| GatewayError::Remote(format!("malformed engine response: {e}")))
        } else {
            let detail = response.text().await.unwrap_or_default();
            Err(Self::status_error(status, detail))
        }
    }

    async fn post_empty(&self, path: &str, body: serde_json::Value) -> Result<(), GatewayError> {
        let response = self
            .client
            .post(self.url(path))
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let detail = response.text().await.unwrap_or_default();
            Err(Self::status_error(status, detail))
        }
    }

    async fn delete(&self, path: &str) -> Result<(), GatewayError> {
        let response = self
            .client
            .delete(self.url(path))
            .send()
            .await
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;
        let status = response.status();
        // 404 on delete means the resource is already gone — releases are
        // idempotent by contract.
        if status.is_success() || status == reqwest::StatusCode::NOT_FOUND {
            Ok(())
        } else {
            let detail = response.text().await.unwrap_or_default();
            Err(Self::status_error(status, detail))
        }
    }

    fn status_error(status: reqwest::StatusCode, detail: String) -> GatewayError {
        if status.is_client_error() {
            GatewayError::Rejected(format!("{status}: {detail}"))
        } else {
            GatewayError::Remote(format!("{status}: {detail}"))
        }
    }
}

#[async_trait]
impl MediaGateway for HttpMediaGateway {
    async fn create_pipeline(&self) -> Result<PipelineHandle, GatewayError> {
        let created: CreatedResource = self.post_json("/pipelines", serde_json::json!({})).await?;
        debug!(pipeline_id = %created.id, "pipeline created");
        Ok(PipelineHandle::from(created.id))
    }

    async fn create_endpoint(
        &self,
        pipeline: &PipelineHandle,
        candidates: CandidateTx,
    ) -> Result<EndpointHandle, GatewayError> {
        let created: CreatedResource = self
            .post_json(
                &format!("/pipelines/{}/endpoints", pipeline.id()),
                serde_json::json!({ "callbackUrl": self.callback_url }),
            )
            .await?;
        self.listeners.insert(created.id.clone(), candidates);
        debug!(endpoint_id = %created.id, pipeline_id = %pipeline.id(), "endpoint created");
        Ok(EndpointHandle::from(created.id))
    }

    async fn process_offer(
        &self,
        endpoint: &EndpointHandle,
        offer: &str,
    ) -> Result<String, GatewayError> {
        let answer: OfferAnswer = self
            .post_json(
                &format!("/endpoints/{}/offer", endpoint.id()),
                serde_json::json!({ "sdpOffer": offer }),
            )
            .await?;
        Ok(answer.sdp_answer)
    }

    async fn add_candidate(
        &self,
        endpoint: &EndpointHandle,
        candidate: &IceCandidate,
    ) -> Result<(), GatewayError> {
        self.post_empty(
            &format!("/endpoints/{}/candidates", endpoint.id()),
            serde_json::to_value(candidate)
                .map_err(|e| GatewayError::Rejected(e.to_string()))?,
        )
        .await
    }

    async fn gather_candidates(&self, endpoint: &EndpointHandle) -> Result<(), GatewayError> {
        self.post_empty(
            &format!("/endpoints/{}/gather", endpoint.id()),
            serde_json::json!({}),
        )
        .await
    }

    async fn connect(
        &self,
        source: &EndpointHandle,
        sink: &EndpointHandle,
    ) -> Result<(), GatewayError> {
        self.post_empty(
            &format!("/endpoints/{}/connect", source.id()),
            serde_json::json!({ "sink": sink.id() }),
        )
        .await
    }

    async fn release_endpoint(&self, endpoint: &EndpointHandle) -> Result<(), GatewayError> {
        self.listeners.remove(endpoint.id());
        let result = self.delete(&format!("/endpoints/{}", endpoint.id())).await;
        if let Err(ref e) = result {
            warn!(endpoint_id = %endpoint.id(), error = %e, "endpoint release failed");
        }
        result
    }

    async fn release_pipeline(&self, pipeline: &PipelineHandle) -> Result<(), GatewayError> {
        let result = self.delete(&format!("/pipelines/{}", pipeline.id())).await;
        if let Err(ref e) = result {
            warn!(pipeline_id = %pipeline.id(), error = %e, "pipeline release failed");
        }
        result
    }
}

// ---------------------------------------------------------------------------
// MockGateway — call-recording test double
// ---------------------------------------------------------------------------


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
