// src/session.rs
//
// Per-track negotiation state machine.
//
// A `TrackSession` governs one remote endpoint (the presenter's publishing
// endpoint, or one viewer's subscribing endpoint) for one track type. All
// state transitions go through a short sync mutex that is never held across
// an await; the multi-step gateway calls happen between transitions, and
// every transition re-checks whether teardown won the race.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::candidate::{CandidateQueue, CandidateRoute, IceCandidate};
use crate::error::SessionError;
use crate::gateway::{CandidateTx, EndpointHandle, MediaGateway, PipelineHandle};
use crate::protocol::{OutboundTx, ServerMessage};

// ---------------------------------------------------------------------------
// TrackType
// ---------------------------------------------------------------------------

/// One of the two independent feeds a presenter may publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackType {
    Screen,
    Webcam,
}

impl TrackType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Screen => "screen",
            Self::Webcam => "webcam",
        }
    }

    pub const ALL: [TrackType; 2] = [TrackType::Screen, TrackType::Webcam];
}

impl std::fmt::Display for TrackType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// TrackState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    Idle,
    PipelineCreating,
    EndpointCreating,
    Negotiating,
    ConnectingToPresenter,
    Active,
    Failed,
    Released,
}

// ---------------------------------------------------------------------------
// TrackSession
// ---------------------------------------------------------------------------

struct SessionInner {
    state: TrackState,
    pipeline: Option<PipelineHandle>,
    endpoint: Option<EndpointHandle>,
}

pub struct TrackSession {
    room_id: String,
    participant_id: String,
    track: TrackType,
    inner: Mutex<SessionInner>,
    queue: CandidateQueue,
    cancel: CancellationToken,
}

impl TrackSession {
    pub fn new(room_id: &str, participant_id: &str, track: TrackType) -> Arc<Self> {
        Arc::new(Self {
            room_id: room_id.to_string(),
            participant_id: participant_id.to_string(),
            track,
            inner: Mutex::new(SessionInner {
                state: TrackState::Idle,
                pipeline: None,
                endpoint: None,
            }),
            queue: CandidateQueue::new(),
            cancel: CancellationToken::new(),
        })
    }

    pub fn state(&self) -> TrackState {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).state
    }

    pub fn is_released(&self) -> bool {
        self.state() == TrackState::Released
    }

    /// Pipeline and endpoint of an active publishing session. `None` unless
    /// the session is fully Active, so a viewer can never attach to a
    /// half-negotiated or torn-down presenter track.
    pub fn publish_target(&self) -> Option<(PipelineHandle, EndpointHandle)> {
        let inner = self.lock();
        if inner.state != TrackState::Active {
            return None;
        }
        Some((inner.pipeline.clone()?, inner.endpoint.clone()?))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ── Transitions ─────────────────────────────────────────────────────

    /// Claim the session for a new negotiation attempt. Exactly one caller
    /// can move it out of Idle; everyone else is rejected locally with no
    /// remote call having been made.
    fn begin(&self, first: TrackState) -> Result<(), SessionError> {
        let mut inner = self.lock();
        if inner.state != TrackState::Idle {
            return Err(SessionError::TrackAlreadyExists);
        }
        inner.state = first;
        Ok(())
    }

    /// Store a freshly created pipeline. Returns false when teardown already
    /// ran, in which case the caller still owns the handle and must release
    /// it itself.
    fn record_pipeline(&self, pipeline: PipelineHandle) -> bool {
        let mut inner = self.lock();
        if inner.state == TrackState::Released {
            return false;
        }
        inner.pipeline = Some(pipeline);
        inner.state = TrackState::EndpointCreating;
        true
    }

    /// Same contract as `record_pipeline`, for the endpoint.
    fn record_endpoint(&self, endpoint: EndpointHandle) -> bool {
        let mut inner = self.lock();
        if inner.state == TrackState::Released {
            return false;
        }
        inner.endpoint = Some(endpoint);
        inner.state = TrackState::Negotiating;
        true
    }

    /// Move to an intermediate negotiation state unless torn down.
    fn advance(&self, state: TrackState) -> bool {
        let mut inner = self.lock();
        if inner.state == TrackState::Released {
            return false;
        }
        inner.state = state;
        true
    }

    /// Final transition to Active. Returns false when teardown won the race;
    /// the recorded handles were already released by `stop`.
    fn complete(&self) -> bool {
        self.advance(TrackState::Active)
    }

    // ── Candidate handling ──────────────────────────────────────────────

    /// Forward a browser candidate, queueing while the endpoint does not
    /// exist yet. Never waits on an in-flight negotiation.
    pub async fn receive_candidate(
        &self,
        gateway: &dyn MediaGateway,
        candidate: IceCandidate,
    ) -> Result<(), SessionError> {
        match self.queue.push(candidate) {
            CandidateRoute::Forward(endpoint, candidate) => {
                gateway.add_candidate(&endpoint, &candidate).await?;
                Ok(())
            }
            CandidateRoute::Queued | CandidateRoute::Discarded => Ok(()),
        }
    }

    /// Spawn the forwarding task that bridges engine-discovered candidates
    /// to the participant's socket, and hand back the channel the gateway
    /// will feed. Cancelled by `stop`.
    fn candidate_channel(&self, outbound: OutboundTx) -> CandidateTx {
        let (tx, mut rx) = mpsc::unbounded_channel::<IceCandidate>();
        let cancel = self.cancel.clone();
        let track = self.track;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    next = rx.recv() => match next {
                        Some(candidate) => {
                            let _ = outbound.send(ServerMessage::IceCandidate { track, candidate });
                        }
                        None => break,
                    },
                }
            }
        });
        tx
    }

    // ── Presenter flow ──────────────────────────────────────────────────

    /// Full publishing negotiation: pipeline, endpoint, queued-candidate
    /// flush, offer/answer, then asynchronous candidate gathering. Any
    /// mid-flight failure releases what this attempt created, in reverse
    /// creation order, and surfaces the error.
    pub async fn start_presenter(
        &self,
        gateway: &Arc<dyn MediaGateway>,
        offer: &str,
        outbound: &OutboundTx,
    ) -> Result<String, SessionError> {
        self.begin(TrackState::PipelineCreating)?;
        debug!(room_id = %self.room_id, track = %self.track, "publish negotiation started");

        let pipeline = match gateway.create_pipeline().await {
            Ok(p) => p,
            Err(e) => {
                self.fail_and_release(gateway.as_ref()).await;
                return Err(e.into());
            }
        };
        if !self.record_pipeline(pipeline.clone()) {
            // Torn down before the pipeline was recorded; it is ours to free.
            release_quietly(gateway.as_ref(), None, Some(&pipeline)).await;
            return Err(SessionError::SessionClosed);
        }

        let endpoint = self
            .create_and_record_endpoint(gateway, &pipeline, outbound)
            .await?;

        if let Err(e) = self.queue.drain_into(gateway.as_ref(), &endpoint).await {
            self.fail_and_release(gateway.as_ref()).await;
            return Err(e.into());
        }

        let answer = match gateway.process_offer(&endpoint, offer).await {
            Ok(a) => a,
            Err(e) => {
                self.fail_and_release(gateway.as_ref()).await;
                return Err(e.into());
            }
        };

        if !self.complete() {
            return Err(SessionError::SessionClosed);
        }
        info!(room_id = %self.room_id, track = %self.track, endpoint_id = %endpoint, "presenter track active");

        self.spawn_gathering(gateway, endpoint);
        Ok(answer)
    }

    // ── Viewer flow ─────────────────────────────────────────────────────

    /// Subscribing negotiation inside the presenter's pipeline. Requires the
    /// presenter session to be Active going in; because the presenter can be
    /// torn down at any point during the multi-step exchange, its state is
    /// re-checked after the final transition and a session that went Active
    /// against a vanished presenter releases itself instead of lingering.
    pub async fn start_viewer(
        &self,
        gateway: &Arc<dyn MediaGateway>,
        presenter: &TrackSession,
        offer: &str,
        outbound: &OutboundTx,
    ) -> Result<String, SessionError> {
        let (presenter_pipeline, presenter_endpoint) = presenter
            .publish_target()
            .ok_or(SessionError::NoPresenterTrack)?;
        self.begin(TrackState::EndpointCreating)?;
        debug!(
            room_id = %self.room_id,
            peer_id = %self.participant_id,
            track = %self.track,
            "subscribe negotiation started"
        );

        let endpoint = self
            .create_and_record_endpoint(gateway, &presenter_pipeline, outbound)
            .await?;

        if let Err(e) = self.queue.drain_into(gateway.as_ref(), &endpoint).await {
            self.fail_and_release(gateway.as_ref()).await;
            return Err(e.into());
        }

        let answer = match gateway.process_offer(&endpoint, offer).await {
            Ok(a) => a,
            Err(e) => {
                self.fail_and_release(gateway.as_ref()).await;
                return Err(e.into());
            }
        };

        if !self.advance(TrackState::ConnectingToPresenter) {
            return Err(SessionError::SessionClosed);
        }
        if let Err(e) = gateway.connect(&presenter_endpoint, &endpoint).await {
            self.fail_and_release(gateway.as_ref()).await;
            return Err(e.into());
        }

        if !self.complete() {
            return Err(SessionError::SessionClosed);
        }
        // The presenter may have been torn down between the target read and
        // now; a viewer must not stay Active against a released track.
        if presenter.publish_target().is_none() {
            self.fail_and_release(gateway.as_ref()).await;
            return Err(SessionError::NoPresenterTrack);
        }
        info!(
            room_id = %self.room_id,
            peer_id = %self.participant_id,
            track = %self.track,
            endpoint_id = %endpoint,
            "viewer track active"
        );

        self.spawn_gathering(gateway, endpoint);
        Ok(answer)
    }

    async fn create_and_record_endpoint(
        &self,
        gateway: &Arc<dyn MediaGateway>,
        pipeline: &PipelineHandle,
        outbound: &OutboundTx,
    ) -> Result<EndpointHandle, SessionError> {
        let candidate_tx = self.candidate_channel(outbound.clone());
        let endpoint = match gateway.create_endpoint(pipeline, candidate_tx).await {
            Ok(e) => e,
            Err(e) => {
                self.fail_and_release(gateway.as_ref()).await;
                return Err(e.into());
            }
        };
        if !self.record_endpoint(endpoint.clone()) {
            // Teardown already released the recorded handles; only the
            // endpoint created just now is still ours.
            release_quietly(gateway.as_ref(), Some(&endpoint), None).await;
            return Err(SessionError::SessionClosed);
        }
        Ok(endpoint)
    }

    /// Candidate gathering is fire-and-forget; its candidates arrive later
    /// through the channel registered at endpoint creation.
    fn spawn_gathering(&self, gateway: &Arc<dyn MediaGateway>, endpoint: EndpointHandle) {
        let gateway = gateway.clone();
        let track = self.track;
        tokio::spawn(async move {
            if let Err(e) = gateway.gather_candidates(&endpoint).await {
                warn!(endpoint_id = %endpoint, %track, error = %e, "candidate gathering failed");
            }
        });
    }

    // ── Teardown ────────────────────────────────────────────────────────

    /// Release everything this session owns. Handles are taken out under the
    /// lock, so each one is released exactly once even when `stop` races the
    /// negotiation path or a second `stop`. Release failures are logged and
    /// never abort the rest of the teardown.
    pub async fn stop(&self, gateway: &dyn MediaGateway) {
        self.cancel.cancel();
        self.queue.discard();

        let (endpoint, pipeline) = {
            let mut inner = self.lock();
            inner.state = TrackState::Released;
            (inner.endpoint.take(), inner.pipeline.take())
        };
        release_quietly(gateway, endpoint.as_ref(), pipeline.as_ref()).await;
    }

    async fn fail_and_release(&self, gateway: &dyn MediaGateway) {
        {
            let mut inner = self.lock();
            if inner.state != TrackState::Released {
                inner.state = TrackState::Failed;
            }
        }
        self.stop(gateway).await;
    }
}

/// Best-effort release, endpoint before pipeline.
async fn release_quietly(
    gateway: &dyn MediaGateway,
    endpoint: Option<&EndpointHandle>,
    pipeline: Option<&PipelineHandle>,
) {
    if let Some(endpoint) = endpoint {
        if let Err(e) = gateway.release_endpoint(endpoint).await {
            warn!(endpoint_id = %endpoint, error = %e, "endpoint release failed");
        }
    }
    if let Some(pipeline) = pipeline {
        if let Err(e) = gateway.release_pipeline(pipeline).await {
            warn!(pipeline_id = %pipeline, error = %e, "pipeline release failed");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::mock::MockGateway;

    fn outbound() -> (OutboundTx, mpsc::UnboundedReceiver<ServerMessage>) {
        mpsc::unbounded_channel()
    }

    fn dyn_gateway(mock: &Arc<MockGateway>) -> Arc<dyn MediaGateway> {
        mock.clone()
    }

    async fn wait_for_call(mock: &Arc<MockGateway>, prefix: &str) {
        for _ in 0..200 {
            if mock.count(prefix) > 0 {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("gateway never received a '{prefix}' call");
    }

    #[tokio::test]
    async fn presenter_happy_path_reaches_active() {
        let mock = MockGateway::new();
        let gateway = dyn_gateway(&mock);
        let (tx, _rx) = outbound();
        let session = TrackSession::new("room-1", "room-1", TrackType::Webcam);

        let answer = session.start_presenter(&gateway, "O1", &tx).await.unwrap();
        assert_eq!(answer, "answer:O1");
        assert_eq!(session.state(), TrackState::Active);
        assert!(session.publish_target().is_some());

        let calls = mock.calls();
        assert_eq!(calls[0], "create_pipeline");
        assert_eq!(calls[1], "create_endpoint p-1");
        assert_eq!(calls[2], "process_offer e-2 O1");
    }

    #[tokio::test]
    async fn concurrent_publish_yields_one_active_and_one_rejection() {
        let mock = MockGateway::new();
        let gateway = dyn_gateway(&mock);
        let (tx, _rx) = outbound();
        let session = TrackSession::new("room-1", "room-1", TrackType::Screen);

        let gate = mock.gate("create_pipeline");
        let first = {
            let session = session.clone();
            let gateway = gateway.clone();
            let tx = tx.clone();
            tokio::spawn(async move { session.start_presenter(&gateway, "O1", &tx).await })
        };
        wait_for_call(&mock, "create_pipeline").await;

        // Second attempt while the first is mid-flight: rejected locally.
        let second = session.start_presenter(&gateway, "O2", &tx).await;
        assert!(matches!(second, Err(SessionError::TrackAlreadyExists)));
        assert_eq!(mock.count("create_pipeline"), 1);

        gate.add_permits(1);
        let answer = first.await.unwrap().unwrap();
        assert_eq!(answer, "answer:O1");
        assert_eq!(session.state(), TrackState::Active);
    }

    #[tokio::test]
    async fn endpoint_failure_releases_pipeline_and_propagates() {
        let mock = MockGateway::new();
        let gateway = dyn_gateway(&mock);
        let (tx, _rx) = outbound();
        let session = TrackSession::new("room-1", "room-1", TrackType::Webcam);

        mock.fail_next("create_endpoint");
        let err = session.start_presenter(&gateway, "O1", &tx).await.unwrap_err();
        assert!(matches!(err, SessionError::NegotiationFailed(_)));
        assert_eq!(session.state(), TrackState::Released);

        assert_eq!(mock.count("release_pipeline"), 1);
        assert_eq!(mock.count("release_endpoint"), 0);
        assert!(session.publish_target().is_none());
    }

    #[tokio::test]
    async fn offer_rejection_releases_endpoint_then_pipeline() {
        let mock = MockGateway::new();
        let gateway = dyn_gateway(&mock);
        let (tx, _rx) = outbound();
        let session = TrackSession::new("room-1", "room-1", TrackType::Webcam);

        mock.fail_next("process_offer");
        let err = session.start_presenter(&gateway, "bad offer", &tx).await.unwrap_err();
        assert!(matches!(err, SessionError::NegotiationFailed(_)));

        let calls = mock.calls();
        let releases: Vec<&String> =
            calls.iter().filter(|c| c.starts_with("release_")).collect();
        assert_eq!(releases.len(), 2);
        assert!(releases[0].starts_with("release_endpoint"));
        assert!(releases[1].starts_with("release_pipeline"));
    }

    #[tokio::test]
    async fn stop_during_negotiation_releases_exactly_once() {
        let mock = MockGateway::new();
        let gateway = dyn_gateway(&mock);
        let (tx, _rx) = outbound();
        let session = TrackSession::new("room-1", "room-1", TrackType::Webcam);

        let gate = mock.gate("process_offer");
        let negotiation = {
            let session = session.clone();
            let gateway = gateway.clone();
            let tx = tx.clone();
            tokio::spawn(async move { session.start_presenter(&gateway, "O1", &tx).await })
        };
        wait_for_call(&mock, "process_offer").await;

        session.stop(gateway.as_ref()).await;
        gate.add_permits(1);

        let result = negotiation.await.unwrap();
        assert!(matches!(result, Err(SessionError::SessionClosed)));
        assert_eq!(mock.count("release_endpoint"), 1);
        assert_eq!(mock.count("release_pipeline"), 1);
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let mock = MockGateway::new();
        let gateway = dyn_gateway(&mock);
        let (tx, _rx) = outbound();
        let session = TrackSession::new("room-1", "room-1", TrackType::Screen);

        session.start_presenter(&gateway, "O1", &tx).await.unwrap();
        session.stop(gateway.as_ref()).await;
        session.stop(gateway.as_ref()).await;

        assert_eq!(mock.count("release_endpoint"), 1);
        assert_eq!(mock.count("release_pipeline"), 1);
    }

    #[tokio::test]
    async fn early_candidates_flush_in_order_before_the_offer() {
        let mock = MockGateway::new();
        let gateway = dyn_gateway(&mock);
        let (tx, _rx) = outbound();
        let session = TrackSession::new("room-1", "room-1", TrackType::Webcam);

        for n in 1..=3 {
            session
                .receive_candidate(gateway.as_ref(), IceCandidate::new(format!("candidate:{n}")))
                .await
                .unwrap();
        }
        session.start_presenter(&gateway, "O1", &tx).await.unwrap();

        let calls = mock.calls();
        let offer_at = calls.iter().position(|c| c.starts_with("process_offer")).unwrap();
        let adds: Vec<&String> =
            calls.iter().filter(|c| c.starts_with("add_candidate")).collect();
        assert_eq!(adds.len(), 3);
        for (n, call) in adds.iter().enumerate() {
            assert!(call.ends_with(&format!("candidate:{}", n + 1)));
            assert!(calls.iter().position(|c| c == *call).unwrap() < offer_at);
        }
    }

    #[tokio::test]
    async fn candidate_after_active_goes_straight_to_gateway() {
        let mock = MockGateway::new();
        let gateway = dyn_gateway(&mock);
        let (tx, _rx) = outbound();
        let session = TrackSession::new("room-1", "room-1", TrackType::Webcam);

        session.start_presenter(&gateway, "O1", &tx).await.unwrap();
        session
            .receive_candidate(gateway.as_ref(), IceCandidate::new("candidate:late"))
            .await
            .unwrap();
        assert_eq!(mock.count("add_candidate"), 1);
    }

    #[tokio::test]
    async fn candidate_after_stop_is_discarded_silently() {
        let mock = MockGateway::new();
        let gateway = dyn_gateway(&mock);
        let (tx, _rx) = outbound();
        let session = TrackSession::new("room-1", "room-1", TrackType::Webcam);

        session.start_presenter(&gateway, "O1", &tx).await.unwrap();
        session.stop(gateway.as_ref()).await;

        session
            .receive_candidate(gateway.as_ref(), IceCandidate::new("candidate:ghost"))
            .await
            .unwrap();
        assert_eq!(mock.count("add_candidate"), 0);
    }

    #[tokio::test]
    async fn discovered_candidates_reach_the_outbound_channel() {
        let mock = MockGateway::new();
        let gateway = dyn_gateway(&mock);
        let (tx, mut rx) = outbound();
        let session = TrackSession::new("room-1", "room-1", TrackType::Screen);

        session.start_presenter(&gateway, "O1", &tx).await.unwrap();
        let (_, endpoint) = session.publish_target().unwrap();

        let listener = mock.listeners.get(endpoint.id()).unwrap().clone();
        listener.send(IceCandidate::new("candidate:found")).unwrap();

        loop {
            match rx.recv().await.unwrap() {
                ServerMessage::IceCandidate { track, candidate } => {
                    assert_eq!(track, TrackType::Screen);
                    assert_eq!(candidate.candidate, "candidate:found");
                    break;
                }
                _ => continue,
            }
        }
    }

    #[tokio::test]
    async fn viewer_happy_path_connects_to_presenter() {
        let mock = MockGateway::new();
        let gateway = dyn_gateway(&mock);
        let (presenter_tx, _p_rx) = outbound();
        let (viewer_tx, _v_rx) = outbound();

        let presenter = TrackSession::new("room-1", "room-1", TrackType::Webcam);
        presenter.start_presenter(&gateway, "O1", &presenter_tx).await.unwrap();
        let (pipeline, presenter_endpoint) = presenter.publish_target().unwrap();

        let viewer = TrackSession::new("room-1", "viewer-1", TrackType::Webcam);
        let answer = viewer
            .start_viewer(&gateway, &presenter, "O2", &viewer_tx)
            .await
            .unwrap();
        assert_eq!(answer, "answer:O2");
        assert_eq!(viewer.state(), TrackState::Active);

        // The viewer endpoint was created inside the presenter's pipeline and
        // connected as its sink.
        assert_eq!(mock.count(&format!("create_endpoint {pipeline}")), 2);
        assert_eq!(mock.count(&format!("connect {presenter_endpoint}")), 1);
    }

    #[tokio::test]
    async fn viewer_connect_failure_releases_only_its_own_endpoint() {
        let mock = MockGateway::new();
        let gateway = dyn_gateway(&mock);
        let (tx, _rx) = outbound();

        let presenter = TrackSession::new("room-1", "room-1", TrackType::Webcam);
        presenter.start_presenter(&gateway, "O1", &tx).await.unwrap();

        mock.fail_next("connect");
        let viewer = TrackSession::new("room-1", "viewer-1", TrackType::Webcam);
        let err = viewer
            .start_viewer(&gateway, &presenter, "O2", &tx)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::NegotiationFailed(_)));

        // The shared pipeline stays up for the presenter.
        assert_eq!(mock.count("release_endpoint"), 1);
        assert_eq!(mock.count("release_pipeline"), 0);
        assert_eq!(presenter.state(), TrackState::Active);
    }

    #[tokio::test]
    async fn viewer_releases_itself_when_presenter_leaves_mid_negotiation() {
        let mock = MockGateway::new();
        let gateway = dyn_gateway(&mock);
        let (tx, _rx) = outbound();

        let presenter = TrackSession::new("room-1", "room-1", TrackType::Webcam);
        presenter.start_presenter(&gateway, "O1", &tx).await.unwrap();

        let gate = mock.gate("connect");
        let viewer = TrackSession::new("room-1", "viewer-1", TrackType::Webcam);
        let negotiation = tokio::spawn({
            let gateway = gateway.clone();
            let presenter = presenter.clone();
            let viewer = viewer.clone();
            let tx = tx.clone();
            async move { viewer.start_viewer(&gateway, &presenter, "O2", &tx).await }
        });
        wait_for_call(&mock, "connect").await;

        // The presenter tears down while the viewer's connect is in flight.
        presenter.stop(gateway.as_ref()).await;
        gate.add_permits(1);

        let err = negotiation.await.unwrap().unwrap_err();
        assert!(matches!(err, SessionError::NoPresenterTrack));
        assert_eq!(viewer.state(), TrackState::Released);

        // Presenter teardown took its endpoint and pipeline; the viewer's
        // endpoint went with its own release, nothing is left behind.
        assert_eq!(mock.count("release_endpoint"), 2);
        assert_eq!(mock.count("release_pipeline"), 1);
    }
}
