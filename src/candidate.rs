use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::gateway::{EndpointHandle, GatewayError, MediaGateway};

// ---------------------------------------------------------------------------
// IceCandidate — the browser RTCIceCandidate dictionary shape
// ---------------------------------------------------------------------------

/// A connectivity-establishment hint exchanged during negotiation.
///
/// Candidates may arrive before the remote endpoint they belong to exists,
/// which is why [`CandidateQueue`] buffers them instead of dropping them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u32>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_m_line_index: None,
        }
    }
}

// ---------------------------------------------------------------------------
// CandidateQueue
// ---------------------------------------------------------------------------

/// Where a pushed candidate should go.
#[derive(Debug)]
pub enum CandidateRoute {
    /// The endpoint is live and no drain is running — deliver directly.
    Forward(EndpointHandle, IceCandidate),
    /// No endpoint yet (or a drain is still in flight) — buffered.
    Queued,
    /// The queue was discarded; late candidates are dropped silently.
    Discarded,
}

#[derive(Default)]
struct QueueInner {
    buffered: VecDeque<IceCandidate>,
    endpoint: Option<EndpointHandle>,
    draining: bool,
    discarded: bool,
}

/// Per (room, participant, track) FIFO buffer for negotiation candidates.
///
/// The correctness property this type guarantees: candidates reach the
/// gateway in original arrival order, exactly once each, or not at all
/// (discarded wholesale on teardown). Candidates pushed while a drain is
/// in flight are appended *behind* the ones already buffered, so a direct
/// forward can never overtake a queued candidate.
pub struct CandidateQueue {
    inner: Mutex<QueueInner>,
}

impl CandidateQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner::default()),
        }
    }

    /// Route one candidate. Non-blocking with respect to any in-flight
    /// negotiation: this only takes the internal lock for a few loads.
    pub fn push(&self, candidate: IceCandidate) -> CandidateRoute {
        let mut inner = self.inner.lock().unwrap();
        if inner.discarded {
            return CandidateRoute::Discarded;
        }
        match (&inner.endpoint, inner.draining) {
            (Some(endpoint), false) => CandidateRoute::Forward(endpoint.clone(), candidate),
            _ => {
                inner.buffered.push_back(candidate);
                CandidateRoute::Queued
            }
        }
    }

    /// Attach `endpoint` and deliver every buffered candidate to it in FIFO
    /// order. Candidates arriving during the drain keep queueing and are
    /// delivered by the same loop, preserving arrival order.
    ///
    /// On a gateway error the remaining candidates stay buffered; the caller
    /// is expected to tear the session down (which discards them).
    pub async fn drain_into(
        &self,
        gateway: &dyn MediaGateway,
        endpoint: &EndpointHandle,
    ) -> Result<usize, GatewayError> {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.discarded {
                return Ok(0);
            }
            inner.endpoint = Some(endpoint.clone());
            inner.draining = true;
        }

        let mut delivered = 0;
        loop {
            let next = {
                let mut inner = self.inner.lock().unwrap();
                match inner.buffered.pop_front() {
                    Some(c) => Some(c),
                    None => {
                        inner.draining = false;
                        None
                    }
                }
            };
            let Some(candidate) = next else {
                return Ok(delivered);
            };
            if let Err(e) = gateway.add_candidate(endpoint, &candidate).await {
                self.inner.lock().unwrap().draining = false;
                return Err(e);
            }
            delivered += 1;
        }
    }

    /// Empty the queue without delivery and refuse everything from now on.
    pub fn discard(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.buffered.clear();
        inner.endpoint = None;
        inner.discarded = true;
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().buffered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for CandidateQueue {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::mock::MockGateway;
    use crate::gateway::PipelineHandle;

    fn candidate(n: u32) -> IceCandidate {
        IceCandidate::new(format!("candidate:{n}"))
    }

    #[tokio::test]
    async fn drains_in_arrival_order_exactly_once() {
        let mock = MockGateway::new();
        let queue = CandidateQueue::new();

        assert!(matches!(queue.push(candidate(1)), CandidateRoute::Queued));
        assert!(matches!(queue.push(candidate(2)), CandidateRoute::Queued));
        assert!(matches!(queue.push(candidate(3)), CandidateRoute::Queued));

        let endpoint = EndpointHandle::from("ep-1");
        let delivered = queue.drain_into(mock.as_ref(), &endpoint).await.unwrap();
        assert_eq!(delivered, 3);

        let adds: Vec<String> = mock
            .calls()
            .into_iter()
            .filter(|c| c.starts_with("add_candidate"))
            .collect();
        assert_eq!(
            adds,
            vec![
                "add_candidate ep-1 candidate:1",
                "add_candidate ep-1 candidate:2",
                "add_candidate ep-1 candidate:3",
            ]
        );
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn forwards_directly_once_attached() {
        let mock = MockGateway::new();
        let queue = CandidateQueue::new();
        let endpoint = EndpointHandle::from("ep-7");

        queue.drain_into(mock.as_ref(), &endpoint).await.unwrap();

        match queue.push(candidate(9)) {
            CandidateRoute::Forward(ep, c) => {
                assert_eq!(ep, endpoint);
                assert_eq!(c.candidate, "candidate:9");
            }
            other => panic!("expected Forward, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn discard_drops_buffer_and_late_pushes() {
        let mock = MockGateway::new();
        let queue = CandidateQueue::new();

        queue.push(candidate(1));
        queue.push(candidate(2));
        queue.discard();

        assert!(matches!(queue.push(candidate(3)), CandidateRoute::Discarded));

        // A drain after discard delivers nothing.
        let endpoint = EndpointHandle::from("ep-1");
        let delivered = queue.drain_into(mock.as_ref(), &endpoint).await.unwrap();
        assert_eq!(delivered, 0);
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn drain_error_keeps_remaining_buffered() {
        let mock = MockGateway::new();
        let queue = CandidateQueue::new();

        queue.push(candidate(1));
        queue.push(candidate(2));

        mock.fail_next("add_candidate");
        let endpoint = EndpointHandle::from("ep-1");
        let err = queue.drain_into(mock.as_ref(), &endpoint).await.unwrap_err();
        assert!(matches!(err, GatewayError::Rejected(_)));

        // First candidate was consumed by the failed attempt; second remains.
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn pipeline_and_endpoint_handles_display_their_ids() {
        assert_eq!(PipelineHandle::from("p-1").to_string(), "p-1");
        assert_eq!(EndpointHandle::from("e-1").to_string(), "e-1");
    }
}
