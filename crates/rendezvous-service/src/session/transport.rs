//! Media capture and peer transport seams.
//!
//! The session never touches a concrete WebRTC stack. Anything that can
//! produce descriptions and apply candidates plugs in through these traits.

use crate::errors::{CaptureError, NegotiationError};
use common::signaling::{IceCandidate, SessionDescription};

/// Handle to acquired local media.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalStream {
    pub id: String,
    pub audio: bool,
    pub video: bool,
}

/// Connectivity state reported by a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl TransportState {
    /// Whether the state means the link to the peer is gone.
    #[must_use]
    pub const fn is_lost(&self) -> bool {
        matches!(self, TransportState::Disconnected | TransportState::Failed)
    }
}

/// Local camera and microphone access.
#[async_trait::async_trait]
pub trait MediaCapture: Send + Sync {
    /// Acquire local media. May prompt the user.
    async fn acquire(&self) -> Result<LocalStream, CaptureError>;

    async fn release(&self, stream: LocalStream);
}

#[async_trait::async_trait]
impl<T: MediaCapture + ?Sized> MediaCapture for std::sync::Arc<T> {
    async fn acquire(&self) -> Result<LocalStream, CaptureError> {
        self.as_ref().acquire().await
    }

    async fn release(&self, stream: LocalStream) {
        self.as_ref().release(stream).await;
    }
}

/// One peer-to-peer transport, created per pairing.
#[async_trait::async_trait]
pub trait MediaTransport: Send {
    async fn create_offer(&mut self) -> Result<SessionDescription, NegotiationError>;

    async fn create_answer(&mut self) -> Result<SessionDescription, NegotiationError>;

    async fn set_local_description(
        &mut self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError>;

    async fn set_remote_description(
        &mut self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError>;

    async fn add_ice_candidate(&mut self, candidate: IceCandidate) -> Result<(), NegotiationError>;

    async fn close(&mut self);
}

/// Builds a transport bound to local media.
#[async_trait::async_trait]
pub trait TransportFactory: Send + Sync {
    type Transport: MediaTransport;

    async fn create(&self, stream: &LocalStream) -> Result<Self::Transport, NegotiationError>;
}

/// Mock capture and transport for exercising sessions without media.
pub mod mock {
    use super::*;
    use common::signaling::SdpKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::Mutex;

    /// Capture that succeeds with a fixed stream or fails with a fixed error.
    pub struct MockMediaCapture {
        failure: Option<CaptureError>,
        acquired: AtomicUsize,
        released: AtomicUsize,
    }

    impl MockMediaCapture {
        #[must_use]
        pub fn new() -> Self {
            Self {
                failure: None,
                acquired: AtomicUsize::new(0),
                released: AtomicUsize::new(0),
            }
        }

        #[must_use]
        pub fn failing(error: CaptureError) -> Self {
            Self {
                failure: Some(error),
                ..Self::new()
            }
        }

        #[must_use]
        pub fn acquired(&self) -> usize {
            self.acquired.load(Ordering::SeqCst)
        }

        #[must_use]
        pub fn released(&self) -> usize {
            self.released.load(Ordering::SeqCst)
        }

        /// Streams acquired and not yet released.
        #[must_use]
        pub fn outstanding(&self) -> usize {
            self.acquired().saturating_sub(self.released())
        }
    }

    impl Default for MockMediaCapture {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait::async_trait]
    impl MediaCapture for MockMediaCapture {
        async fn acquire(&self) -> Result<LocalStream, CaptureError> {
            if let Some(error) = &self.failure {
                return Err(error.clone());
            }
            let n = self.acquired.fetch_add(1, Ordering::SeqCst);
            Ok(LocalStream {
                id: format!("stream-{n}"),
                audio: true,
                video: true,
            })
        }

        async fn release(&self, _stream: LocalStream) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// A call observed by a mock transport.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum TransportCall {
        CreateOffer,
        CreateAnswer,
        SetLocal(SdpKind),
        SetRemote(SdpKind),
        AddCandidate(String),
        Close,
    }

    /// Calls made on every transport a factory produced, in order.
    #[derive(Debug, Default)]
    pub struct TransportLog {
        calls: Mutex<Vec<TransportCall>>,
        created: AtomicUsize,
    }

    impl TransportLog {
        pub async fn calls(&self) -> Vec<TransportCall> {
            self.calls.lock().await.clone()
        }

        /// Candidates applied, in application order.
        pub async fn applied_candidates(&self) -> Vec<String> {
            self.calls
                .lock()
                .await
                .iter()
                .filter_map(|call| match call {
                    TransportCall::AddCandidate(candidate) => Some(candidate.clone()),
                    _ => None,
                })
                .collect()
        }

        #[must_use]
        pub fn created(&self) -> usize {
            self.created.load(Ordering::SeqCst)
        }

        async fn push(&self, call: TransportCall) {
            self.calls.lock().await.push(call);
        }
    }

    /// Which transport operation should fail.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub enum FailurePoint {
        #[default]
        Never,
        Create,
        RemoteDescription,
        Candidate,
    }

    pub struct MockTransportFactory {
        log: Arc<TransportLog>,
        fail_at: FailurePoint,
    }

    impl MockTransportFactory {
        #[must_use]
        pub fn new() -> Self {
            Self::failing_at(FailurePoint::Never)
        }

        #[must_use]
        pub fn failing_at(fail_at: FailurePoint) -> Self {
            Self {
                log: Arc::new(TransportLog::default()),
                fail_at,
            }
        }

        #[must_use]
        pub fn log(&self) -> Arc<TransportLog> {
            Arc::clone(&self.log)
        }
    }

    impl Default for MockTransportFactory {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait::async_trait]
    impl TransportFactory for MockTransportFactory {
        type Transport = MockTransport;

        async fn create(&self, stream: &LocalStream) -> Result<MockTransport, NegotiationError> {
            if self.fail_at == FailurePoint::Create {
                return Err(NegotiationError::Transport(
                    "mock transport creation failed".to_string(),
                ));
            }
            self.log.created.fetch_add(1, Ordering::SeqCst);
            Ok(MockTransport {
                log: Arc::clone(&self.log),
                fail_at: self.fail_at,
                stream_id: stream.id.clone(),
            })
        }
    }

    pub struct MockTransport {
        log: Arc<TransportLog>,
        fail_at: FailurePoint,
        stream_id: String,
    }

    #[async_trait::async_trait]
    impl MediaTransport for MockTransport {
        async fn create_offer(&mut self) -> Result<SessionDescription, NegotiationError> {
            self.log.push(TransportCall::CreateOffer).await;
            Ok(SessionDescription::offer(format!(
                "v=0 offer {}",
                self.stream_id
            )))
        }

        async fn create_answer(&mut self) -> Result<SessionDescription, NegotiationError> {
            self.log.push(TransportCall::CreateAnswer).await;
            Ok(SessionDescription::answer(format!(
                "v=0 answer {}",
                self.stream_id
            )))
        }

        async fn set_local_description(
            &mut self,
            description: SessionDescription,
        ) -> Result<(), NegotiationError> {
            self.log.push(TransportCall::SetLocal(description.kind)).await;
            Ok(())
        }

        async fn set_remote_description(
            &mut self,
            description: SessionDescription,
        ) -> Result<(), NegotiationError> {
            if self.fail_at == FailurePoint::RemoteDescription {
                return Err(NegotiationError::DescriptionRejected(
                    "mock rejected remote description".to_string(),
                ));
            }
            self.log.push(TransportCall::SetRemote(description.kind)).await;
            Ok(())
        }

        async fn add_ice_candidate(
            &mut self,
            candidate: IceCandidate,
        ) -> Result<(), NegotiationError> {
            if self.fail_at == FailurePoint::Candidate {
                return Err(NegotiationError::CandidateRejected(candidate.candidate));
            }
            self.log
                .push(TransportCall::AddCandidate(candidate.candidate))
                .await;
            Ok(())
        }

        async fn close(&mut self) {
            self.log.push(TransportCall::Close).await;
        }
    }
}
