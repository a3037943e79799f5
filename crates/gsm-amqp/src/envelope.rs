//! Message envelopes: a value plus its ack/nack continuation.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::{Mutex, oneshot};
use tracing::warn;

use crate::error::ClientError;

/// Settlement hook invoked at most once per envelope.
#[async_trait]
pub trait Acknowledgement: Send + Sync {
    async fn ack(&self) -> Result<(), ClientError>;
    async fn nack(&self, reason: &str) -> Result<(), ClientError>;
}

/// Used where the broker already considers the message consumed.
pub struct NoopAck;

#[async_trait]
impl Acknowledgement for NoopAck {
    async fn ack(&self) -> Result<(), ClientError> {
        Ok(())
    }

    async fn nack(&self, _reason: &str) -> Result<(), ClientError> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckOutcome {
    Acked,
    Nacked(String),
}

/// Receives the outcome of a [`Envelope::tracked`] envelope.
pub struct AckReceiver(oneshot::Receiver<AckOutcome>);

impl AckReceiver {
    /// `None` when the envelope was dropped unsettled.
    pub async fn outcome(self) -> Option<AckOutcome> {
        self.0.await.ok()
    }
}

struct TrackedAck(Mutex<Option<oneshot::Sender<AckOutcome>>>);

impl TrackedAck {
    async fn resolve(&self, outcome: AckOutcome) {
        if let Some(tx) = self.0.lock().await.take() {
            let _ = tx.send(outcome);
        }
    }
}

#[async_trait]
impl Acknowledgement for TrackedAck {
    async fn ack(&self) -> Result<(), ClientError> {
        self.resolve(AckOutcome::Acked).await;
        Ok(())
    }

    async fn nack(&self, reason: &str) -> Result<(), ClientError> {
        self.resolve(AckOutcome::Nacked(reason.to_string())).await;
        Ok(())
    }
}

struct Settlement {
    ack: Box<dyn Acknowledgement>,
    settled: AtomicBool,
}

/// Immutable message wrapper. Clones share one settlement: only the first `ack`
/// or `nack` reaches the underlying hook.
pub struct Envelope<T> {
    payload: T,
    settlement: Arc<Settlement>,
}

impl<T> Envelope<T> {
    pub fn new(payload: T) -> Self {
        Self::with_ack(payload, NoopAck)
    }

    pub fn with_ack(payload: T, ack: impl Acknowledgement + 'static) -> Self {
        Self {
            payload,
            settlement: Arc::new(Settlement {
                ack: Box::new(ack),
                settled: AtomicBool::new(false),
            }),
        }
    }

    /// Envelope whose settlement can be awaited by the producer.
    pub fn tracked(payload: T) -> (Self, AckReceiver) {
        let (tx, rx) = oneshot::channel();
        let envelope = Self::with_ack(payload, TrackedAck(Mutex::new(Some(tx))));
        (envelope, AckReceiver(rx))
    }

    pub fn payload(&self) -> &T {
        &self.payload
    }

    pub fn into_payload(self) -> T {
        self.payload
    }

    /// Same settlement, different value.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Envelope<U> {
        Envelope {
            payload: f(self.payload),
            settlement: self.settlement,
        }
    }

    pub fn is_settled(&self) -> bool {
        self.settlement.settled.load(Ordering::Acquire)
    }

    pub async fn ack(&self) -> Result<(), ClientError> {
        if self.claim() {
            self.settlement.ack.ack().await
        } else {
            Ok(())
        }
    }

    pub async fn nack(&self, reason: &str) -> Result<(), ClientError> {
        if self.claim() {
            self.settlement.ack.nack(reason).await
        } else {
            Ok(())
        }
    }

    /// Nack, logging instead of returning a failure.
    pub(crate) async fn nack_logged(&self, reason: &str) {
        if let Err(err) = self.nack(reason).await {
            warn!(error = %err, "failed to nack envelope");
        }
    }

    fn claim(&self) -> bool {
        self.settlement
            .settled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl<T: Clone> Clone for Envelope<T> {
    fn clone(&self) -> Self {
        Self {
            payload: self.payload.clone(),
            settlement: Arc::clone(&self.settlement),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Envelope<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("payload", &self.payload)
            .field("settled", &self.is_settled())
            .finish()
    }
}
