//! In-process broker. Queues live in memory; every sent message is also kept in a
//! log so tests can inspect what went over the "wire".

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use futures::{StreamExt, stream};
use tokio::sync::Notify;

use super::{
    BrokerClient, BrokerSender, ClientFactory, DeliveryStream, ReceiverOptions, SenderOptions,
};
use crate::config::ClientOptions;
use crate::envelope::{Acknowledgement, Envelope};
use crate::error::ClientError;
use crate::message::{AmqpMessage, DeliveryInfo};
use crate::observer::{ConnectorEvent, ConnectorObserver};

#[derive(Default)]
struct Queue {
    pending: Mutex<VecDeque<AmqpMessage>>,
    durable: Mutex<Option<bool>>,
    notify: Notify,
    next_tag: AtomicUsize,
    unacked: AtomicUsize,
    acked: AtomicUsize,
    rejected: AtomicUsize,
}

impl Queue {
    fn push(&self, message: AmqpMessage) {
        lock(&self.pending).push_back(message);
        self.notify.notify_waiters();
    }

    fn pop(&self) -> Option<AmqpMessage> {
        lock(&self.pending).pop_front()
    }

    /// Redeclaring with a different durability is refused, as a real broker does.
    fn declare(&self, address: &str, durable: bool) -> Result<(), ClientError> {
        let mut declared = lock(&self.durable);
        match *declared {
            Some(existing) if existing != durable => Err(ClientError::Rejected(format!(
                "queue `{address}` already declared with durable={existing}"
            ))),
            _ => {
                *declared = Some(durable);
                Ok(())
            }
        }
    }
}

#[derive(Default)]
struct Faults {
    failing_sends: usize,
    fail_senders: bool,
    fail_receivers: bool,
    fail_clients: bool,
    sender_delay: Option<Duration>,
}

#[derive(Default)]
struct BrokerState {
    queues: Mutex<HashMap<String, Arc<Queue>>>,
    log: Mutex<Vec<AmqpMessage>>,
    faults: Mutex<Faults>,
    clients: Mutex<Vec<Arc<AtomicBool>>>,
    senders_created: AtomicUsize,
    receivers_created: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Shared handle to an in-process broker; clones see the same queues.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<BrokerState>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn queue(&self, address: &str) -> Arc<Queue> {
        let mut queues = lock(&self.state.queues);
        Arc::clone(queues.entry(address.to_string()).or_default())
    }

    /// Enqueues a message as if another producer had sent it.
    pub fn publish(&self, address: &str, message: AmqpMessage) {
        self.queue(address).push(message.with_address(address));
    }

    /// Messages sent through senders to `address`, in send order.
    pub fn published(&self, address: &str) -> Vec<AmqpMessage> {
        lock(&self.state.log)
            .iter()
            .filter(|m| m.address.as_deref() == Some(address))
            .cloned()
            .collect()
    }

    pub fn take_published(&self) -> Vec<AmqpMessage> {
        std::mem::take(&mut *lock(&self.state.log))
    }

    /// Messages waiting in the queue, not yet delivered.
    pub fn pending(&self, address: &str) -> usize {
        lock(&self.queue(address).pending).len()
    }

    /// Durability the queue was declared with, if a sender or receiver declared it.
    pub fn declared_durable(&self, address: &str) -> Option<bool> {
        *lock(&self.queue(address).durable)
    }

    pub fn unacked(&self, address: &str) -> usize {
        self.queue(address).unacked.load(Ordering::SeqCst)
    }

    pub fn acked(&self, address: &str) -> usize {
        self.queue(address).acked.load(Ordering::SeqCst)
    }

    pub fn rejected(&self, address: &str) -> usize {
        self.queue(address).rejected.load(Ordering::SeqCst)
    }

    pub fn clients_created(&self) -> usize {
        lock(&self.state.clients).len()
    }

    pub fn clients_closed(&self) -> usize {
        lock(&self.state.clients)
            .iter()
            .filter(|closed| closed.load(Ordering::Acquire))
            .count()
    }

    pub fn senders_created(&self) -> usize {
        self.state.senders_created.load(Ordering::SeqCst)
    }

    pub fn receivers_created(&self) -> usize {
        self.state.receivers_created.load(Ordering::SeqCst)
    }

    /// The next `count` sends are refused by the broker.
    pub fn fail_next_sends(&self, count: usize) {
        lock(&self.state.faults).failing_sends = count;
    }

    pub fn fail_sender_creation(&self, fail: bool) {
        lock(&self.state.faults).fail_senders = fail;
    }

    pub fn fail_receiver_creation(&self, fail: bool) {
        lock(&self.state.faults).fail_receivers = fail;
    }

    pub fn fail_client_creation(&self, fail: bool) {
        lock(&self.state.faults).fail_clients = fail;
    }

    pub fn delay_sender_creation(&self, delay: Duration) {
        lock(&self.state.faults).sender_delay = Some(delay);
    }

    fn take_send_fault(&self) -> bool {
        let mut faults = lock(&self.state.faults);
        if faults.failing_sends > 0 {
            faults.failing_sends -= 1;
            true
        } else {
            false
        }
    }

    fn wake_receivers(&self) {
        for queue in lock(&self.state.queues).values() {
            queue.notify.notify_waiters();
        }
    }
}

impl ClientFactory for InMemoryBroker {
    fn create(
        &self,
        options: &ClientOptions,
        observer: Arc<dyn ConnectorObserver>,
    ) -> Result<Arc<dyn BrokerClient>, ClientError> {
        if lock(&self.state.faults).fail_clients {
            return Err(ClientError::InvalidOptions(format!(
                "refusing client for {}",
                options.endpoint()
            )));
        }
        let endpoint = options.endpoint();
        let closed = Arc::new(AtomicBool::new(false));
        lock(&self.state.clients).push(Arc::clone(&closed));
        let client = Arc::new(InMemoryClient {
            broker: self.clone(),
            closed,
            observer,
        });
        client
            .observer
            .on_event(&ConnectorEvent::ClientCreated { endpoint: endpoint.clone() });
        client.observer.on_event(&ConnectorEvent::Connected { endpoint });
        Ok(client)
    }
}

struct InMemoryClient {
    broker: InMemoryBroker,
    closed: Arc<AtomicBool>,
    observer: Arc<dyn ConnectorObserver>,
}

impl InMemoryClient {
    fn ensure_open(&self) -> Result<(), ClientError> {
        if self.is_closed() {
            Err(ClientError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl BrokerClient for InMemoryClient {
    async fn connect(&self) -> Result<(), ClientError> {
        self.ensure_open()
    }

    async fn create_sender(
        &self,
        address: &str,
        options: SenderOptions,
    ) -> Result<Arc<dyn BrokerSender>, ClientError> {
        self.ensure_open()?;
        let (fail, delay) = {
            let faults = lock(&self.broker.state.faults);
            (faults.fail_senders, faults.sender_delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if fail {
            return Err(ClientError::Rejected(format!(
                "sender for `{address}` refused"
            )));
        }
        self.broker.queue(address).declare(address, options.durable)?;
        self.broker
            .state
            .senders_created
            .fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(InMemorySender {
            address: address.to_string(),
            broker: self.broker.clone(),
            closed: Arc::clone(&self.closed),
        }))
    }

    async fn create_receiver(
        &self,
        address: &str,
        options: ReceiverOptions,
    ) -> Result<DeliveryStream, ClientError> {
        self.ensure_open()?;
        if lock(&self.broker.state.faults).fail_receivers {
            return Err(ClientError::Transport(format!(
                "receiver for `{address}` refused"
            )));
        }
        self.broker
            .state
            .receivers_created
            .fetch_add(1, Ordering::SeqCst);

        let queue = self.broker.queue(address);
        queue.declare(address, options.durable)?;
        let closed = Arc::clone(&self.closed);
        let auto_ack = options.auto_acknowledgement;

        let deliveries = stream::unfold((queue, closed), move |(queue, closed)| async move {
            loop {
                let waiter = Arc::clone(&queue);
                let notified = waiter.notify.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                if closed.load(Ordering::Acquire) {
                    return None;
                }
                if let Some(message) = queue.pop() {
                    let envelope = deliver(&queue, message, auto_ack);
                    return Some((Ok(envelope), (queue, closed)));
                }
                notified.await;
            }
        });
        Ok(deliveries.boxed())
    }

    async fn close(&self) -> Result<(), ClientError> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.broker.wake_receivers();
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

fn deliver(queue: &Arc<Queue>, message: AmqpMessage, auto_ack: bool) -> Envelope<AmqpMessage> {
    let tag = queue.next_tag.fetch_add(1, Ordering::SeqCst) as u64 + 1;
    let message = message.with_delivery(DeliveryInfo {
        delivery_tag: tag,
        redelivered: false,
    });
    if auto_ack {
        queue.acked.fetch_add(1, Ordering::SeqCst);
        Envelope::new(message)
    } else {
        queue.unacked.fetch_add(1, Ordering::SeqCst);
        Envelope::with_ack(message, MemoryAck(Arc::clone(queue)))
    }
}

struct MemoryAck(Arc<Queue>);

#[async_trait]
impl Acknowledgement for MemoryAck {
    async fn ack(&self) -> Result<(), ClientError> {
        self.0.unacked.fetch_sub(1, Ordering::SeqCst);
        self.0.acked.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn nack(&self, _reason: &str) -> Result<(), ClientError> {
        self.0.unacked.fetch_sub(1, Ordering::SeqCst);
        self.0.rejected.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct InMemorySender {
    address: String,
    broker: InMemoryBroker,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl BrokerSender for InMemorySender {
    async fn send_with_ack(&self, message: AmqpMessage) -> Result<(), ClientError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ClientError::Closed);
        }
        if self.broker.take_send_fault() {
            return Err(ClientError::Rejected(format!(
                "send to `{}` refused",
                self.address
            )));
        }
        let message = message.with_address(self.address.clone());
        lock(&self.broker.state.log).push(message.clone());
        self.broker.queue(&self.address).push(message);
        Ok(())
    }
}
