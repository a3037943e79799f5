//! Broadcast stage: one upstream, many subscribers.

use std::sync::{Arc, Mutex, MutexGuard};

use futures::StreamExt;
use futures::stream::{self, BoxStream};
use tokio::sync::mpsc;
use tracing::debug;

pub const SUBSCRIBER_CAPACITY: usize = 16;

struct Shared<T> {
    upstream: Option<BoxStream<'static, T>>,
    parked: Option<T>,
    subscribers: Vec<mpsc::Sender<T>>,
    finished: bool,
}

/// Every subscriber receives each item pulled after it subscribed.
///
/// The upstream is pulled by a single pump task, started on the first poll of any
/// subscription. Each subscriber has a bounded queue, so the slowest one paces the
/// upstream. When no subscriber is left the pump parks the upstream, together with
/// any item nobody received, and the next subscription resumes it. Once the
/// upstream ends, later subscriptions end immediately.
pub struct Fanout<T> {
    shared: Arc<Mutex<Shared<T>>>,
}

impl<T> Clone for Fanout<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

fn lock<T>(shared: &Mutex<Shared<T>>) -> MutexGuard<'_, Shared<T>> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<T> Fanout<T>
where
    T: Clone + Send + 'static,
{
    pub fn new(upstream: BoxStream<'static, T>) -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared {
                upstream: Some(upstream),
                parked: None,
                subscribers: Vec::new(),
                finished: false,
            })),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.shared).subscribers.len()
    }

    pub fn is_finished(&self) -> bool {
        lock(&self.shared).finished
    }

    /// True while no pump runs and the upstream waits for the next subscription.
    pub fn is_parked(&self) -> bool {
        lock(&self.shared).upstream.is_some()
    }

    pub fn subscribe(&self) -> BoxStream<'static, T> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);
        {
            let mut shared = lock(&self.shared);
            if !shared.finished {
                shared.subscribers.push(tx);
            }
        }

        let starter = Some(Arc::clone(&self.shared));
        stream::unfold((rx, starter), |(mut rx, starter)| async move {
            if let Some(shared) = starter {
                start_pump(shared);
            }
            rx.recv().await.map(|item| (item, (rx, None)))
        })
        .boxed()
    }
}

fn start_pump<T>(shared: Arc<Mutex<Shared<T>>>)
where
    T: Clone + Send + 'static,
{
    let Some(upstream) = lock(&shared).upstream.take() else {
        return;
    };
    tokio::spawn(pump(upstream, shared));
}

async fn pump<T>(mut upstream: BoxStream<'static, T>, shared: Arc<Mutex<Shared<T>>>)
where
    T: Clone + Send + 'static,
{
    let mut carried = lock(&shared).parked.take();
    loop {
        {
            let mut state = lock(&shared);
            state.subscribers.retain(|s| !s.is_closed());
            if state.subscribers.is_empty() {
                debug!("fan-out has no subscribers left, parking upstream");
                state.upstream = Some(upstream);
                state.parked = carried;
                return;
            }
        }

        let item = match carried.take() {
            Some(item) => item,
            None => match upstream.next().await {
                Some(item) => item,
                None => break,
            },
        };

        let subscribers = lock(&shared).subscribers.clone();
        let mut delivered = false;
        for subscriber in &subscribers {
            // a closed receiver only means that subscriber left
            delivered |= subscriber.send(item.clone()).await.is_ok();
        }
        if !delivered {
            carried = Some(item);
        }
    }

    let mut state = lock(&shared);
    state.finished = true;
    state.subscribers.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::SinkExt;
    use futures::channel::mpsc as upstream_channel;

    #[tokio::test]
    async fn every_subscriber_sees_every_item() {
        let fanout = Fanout::new(stream::iter(vec![1, 2, 3]).boxed());
        let first = fanout.subscribe();
        let second = fanout.subscribe();

        let (a, b) = tokio::join!(first.collect::<Vec<_>>(), second.collect::<Vec<_>>());
        assert_eq!(a, vec![1, 2, 3]);
        assert_eq!(b, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn late_subscriber_after_end_gets_empty_stream() {
        let fanout = Fanout::new(stream::iter(vec!["a"]).boxed());
        let items: Vec<_> = fanout.subscribe().collect().await;
        assert_eq!(items, vec!["a"]);

        let late: Vec<_> = fanout.subscribe().collect().await;
        assert!(late.is_empty());
    }

    #[tokio::test]
    async fn dropped_subscriber_does_not_block_others() {
        let (mut tx, rx) = upstream_channel::channel::<u32>(4);
        let fanout = Fanout::new(rx.boxed());
        let mut kept = fanout.subscribe();
        let dropped = fanout.subscribe();
        assert_eq!(fanout.subscriber_count(), 2);

        tx.send(1).await.unwrap();
        assert_eq!(kept.next().await, Some(1));
        drop(dropped);

        for n in 2..=(SUBSCRIBER_CAPACITY as u32 + 4) {
            tx.send(n).await.unwrap();
            assert_eq!(kept.next().await, Some(n));
        }
        assert_eq!(fanout.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn resubscribing_after_everyone_left_resumes_the_upstream() {
        let (mut tx, rx) = upstream_channel::channel::<u32>(4);
        let fanout = Fanout::new(rx.boxed());
        let mut first = fanout.subscribe();
        tx.send(1).await.unwrap();
        assert_eq!(first.next().await, Some(1));
        drop(first);

        tx.send(2).await.unwrap();
        for _ in 0..100 {
            if fanout.is_parked() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(fanout.is_parked());
        assert!(!fanout.is_finished());

        let mut second = fanout.subscribe();
        tx.send(3).await.unwrap();
        assert_eq!(second.next().await, Some(2));
        assert_eq!(second.next().await, Some(3));

        drop(tx);
        assert_eq!(second.next().await, None);
        assert!(fanout.is_finished());
    }
}
