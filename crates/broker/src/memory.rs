use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use crate::{
    Acker, Broker, BrokerError, Delivery, DeliveryStream, QueueSpec, Result, SagaChannel,
};

#[derive(Debug, Clone)]
struct Message {
    data: Vec<u8>,
    deliveries: u32,
}

struct QueueState {
    spec: QueueSpec,
    ready: VecDeque<Message>,
    unacked: HashMap<u64, Message>,
    notify: Arc<Notify>,
}

impl QueueState {
    fn new(spec: QueueSpec) -> Self {
        Self {
            spec,
            ready: VecDeque::new(),
            unacked: HashMap::new(),
            notify: Arc::new(Notify::new()),
        }
    }
}

#[derive(Default)]
struct BrokerState {
    exchanges: HashSet<String>,
    /// exchange -> (routing key, queue)
    bindings: HashMap<String, Vec<(String, String)>>,
    queues: HashMap<String, QueueState>,
    next_tag: u64,
    fail_declare: bool,
    fail_publish: bool,
}

impl BrokerState {
    /// Delivers a message to every queue bound with the routing key.
    /// Returns the number of queues it reached.
    fn route(&mut self, exchange: &str, routing_key: &str, data: &[u8]) -> usize {
        let targets: Vec<String> = self
            .bindings
            .get(exchange)
            .map(|bindings| {
                bindings
                    .iter()
                    .filter(|(key, _)| key == routing_key)
                    .map(|(_, queue)| queue.clone())
                    .collect()
            })
            .unwrap_or_default();

        for name in &targets {
            if let Some(queue) = self.queues.get_mut(name) {
                queue.ready.push_back(Message {
                    data: data.to_vec(),
                    deliveries: 0,
                });
                queue.notify.notify_one();
            }
        }
        targets.len()
    }

    fn dead_letter(&mut self, queue: &str, message: Message) {
        let target = self
            .queues
            .get(queue)
            .and_then(|q| q.spec.dead_letter.clone());
        match target {
            Some(dl) => {
                if self.route(&dl.exchange, &dl.routing_key, &message.data) == 0 {
                    tracing::warn!(queue, "dead-letter exchange has no bound queue, message dropped");
                }
            }
            None => tracing::warn!(queue, "queue has no dead-letter exchange, message dropped"),
        }
    }

    fn pop(&mut self, queue: &str) -> Option<(u64, Message)> {
        let q = self.queues.get_mut(queue)?;
        let mut message = q.ready.pop_front()?;
        message.deliveries += 1;
        self.next_tag += 1;
        let tag = self.next_tag;
        q.unacked.insert(tag, message.clone());
        Some((tag, message))
    }
}

/// In-process broker with RabbitMQ-like routing, for tests.
///
/// Supports direct exchanges, durable queues, manual acknowledgement,
/// requeue, dead-lettering and a per-queue delivery limit. Messages are kept
/// in memory only.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl InMemoryBroker {
    /// Creates a new empty broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent declaration fail.
    pub async fn set_fail_declare(&self, fail: bool) {
        self.state.lock().await.fail_declare = fail;
    }

    /// Makes every subsequent publish fail.
    pub async fn set_fail_publish(&self, fail: bool) {
        self.state.lock().await.fail_publish = fail;
    }

    /// Returns the number of messages waiting in a queue (not in flight).
    pub async fn queue_len(&self, queue: &str) -> usize {
        self.state
            .lock()
            .await
            .queues
            .get(queue)
            .map_or(0, |q| q.ready.len())
    }

    /// Returns the number of delivered but unsettled messages of a queue.
    pub async fn unacked_len(&self, queue: &str) -> usize {
        self.state
            .lock()
            .await
            .queues
            .get(queue)
            .map_or(0, |q| q.unacked.len())
    }

    /// Returns the payloads waiting in a queue, oldest first.
    pub async fn messages(&self, queue: &str) -> Vec<Vec<u8>> {
        self.state
            .lock()
            .await
            .queues
            .get(queue)
            .map(|q| q.ready.iter().map(|m| m.data.clone()).collect())
            .unwrap_or_default()
    }

    /// Returns the payloads parked in a channel's dead-letter queue.
    pub async fn dead_letters(&self, channel: &SagaChannel) -> Vec<Vec<u8>> {
        self.messages(&channel.dead_letter_queue()).await
    }

    /// Takes the next waiting message of a queue without blocking.
    pub async fn try_next(&self, queue: &str) -> Option<Delivery> {
        let mut state = self.state.lock().await;
        let (tag, message) = state.pop(queue)?;
        Some(self.delivery(queue, tag, message))
    }

    fn delivery(&self, queue: &str, tag: u64, message: Message) -> Delivery {
        Delivery::new(
            message.data,
            message.deliveries > 1,
            MemoryAcker {
                state: self.state.clone(),
                queue: queue.to_string(),
                tag,
            },
        )
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn declare_exchange(&self, exchange: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.fail_declare {
            return Err(BrokerError::Declare {
                kind: "exchange",
                name: exchange.to_string(),
                reason: "broker unavailable".to_string(),
            });
        }
        state.exchanges.insert(exchange.to_string());
        Ok(())
    }

    async fn declare_queue(&self, spec: &QueueSpec) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.fail_declare {
            return Err(BrokerError::Declare {
                kind: "queue",
                name: spec.name.clone(),
                reason: "broker unavailable".to_string(),
            });
        }
        match state.queues.get(&spec.name) {
            Some(existing) if existing.spec != *spec => Err(BrokerError::Declare {
                kind: "queue",
                name: spec.name.clone(),
                reason: "PRECONDITION_FAILED - inequivalent arguments".to_string(),
            }),
            Some(_) => Ok(()),
            None => {
                state
                    .queues
                    .insert(spec.name.clone(), QueueState::new(spec.clone()));
                Ok(())
            }
        }
    }

    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.fail_declare || !state.queues.contains_key(queue) {
            return Err(BrokerError::Declare {
                kind: "binding",
                name: format!("{exchange} -> {queue}"),
                reason: format!("NOT_FOUND - no queue '{queue}'"),
            });
        }
        if !state.exchanges.contains(exchange) {
            return Err(BrokerError::Declare {
                kind: "binding",
                name: format!("{exchange} -> {queue}"),
                reason: format!("NOT_FOUND - no exchange '{exchange}'"),
            });
        }
        let bindings = state.bindings.entry(exchange.to_string()).or_default();
        let binding = (routing_key.to_string(), queue.to_string());
        if !bindings.contains(&binding) {
            bindings.push(binding);
        }
        Ok(())
    }

    async fn publish(&self, exchange: &str, routing_key: &str, payload: &[u8]) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.fail_publish {
            return Err(BrokerError::Publish {
                exchange: exchange.to_string(),
                reason: "connection closed".to_string(),
            });
        }
        if !state.exchanges.contains(exchange) {
            return Err(BrokerError::Publish {
                exchange: exchange.to_string(),
                reason: format!("NOT_FOUND - no exchange '{exchange}'"),
            });
        }
        if state.route(exchange, routing_key, payload) == 0 {
            return Err(BrokerError::Publish {
                exchange: exchange.to_string(),
                reason: format!("NO_ROUTE - routing key '{routing_key}'"),
            });
        }
        Ok(())
    }

    async fn consume(&self, queue: &str, _consumer_tag: &str) -> Result<DeliveryStream> {
        if !self.state.lock().await.queues.contains_key(queue) {
            return Err(BrokerError::Consume {
                queue: queue.to_string(),
                reason: format!("NOT_FOUND - no queue '{queue}'"),
            });
        }

        let broker = self.clone();
        let stream = futures_util::stream::unfold(
            (broker, queue.to_string()),
            |(broker, queue)| async move {
                loop {
                    let notify = {
                        let mut state = broker.state.lock().await;
                        if let Some((tag, message)) = state.pop(&queue) {
                            drop(state);
                            let delivery = broker.delivery(&queue, tag, message);
                            return Some((Ok(delivery), (broker, queue)));
                        }
                        state.queues.get(&queue)?.notify.clone()
                    };
                    notify.notified().await;
                }
            },
        );
        Ok(Box::pin(stream))
    }
}

struct MemoryAcker {
    state: Arc<Mutex<BrokerState>>,
    queue: String,
    tag: u64,
}

impl MemoryAcker {
    fn take(&self, state: &mut BrokerState) -> Result<Message> {
        state
            .queues
            .get_mut(&self.queue)
            .and_then(|q| q.unacked.remove(&self.tag))
            .ok_or_else(|| BrokerError::Ack(format!("unknown delivery tag {}", self.tag)))
    }
}

#[async_trait]
impl Acker for MemoryAcker {
    async fn ack(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        self.take(&mut state)?;
        Ok(())
    }

    async fn nack(&self, requeue: bool) -> Result<()> {
        let mut state = self.state.lock().await;
        let message = self.take(&mut state)?;

        // Like a quorum queue, dead-letter once the delivery count exceeds
        // the limit, so a message is delivered `limit + 1` times at most.
        let limit_reached = state
            .queues
            .get(&self.queue)
            .and_then(|q| q.spec.delivery_limit)
            .is_some_and(|limit| message.deliveries > limit);

        if requeue && !limit_reached {
            if let Some(q) = state.queues.get_mut(&self.queue) {
                q.ready.push_front(message);
                q.notify.notify_one();
            }
        } else {
            state.dead_letter(&self.queue, message);
        }
        Ok(())
    }
}
