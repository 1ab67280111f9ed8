use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use broker_api::{
    BoxFuture, BrokerClient, BrokerError, ClientOptions, Consumer, ConsumerOptions, MessageId, OutgoingMessage,
    Producer, ProducerOptions, RawMessage, TransactionCoordinator, TxnId,
};

use crate::Shared;

// ═══════════════════════════════════════════════════════════════
//  Client
// ═══════════════════════════════════════════════════════════════

pub struct MemoryClient {
    shared: Arc<Shared>,
    options: ClientOptions,
    closed: AtomicBool,
}

impl MemoryClient {
    pub(crate) fn new(shared: Arc<Shared>, options: ClientOptions) -> Self {
        Self { shared, options, closed: AtomicBool::new(false) }
    }

    fn ensure_open(&self) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::Acquire) {
            Err(BrokerError::unavailable("client is closed"))
        } else {
            Ok(())
        }
    }
}

impl BrokerClient for MemoryClient {
    fn create_producer(
        &self,
        topic: &str,
        options: ProducerOptions,
    ) -> BoxFuture<'_, Result<Box<dyn Producer>, BrokerError>> {
        let topic = topic.to_string();
        Box::pin(async move {
            self.ensure_open()?;
            let (producer_id, partitions) = {
                let mut state = self.shared.state();
                let id = state.next_handle_id();
                let partitions = state.attach_producer(
                    &topic,
                    id,
                    &options.schema,
                    options.multi_schema,
                    options.access_mode,
                )?;
                (id, partitions)
            };
            tracing::debug!(topic = %topic, producer_id, partitions = partitions.len(), "producer created");
            let producer: Box<dyn Producer> = Box::new(MemoryProducer {
                shared: self.shared.clone(),
                topic,
                producer_id,
                partitions,
                round_robin: 0,
                closed: false,
            });
            Ok(producer)
        })
    }

    fn subscribe(
        &self,
        topic: &str,
        options: ConsumerOptions,
    ) -> BoxFuture<'_, Result<Box<dyn Consumer>, BrokerError>> {
        let topic = topic.to_string();
        Box::pin(async move {
            self.ensure_open()?;
            let (consumer_id, partitions) = {
                let mut state = self.shared.state();
                let id = state.next_handle_id();
                let partitions = state.attach_consumer(
                    &topic,
                    &options.subscription,
                    id,
                    options.kind,
                    options.mode,
                    options.initial_position,
                )?;
                (id, partitions)
            };
            tracing::debug!(
                topic = %topic,
                subscription = %options.subscription,
                consumer_id,
                "consumer subscribed"
            );
            let consumer: Box<dyn Consumer> = Box::new(MemoryConsumer {
                shared: self.shared.clone(),
                topic,
                subscription: options.subscription,
                consumer_id,
                partitions,
                next_partition: 0,
                closed: false,
            });
            Ok(consumer)
        })
    }

    fn partitions_for_topic(&self, topic: &str) -> BoxFuture<'_, Result<Vec<String>, BrokerError>> {
        let topic = topic.to_string();
        Box::pin(async move {
            self.ensure_open()?;
            let (_, partitions) = self.shared.state().resolve(&topic, false)?;
            Ok(partitions)
        })
    }

    fn transaction_coordinator(&self) -> Result<Arc<dyn TransactionCoordinator>, BrokerError> {
        self.ensure_open()?;
        if !self.options.enable_transaction {
            return Err(BrokerError::transaction(
                "transactions are not enabled on this client",
            ));
        }
        Ok(Arc::new(MemoryCoordinator { shared: self.shared.clone() }))
    }

    fn close(&self) -> BoxFuture<'_, Result<(), BrokerError>> {
        Box::pin(async move {
            self.closed.store(true, Ordering::Release);
            Ok(())
        })
    }
}

// ═══════════════════════════════════════════════════════════════
//  Producer
// ═══════════════════════════════════════════════════════════════

pub struct MemoryProducer {
    shared: Arc<Shared>,
    topic: String,
    producer_id: u64,
    partitions: Vec<String>,
    round_robin: usize,
    closed: bool,
}

impl MemoryProducer {
    fn release(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.shared.state().detach_producer(&self.partitions, self.producer_id);
    }
}

impl Producer for MemoryProducer {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn send(&mut self, message: OutgoingMessage) -> BoxFuture<'_, Result<MessageId, BrokerError>> {
        Box::pin(async move {
            if self.closed {
                return Err(BrokerError::unavailable("producer is closed"));
            }
            let slot = self.round_robin;
            if message.key.is_none() {
                self.round_robin = self.round_robin.wrapping_add(1);
            }
            let id = self.shared.state().append(&self.partitions, slot, message)?;
            self.shared.notify.notify_waiters();
            Ok(id)
        })
    }

    fn flush(&mut self) -> BoxFuture<'_, Result<(), BrokerError>> {
        // Sends complete synchronously; nothing is buffered.
        Box::pin(async move {
            if self.closed {
                return Err(BrokerError::unavailable("producer is closed"));
            }
            Ok(())
        })
    }

    fn close(&mut self) -> BoxFuture<'_, Result<(), BrokerError>> {
        Box::pin(async move {
            self.release();
            Ok(())
        })
    }
}

impl Drop for MemoryProducer {
    fn drop(&mut self) {
        self.release();
    }
}

// ═══════════════════════════════════════════════════════════════
//  Consumer
// ═══════════════════════════════════════════════════════════════

pub struct MemoryConsumer {
    shared: Arc<Shared>,
    topic: String,
    subscription: String,
    consumer_id: u64,
    partitions: Vec<String>,
    next_partition: usize,
    closed: bool,
}

impl MemoryConsumer {
    fn release(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.shared
            .state()
            .detach_consumer(&self.partitions, &self.subscription, self.consumer_id);
        // Unacked messages become available to other consumers.
        self.shared.notify.notify_waiters();
    }
}

impl Consumer for MemoryConsumer {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn subscription(&self) -> &str {
        &self.subscription
    }

    fn receive(&mut self) -> BoxFuture<'_, Result<RawMessage, BrokerError>> {
        Box::pin(async move {
            let shared = self.shared.clone();
            loop {
                let mut notified = std::pin::pin!(shared.notify.notified());
                // Register before checking so an append between the check
                // and the await still wakes us.
                notified.as_mut().enable();

                if self.closed {
                    return Err(BrokerError::unavailable("consumer is closed"));
                }
                let (next, deadline) = {
                    let mut state = shared.state();
                    let next = state.next_message(
                        &self.partitions,
                        &self.subscription,
                        self.consumer_id,
                        self.next_partition,
                    )?;
                    (next, state.next_transaction_deadline())
                };
                if let Some((slot, message)) = next {
                    self.next_partition = slot + 1;
                    return Ok(message);
                }

                match deadline {
                    // An expiring transaction may unblock entries behind it.
                    Some(deadline) => {
                        tokio::select! {
                            _ = notified => {}
                            _ = tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)) => {}
                        }
                    }
                    None => notified.await,
                }
            }
        })
    }

    fn acknowledge(&mut self, id: MessageId) -> BoxFuture<'_, Result<(), BrokerError>> {
        Box::pin(async move {
            if self.closed {
                return Err(BrokerError::unavailable("consumer is closed"));
            }
            self.shared
                .state()
                .acknowledge(&self.partitions, &self.subscription, id)
        })
    }

    fn close(&mut self) -> BoxFuture<'_, Result<(), BrokerError>> {
        Box::pin(async move {
            self.release();
            Ok(())
        })
    }
}

impl Drop for MemoryConsumer {
    fn drop(&mut self) {
        self.release();
    }
}

// ═══════════════════════════════════════════════════════════════
//  Transactions
// ═══════════════════════════════════════════════════════════════

pub struct MemoryCoordinator {
    shared: Arc<Shared>,
}

impl TransactionCoordinator for MemoryCoordinator {
    fn new_transaction(&self, timeout: Duration) -> BoxFuture<'_, Result<TxnId, BrokerError>> {
        Box::pin(async move {
            let id = self.shared.state().new_transaction(timeout)?;
            tracing::trace!(txn = %id, ?timeout, "transaction opened");
            Ok(id)
        })
    }

    fn commit(&self, txn: TxnId) -> BoxFuture<'_, Result<(), BrokerError>> {
        Box::pin(async move {
            let result = self.shared.state().commit(txn);
            self.shared.notify.notify_waiters();
            result
        })
    }

    fn abort(&self, txn: TxnId) -> BoxFuture<'_, Result<(), BrokerError>> {
        Box::pin(async move {
            let result = self.shared.state().abort(txn);
            self.shared.notify.notify_waiters();
            result
        })
    }
}
