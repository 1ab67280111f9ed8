//! Producing to and consuming from topics with typed schemas.
//!
//! Every call acquires its own producer or consumer and closes it before
//! returning, on the error path too. Consumers bind to the durable,
//! exclusive `SUBSCRIPTION_NAME` subscription, so two of them must not run
//! against the same topic at once.

use std::time::Duration;

use broker_api::{
    BrokerError, Consumer, ConsumerOptions, InitialPosition, Message, MessageId, OutgoingMessage, Producer,
    ProducerAccessMode, ProducerOptions, RawMessage, Schema, SubscriptionMode, SubscriptionType,
};

use crate::error::{Context, OperatorError};
use crate::operator::{DRAIN_TIMEOUT, RuntimeOperator, SUBSCRIPTION_NAME};

fn decode<T>(schema: &dyn Schema<T>, raw: RawMessage) -> Result<Message<T>, BrokerError> {
    let value = schema.decode(&raw.payload)?;
    Ok(Message {
        id: raw.id,
        topic: raw.topic,
        key: raw.key,
        value,
        publish_time_ms: raw.publish_time_ms,
    })
}

/// Combine the outcome of a scoped call with the outcome of releasing its
/// resource. The call's own error wins.
fn settle<R>(result: Result<R, OperatorError>, closed: Result<(), OperatorError>) -> Result<R, OperatorError> {
    match (result, closed) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(close_err)) => {
            tracing::warn!(error = %close_err, "release failed after error");
            Err(e)
        }
    }
}

fn first_id(topic: &str, ids: Vec<MessageId>) -> Result<MessageId, OperatorError> {
    ids.into_iter().next().ok_or_else(|| {
        OperatorError::broker(
            format!("send to '{topic}'"),
            BrokerError::unavailable("broker returned no message id"),
        )
    })
}

async fn receive_and_ack<T>(
    consumer: &mut dyn Consumer,
    schema: &dyn Schema<T>,
) -> Result<Message<T>, BrokerError> {
    let raw = consumer.receive().await?;
    let message = decode(schema, raw)?;
    consumer.acknowledge(message.id).await?;
    Ok(message)
}

impl RuntimeOperator {
    /// Producer on `topic` with batching off, multi-schema on and shared
    /// access. The caller closes it.
    pub async fn create_producer<T>(&self, topic: &str, schema: &dyn Schema<T>) -> Result<Box<dyn Producer>, OperatorError> {
        let options = ProducerOptions {
            schema: schema.schema_info(),
            batching_enabled: false,
            multi_schema: true,
            access_mode: ProducerAccessMode::Shared,
            ..ProducerOptions::default()
        };
        self.client
            .create_producer(topic, options)
            .await
            .context(|| format!("create producer on '{topic}'"))
    }

    /// Durable exclusive consumer on the operator subscription. The
    /// subscription is created at the earliest position if missing.
    pub async fn create_consumer<T>(&self, topic: &str, schema: &dyn Schema<T>) -> Result<Box<dyn Consumer>, OperatorError> {
        let subscriptions = self
            .admin
            .subscriptions(topic)
            .await
            .context(|| format!("list subscriptions of '{topic}'"))?;
        if !subscriptions.iter().any(|s| s == SUBSCRIPTION_NAME) {
            self.admin
                .create_subscription(topic, SUBSCRIPTION_NAME, InitialPosition::Earliest)
                .await
                .context(|| format!("create subscription on '{topic}'"))?;
            tracing::debug!(topic, subscription = SUBSCRIPTION_NAME, "subscription created");
        }

        let options = ConsumerOptions {
            subscription: SUBSCRIPTION_NAME.to_string(),
            mode: SubscriptionMode::Durable,
            kind: SubscriptionType::Exclusive,
            initial_position: InitialPosition::Earliest,
            schema: schema.schema_info(),
        };
        self.client
            .subscribe(topic, options)
            .await
            .context(|| format!("subscribe to '{topic}'"))
    }

    pub async fn send_message<T>(
        &self,
        topic: &str,
        schema: &dyn Schema<T>,
        key: Option<&str>,
        message: &T,
    ) -> Result<MessageId, OperatorError> {
        let ids = self
            .send_messages(topic, schema, key, std::slice::from_ref(message))
            .await?;
        first_id(topic, ids)
    }

    /// Send `messages` in order and flush. A non-empty `key` is attached to
    /// every message. Returns the ids in input order.
    pub async fn send_messages<T>(
        &self,
        topic: &str,
        schema: &dyn Schema<T>,
        key: Option<&str>,
        messages: &[T],
    ) -> Result<Vec<MessageId>, OperatorError> {
        let mut producer = self.create_producer(topic, schema).await?;
        let key = key.filter(|k| !k.is_empty());

        let result = async {
            let mut ids = Vec::with_capacity(messages.len());
            for message in messages {
                let outgoing = OutgoingMessage {
                    key: key.map(str::to_string),
                    payload: schema.encode(message)?,
                    txn: None,
                };
                ids.push(producer.send(outgoing).await?);
            }
            producer.flush().await?;
            Ok::<_, BrokerError>(ids)
        }
        .await
        .context(|| format!("send to '{topic}'"));

        let closed = producer.close().await.context(|| format!("close producer on '{topic}'"));
        let ids = settle(result, closed)?;
        tracing::debug!(topic, count = ids.len(), "messages sent");
        Ok(ids)
    }

    /// Wait until a message arrives, acknowledge it and return it.
    pub async fn receive_message<T>(&self, topic: &str, schema: &dyn Schema<T>) -> Result<Message<T>, OperatorError> {
        let mut consumer = self.create_consumer(topic, schema).await?;
        let result = receive_and_ack(consumer.as_mut(), schema)
            .await
            .context(|| format!("receive from '{topic}'"));
        let closed = consumer.close().await.context(|| format!("close consumer on '{topic}'"));
        settle(result, closed)
    }

    /// Like `receive_message`, but gives up after `timeout` and returns
    /// `None`. Running out of time is not an error.
    pub async fn receive_message_timeout<T>(
        &self,
        topic: &str,
        schema: &dyn Schema<T>,
        timeout: Duration,
    ) -> Result<Option<Message<T>>, OperatorError> {
        let mut consumer = self.create_consumer(topic, schema).await?;

        let result = match tokio::time::timeout(timeout, consumer.receive()).await {
            Err(_) => Ok(None),
            Ok(Err(e)) => Err(e),
            Ok(Ok(raw)) => match decode(schema, raw) {
                Ok(message) => consumer.acknowledge(message.id).await.map(|()| Some(message)),
                Err(e) => Err(e),
            },
        }
        .context(|| format!("receive from '{topic}'"));

        let closed = consumer.close().await.context(|| format!("close consumer on '{topic}'"));
        settle(result, closed)
    }

    /// `0` returns nothing, a negative count drains the topic (bounded by
    /// `DRAIN_TIMEOUT` per receive), otherwise exactly `count` messages are
    /// received in arrival order.
    pub async fn receive_messages<T>(
        &self,
        topic: &str,
        schema: &dyn Schema<T>,
        count: i32,
    ) -> Result<Vec<Message<T>>, OperatorError> {
        if count == 0 {
            return Ok(Vec::new());
        }
        if count < 0 {
            return self.receive_all_messages(topic, schema, DRAIN_TIMEOUT).await;
        }
        if count == 1 {
            return Ok(vec![self.receive_message(topic, schema).await?]);
        }

        let mut consumer = self.create_consumer(topic, schema).await?;
        let result = async {
            let mut messages = Vec::with_capacity(count as usize);
            for _ in 0..count {
                messages.push(receive_and_ack(consumer.as_mut(), schema).await?);
            }
            Ok::<_, BrokerError>(messages)
        }
        .await
        .context(|| format!("receive {count} messages from '{topic}'"));

        let closed = consumer.close().await.context(|| format!("close consumer on '{topic}'"));
        settle(result, closed)
    }

    /// Receive until nothing arrives within `timeout`. Returns only once
    /// production has stopped for at least `timeout`.
    pub async fn receive_all_messages<T>(
        &self,
        topic: &str,
        schema: &dyn Schema<T>,
        timeout: Duration,
    ) -> Result<Vec<Message<T>>, OperatorError> {
        let mut messages = Vec::new();
        while let Some(message) = self.receive_message_timeout(topic, schema, timeout).await? {
            messages.push(message);
        }
        tracing::debug!(topic, count = messages.len(), "topic drained");
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use broker_api::ErrorKind;

    #[test]
    fn missing_message_id_is_a_broker_failure() {
        let err = first_id("orders", Vec::new()).unwrap_err();
        assert!(matches!(err, OperatorError::Broker { .. }));
        assert_eq!(err.kind(), ErrorKind::Unavailable);
    }
}
