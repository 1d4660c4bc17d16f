use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{
    BasicProperties, Channel, Connection, ConnectionProperties, Consumer, ExchangeKind,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
        BasicRejectOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
    },
    types::{AMQPValue, FieldTable, LongString, ShortString},
};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    clients::{queue::QueueClient, topic::TopicClient},
    error::{QueueError, TopicError},
    models::{
        envelope::TopicEnvelope,
        message::{QueueMessage, ReceiptHandle},
    },
};

/// How long `receive` keeps filling a batch once the first message has arrived.
const BATCH_LINGER: Duration = Duration::from_millis(50);

const PERSISTENT: u8 = 2;

pub struct RabbitMqClient {
    connection: Connection,
    prefetch_count: u16,
}

impl RabbitMqClient {
    pub async fn connect(url: &str, prefetch_count: u16) -> Result<Self, QueueError> {
        info!("Connecting to RabbitMQ");

        let connection = Connection::connect(url, ConnectionProperties::default()).await?;

        info!("RabbitMQ connection established");

        Ok(Self {
            connection,
            prefetch_count,
        })
    }

    async fn channel(&self) -> Result<Channel, lapin::Error> {
        let channel = self.connection.create_channel().await?;
        channel
            .basic_qos(self.prefetch_count, BasicQosOptions::default())
            .await?;
        Ok(channel)
    }

    pub async fn queue(
        &self,
        name: &str,
        visibility_timeout: Duration,
    ) -> Result<RabbitMqQueue, QueueError> {
        let channel = self.channel().await?;
        declare_queue(&channel, name).await?;

        info!(queue = %name, "Queue declared");

        Ok(RabbitMqQueue {
            channel,
            queue_name: name.to_string(),
            visibility_timeout,
            consumer: tokio::sync::Mutex::new(None),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    pub async fn topic(&self, exchange: &str) -> Result<RabbitMqTopic, TopicError> {
        let channel = self.channel().await?;
        channel
            .exchange_declare(
                exchange,
                ExchangeKind::Fanout,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        info!(exchange = %exchange, "Topic exchange declared");

        Ok(RabbitMqTopic {
            channel,
            exchange: exchange.to_string(),
        })
    }

    pub fn health_check(&self) -> Result<(), QueueError> {
        if self.connection.status().connected() {
            Ok(())
        } else {
            Err(QueueError::Unavailable(
                "RabbitMQ connection is not open".to_string(),
            ))
        }
    }
}

async fn declare_queue(channel: &Channel, name: &str) -> Result<(), lapin::Error> {
    channel
        .queue_declare(
            name,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await?;
    Ok(())
}

/// Queue backed by a durable RabbitMQ queue.
///
/// Deliveries are tracked until deleted; one that is still outstanding when its visibility
/// timeout lapses is rejected with requeue so the broker delivers it again.
pub struct RabbitMqQueue {
    channel: Channel,
    queue_name: String,
    visibility_timeout: Duration,
    consumer: tokio::sync::Mutex<Option<Consumer>>,
    in_flight: Arc<Mutex<HashSet<u64>>>,
}

impl RabbitMqQueue {
    async fn create_consumer(&self) -> Result<Consumer, lapin::Error> {
        let tag = format!("{}-{}", self.queue_name, Uuid::new_v4());
        let consumer = self
            .channel
            .basic_consume(
                &self.queue_name,
                &tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        info!(queue = %self.queue_name, consumer_tag = %tag, "Consumer created for queue");

        Ok(consumer)
    }

    fn track(&self, delivery: lapin::message::Delivery) -> QueueMessage {
        let tag = delivery.delivery_tag;
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(tag);
        self.schedule_redelivery(tag);

        QueueMessage {
            message_id: delivery
                .properties
                .message_id()
                .as_ref()
                .map(|id| id.as_str().to_string()),
            body: String::from_utf8_lossy(&delivery.data).into_owned(),
            receipt: ReceiptHandle(tag.to_string()),
            redelivered: delivery.redelivered,
        }
    }

    fn schedule_redelivery(&self, tag: u64) {
        let channel = self.channel.clone();
        let in_flight = Arc::clone(&self.in_flight);
        let visibility_timeout = self.visibility_timeout;
        let queue = self.queue_name.clone();

        tokio::spawn(async move {
            sleep(visibility_timeout).await;

            let expired = in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&tag);
            if !expired {
                return;
            }

            debug!(queue = %queue, delivery_tag = tag, "Visibility timeout lapsed, requeueing");
            if let Err(e) = channel
                .basic_reject(tag, BasicRejectOptions { requeue: true })
                .await
            {
                warn!(queue = %queue, delivery_tag = tag, error = %e, "Failed to requeue message");
            }
        });
    }
}

#[async_trait]
impl QueueClient for RabbitMqQueue {
    async fn receive(
        &self,
        max_messages: usize,
        wait: Duration,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        let mut guard = self.consumer.lock().await;
        if guard.is_none() {
            *guard = Some(self.create_consumer().await?);
        }
        let Some(consumer) = guard.as_mut() else {
            return Err(QueueError::Unavailable("consumer unavailable".to_string()));
        };

        let mut messages = Vec::with_capacity(max_messages);
        let mut window = wait;
        let mut stream_ended = false;

        while messages.len() < max_messages {
            match timeout(window, consumer.next()).await {
                Err(_) => break,
                Ok(None) => {
                    stream_ended = true;
                    break;
                }
                Ok(Some(Err(e))) => {
                    *guard = None;
                    return Err(e.into());
                }
                Ok(Some(Ok(delivery))) => {
                    messages.push(self.track(delivery));
                    window = BATCH_LINGER;
                }
            }
        }

        if stream_ended {
            warn!(queue = %self.queue_name, "Consumer stream ended, will recreate");
            *guard = None;
            if messages.is_empty() {
                return Err(QueueError::Unavailable("consumer was cancelled".to_string()));
            }
        }

        Ok(messages)
    }

    async fn delete(&self, receipt: &ReceiptHandle) -> Result<(), QueueError> {
        let tag: u64 = receipt
            .0
            .parse()
            .map_err(|_| QueueError::ReceiptExpired(receipt.0.clone()))?;

        let outstanding = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&tag);
        if !outstanding {
            return Err(QueueError::ReceiptExpired(receipt.0.clone()));
        }

        self.channel
            .basic_ack(tag, BasicAckOptions::default())
            .await?;

        Ok(())
    }

    fn is_receipt_live(&self, receipt: &ReceiptHandle) -> bool {
        receipt.0.parse::<u64>().is_ok_and(|tag| {
            self.in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .contains(&tag)
        })
    }

    async fn send(&self, body: &str) -> Result<String, QueueError> {
        let message_id = Uuid::new_v4().to_string();

        self.channel
            .basic_publish(
                "",
                &self.queue_name,
                BasicPublishOptions::default(),
                body.as_bytes(),
                BasicProperties::default()
                    .with_delivery_mode(PERSISTENT)
                    .with_content_type(ShortString::from("application/json"))
                    .with_message_id(ShortString::from(message_id.clone())),
            )
            .await?
            .await?;

        Ok(message_id)
    }

    fn name(&self) -> &str {
        &self.queue_name
    }
}

/// Topic backed by a durable fanout exchange.
pub struct RabbitMqTopic {
    channel: Channel,
    exchange: String,
}

impl RabbitMqTopic {
    /// Subscribes `queue` to every message published on this topic.
    pub async fn bind_queue(&self, queue: &str) -> Result<(), TopicError> {
        declare_queue(&self.channel, queue).await?;
        self.channel
            .queue_bind(
                queue,
                &self.exchange,
                "",
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;

        info!(exchange = %self.exchange, queue = %queue, "Queue bound to topic");

        Ok(())
    }
}

#[async_trait]
impl TopicClient for RabbitMqTopic {
    async fn publish(
        &self,
        body: &str,
        attributes: &HashMap<String, String>,
    ) -> Result<String, TopicError> {
        let message_id = Uuid::new_v4().to_string();
        let envelope = TopicEnvelope::wrap(&self.exchange, message_id.clone(), body, attributes);
        let payload = serde_json::to_vec(&envelope)?;

        let mut headers = FieldTable::default();
        for (key, value) in attributes {
            headers.insert(
                ShortString::from(key.clone()),
                AMQPValue::LongString(LongString::from(value.clone())),
            );
        }

        self.channel
            .basic_publish(
                &self.exchange,
                "",
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default()
                    .with_delivery_mode(PERSISTENT)
                    .with_content_type(ShortString::from("application/json"))
                    .with_message_id(ShortString::from(message_id.clone()))
                    .with_headers(headers),
            )
            .await?
            .await?;

        debug!(exchange = %self.exchange, message_id = %message_id, "Published to topic");

        Ok(message_id)
    }
}
