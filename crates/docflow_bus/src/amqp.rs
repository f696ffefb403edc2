//! AMQP 0-9-1 transport (RabbitMQ), enabled with the `amqp` feature.
//!
//! Pipeline queues are durable quorum queues dead-lettering through the
//! default exchange into [`DEAD_LETTER`]. Quorum queues stamp
//! `x-delivery-count`, which feeds the redelivery limit.

use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
    ConfirmSelectOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable, LongString, ShortString};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer};
use tracing::{info, warn};

use docflow_protocol::queues::DEAD_LETTER;

use crate::broker::{Broker, Delivery, Subscription};
use crate::error::BrokerError;

const PERSISTENT_DELIVERY_MODE: u8 = 2;

pub struct AmqpBroker {
    connection: Connection,
    channel: Channel,
}

impl AmqpBroker {
    pub async fn connect(url: &str) -> Result<Self, BrokerError> {
        let unreachable = |e: lapin::Error| BrokerError::Unreachable {
            url: url.split('@').last().unwrap_or(url).to_string(),
            reason: e.to_string(),
        };
        let connection = Connection::connect(url, ConnectionProperties::default())
            .await
            .map_err(unreachable)?;
        let channel = connection.create_channel().await.map_err(protocol)?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(protocol)?;
        info!("Connected to AMQP broker");
        Ok(Self {
            connection,
            channel,
        })
    }
}

#[async_trait]
impl Broker for AmqpBroker {
    async fn declare_queue(&self, queue: &str, durable: bool) -> Result<(), BrokerError> {
        let mut arguments = FieldTable::default();
        if queue != DEAD_LETTER {
            arguments.insert(
                ShortString::from("x-queue-type"),
                AMQPValue::LongString(LongString::from("quorum")),
            );
            arguments.insert(
                ShortString::from("x-dead-letter-exchange"),
                AMQPValue::LongString(LongString::from("")),
            );
            arguments.insert(
                ShortString::from("x-dead-letter-routing-key"),
                AMQPValue::LongString(LongString::from(DEAD_LETTER)),
            );
        }
        self.channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable,
                    ..QueueDeclareOptions::default()
                },
                arguments,
            )
            .await
            .map_err(protocol)?;
        Ok(())
    }

    async fn publish(&self, queue: &str, body: Vec<u8>, persistent: bool) -> Result<(), BrokerError> {
        let properties = if persistent {
            BasicProperties::default().with_delivery_mode(PERSISTENT_DELIVERY_MODE)
        } else {
            BasicProperties::default()
        };
        let confirm = self
            .channel
            .basic_publish("", queue, BasicPublishOptions::default(), &body, properties)
            .await
            .map_err(protocol)?;
        let confirmation = confirm.await.map_err(protocol)?;
        if confirmation.is_nack() {
            return Err(BrokerError::Protocol(format!(
                "broker refused publish to '{queue}'"
            )));
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        queue: &str,
        prefetch: u16,
    ) -> Result<Box<dyn Subscription>, BrokerError> {
        // dedicated channel so QoS and acks stay per consumer
        let channel = self.connection.create_channel().await.map_err(protocol)?;
        channel
            .basic_qos(prefetch.max(1), BasicQosOptions::default())
            .await
            .map_err(protocol)?;
        let consumer = channel
            .basic_consume(
                queue,
                &format!("docflow-{queue}"),
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(protocol)?;
        Ok(Box::new(AmqpSubscription {
            queue: queue.to_string(),
            channel,
            consumer,
        }))
    }

    async fn close(&self) -> Result<(), BrokerError> {
        if let Err(e) = self.channel.close(200, "closing").await {
            warn!(error = %e, "AMQP channel close failed");
        }
        self.connection.close(200, "closing").await.map_err(protocol)
    }
}

struct AmqpSubscription {
    queue: String,
    channel: Channel,
    consumer: Consumer,
}

#[async_trait]
impl Subscription for AmqpSubscription {
    fn queue(&self) -> &str {
        &self.queue
    }

    async fn next_delivery(&mut self) -> Option<Result<Delivery, BrokerError>> {
        let delivery = match self.consumer.next().await? {
            Ok(delivery) => delivery,
            Err(e) => return Some(Err(protocol(e))),
        };
        let attempt = delivery_count(&delivery)
            .map(|count| count + 1)
            .unwrap_or(if delivery.redelivered { 2 } else { 1 });
        Some(Ok(Delivery {
            tag: delivery.delivery_tag,
            body: delivery.data,
            attempt,
        }))
    }

    async fn ack(&mut self, tag: u64) -> Result<(), BrokerError> {
        self.channel
            .basic_ack(tag, BasicAckOptions::default())
            .await
            .map_err(protocol)
    }

    async fn nack(&mut self, tag: u64, requeue: bool) -> Result<(), BrokerError> {
        self.channel
            .basic_nack(
                tag,
                BasicNackOptions {
                    multiple: false,
                    requeue,
                },
            )
            .await
            .map_err(protocol)
    }
}

fn delivery_count(delivery: &lapin::message::Delivery) -> Option<u32> {
    let headers = delivery.properties.headers().as_ref()?;
    headers
        .inner()
        .iter()
        .find(|(key, _)| key.as_str() == "x-delivery-count")
        .and_then(|(_, value)| match value {
            AMQPValue::LongLongInt(n) => u32::try_from(*n).ok(),
            AMQPValue::LongInt(n) => u32::try_from(*n).ok(),
            AMQPValue::LongUInt(n) => Some(*n),
            _ => None,
        })
}

fn protocol(e: lapin::Error) -> BrokerError {
    BrokerError::Protocol(e.to_string())
}
