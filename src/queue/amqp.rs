use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicQosOptions, BasicRejectOptions,
    QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{Channel, Connection, ConnectionProperties, Consumer};

use crate::error::Result;
use crate::queue::{Delivery, WorkQueue};

const CONSUMER_TAG: &str = "provision-worker";

/// AMQP work queue: durable, prefetch one, manual acknowledgement.
pub struct AmqpQueue {
    // Held so the connection outlives the consumer.
    _connection: Connection,
    _channel: Channel,
    consumer: Consumer,
}

impl AmqpQueue {
    pub async fn connect(url: &str, queue: &str) -> Result<Self> {
        let connection = Connection::connect(url, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;

        channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await?;
        channel.basic_qos(1, BasicQosOptions::default()).await?;

        let consumer = channel
            .basic_consume(
                queue,
                CONSUMER_TAG,
                BasicConsumeOptions {
                    no_ack: false,
                    ..BasicConsumeOptions::default()
                },
                FieldTable::default(),
            )
            .await?;

        tracing::info!(queue, "Consuming from AMQP queue");
        Ok(Self {
            _connection: connection,
            _channel: channel,
            consumer,
        })
    }
}

#[async_trait]
impl WorkQueue for AmqpQueue {
    async fn next(&mut self) -> Result<Option<Box<dyn Delivery>>> {
        match self.consumer.next().await {
            Some(Ok(delivery)) => Ok(Some(Box::new(AmqpDelivery(delivery)))),
            Some(Err(e)) => Err(e.into()),
            None => Ok(None),
        }
    }
}

struct AmqpDelivery(lapin::message::Delivery);

#[async_trait]
impl Delivery for AmqpDelivery {
    fn payload(&self) -> &[u8] {
        &self.0.data
    }

    async fn ack(self: Box<Self>) -> Result<()> {
        self.0.acker.ack(BasicAckOptions::default()).await?;
        Ok(())
    }

    async fn reject(self: Box<Self>) -> Result<()> {
        self.0
            .acker
            .reject(BasicRejectOptions { requeue: false })
            .await?;
        Ok(())
    }
}
