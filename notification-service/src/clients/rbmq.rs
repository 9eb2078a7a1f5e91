use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use lapin::{
    BasicProperties, Channel, Connection, ConnectionProperties, Consumer, ExchangeKind,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
        BasicRejectOptions, ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions,
        QueueDeclareOptions,
    },
    types::{AMQPValue, FieldTable},
};
use tracing::{debug, error, info};

use crate::config::QueueTopology;

/// Sends serialized notification messages to the notification exchange.
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    async fn publish(&self, routing_key: &str, payload: &[u8]) -> Result<(), Error>;
}

pub struct RabbitMqClient {
    connection: Connection,
    channel: Channel,
    exchange: String,
}

impl RabbitMqClient {
    pub async fn connect(rabbitmq_url: &str, exchange: &str) -> Result<Self, Error> {
        info!("Connecting to RabbitMQ");

        let connection = Connection::connect(rabbitmq_url, ConnectionProperties::default())
            .await
            .map_err(|e| anyhow!("Failed to connect to RabbitMQ: {}", e))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|_| anyhow!("RabbitMQ channel creation failed"))?;

        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|_| anyhow!("Failed to enable publisher confirms"))?;

        info!("RabbitMQ connection established");

        Ok(Self {
            connection,
            channel,
            exchange: exchange.to_string(),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connection.status().connected()
    }

    /// Declares the exchanges, queues and bindings the pipeline relies on.
    /// Idempotent as long as the broker holds matching definitions.
    pub async fn declare_topology(&self, topology: &QueueTopology) -> Result<(), Error> {
        let durable_exchange = ExchangeDeclareOptions {
            durable: true,
            ..Default::default()
        };

        self.channel
            .exchange_declare(
                &topology.exchange,
                ExchangeKind::Topic,
                durable_exchange,
                FieldTable::default(),
            )
            .await
            .map_err(|e| anyhow!("Failed to declare notification exchange: {}", e))?;

        self.channel
            .exchange_declare(
                &topology.dead_letter_exchange,
                ExchangeKind::Direct,
                durable_exchange,
                FieldTable::default(),
            )
            .await
            .map_err(|e| anyhow!("Failed to declare dead letter exchange: {}", e))?;

        self.declare_queue(&topology.dead_letter_queue, FieldTable::default())
            .await?;
        self.bind(
            &topology.dead_letter_queue,
            &topology.dead_letter_exchange,
            &topology.dead_letter_routing_key,
        )
        .await?;

        let mut general_args = dead_letter_args(topology);
        general_args.insert(
            "x-message-ttl".into(),
            AMQPValue::LongInt(topology.message_ttl_arg()?),
        );

        let primary = [
            (
                &topology.notification_queue,
                &topology.notification_routing_key,
                general_args,
            ),
            (
                &topology.email_queue,
                &topology.email_routing_key,
                dead_letter_args(topology),
            ),
            (
                &topology.property_notification_queue,
                &topology.property_notification_routing_key,
                dead_letter_args(topology),
            ),
        ];

        for (queue, routing_key, args) in primary {
            self.declare_queue(queue, args).await?;
            self.bind(queue, &topology.exchange, routing_key).await?;
        }

        for queue in &topology.event_queues {
            self.declare_queue(queue, FieldTable::default()).await?;
        }

        info!(exchange = %topology.exchange, "Broker topology declared");
        Ok(())
    }

    async fn declare_queue(&self, queue: &str, args: FieldTable) -> Result<(), Error> {
        self.channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                args,
            )
            .await
            .map_err(|e| anyhow!("Failed to declare queue {}: {}", queue, e))?;

        debug!(queue, "Queue declared");
        Ok(())
    }

    async fn bind(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<(), Error> {
        self.channel
            .queue_bind(
                queue,
                exchange,
                routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| anyhow!("Failed to bind queue {}: {}", queue, e))?;

        Ok(())
    }

    /// Opens a dedicated channel with its own prefetch and starts consuming `queue`.
    pub async fn create_consumer(
        &self,
        queue: &str,
        consumer_tag: &str,
        prefetch_count: u16,
    ) -> Result<QueueWorker, Error> {
        let channel = self
            .connection
            .create_channel()
            .await
            .map_err(|_| anyhow!("RabbitMQ channel creation failed"))?;

        channel
            .basic_qos(prefetch_count, BasicQosOptions::default())
            .await
            .map_err(|_| anyhow!("Failed to set up QoS"))?;

        let consumer = channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| anyhow!("Failed to create consumer for {}: {}", queue, e))?;

        debug!(queue, consumer_tag, "Consumer created");

        Ok(QueueWorker { channel, consumer })
    }
}

#[async_trait]
impl MessagePublisher for RabbitMqClient {
    async fn publish(&self, routing_key: &str, payload: &[u8]) -> Result<(), Error> {
        let confirmation = self
            .channel
            .basic_publish(
                &self.exchange,
                routing_key,
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default()
                    .with_delivery_mode(2)
                    .with_content_type("application/json".into()),
            )
            .await
            .map_err(|e| anyhow!("Failed to publish message: {}", e))?
            .await
            .map_err(|e| anyhow!("Failed to confirm message: {}", e))?;

        if confirmation.is_nack() {
            error!(routing_key, "Broker refused published message");
            return Err(anyhow!("Broker nacked message for {}", routing_key));
        }

        Ok(())
    }
}

fn dead_letter_args(topology: &QueueTopology) -> FieldTable {
    let mut args = FieldTable::default();
    args.insert(
        "x-dead-letter-exchange".into(),
        AMQPValue::LongString(topology.dead_letter_exchange.clone().into()),
    );
    args.insert(
        "x-dead-letter-routing-key".into(),
        AMQPValue::LongString(topology.dead_letter_routing_key.clone().into()),
    );
    args
}

/// One consumer worker: its own channel and the delivery stream bound to it.
pub struct QueueWorker {
    channel: Channel,
    pub consumer: Consumer,
}

impl QueueWorker {
    pub async fn acknowledge(&self, delivery_tag: u64) -> Result<(), Error> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|_| anyhow!("Failed to acknowledge message"))?;

        Ok(())
    }

    pub async fn reject(&self, delivery_tag: u64, requeue: bool) -> Result<(), Error> {
        self.channel
            .basic_reject(delivery_tag, BasicRejectOptions { requeue })
            .await
            .map_err(|_| anyhow!("Failed to reject message"))?;

        Ok(())
    }
}
