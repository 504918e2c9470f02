//! RabbitMQ (AMQP 0-9-1) broker backed by `lapin`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::{
    protocol::{AMQPErrorKind, AMQPSoftError},
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
        BasicQosOptions, ConfirmSelectOptions, QueueDeclareOptions,
    },
    types::FieldTable,
    BasicProperties, Channel, Connection, ConnectionProperties,
};
use tracing::{debug, info};

use crate::config::BrokerConfig;

use super::traits::{Broker, Connector};
use super::types::{BrokerError, Delivery, DeliveryStream, Envelope};

/// AMQP persistent delivery mode.
const PERSISTENT: u8 = 2;

/// Opens AMQP sessions for a [`BrokerConfig`].
pub struct AmqpConnector {
    config: BrokerConfig,
    prefetch: u16,
}

impl AmqpConnector {
    /// `prefetch` bounds unacknowledged deliveries held by this worker.
    pub fn new(config: BrokerConfig, prefetch: u16) -> Self {
        Self { config, prefetch }
    }
}

#[async_trait]
impl Connector for AmqpConnector {
    async fn connect(&self) -> Result<Arc<dyn Broker>, BrokerError> {
        let timeout = Duration::from_secs(self.config.connect_timeout_secs);
        let endpoint = format!("{}:{}", self.config.host, self.config.port);

        let connection = tokio::time::timeout(
            timeout,
            Connection::connect(&self.config.amqp_uri(), ConnectionProperties::default()),
        )
        .await
        .map_err(|_| {
            BrokerError::Connection(format!(
                "timed out after {}s connecting to {}",
                timeout.as_secs(),
                endpoint
            ))
        })?
        .map_err(|e| BrokerError::Connection(format!("{}: {}", endpoint, e)))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| BrokerError::Connection(format!("failed to open channel: {}", e)))?;

        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| BrokerError::Connection(format!("failed to enable confirms: {}", e)))?;

        channel
            .basic_qos(self.prefetch, BasicQosOptions::default())
            .await
            .map_err(|e| BrokerError::Connection(format!("failed to set prefetch: {}", e)))?;

        info!(endpoint = %endpoint, prefetch = self.prefetch, "Connected to AMQP broker");

        Ok(Arc::new(AmqpBroker {
            _connection: connection,
            channel,
        }))
    }
}

/// One AMQP connection with a single confirm-mode channel.
///
/// The lapin channel serializes frames internally, so it is shared by every
/// worker task.
pub struct AmqpBroker {
    _connection: Connection,
    channel: Channel,
}

/// The broker closed the channel with 406 PRECONDITION_FAILED, which is how
/// it refuses a redeclaration with different queue arguments.
fn is_precondition_failure(error: &lapin::Error) -> bool {
    matches!(
        error,
        lapin::Error::ProtocolError(e)
            if matches!(e.kind(), AMQPErrorKind::Soft(AMQPSoftError::PRECONDITIONFAILED))
    )
}

#[async_trait]
impl Broker for AmqpBroker {
    fn name(&self) -> &str {
        "amqp"
    }

    async fn declare_queue(&self, name: &str, durable: bool) -> Result<(), BrokerError> {
        let options = QueueDeclareOptions {
            durable,
            ..Default::default()
        };

        match self
            .channel
            .queue_declare(name, options, FieldTable::default())
            .await
        {
            Ok(queue) => {
                debug!(
                    queue = name,
                    durable,
                    messages = queue.message_count(),
                    "Declared queue"
                );
                Ok(())
            }
            Err(e) if is_precondition_failure(&e) => Err(BrokerError::ConfigMismatch {
                queue: name.to_string(),
                reason: e.to_string(),
            }),
            Err(e) => Err(BrokerError::Connection(format!(
                "declaring {} failed: {}",
                name, e
            ))),
        }
    }

    async fn consume(&self, queue: &str) -> Result<DeliveryStream, BrokerError> {
        let consumer = self
            .channel
            .basic_consume(
                queue,
                "",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::Consume {
                queue: queue.to_string(),
                reason: e.to_string(),
            })?;

        let queue = queue.to_string();
        let stream = consumer.map(move |result| match result {
            Ok(delivery) => Ok(Delivery {
                envelope: Envelope::new(delivery.delivery_tag, delivery.redelivered),
                correlation_id: delivery
                    .properties
                    .correlation_id()
                    .as_ref()
                    .map(|id| id.as_str().to_string()),
                body: delivery.data,
            }),
            Err(e) => Err(BrokerError::Consume {
                queue: queue.clone(),
                reason: e.to_string(),
            }),
        });

        Ok(stream.boxed())
    }

    async fn publish(
        &self,
        queue: &str,
        body: &[u8],
        correlation_id: Option<&str>,
    ) -> Result<(), BrokerError> {
        let publish_error = |reason: String| BrokerError::Publish {
            queue: queue.to_string(),
            reason,
        };

        let mut properties = BasicProperties::default()
            .with_delivery_mode(PERSISTENT)
            .with_content_type("application/json".into());
        if let Some(id) = correlation_id {
            properties = properties.with_correlation_id(id.into());
        }

        let confirmation = self
            .channel
            .basic_publish("", queue, BasicPublishOptions::default(), body, properties)
            .await
            .map_err(|e| publish_error(e.to_string()))?
            .await
            .map_err(|e| publish_error(e.to_string()))?;

        if confirmation.is_nack() {
            return Err(publish_error("broker rejected the message".to_string()));
        }
        Ok(())
    }

    async fn ack(&self, envelope: &Envelope) -> Result<(), BrokerError> {
        envelope.mark_settled()?;
        self.channel
            .basic_ack(envelope.delivery_tag(), BasicAckOptions::default())
            .await
            .map_err(|e| BrokerError::Acknowledge {
                delivery_tag: envelope.delivery_tag(),
                reason: e.to_string(),
            })
    }

    async fn nack(&self, envelope: &Envelope, requeue: bool) -> Result<(), BrokerError> {
        envelope.mark_settled()?;
        self.channel
            .basic_nack(
                envelope.delivery_tag(),
                BasicNackOptions {
                    multiple: false,
                    requeue,
                },
            )
            .await
            .map_err(|e| BrokerError::Acknowledge {
                delivery_tag: envelope.delivery_tag(),
                reason: e.to_string(),
            })
    }
}
