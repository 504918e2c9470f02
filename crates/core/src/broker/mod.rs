//! Message broker transport.
//!
//! `Broker` is one live session (declare, consume, publish, ack/nack);
//! `Connector` creates sessions and is what the consumption loop holds, so a
//! reconnect replaces the whole `Broker` rather than mutating shared state.
//!
//! Every delivery carries an [`Envelope`] that must be settled exactly once.

mod amqp;
mod traits;
mod types;

pub use amqp::{AmqpBroker, AmqpConnector};
pub use traits::{Broker, Connector};
pub use types::{BrokerError, Delivery, DeliveryStream, Envelope};
