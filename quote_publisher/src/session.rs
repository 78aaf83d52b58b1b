//! Broker session seam.
//!
//! The publisher never talks to a vendor SDK directly. A `BrokerSession` exposes
//! the subscribe calls, and the publisher registers itself as the
//! `SessionEvents` handler the session drives from its callback context.

use std::sync::Arc;

use quote_common::{InstrumentKey, RawTick, Result};
use serde_json::Value;

/// Capabilities the publisher needs from a broker streaming session.
pub trait BrokerSession: Send + Sync {
    /// Registers `events` as the callback target and starts streaming.
    fn start(&self, events: Arc<dyn SessionEvents>) -> Result<()>;

    /// Subscribes to touchline updates for one instrument.
    fn subscribe(&self, key: &InstrumentKey) -> Result<()>;

    /// Subscribes to order updates.
    fn subscribe_orders(&self) -> Result<()>;

    /// Closes the streaming connection.
    fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Callbacks a broker session delivers. Implementations must not panic and
/// must not propagate failures back into the session.
pub trait SessionEvents: Send + Sync {
    /// A touchline update.
    fn on_quote_update(&self, tick: RawTick);

    /// A broker-native touchline message that still needs normalizing.
    fn on_broker_quote(&self, message: &Value) {
        match RawTick::from_broker_json(message) {
            Ok(tick) => self.on_quote_update(tick),
            Err(e) => log::warn!("Dropping undecodable tick: {}", e),
        }
    }

    /// An order event, forwarded verbatim.
    fn on_order_update(&self, event: &Value);

    /// The streaming connection is open.
    fn on_opened(&self);

    /// The streaming connection closed.
    fn on_closed(&self);

    /// The session reported an error.
    fn on_error(&self, error: &str);
}
