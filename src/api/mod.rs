//! Brokerage API layer: session/auth plumbing and the domain client.

mod client;
mod session;
mod types;

pub use client::BrokerClient;
pub use session::{AuthError, AuthMethod, BrokerSession, SessionConfig, DEFAULT_API_BASE};
pub use types::{AccountRecord, ApiEnvelope, OrderConfirmation, PlaceOrderRequest, PositionRecord};
