//! Domain operations over one authenticated brokerage session.
//!
//! Every network-facing call here degrades to an empty or absent result
//! instead of propagating a fault: the polling loop has to survive
//! transient network trouble. The engine's `start` path validates the
//! critical preconditions (auth success, account id present) explicitly,
//! since downstream calls no longer surface failures loudly.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::engine::Broker;
use crate::models::{AccountSnapshot, OrderSide, Position};

use super::session::{AuthError, BrokerSession, SessionConfig};
use super::types::{
    AccountRecord, ApiEnvelope, OrderConfirmation, PlaceOrderRequest, PositionRecord,
};

/// Client for one brokerage account connection (master or follower).
pub struct BrokerClient {
    session: BrokerSession,
}

impl BrokerClient {
    pub fn new(config: SessionConfig) -> Result<Self> {
        Ok(Self {
            session: BrokerSession::new(config)?,
        })
    }

    /// All accounts visible to this session; empty on failure.
    pub async fn list_accounts(&self) -> Vec<AccountRecord> {
        match self.fetch_envelope("/account/list").await {
            Ok(accounts) => accounts,
            Err(e) => {
                warn!(error = %e, "Account listing failed");
                Vec::new()
            }
        }
    }

    async fn fetch_envelope<T>(&self, path: &str) -> Result<T>
    where
        T: DeserializeOwned + Default,
    {
        let response = self.session.get(path).await?;
        if !response.status().is_success() {
            anyhow::bail!("{} returned {}", path, response.status());
        }

        let envelope: ApiEnvelope<T> = response
            .json()
            .await
            .with_context(|| format!("Failed to parse {path} response"))?;

        Ok(envelope.json)
    }
}

#[async_trait]
impl Broker for BrokerClient {
    async fn authenticate(&self) -> Result<(), AuthError> {
        self.session.authenticate().await
    }

    /// First account returned by the listing endpoint, or `None` when the
    /// listing is empty or the call failed.
    async fn resolve_account_id(&self) -> Option<String> {
        self.list_accounts().await.first().and_then(|a| a.id_string())
    }

    async fn list_positions(&self, account_id: &str) -> Vec<Position> {
        if account_id.is_empty() {
            return Vec::new();
        }

        let path = format!("/position/list?accountId={account_id}");
        let records: Vec<PositionRecord> = match self.fetch_envelope(&path).await {
            Ok(records) => records,
            Err(e) => {
                warn!(account_id = %account_id, error = %e, "Position fetch failed");
                return Vec::new();
            }
        };

        records
            .into_iter()
            .filter_map(|r| {
                let side = match r.side.as_str() {
                    "Buy" => OrderSide::Buy,
                    "Sell" => OrderSide::Sell,
                    other => {
                        warn!(symbol = %r.symbol, side = %other, "Unknown position side");
                        return None;
                    }
                };
                Some(Position::new(r.symbol, r.quantity, side))
            })
            .collect()
    }

    async fn account_info(&self, account_id: &str) -> Option<AccountSnapshot> {
        let path = format!("/account/{account_id}");
        match self.fetch_envelope::<Map<String, Value>>(&path).await {
            Ok(fields) => Some(AccountSnapshot::fresh(account_id, fields)),
            Err(e) => {
                warn!(account_id = %account_id, error = %e, "Balance fetch failed");
                None
            }
        }
    }

    /// Submit a live market order. The only operation with an external,
    /// irreversible effect; a timeout yields `None`, not an error.
    async fn place_order(
        &self,
        symbol: &str,
        quantity: i64,
        side: OrderSide,
        account_id: &str,
    ) -> Option<OrderConfirmation> {
        let request = PlaceOrderRequest {
            account_id,
            symbol,
            quantity: quantity.max(0) as u32,
            side,
            order_type: "Market",
            route: "TRADE",
        };

        let response = match self.session.post_json("/order/placeOrder", &request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "Order submission failed");
                return None;
            }
        };

        if !response.status().is_success() {
            warn!(symbol = %symbol, status = %response.status(), "Order rejected by brokerage");
            return None;
        }

        match response.json::<OrderConfirmation>().await {
            Ok(confirmation) => {
                debug!(symbol = %symbol, order_id = ?confirmation.order_id, "Order placed");
                Some(confirmation)
            }
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "Unreadable order confirmation");
                None
            }
        }
    }
}
