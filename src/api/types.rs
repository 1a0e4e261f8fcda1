//! Wire types for the brokerage REST API.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::models::OrderSide;

/// Standard response envelope: the payload lives under a `json` key.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiEnvelope<T> {
    #[serde(default)]
    pub json: T,
}

/// Token exchange request for the API-key auth variant.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyAuthRequest<'a> {
    pub authorization_token: &'a str,
}

/// Token exchange request for the username/password variant.
#[derive(Debug, Serialize)]
pub struct CredentialAuthRequest<'a> {
    pub name: &'a str,
    pub password: &'a str,
}

/// Response from either token endpoint. Some deployments use snake_case.
#[derive(Debug, Deserialize)]
pub struct AuthTokenResponse {
    #[serde(rename = "accessToken", alias = "access_token")]
    pub access_token: Option<String>,
}

/// One account from the account-listing endpoint. Only the id matters to
/// us; everything else is carried opaquely.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountRecord {
    #[serde(default)]
    pub id: Value,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AccountRecord {
    /// The account id as a string, whether the wire sent a number or a
    /// string.
    pub fn id_string(&self) -> Option<String> {
        match &self.id {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// One open position from the position-listing endpoint. The side arrives
/// as a free-form string and is validated by the client.
#[derive(Debug, Clone, Deserialize)]
pub struct PositionRecord {
    pub symbol: String,

    #[serde(default)]
    pub quantity: i64,

    #[serde(default)]
    pub side: String,
}

/// Market order submission.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrderRequest<'a> {
    pub account_id: &'a str,
    pub symbol: &'a str,
    pub quantity: u32,
    pub side: OrderSide,
    pub order_type: &'a str,
    pub route: &'a str,
}

/// Order confirmation. The brokerage returns a heterogeneous object; we
/// pull the order id out when present and keep the rest opaque.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderConfirmation {
    #[serde(default, rename = "orderId", alias = "order_id")]
    pub order_id: Option<i64>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_list_envelope() {
        let body = r#"{"json": [{"id": 12345, "name": "DEMO-1", "active": true}]}"#;
        let envelope: ApiEnvelope<Vec<AccountRecord>> = serde_json::from_str(body).unwrap();

        assert_eq!(envelope.json.len(), 1);
        assert_eq!(envelope.json[0].id_string().as_deref(), Some("12345"));
        assert_eq!(envelope.json[0].extra["name"], "DEMO-1");
    }

    #[test]
    fn test_string_account_id() {
        let body = r#"{"json": [{"id": "ACC-9"}]}"#;
        let envelope: ApiEnvelope<Vec<AccountRecord>> = serde_json::from_str(body).unwrap();

        assert_eq!(envelope.json[0].id_string().as_deref(), Some("ACC-9"));
    }

    #[test]
    fn test_missing_account_id() {
        let body = r#"{"json": [{"name": "no id here"}]}"#;
        let envelope: ApiEnvelope<Vec<AccountRecord>> = serde_json::from_str(body).unwrap();

        assert!(envelope.json[0].id_string().is_none());
    }

    #[test]
    fn test_position_list_envelope() {
        let body = r#"{"json": [{"symbol": "MNQZ4", "quantity": 2, "side": "Buy"}]}"#;
        let envelope: ApiEnvelope<Vec<PositionRecord>> = serde_json::from_str(body).unwrap();

        assert_eq!(envelope.json[0].symbol, "MNQZ4");
        assert_eq!(envelope.json[0].quantity, 2);
        assert_eq!(envelope.json[0].side, "Buy");
    }

    #[test]
    fn test_empty_envelope_defaults() {
        let body = r#"{}"#;
        let envelope: ApiEnvelope<Vec<PositionRecord>> = serde_json::from_str(body).unwrap();

        assert!(envelope.json.is_empty());
    }

    #[test]
    fn test_auth_token_aliases() {
        let camel: AuthTokenResponse = serde_json::from_str(r#"{"accessToken": "abc"}"#).unwrap();
        let snake: AuthTokenResponse = serde_json::from_str(r#"{"access_token": "abc"}"#).unwrap();

        assert_eq!(camel.access_token.as_deref(), Some("abc"));
        assert_eq!(snake.access_token.as_deref(), Some("abc"));
    }

    #[test]
    fn test_order_confirmation_shapes() {
        let direct: OrderConfirmation =
            serde_json::from_str(r#"{"orderId": 77, "status": "Working"}"#).unwrap();
        assert_eq!(direct.order_id, Some(77));

        let bare: OrderConfirmation = serde_json::from_str(r#"{"ok": true}"#).unwrap();
        assert_eq!(bare.order_id, None);
    }

    #[test]
    fn test_place_order_request_wire_shape() {
        let req = PlaceOrderRequest {
            account_id: "123",
            symbol: "ESZ4",
            quantity: 3,
            side: OrderSide::Sell,
            order_type: "Market",
            route: "TRADE",
        };

        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["accountId"], "123");
        assert_eq!(value["orderType"], "Market");
        assert_eq!(value["side"], "Sell");
    }
}
