//! Pure reconciliation policy: diff the master and follower position sets
//! into a deterministic list of corrective order intents.
//!
//! The policy is additive/corrective only. Positions open on the follower
//! but absent on the master are never closed here; that asymmetry is a
//! deliberate scope limit.

use std::collections::HashMap;

use serde::Serialize;

use crate::models::{OrderSide, Position};

/// Whether an intent opens a fresh position or corrects an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IntentKind {
    Open,
    Adjust,
}

/// A computed (symbol, quantity, side) instruction not yet submitted to
/// the brokerage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderIntent {
    pub symbol: String,
    pub quantity: u32,
    pub side: OrderSide,
    pub kind: IntentKind,
}

/// Side selection for corrective orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SidePolicy {
    /// Always use the master's side, even when the computed difference
    /// implies the follower should reduce exposure. Matches the historical
    /// behavior; the default.
    #[default]
    MirrorMaster,
    /// Derive the side from the sign of the computed difference: buy when
    /// the follower's signed quantity must rise toward the target, sell
    /// when it must fall. Correct for shorts as well as longs.
    SignAware,
}

/// Compute the corrective orders that bring the follower's positions to
/// the master's, scaled by `ratio`. Target quantities truncate toward
/// zero, matching integer-contract semantics. Output is sorted by symbol.
pub fn reconcile(
    master: &[Position],
    follower: &[Position],
    ratio: f64,
    side_policy: SidePolicy,
) -> Vec<OrderIntent> {
    // Last write wins on duplicate symbols; the listing endpoint is not
    // expected to produce any.
    let follower_by_symbol: HashMap<&str, &Position> =
        follower.iter().map(|p| (p.symbol.as_str(), p)).collect();

    let mut intents = Vec::new();

    for position in master {
        let target = scale_quantity(position.quantity, ratio);

        match follower_by_symbol.get(position.symbol.as_str()) {
            None => {
                if target != 0 {
                    intents.push(OrderIntent {
                        symbol: position.symbol.clone(),
                        quantity: contract_quantity(target),
                        side: position.side,
                        kind: IntentKind::Open,
                    });
                }
            }
            Some(existing) => {
                let diff = target - existing.quantity;
                if diff != 0 {
                    let side = match side_policy {
                        SidePolicy::MirrorMaster => position.side,
                        SidePolicy::SignAware if diff > 0 => OrderSide::Buy,
                        SidePolicy::SignAware => OrderSide::Sell,
                    };
                    intents.push(OrderIntent {
                        symbol: position.symbol.clone(),
                        quantity: contract_quantity(diff),
                        side,
                        kind: IntentKind::Adjust,
                    });
                }
            }
        }
    }

    intents.sort_by(|a, b| a.symbol.cmp(&b.symbol));
    intents
}

/// Truncation toward zero; ratio 1.0 is the common case.
fn scale_quantity(quantity: i64, ratio: f64) -> i64 {
    (quantity as f64 * ratio).trunc() as i64
}

/// Order size for a signed quantity difference, saturating rather than
/// wrapping on values beyond the wire's `u32` range.
fn contract_quantity(value: i64) -> u32 {
    u32::try_from(value.unsigned_abs()).unwrap_or(u32::MAX)
}
