//! Domain models shared by the API layer and the sync engine.

mod position;
mod snapshot;

pub use position::{OrderSide, Position};
pub use snapshot::AccountSnapshot;
