//! Types library for the resource market
//!
//! This library provides the core type definitions shared by the market
//! engine, its journal and its HTTP gateway.
//!
//! # Modules
//! - `ids`: Unique identifiers (OrderId, TransactionId, UserId, CityId)
//! - `resource`: Tradeable resource kinds
//! - `numeric`: Fixed-point price type
//! - `order`: Order lifecycle types
//! - `transaction`: Settlement records
//! - `ledger`: Balance rows and their keys
//! - `fee`: Market tax
//! - `commit`: Committed change sets and the sink they are written to
//! - `errors`: Error taxonomy

pub mod ids;
pub mod resource;
pub mod numeric;
pub mod order;
pub mod transaction;
pub mod ledger;
pub mod fee;
pub mod commit;
pub mod errors;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::commit::*;
    pub use crate::errors::*;
    pub use crate::fee::*;
    pub use crate::ids::*;
    pub use crate::ledger::*;
    pub use crate::numeric::*;
    pub use crate::order::*;
    pub use crate::resource::*;
    pub use crate::transaction::*;
}
