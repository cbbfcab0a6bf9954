//! Matching logic module
//!
//! Price compatibility rules shared by explicit execution and auto-cross

pub mod crossing;

pub use crossing::{can_match, incoming_can_match, price_improvement};
