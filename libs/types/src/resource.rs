//! Tradeable resource types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Resource kinds held in city stockpiles
///
/// `Gold` doubles as the settlement currency: every order is priced in gold
/// per unit, so gold itself cannot be the traded resource of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Gold,
    Metal,
    Fuel,
    Food,
}

impl ResourceType {
    /// Every resource kind, in declaration order
    pub const ALL: [ResourceType; 4] = [
        ResourceType::Gold,
        ResourceType::Metal,
        ResourceType::Fuel,
        ResourceType::Food,
    ];

    /// The resource orders are priced in
    pub const CURRENCY: ResourceType = ResourceType::Gold;

    pub fn is_currency(&self) -> bool {
        *self == Self::CURRENCY
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Gold => "gold",
            ResourceType::Metal => "metal",
            ResourceType::Fuel => "fuel",
            ResourceType::Food => "food",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for unknown resource names
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown resource type: {0}")]
pub struct UnknownResource(pub String);

impl FromStr for ResourceType {
    type Err = UnknownResource;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gold" => Ok(ResourceType::Gold),
            "metal" => Ok(ResourceType::Metal),
            "fuel" => Ok(ResourceType::Fuel),
            "food" => Ok(ResourceType::Food),
            _ => Err(UnknownResource(s.to_string())),
        }
    }
}
