use crate::error::AppError;
use chrono::{DateTime, Duration, Utc};
use market::NewOrder;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use types::ids::{CityId, UserId};
use types::ledger::LedgerEntry;
use types::numeric::Price;
use types::order::{Order, OrderStatus, Side};
use types::resource::ResourceType;
use types::transaction::Transaction;

/// Longest lifetime an order may be given through `durationHours`
const MAX_DURATION_HOURS: u32 = 24 * 30;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateOrderRequest {
    pub city_id: CityId,
    pub order_type: Side,
    pub resource_type: ResourceType,
    pub quantity: u64,
    pub price_per_unit: Decimal,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_hours: Option<u32>,
}

impl CreateOrderRequest {
    /// Build the engine request for `owner`, resolving the expiry
    pub fn into_new_order(self, owner_id: UserId, now: DateTime<Utc>) -> Result<NewOrder, AppError> {
        let expires_at = match (self.expires_at, self.duration_hours) {
            (Some(_), Some(_)) => {
                return Err(AppError::BadRequest(
                    "give either expiresAt or durationHours, not both".to_string(),
                ));
            }
            (Some(at), None) => Some(at),
            (None, Some(hours)) if hours == 0 || hours > MAX_DURATION_HOURS => {
                return Err(AppError::BadRequest(format!(
                    "durationHours must be between 1 and {}",
                    MAX_DURATION_HOURS
                )));
            }
            (None, Some(hours)) => Some(now + Duration::hours(i64::from(hours))),
            (None, None) => None,
        };
        let price_per_unit =
            Price::try_new(self.price_per_unit).map_err(|e| AppError::BadRequest(e.to_string()))?;

        Ok(NewOrder {
            owner_id,
            city_id: self.city_id,
            side: self.order_type,
            resource_type: self.resource_type,
            quantity: self.quantity,
            price_per_unit,
            expires_at,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ExecuteRequest {
    pub quantity: u64,
    pub city_id: CityId,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListOrdersQuery {
    pub resource_type: ResourceType,
    pub side: Option<Side>,
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MyOrdersQuery {
    pub status: Option<OrderStatus>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

/// A created order plus any fills it took on arrival
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacementResponse {
    #[serde(flatten)]
    pub order: Order,
    pub fills: Vec<Transaction>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceBalance {
    pub resource_type: ResourceType,
    #[serde(with = "rust_decimal::serde::str")]
    pub available: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub reserved: Decimal,
}

impl From<LedgerEntry> for ResourceBalance {
    fn from(entry: LedgerEntry) -> Self {
        Self {
            resource_type: entry.key.resource,
            available: entry.available,
            reserved: entry.reserved,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CityResourcesResponse {
    pub city_id: CityId,
    pub resources: Vec<ResourceBalance>,
}
