//! Startup seed: city ownership and opening balances
//!
//! Ownership is held in memory and applied on every start. Opening balances
//! are ledger credits and go through the journal, so they are applied only
//! to a market with no history.

use anyhow::Context;
use market::{InMemoryCityDirectory, Market};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::info;
use types::ids::{CityId, UserId};
use types::ledger::LedgerKey;
use types::resource::ResourceType;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedFile {
    pub cities: Vec<SeedCity>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedCity {
    pub city_id: CityId,
    pub owner_id: UserId,
    #[serde(default)]
    pub balances: BTreeMap<ResourceType, Decimal>,
}

impl SeedFile {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path).with_context(|| format!("reading seed file {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing seed file {}", path.display()))
    }

    pub fn assign_owners(&self, directory: &InMemoryCityDirectory) {
        for city in &self.cities {
            directory.assign(city.city_id, city.owner_id);
        }
    }

    pub fn credit_balances(&self, market: &Market) -> anyhow::Result<()> {
        let mut credited = 0usize;
        for city in &self.cities {
            for (resource, amount) in &city.balances {
                if amount.is_zero() {
                    continue;
                }
                market
                    .ledger()
                    .credit(LedgerKey::city(city.city_id, *resource), *amount)
                    .with_context(|| format!("crediting {} {} to city {}", amount, resource, city.city_id))?;
                credited += 1;
            }
        }
        info!(cities = self.cities.len(), credited, "Seed balances applied");
        Ok(())
    }
}
