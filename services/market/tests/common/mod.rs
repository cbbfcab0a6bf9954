//! Shared fixtures for market integration tests

#![allow(dead_code)]

use chrono::{DateTime, Utc};
use market::{InMemoryCityDirectory, Market, MarketConfig, NewOrder};
use rust_decimal::Decimal;
use std::sync::Arc;
use types::commit::NullSink;
use types::ids::{CityId, UserId};
use types::ledger::{Holder, LedgerKey};
use types::numeric::Price;
use types::order::Side;
use types::resource::ResourceType;

/// Every user `n` in `1..=users` owns city `n * 10`
pub fn market_with(users: u64, config: MarketConfig) -> Market {
    let directory = InMemoryCityDirectory::new();
    for n in 1..=users {
        directory.assign(city(n), UserId(n));
    }
    Market::new(config, Arc::new(directory), Arc::new(NullSink))
}

pub fn market(users: u64) -> Market {
    market_with(users, MarketConfig::default())
}

pub fn city(user: u64) -> CityId {
    CityId(user * 10)
}

pub fn fund(market: &Market, user: u64, resource: ResourceType, amount: Decimal) {
    market
        .ledger()
        .credit(LedgerKey::city(city(user), resource), amount)
        .expect("fund city");
}

pub fn order(user: u64, side: Side, resource: ResourceType, quantity: u64, price: u64) -> NewOrder {
    NewOrder {
        owner_id: UserId(user),
        city_id: city(user),
        side,
        resource_type: resource,
        quantity,
        price_per_unit: Price::from_u64(price),
        expires_at: None,
    }
}

pub fn expiring(mut request: NewOrder, at: DateTime<Utc>) -> NewOrder {
    request.expires_at = Some(at);
    request
}

pub fn available(market: &Market, user: u64, resource: ResourceType) -> Decimal {
    market.ledger().balance(LedgerKey::city(city(user), resource)).available
}

pub fn reserved(market: &Market, user: u64, resource: ResourceType) -> Decimal {
    market.ledger().balance(LedgerKey::city(city(user), resource)).reserved
}

pub fn treasury(market: &Market) -> Decimal {
    market.ledger().balance(LedgerKey::treasury(ResourceType::Gold)).available
}

/// Everything held of `resource`, treasury included, available or reserved
pub fn total_supply(market: &Market, resource: ResourceType) -> Decimal {
    market
        .image()
        .balances
        .iter()
        .filter(|entry| entry.key.resource == resource)
        .map(|entry| entry.amount())
        .sum()
}

pub fn city_holdings(market: &Market, user: u64) -> Vec<(ResourceType, Decimal)> {
    market
        .ledger()
        .balances_of(Holder::City(city(user)))
        .into_iter()
        .map(|entry| (entry.key.resource, entry.amount()))
        .collect()
}
