//! Concurrency tests
//!
//! Races fills, cancels and sweeps against each other on real threads and
//! checks that nothing is over-filled, double-released or lost.

mod common;

use chrono::{Duration, Utc};
use common::*;
use market::{CancelOutcome, MarketConfig};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use types::errors::MarketError;
use types::ids::UserId;
use types::order::{OrderStatus, Side};
use types::resource::ResourceType;

const BUYERS: u64 = 8;

fn no_cross() -> MarketConfig {
    MarketConfig {
        auto_cross: false,
        ..MarketConfig::default()
    }
}

#[test]
fn test_concurrent_executions_never_overfill() {
    let market = market_with(BUYERS + 1, no_cross());
    fund(&market, 1, ResourceType::Metal, dec!(100));
    for buyer in 2..=BUYERS + 1 {
        fund(&market, buyer, ResourceType::Gold, dec!(10000));
    }
    let now = Utc::now();
    let order = market
        .place_order(order(1, Side::Sell, ResourceType::Metal, 100, 3), now)
        .unwrap()
        .order;

    let filled = AtomicU64::new(0);
    thread::scope(|s| {
        for buyer in 2..=BUYERS + 1 {
            let market = &market;
            let filled = &filled;
            s.spawn(move || loop {
                match market.execute(order.id, 7, UserId(buyer), city(buyer), now) {
                    Ok(tx) => {
                        filled.fetch_add(tx.quantity, Ordering::SeqCst);
                    }
                    Err(MarketError::ConcurrencyConflict { .. }) => {}
                    Err(MarketError::OrderAlreadyFilled { .. }) => break,
                    Err(err) => panic!("unexpected error: {err}"),
                }
            });
        }
    });

    assert_eq!(filled.load(Ordering::SeqCst), 100);
    let settled = market.get_order(order.id).unwrap();
    assert_eq!(settled.status, OrderStatus::Completed);
    assert_eq!(settled.remaining_quantity, 0);

    let bought: Decimal = (2..=BUYERS + 1)
        .map(|buyer| available(&market, buyer, ResourceType::Metal))
        .sum();
    assert_eq!(bought, dec!(100));
    assert_eq!(total_supply(&market, ResourceType::Metal), dec!(100));
    assert_eq!(
        total_supply(&market, ResourceType::Gold),
        Decimal::from(BUYERS) * dec!(10000)
    );
    assert_eq!(available(&market, 1, ResourceType::Gold), dec!(285));
    assert_eq!(treasury(&market), dec!(15));
    assert_eq!(market.transactions_of(UserId(1), Some(200)).len() as u64, (100 + 6) / 7);
}

#[test]
fn test_cancel_racing_fills_releases_exactly_the_remainder() {
    let market = market_with(BUYERS + 1, no_cross());
    fund(&market, 1, ResourceType::Gold, dec!(1000));
    for seller in 2..=BUYERS + 1 {
        fund(&market, seller, ResourceType::Fuel, dec!(100));
    }
    let now = Utc::now();
    let order = market
        .place_order(order(1, Side::Buy, ResourceType::Fuel, 200, 5), now)
        .unwrap()
        .order;

    let filled = AtomicU64::new(0);
    let cancelled = thread::scope(|s| {
        for seller in 2..=BUYERS + 1 {
            let market = &market;
            let filled = &filled;
            s.spawn(move || loop {
                match market.execute(order.id, 3, UserId(seller), city(seller), now) {
                    Ok(tx) => {
                        filled.fetch_add(tx.quantity, Ordering::SeqCst);
                    }
                    Err(MarketError::ConcurrencyConflict { .. }) => {}
                    Err(MarketError::OrderUnavailable { .. } | MarketError::OrderAlreadyFilled { .. }) => break,
                    Err(err) => panic!("unexpected error: {err}"),
                }
            });
        }
        let market = &market;
        s.spawn(move || loop {
            thread::yield_now();
            match market.cancel_order(order.id, UserId(1), now) {
                Ok(outcome) => break outcome,
                Err(MarketError::ConcurrencyConflict { .. }) => {}
                Err(err) => panic!("unexpected error: {err}"),
            }
        })
        .join()
        .unwrap()
    });

    let filled = filled.load(Ordering::SeqCst);
    let closed = market.get_order(order.id).unwrap();
    assert_eq!(closed.filled_quantity(), filled);
    match cancelled {
        CancelOutcome::Cancelled(order) => {
            assert_eq!(order.status, OrderStatus::Cancelled);
            assert_eq!(order.remaining_quantity + filled, 200);
        }
        CancelOutcome::AlreadyClosed(order) => {
            assert_eq!(order.status, OrderStatus::Completed);
            assert_eq!(filled, 200);
        }
    }

    // The buyer paid exactly for what was filled and got the rest back
    let spent = Decimal::from(filled) * dec!(5);
    assert_eq!(reserved(&market, 1, ResourceType::Gold), Decimal::ZERO);
    assert_eq!(available(&market, 1, ResourceType::Gold), dec!(1000) - spent);
    assert_eq!(available(&market, 1, ResourceType::Fuel), Decimal::from(filled));
    assert_eq!(total_supply(&market, ResourceType::Gold), dec!(1000));
    assert_eq!(
        total_supply(&market, ResourceType::Fuel),
        Decimal::from(BUYERS) * dec!(100)
    );
}

#[test]
fn test_parallel_sweepers_expire_each_order_once() {
    let market = market_with(1, no_cross());
    fund(&market, 1, ResourceType::Food, dec!(1000));
    let t0 = Utc::now();
    for _ in 0..40 {
        market
            .place_order(
                expiring(order(1, Side::Sell, ResourceType::Food, 10, 1), t0 + Duration::minutes(1)),
                t0,
            )
            .unwrap();
    }

    let later = t0 + Duration::minutes(5);
    let expired: usize = thread::scope(|s| {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let market = &market;
                s.spawn(move || {
                    let mut count = 0;
                    loop {
                        let report = market.sweep_at(later);
                        count += report.expired.len();
                        if !report.has_more && report.failed == 0 {
                            break count;
                        }
                    }
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).sum()
    });

    assert_eq!(expired, 40);
    assert_eq!(market.orders_of(UserId(1), Some(OrderStatus::Expired), Some(200)).len(), 40);
    assert_eq!(available(&market, 1, ResourceType::Food), dec!(1000));
    assert_eq!(reserved(&market, 1, ResourceType::Food), Decimal::ZERO);
}

#[test]
fn test_disjoint_trades_run_in_parallel() {
    const PAIRS: u64 = 6;
    let market = market_with(PAIRS * 2, no_cross());
    let now = Utc::now();
    let orders: Vec<_> = (0..PAIRS)
        .map(|pair| {
            let seller = pair * 2 + 1;
            fund(&market, seller, ResourceType::Metal, dec!(50));
            fund(&market, seller + 1, ResourceType::Gold, dec!(500));
            market
                .place_order(order(seller, Side::Sell, ResourceType::Metal, 50, 2), now)
                .unwrap()
                .order
        })
        .collect();

    thread::scope(|s| {
        for (pair, order) in orders.iter().enumerate() {
            let buyer = pair as u64 * 2 + 2;
            let market = &market;
            s.spawn(move || {
                for _ in 0..10 {
                    loop {
                        match market.execute(order.id, 5, UserId(buyer), city(buyer), now) {
                            Ok(_) => break,
                            Err(MarketError::ConcurrencyConflict { .. }) => continue,
                            Err(err) => panic!("unexpected error: {err}"),
                        }
                    }
                }
            });
        }
    });

    for (pair, order) in orders.iter().enumerate() {
        let seller = pair as u64 * 2 + 1;
        assert_eq!(market.get_order(order.id).unwrap().status, OrderStatus::Completed);
        assert_eq!(available(&market, seller, ResourceType::Gold), dec!(95));
        assert_eq!(available(&market, seller + 1, ResourceType::Metal), dec!(50));
    }
    assert_eq!(treasury(&market), Decimal::from(PAIRS) * dec!(5));
}

#[test]
fn test_concurrent_ledger_debits_stop_at_zero() {
    let market = market(1);
    fund(&market, 1, ResourceType::Gold, dec!(100));
    let key = types::ledger::LedgerKey::city(city(1), ResourceType::Gold);

    let succeeded = AtomicU64::new(0);
    thread::scope(|s| {
        for _ in 0..8 {
            let market = &market;
            let succeeded = &succeeded;
            s.spawn(move || {
                for _ in 0..10 {
                    match market.ledger().debit(key, dec!(3)) {
                        Ok(_) => {
                            succeeded.fetch_add(1, Ordering::SeqCst);
                        }
                        Err(MarketError::InsufficientFunds { .. } | MarketError::ConcurrencyConflict { .. }) => {}
                        Err(err) => panic!("unexpected error: {err}"),
                    }
                }
            });
        }
    });

    let left = available(&market, 1, ResourceType::Gold);
    assert!(left >= Decimal::ZERO);
    assert_eq!(left, dec!(100) - Decimal::from(succeeded.load(Ordering::SeqCst)) * dec!(3));
}
