use anyhow::{Context, bail};
use market::MarketConfig;
use rust_decimal::Decimal;
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use types::fee::TaxPolicy;

/// Process configuration, read from the environment
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub jwt_secret: String,
    /// Journal directory; without one the market runs in memory only
    pub journal_dir: Option<PathBuf>,
    /// JSON file of cities, owners and opening balances
    pub seed_path: Option<PathBuf>,
    pub market: MarketConfig,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let bind_addr = parse_or(&lookup, "BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 8080)))?;
        let jwt_secret = lookup("JWT_SECRET").context("JWT_SECRET must be set")?;
        if jwt_secret.is_empty() {
            bail!("JWT_SECRET must not be empty");
        }

        let mut market = MarketConfig::default();
        if let Some(rate) = parse::<Decimal>(&lookup, "MARKET_TAX_RATE")? {
            let tax = TaxPolicy::new(rate);
            if !tax.is_valid() {
                bail!("MARKET_TAX_RATE must be within [0, 1), got {}", rate);
            }
            market.tax = tax;
        }
        market.max_retries = parse_or(&lookup, "MARKET_MAX_RETRIES", market.max_retries)?;
        if let Some(secs) = parse::<u64>(&lookup, "MARKET_SWEEP_INTERVAL_SECS")? {
            if secs == 0 {
                bail!("MARKET_SWEEP_INTERVAL_SECS must be positive");
            }
            market.sweep_interval = Duration::from_secs(secs);
        }
        market.auto_cross = parse_or(&lookup, "MARKET_AUTO_CROSS", market.auto_cross)?;

        Ok(Self {
            bind_addr,
            jwt_secret,
            journal_dir: lookup("JOURNAL_DIR").filter(|s| !s.is_empty()).map(PathBuf::from),
            seed_path: lookup("SEED_PATH").filter(|s| !s.is_empty()).map(PathBuf::from),
            market,
        })
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("invalid {}={:?}: {}", key, raw, e)),
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    Ok(parse(lookup, key)?.unwrap_or(default))
}
