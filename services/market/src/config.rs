//! Market configuration

use std::time::Duration;
use types::fee::TaxPolicy;

/// Market engine configuration
#[derive(Debug, Clone)]
pub struct MarketConfig {
    /// Tax skimmed from the seller's proceeds on every fill
    pub tax: TaxPolicy,
    /// Retries after a version conflict before giving up
    pub max_retries: u32,
    /// Interval between expiration sweeps
    pub sweep_interval: Duration,
    /// Most orders expired by a single sweep pass
    pub sweep_batch: usize,
    /// Page size used when a listing does not ask for one
    pub default_page_size: usize,
    /// Upper bound on any listing page
    pub max_page_size: usize,
    /// Match crossing orders immediately at creation
    pub auto_cross: bool,
    /// Resting orders examined per auto-cross round
    pub cross_scan: usize,
    /// Capacity of the event broadcast channel
    pub event_buffer: usize,
    /// Price levels per side reported in stats
    pub depth: usize,
    /// Transactions aggregated into "recent" stats
    pub recent_trades: usize,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            tax: TaxPolicy::default(),
            max_retries: 5,
            sweep_interval: Duration::from_secs(60),
            sweep_batch: 500,
            default_page_size: 50,
            max_page_size: 200,
            auto_cross: true,
            cross_scan: 32,
            event_buffer: 1024,
            depth: 10,
            recent_trades: 100,
        }
    }
}

impl MarketConfig {
    /// Clamp a requested page size into `1..=max_page_size`
    pub fn page_size(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_page_size)
            .clamp(1, self.max_page_size.max(1))
    }
}
