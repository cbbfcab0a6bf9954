use crate::auth::TokenVerifier;
use crate::error::AppError;
use crate::rate_limit::RateLimiter;
use market::Market;
use std::sync::Arc;
use types::errors::MarketError;

#[derive(Clone)]
pub struct AppState {
    pub market: Arc<Market>,
    pub rate_limiter: Arc<RateLimiter>,
    pub tokens: Arc<TokenVerifier>,
}

impl AppState {
    pub fn new(market: Arc<Market>, jwt_secret: &str) -> Self {
        Self {
            market,
            rate_limiter: Arc::new(RateLimiter::new()),
            tokens: Arc::new(TokenVerifier::new(jwt_secret)),
        }
    }

    /// Run a market operation off the async workers
    ///
    /// Commits take row locks and write the journal, so they run on the
    /// blocking pool.
    pub async fn run<T, F>(&self, operation: F) -> Result<T, AppError>
    where
        T: Send + 'static,
        F: FnOnce(&Market) -> Result<T, MarketError> + Send + 'static,
    {
        let market = Arc::clone(&self.market);
        tokio::task::spawn_blocking(move || operation(&market))
            .await
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("market task failed: {}", e)))?
            .map_err(AppError::from)
    }
}
