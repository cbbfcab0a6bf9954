use crate::error::AppError;
use dashmap::DashMap;
use std::time::Instant;
use types::ids::UserId;

/// Groups of routes sharing one token bucket per user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointClass {
    Placement,
    Execute,
    Cancel,
    Query,
    WebSocket,
}

impl EndpointClass {
    /// (burst capacity, tokens per second)
    fn limits(self) -> (u32, f64) {
        match self {
            EndpointClass::Placement => (20, 5.0),
            EndpointClass::Execute => (30, 10.0),
            EndpointClass::Cancel => (50, 20.0),
            EndpointClass::Query => (120, 60.0),
            EndpointClass::WebSocket => (5, 0.2),
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            EndpointClass::Placement => "order_placement",
            EndpointClass::Execute => "order_execute",
            EndpointClass::Cancel => "order_cancel",
            EndpointClass::Query => "query",
            EndpointClass::WebSocket => "ws_connections",
        }
    }
}

#[derive(Clone)]
struct Bucket {
    capacity: u32,
    tokens: f64,
    refill_rate: f64,
    last_update: Instant,
}

impl Bucket {
    fn new(capacity: u32, refill_rate: f64) -> Self {
        Self {
            capacity,
            tokens: capacity as f64,
            refill_rate,
            last_update: Instant::now(),
        }
    }

    fn allow_request(&mut self, tokens: u32) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();

        self.tokens = f64::min(self.capacity as f64, self.tokens + elapsed * self.refill_rate);
        self.last_update = now;

        if self.tokens >= tokens as f64 {
            self.tokens -= tokens as f64;
            true
        } else {
            false
        }
    }
}

/// Per-user token buckets, one per endpoint class
#[derive(Default)]
pub struct RateLimiter {
    buckets: DashMap<(UserId, EndpointClass), Bucket>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&self, user_id: UserId, class: EndpointClass) -> Result<(), AppError> {
        let (capacity, refill_rate) = class.limits();
        let mut bucket = self
            .buckets
            .entry((user_id, class))
            .or_insert_with(|| Bucket::new(capacity, refill_rate));

        if bucket.allow_request(1) {
            Ok(())
        } else {
            Err(AppError::RateLimitExceeded(format!("{} for user {}", class.as_str(), user_id)))
        }
    }
}
