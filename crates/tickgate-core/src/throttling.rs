use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};

use crate::{ProviderId, ProviderProfile};

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Per-provider request budget.
///
/// The full daily allowance is available as a burst and replenishes evenly
/// over 24 hours. Clones share the same budget.
#[derive(Clone)]
pub struct RequestBudget {
    provider: ProviderId,
    limit: u32,
    limiter: Arc<DirectRateLimiter>,
}

impl RequestBudget {
    pub fn new(provider: ProviderId, quota_window: Duration, quota_limit: u32) -> Self {
        Self {
            provider,
            limit: quota_limit.max(1),
            limiter: Arc::new(RateLimiter::direct(quota_from_window(quota_window, quota_limit))),
        }
    }

    pub fn daily(profile: &ProviderProfile) -> Self {
        Self::new(profile.id.clone(), DAY, profile.daily_request_budget)
    }

    /// Consume one request. Returns `false` when the budget is exhausted.
    pub fn try_acquire(&self) -> bool {
        let acquired = self.limiter.check().is_ok();
        if !acquired {
            tracing::warn!(provider = %self.provider, limit = self.limit, "request budget exhausted");
        }
        acquired
    }
}

impl std::fmt::Debug for RequestBudget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestBudget")
            .field("provider", &self.provider)
            .field("limit", &self.limit)
            .finish()
    }
}

fn quota_from_window(quota_window: Duration, quota_limit: u32) -> Quota {
    let burst = NonZeroU32::new(quota_limit.max(1)).unwrap_or(NonZeroU32::MIN);

    let seconds_per_cell = (quota_window.as_secs_f64() / f64::from(burst.get())).max(0.001);
    let period = Duration::from_secs_f64(seconds_per_cell);

    Quota::with_period(period)
        .unwrap_or_else(|| Quota::per_second(burst))
        .allow_burst(burst)
}
