//! Circuit breaker guarding synchronous calls to the catalog.
//!
//! State transitions:
//! ```text
//! Closed ──(requests >= min && failure ratio >= threshold)──► Open
//! Open ──(open_timeout elapsed)──► HalfOpen
//! HalfOpen ──(probe succeeds)──► Closed
//! HalfOpen ──(probe fails)──► Open
//! ```
//!
//! Every transition (and every elapsed closed-state interval) starts a new
//! generation with fresh counts. A result reported for an older generation is
//! discarded.

use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use thiserror::Error;

/// Tunables for a [`CircuitBreaker`].
#[derive(Debug, Clone)]
pub struct CircuitBreakerSettings {
    pub name: String,
    /// Minimum requests in the window before the breaker may trip.
    pub min_requests: u32,
    /// Failure ratio at or above which the breaker trips.
    pub failure_ratio: f64,
    /// How long the breaker stays open before admitting a probe.
    pub open_timeout: Duration,
    /// Rolling window after which closed-state counts reset.
    pub interval: Duration,
    /// Probes admitted while half-open.
    pub half_open_max_requests: u32,
}

impl CircuitBreakerSettings {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            min_requests: 3,
            failure_ratio: 0.6,
            open_timeout: Duration::from_secs(60),
            interval: Duration::from_secs(60),
            half_open_max_requests: 1,
        }
    }

    pub fn with_open_timeout(mut self, open_timeout: Duration) -> Self {
        self.open_timeout = open_timeout;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors returned by [`CircuitBreaker::call`].
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// The breaker is open; the call was not attempted.
    #[error("circuit breaker {0} is open")]
    Open(String),

    /// The breaker is half-open and its probe slot is taken.
    #[error("circuit breaker {0} is half-open and busy")]
    TooManyRequests(String),

    /// The call was attempted and failed.
    #[error("{0}")]
    Inner(E),
}

#[derive(Debug, Default, Clone, Copy)]
struct Counts {
    requests: u32,
    total_failures: u32,
    consecutive_successes: u32,
}

struct BreakerInner {
    state: BreakerState,
    generation: u64,
    counts: Counts,
    expiry: Option<Instant>,
}

/// Process-wide circuit breaker.
pub struct CircuitBreaker {
    settings: CircuitBreakerSettings,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(settings: CircuitBreakerSettings) -> Self {
        let expiry = Some(Instant::now() + settings.interval);
        Self {
            settings,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                generation: 0,
                counts: Counts::default(),
                expiry,
            }),
        }
    }

    /// Returns the current state, applying any elapsed timeout.
    pub fn state(&self) -> BreakerState {
        let mut inner = self.lock();
        self.refresh(&mut inner, Instant::now());
        inner.state
    }

    /// Runs `call` if the breaker admits it; every error counts as a failure.
    pub async fn call<T, E, Fut>(&self, call: Fut) -> Result<T, BreakerError<E>>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        self.call_classified(call, |_| true).await
    }

    /// Runs `call` if the breaker admits it.
    ///
    /// `is_failure` decides whether an error counts against the breaker;
    /// errors it returns false for are recorded as successes.
    pub async fn call_classified<T, E, Fut, C>(
        &self,
        call: Fut,
        is_failure: C,
    ) -> Result<T, BreakerError<E>>
    where
        Fut: Future<Output = Result<T, E>>,
        C: FnOnce(&E) -> bool,
    {
        let generation = self.before_request()?;
        let result = call.await;
        let success = match &result {
            Ok(_) => true,
            Err(e) => !is_failure(e),
        };
        self.after_request(generation, success);
        result.map_err(BreakerError::Inner)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn before_request<E>(&self) -> Result<u64, BreakerError<E>> {
        let mut inner = self.lock();
        self.refresh(&mut inner, Instant::now());

        match inner.state {
            BreakerState::Open => return Err(BreakerError::Open(self.settings.name.clone())),
            BreakerState::HalfOpen
                if inner.counts.requests >= self.settings.half_open_max_requests =>
            {
                return Err(BreakerError::TooManyRequests(self.settings.name.clone()));
            }
            _ => {}
        }

        inner.counts.requests += 1;
        Ok(inner.generation)
    }

    fn after_request(&self, generation: u64, success: bool) {
        let now = Instant::now();
        let mut inner = self.lock();
        self.refresh(&mut inner, now);

        if inner.generation != generation {
            return;
        }

        if success {
            inner.counts.consecutive_successes += 1;
            if inner.state == BreakerState::HalfOpen
                && inner.counts.consecutive_successes >= self.settings.half_open_max_requests
            {
                self.set_state(&mut inner, BreakerState::Closed, now);
            }
        } else {
            inner.counts.total_failures += 1;
            inner.counts.consecutive_successes = 0;
            match inner.state {
                BreakerState::Closed if self.ready_to_trip(&inner.counts) => {
                    self.set_state(&mut inner, BreakerState::Open, now);
                }
                BreakerState::HalfOpen => self.set_state(&mut inner, BreakerState::Open, now),
                _ => {}
            }
        }
    }

    fn ready_to_trip(&self, counts: &Counts) -> bool {
        counts.requests >= self.settings.min_requests
            && counts.total_failures as f64 / counts.requests as f64 >= self.settings.failure_ratio
    }

    fn refresh(&self, inner: &mut BreakerInner, now: Instant) {
        let expired = inner.expiry.is_some_and(|expiry| expiry <= now);
        match inner.state {
            BreakerState::Closed if expired => self.new_generation(inner, now),
            BreakerState::Open if expired => self.set_state(inner, BreakerState::HalfOpen, now),
            _ => {}
        }
    }

    fn set_state(&self, inner: &mut BreakerInner, next: BreakerState, now: Instant) {
        if inner.state == next {
            return;
        }
        let previous = inner.state;
        inner.state = next;
        self.new_generation(inner, now);

        metrics::counter!(
            "circuit_breaker_state_changes_total",
            "name" => self.settings.name.clone(),
            "to" => next.as_str()
        )
        .increment(1);
        tracing::warn!(
            breaker = %self.settings.name,
            from = %previous,
            to = %next,
            "circuit breaker state changed"
        );
    }

    fn new_generation(&self, inner: &mut BreakerInner, now: Instant) {
        inner.generation += 1;
        inner.counts = Counts::default();
        inner.expiry = match inner.state {
            BreakerState::Closed => Some(now + self.settings.interval),
            BreakerState::Open => Some(now + self.settings.open_timeout),
            BreakerState::HalfOpen => None,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, PartialEq)]
    enum TestError {
        Down,
        SoldOut,
    }

    fn breaker(open_timeout: Duration) -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerSettings::new("test").with_open_timeout(open_timeout))
    }

    async fn fail(b: &CircuitBreaker) -> Result<(), BreakerError<TestError>> {
        b.call(async { Err::<(), _>(TestError::Down) }).await
    }

    async fn succeed(b: &CircuitBreaker) -> Result<(), BreakerError<TestError>> {
        b.call(async { Ok::<(), TestError>(()) }).await
    }

    #[tokio::test]
    async fn test_stays_closed_below_min_requests() {
        let b = breaker(Duration::from_secs(60));
        fail(&b).await.unwrap_err();
        fail(&b).await.unwrap_err();
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn test_trips_at_threshold() {
        let b = breaker(Duration::from_secs(60));
        succeed(&b).await.unwrap();
        fail(&b).await.unwrap_err();
        assert_eq!(b.state(), BreakerState::Closed);
        // 2 of 3 failed: 0.66 >= 0.6
        fail(&b).await.unwrap_err();
        assert_eq!(b.state(), BreakerState::Open);
    }

    #[tokio::test]
    async fn test_low_failure_ratio_does_not_trip() {
        let b = breaker(Duration::from_secs(60));
        succeed(&b).await.unwrap();
        succeed(&b).await.unwrap();
        fail(&b).await.unwrap_err();
        succeed(&b).await.unwrap();
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn test_open_breaker_short_circuits() {
        let b = breaker(Duration::from_secs(60));
        for _ in 0..3 {
            fail(&b).await.unwrap_err();
        }

        let calls = AtomicUsize::new(0);
        let result = b
            .call(async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<(), TestError>(())
            })
            .await;

        assert!(matches!(result, Err(BreakerError::Open(name)) if name == "test"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_half_open_probe_success_closes() {
        let b = breaker(Duration::from_millis(20));
        for _ in 0..3 {
            fail(&b).await.unwrap_err();
        }
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(b.state(), BreakerState::HalfOpen);

        succeed(&b).await.unwrap();
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_probe_failure_reopens() {
        let b = breaker(Duration::from_millis(20));
        for _ in 0..3 {
            fail(&b).await.unwrap_err();
        }
        tokio::time::sleep(Duration::from_millis(30)).await;

        fail(&b).await.unwrap_err();
        assert_eq!(b.state(), BreakerState::Open);
    }

    #[tokio::test]
    async fn test_half_open_admits_one_probe_at_a_time() {
        let b = breaker(Duration::from_millis(20));
        for _ in 0..3 {
            fail(&b).await.unwrap_err();
        }
        tokio::time::sleep(Duration::from_millis(30)).await;

        let generation = b.before_request::<TestError>().unwrap();
        assert!(matches!(
            succeed(&b).await,
            Err(BreakerError::TooManyRequests(_))
        ));
        b.after_request(generation, true);
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn test_business_rejections_count_as_success() {
        let b = breaker(Duration::from_secs(60));
        for _ in 0..5 {
            let result = b
                .call_classified(async { Err::<(), _>(TestError::SoldOut) }, |e| {
                    *e != TestError::SoldOut
                })
                .await;
            assert!(matches!(result, Err(BreakerError::Inner(TestError::SoldOut))));
        }
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[test]
    fn test_stale_generation_result_is_discarded() {
        let b = breaker(Duration::from_secs(60));

        let stale = b.before_request::<TestError>().unwrap();
        for _ in 0..3 {
            let g = b.before_request::<TestError>().unwrap();
            b.after_request(g, false);
        }
        assert_eq!(b.state(), BreakerState::Open);

        // A success from before the trip must not close the breaker.
        b.after_request(stale, true);
        assert_eq!(b.state(), BreakerState::Open);
    }

    #[test]
    fn test_closed_counts_reset_after_interval() {
        let b = CircuitBreaker::new(
            CircuitBreakerSettings::new("test").with_interval(Duration::from_millis(10)),
        );
        for _ in 0..2 {
            let g = b.before_request::<TestError>().unwrap();
            b.after_request(g, false);
        }
        std::thread::sleep(Duration::from_millis(20));

        let g = b.before_request::<TestError>().unwrap();
        b.after_request(g, false);
        assert_eq!(b.state(), BreakerState::Closed);
    }
}
