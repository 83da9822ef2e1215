//! Retry orchestration with failure classification, backoff and fallback
//!
//! [`RetryOrchestrator`] wraps a single blocking external call. Every
//! failure is mapped to an [`ErrorClass`] by a caller-supplied
//! [`ErrorClassifier`]; permanent classes short-circuit immediately,
//! transient classes are retried with a class-specific backoff until
//! `max_attempts` is spent. When the call cannot succeed the caller's
//! fallback generator supplies the value instead, so `execute` always
//! produces a result.
//!
//! Per-attempt timeouts grow with the size of the input (tiers) and with
//! each retry. An optional overall deadline caps per-attempt timeouts and
//! aborts remaining retries once it cannot be met.

use rand::Rng;
use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::error::ResilienceError;
use super::ttl_cache::TtlCache;

/// Classification of a failed external call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// The service is throttling us; back off exponentially
    RateLimit,
    /// The call did not finish within its timeout
    Timeout,
    /// The service could not be reached
    Connection,
    /// Credentials were rejected; retrying cannot help
    Auth,
    /// The request itself is malformed; retrying cannot help
    BadRequest,
    /// Anything else; retried conservatively
    Unknown,
}

impl ErrorClass {
    /// Every class, in declaration order
    pub const ALL: [ErrorClass; 6] = [
        ErrorClass::RateLimit,
        ErrorClass::Timeout,
        ErrorClass::Connection,
        ErrorClass::Auth,
        ErrorClass::BadRequest,
        ErrorClass::Unknown,
    ];

    /// Check if this class must never be retried
    pub fn is_permanent(self) -> bool {
        matches!(self, ErrorClass::Auth | ErrorClass::BadRequest)
    }

    /// Check if this class is worth retrying
    pub fn is_transient(self) -> bool {
        !self.is_permanent()
    }

    /// Stable label used in results and logs
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorClass::RateLimit => "transient-rateLimit",
            ErrorClass::Timeout => "transient-timeout",
            ErrorClass::Connection => "transient-connection",
            ErrorClass::Auth => "permanent-auth",
            ErrorClass::BadRequest => "permanent-badRequest",
            ErrorClass::Unknown => "transient-unknown",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps a call-specific error onto the [`ErrorClass`] taxonomy
pub trait ErrorClassifier<E>: Send + Sync {
    fn classify(&self, error: &E) -> ErrorClass;
}

impl<E, F> ErrorClassifier<E> for F
where
    F: Fn(&E) -> ErrorClass + Send + Sync,
{
    fn classify(&self, error: &E) -> ErrorClass {
        self(error)
    }
}

/// Delay schedule between attempts
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Base delay all class-specific delays derive from
    pub base_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Extra random delay as a fraction of the computed delay, in `[0, 1)`
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(300),
            jitter: 0.0,
        }
    }
}

impl BackoffPolicy {
    /// Delay to wait after failed attempt number `attempt` (1-based)
    ///
    /// Rate limits back off exponentially (`base * 2^(attempt-1)`),
    /// timeouts and connection failures wait `base * 2`, unknown failures
    /// wait `base`. Permanent classes return `None`.
    pub fn delay_for(&self, class: ErrorClass, attempt: u32) -> Option<Duration> {
        let delay = match class {
            ErrorClass::RateLimit => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                self.base_delay.saturating_mul(factor)
            }
            ErrorClass::Timeout | ErrorClass::Connection => self.base_delay.saturating_mul(2),
            ErrorClass::Unknown => self.base_delay,
            ErrorClass::Auth | ErrorClass::BadRequest => return None,
        };
        Some(delay.min(self.max_delay))
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter <= 0.0 || delay.is_zero() {
            return delay;
        }
        let extra: f64 = rand::rng().random_range(0.0..self.jitter);
        (delay + delay.mul_f64(extra)).min(self.max_delay)
    }
}

/// A size tier selecting a larger per-attempt timeout
#[derive(Debug, Clone, PartialEq)]
pub struct TimeoutTier {
    /// Inputs of at least this size use `timeout`
    pub min_size: usize,
    pub timeout: Duration,
}

/// Per-attempt timeout schedule
#[derive(Debug, Clone, PartialEq)]
pub struct TimeoutPolicy {
    /// Timeout for inputs below every tier
    pub base: Duration,
    /// Size tiers; the largest matching `min_size` wins
    pub tiers: Vec<TimeoutTier>,
    /// Added to the timeout for every retry after the first attempt
    pub per_retry_increment: Duration,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(60),
            tiers: vec![
                TimeoutTier {
                    min_size: 3001,
                    timeout: Duration::from_secs(180),
                },
                TimeoutTier {
                    min_size: 2001,
                    timeout: Duration::from_secs(120),
                },
                TimeoutTier {
                    min_size: 1001,
                    timeout: Duration::from_secs(90),
                },
            ],
            per_retry_increment: Duration::from_secs(30),
        }
    }
}

impl TimeoutPolicy {
    /// Timeout of the first attempt for an input of `input_size`
    pub fn base_for(&self, input_size: usize) -> Duration {
        self.tiers
            .iter()
            .filter(|tier| input_size >= tier.min_size)
            .max_by_key(|tier| tier.min_size)
            .map_or(self.base, |tier| tier.timeout)
    }

    /// Timeout for attempt number `attempt` (1-based)
    pub fn timeout_for(&self, input_size: usize, attempt: u32) -> Duration {
        let retries = attempt.saturating_sub(1);
        self.base_for(input_size) + self.per_retry_increment.saturating_mul(retries)
    }
}

/// Configuration for retry orchestration
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Attempts before falling back (including the first)
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
    pub timeouts: TimeoutPolicy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffPolicy::default(),
            timeouts: TimeoutPolicy::default(),
        }
    }
}

impl RetryConfig {
    /// Reject configurations the orchestrator cannot honor
    pub fn validate(&self) -> Result<(), ResilienceError> {
        if self.max_attempts == 0 {
            return Err(ResilienceError::InvalidConfig(
                "retry max_attempts must be at least 1".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.backoff.jitter) {
            return Err(ResilienceError::InvalidConfig(format!(
                "retry jitter must be in [0, 1), got {}",
                self.backoff.jitter
            )));
        }
        if self.backoff.max_delay < self.backoff.base_delay {
            return Err(ResilienceError::InvalidConfig(
                "retry max_delay must not be below base_delay".to_string(),
            ));
        }
        if self.timeouts.base.is_zero() || self.timeouts.tiers.iter().any(|t| t.timeout.is_zero()) {
            return Err(ResilienceError::InvalidConfig(
                "call timeouts must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// What the wrapped call is told about the attempt it is serving
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptContext {
    /// 1-based attempt number
    pub attempt: u32,
    pub max_attempts: u32,
    /// Time box for this attempt
    pub timeout: Duration,
}

/// Record of one attempt, handed to an [`AttemptRecorder`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryAttempt {
    /// 1-based attempt number
    pub attempt: u32,
    /// Classification of the failure; `None` when the attempt succeeded
    pub class: Option<ErrorClass>,
    /// Backoff applied before the next attempt, if one follows
    pub delay_before_next: Option<Duration>,
    /// Time box the attempt ran under
    pub timeout: Duration,
    /// Wall time the call took
    pub elapsed: Duration,
}

/// Observer notified after every attempt
pub trait AttemptRecorder: Send + Sync {
    fn record_attempt(&self, attempt: &RetryAttempt);
}

/// Why a fallback value was produced instead of a real one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackReason {
    /// A permanent classification stopped the first failing attempt
    Permanent(ErrorClass),
    /// Every attempt failed; carries the last classification
    Exhausted(ErrorClass),
    /// The overall deadline left no room for another attempt
    DeadlineExceeded(Option<ErrorClass>),
}

impl FallbackReason {
    /// The class reported to consumers of the fallback
    pub fn error_class(&self) -> ErrorClass {
        match *self {
            FallbackReason::Permanent(class) | FallbackReason::Exhausted(class) => class,
            FallbackReason::DeadlineExceeded(class) => class.unwrap_or(ErrorClass::Timeout),
        }
    }

    /// Whether a fallback for this reason may be cached
    ///
    /// Deadline aborts depend on the caller's budget, not on the request,
    /// so they are not cached.
    pub fn is_cacheable(&self) -> bool {
        !matches!(self, FallbackReason::DeadlineExceeded(_))
    }
}

/// Outcome of [`RetryOrchestrator::execute`]
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution<T> {
    pub value: T,
    /// Number of times the external call was invoked
    pub attempts: u32,
    /// Set when `value` came from the fallback generator
    pub fallback: Option<FallbackReason>,
}

impl<T> Resolution<T> {
    pub fn is_fallback(&self) -> bool {
        self.fallback.is_some()
    }

    pub fn error_class(&self) -> Option<ErrorClass> {
        self.fallback.as_ref().map(FallbackReason::error_class)
    }
}

/// Retry engine around a single external call
///
/// # Example
/// ```
/// use quill_core_resilience::{ErrorClass, RetryConfig, RetryOrchestrator};
///
/// let orchestrator = RetryOrchestrator::new(
///     RetryConfig::default(),
///     |_: &String| ErrorClass::Auth,
/// ).unwrap();
///
/// let resolution = orchestrator.execute(
///     "fingerprint",
///     42,
///     None,
///     |_ctx| Err::<u32, _>("bad credentials".to_string()),
///     |_reason| 0,
/// );
///
/// assert!(resolution.is_fallback());
/// assert_eq!(resolution.attempts, 1);
/// ```
pub struct RetryOrchestrator<T, E> {
    config: RetryConfig,
    classifier: Arc<dyn ErrorClassifier<E>>,
    cache: Option<Arc<TtlCache<T>>>,
    recorder: Option<Arc<dyn AttemptRecorder>>,
}

impl<T: Clone, E: fmt::Display> RetryOrchestrator<T, E> {
    /// Create an orchestrator, validating the configuration up front
    pub fn new(
        config: RetryConfig,
        classifier: impl ErrorClassifier<E> + 'static,
    ) -> Result<Self, ResilienceError> {
        config.validate()?;
        Ok(Self {
            config,
            classifier: Arc::new(classifier),
            cache: None,
            recorder: None,
        })
    }

    /// Write every cacheable outcome into `cache` under its fingerprint
    pub fn with_cache(mut self, cache: Arc<TtlCache<T>>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Notify `recorder` after every attempt
    pub fn with_recorder(mut self, recorder: Arc<dyn AttemptRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `call` with retries, substituting `fallback` when it cannot succeed
    ///
    /// `input_size` selects the timeout tier. `deadline`, when given, bounds
    /// the whole operation: per-attempt timeouts are capped to the time
    /// remaining, and no backoff sleep extends past it.
    pub fn execute<F, FB>(
        &self,
        fingerprint: &str,
        input_size: usize,
        deadline: Option<Instant>,
        mut call: F,
        fallback: FB,
    ) -> Resolution<T>
    where
        F: FnMut(&AttemptContext) -> Result<T, E>,
        FB: FnOnce(&FallbackReason) -> T,
    {
        let max_attempts = self.config.max_attempts;
        let key = fingerprint.get(..16).unwrap_or(fingerprint);
        let mut last_class = None;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let mut timeout = self.config.timeouts.timeout_for(input_size, attempt);

            if let Some(deadline) = deadline {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    warn!("Deadline exceeded before attempt {} for {}", attempt, key);
                    let reason = FallbackReason::DeadlineExceeded(last_class);
                    return self.fall_back(fingerprint, attempt - 1, reason, fallback);
                }
                timeout = timeout.min(remaining);
            }

            let ctx = AttemptContext {
                attempt,
                max_attempts,
                timeout,
            };
            debug!(
                "External call attempt {}/{} for {} (timeout: {:?})",
                attempt, max_attempts, key, timeout
            );

            let started = Instant::now();
            let err = match call(&ctx) {
                Ok(value) => {
                    self.record(RetryAttempt {
                        attempt,
                        class: None,
                        delay_before_next: None,
                        timeout,
                        elapsed: started.elapsed(),
                    });
                    info!("External call succeeded on attempt {} for {}", attempt, key);
                    self.store(fingerprint, &value);
                    return Resolution {
                        value,
                        attempts: attempt,
                        fallback: None,
                    };
                }
                Err(err) => err,
            };

            let elapsed = started.elapsed();
            let class = self.classifier.classify(&err);
            last_class = Some(class);

            if class.is_permanent() {
                self.record(RetryAttempt {
                    attempt,
                    class: Some(class),
                    delay_before_next: None,
                    timeout,
                    elapsed,
                });
                error!("Permanent failure ({}) for {}: {}", class, key, err);
                let reason = FallbackReason::Permanent(class);
                return self.fall_back(fingerprint, attempt, reason, fallback);
            }

            if attempt >= max_attempts {
                self.record(RetryAttempt {
                    attempt,
                    class: Some(class),
                    delay_before_next: None,
                    timeout,
                    elapsed,
                });
                error!(
                    "External call failed after all {} attempts ({}) for {}: {}",
                    max_attempts, class, key, err
                );
                let reason = FallbackReason::Exhausted(class);
                return self.fall_back(fingerprint, attempt, reason, fallback);
            }

            let delay = self
                .config
                .backoff
                .delay_for(class, attempt)
                .map(|d| self.config.backoff.jittered(d))
                .unwrap_or_default();

            self.record(RetryAttempt {
                attempt,
                class: Some(class),
                delay_before_next: Some(delay),
                timeout,
                elapsed,
            });
            warn!(
                "Attempt {}/{} failed ({}) for {}: {}; retrying in {:?}",
                attempt, max_attempts, class, key, err, delay
            );

            if let Some(deadline) = deadline {
                if Instant::now() + delay >= deadline {
                    warn!("Backoff would overrun the deadline for {}; giving up", key);
                    let reason = FallbackReason::DeadlineExceeded(Some(class));
                    return self.fall_back(fingerprint, attempt, reason, fallback);
                }
            }

            if !delay.is_zero() {
                thread::sleep(delay);
            }
        }
    }

    fn fall_back<FB>(
        &self,
        fingerprint: &str,
        attempts: u32,
        reason: FallbackReason,
        fallback: FB,
    ) -> Resolution<T>
    where
        FB: FnOnce(&FallbackReason) -> T,
    {
        let value = fallback(&reason);
        if reason.is_cacheable() {
            self.store(fingerprint, &value);
        }
        Resolution {
            value,
            attempts,
            fallback: Some(reason),
        }
    }

    fn store(&self, fingerprint: &str, value: &T) {
        if let Some(cache) = &self.cache {
            cache.set(fingerprint, value.clone());
        }
    }

    fn record(&self, attempt: RetryAttempt) {
        if let Some(recorder) = &self.recorder {
            recorder.record_attempt(&attempt);
        }
    }
}
