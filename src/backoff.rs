use std::time::Duration;

/// Smallest retry delay a policy may start from.
pub const MIN_RETRY_FLOOR: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum InvalidRetryConfig {
    #[error("minimum retry delay {0:?} is below 30s")]
    MinTooSmall(Duration),
    #[error("maximum retry delay {max:?} is below the minimum {min:?}")]
    MaxBelowMin { min: Duration, max: Duration },
    #[error("retry factor {0} must be at least 1.0")]
    FactorTooSmall(f64),
}

/// Exponential backoff between a floor and a ceiling, without jitter.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffPolicy {
    min: Duration,
    max: Duration,
    factor: f64,
}

impl BackoffPolicy {
    pub fn new(min: Duration, max: Duration, factor: f64) -> Result<BackoffPolicy, InvalidRetryConfig> {
        if min < MIN_RETRY_FLOOR {
            return Err(InvalidRetryConfig::MinTooSmall(min));
        }
        if max < min {
            return Err(InvalidRetryConfig::MaxBelowMin { min, max });
        }
        if factor.is_nan() || factor < 1.0 {
            return Err(InvalidRetryConfig::FactorTooSmall(factor));
        }

        Ok(BackoffPolicy { min, max, factor })
    }

    /// Delay to wait after a failure, given the delay used for the previous retry.
    pub fn next(&self, previous: Duration) -> Duration {
        if previous < self.min {
            return self.min;
        }

        Duration::try_from_secs_f64(previous.as_secs_f64() * self.factor)
            .map(|grown| grown.min(self.max))
            .unwrap_or(self.max)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy {
            min: MIN_RETRY_FLOOR,
            max: Duration::from_secs(30 * 60),
            factor: 2.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn doubling_sequence_is_capped() {
        let policy = BackoffPolicy::new(secs(30), secs(1800), 2.0).unwrap();

        let mut delay = Duration::ZERO;
        let mut seen = Vec::new();
        for _ in 0..10 {
            delay = policy.next(delay);
            seen.push(delay.as_secs());
        }

        assert_eq!(seen, vec![30, 60, 120, 240, 480, 960, 1800, 1800, 1800, 1800]);
    }

    #[test]
    fn below_floor_starts_at_min() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.next(Duration::ZERO), secs(30));
        assert_eq!(policy.next(secs(29)), secs(30));
        assert_eq!(policy.next(secs(30)), secs(60));
    }

    #[test]
    fn never_exceeds_max() {
        let policy = BackoffPolicy::new(secs(30), secs(100), 3.0).unwrap();
        assert_eq!(policy.next(secs(90)), secs(100));
        assert_eq!(policy.next(Duration::MAX), secs(100));
    }

    #[test]
    fn factor_one_keeps_delay() {
        let policy = BackoffPolicy::new(secs(45), secs(45), 1.0).unwrap();
        assert_eq!(policy.next(Duration::ZERO), secs(45));
        assert_eq!(policy.next(secs(45)), secs(45));
    }

    #[test]
    fn rejects_invalid_parameters() {
        assert_eq!(
            BackoffPolicy::new(secs(29), secs(60), 2.0),
            Err(InvalidRetryConfig::MinTooSmall(secs(29)))
        );
        assert_eq!(
            BackoffPolicy::new(secs(60), secs(30), 2.0),
            Err(InvalidRetryConfig::MaxBelowMin {
                min: secs(60),
                max: secs(30)
            })
        );
        assert!(matches!(
            BackoffPolicy::new(secs(30), secs(60), 0.5),
            Err(InvalidRetryConfig::FactorTooSmall(_))
        ));
        assert!(BackoffPolicy::new(secs(30), secs(60), f64::NAN).is_err());
    }
}
