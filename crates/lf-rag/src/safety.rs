//! Embedding safety: the circuit breaker protecting fragile embedder calls,
//! and validation that catches zero/NaN/Inf vectors before they reach a
//! store.

use std::time::{Duration, Instant};

/// Components below this magnitude count as zero.
pub const ZERO_TOLERANCE: f32 = 1e-10;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Circuit breaker
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation, requests pass through.
    Closed,
    /// Failures exceeded the threshold, requests are blocked.
    Open,
    /// Testing whether the service recovered.
    HalfOpen,
}

/// Failure-isolation state machine for calls to a fragile dependency.
///
/// After `failure_threshold` consecutive failures the circuit opens and
/// calls fail fast.  Once `reset_timeout` has elapsed the first
/// `can_execute` probe moves it to half-open; `half_open_max_calls`
/// consecutive successes close it again, and any half-open failure reopens
/// it.
#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    reset_timeout: Duration,
    half_open_max_calls: u32,

    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    half_open_calls: u32,
    last_failure_at: Option<Instant>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(60), 1)
    }
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, reset_timeout: Duration, half_open_max_calls: u32) -> Self {
        Self {
            failure_threshold,
            reset_timeout,
            half_open_max_calls,
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            half_open_calls: 0,
            last_failure_at: None,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Whether a request may proceed.  The open→half-open transition runs
    /// lazily here, on the first probe after the reset timeout.
    pub fn can_execute(&mut self) -> bool {
        if self.state == CircuitState::Closed {
            return true;
        }

        if self.state == CircuitState::Open {
            let elapsed = self
                .last_failure_at
                .map(|t| t.elapsed())
                .unwrap_or(Duration::ZERO);
            if elapsed >= self.reset_timeout {
                tracing::info!("circuit breaker transitioning to half-open");
                self.state = CircuitState::HalfOpen;
                self.half_open_calls = 0;
            } else {
                return false;
            }
        }

        // Half-open: allow a limited number of probe calls.
        if self.half_open_calls < self.half_open_max_calls {
            self.half_open_calls += 1;
            true
        } else {
            false
        }
    }

    pub fn record_success(&mut self) {
        if self.state == CircuitState::HalfOpen {
            self.success_count += 1;
            if self.success_count >= self.half_open_max_calls {
                tracing::info!("circuit breaker closing after recovery");
                self.reset();
            }
        } else {
            self.failure_count = 0;
        }
    }

    pub fn record_failure(&mut self) {
        self.failure_count += 1;
        self.last_failure_at = Some(Instant::now());

        if self.state == CircuitState::HalfOpen {
            tracing::warn!("circuit breaker reopening after half-open failure");
            self.state = CircuitState::Open;
            self.half_open_calls = 0;
            self.success_count = 0;
        } else if self.failure_count >= self.failure_threshold {
            tracing::error!(
                failures = self.failure_count,
                threshold = self.failure_threshold,
                "circuit breaker opening"
            );
            self.state = CircuitState::Open;
        }
    }

    /// Manual recovery hook.
    pub fn force_reset(&mut self) {
        tracing::info!("circuit breaker manually reset");
        self.reset();
    }

    fn reset(&mut self) {
        self.state = CircuitState::Closed;
        self.failure_count = 0;
        self.success_count = 0;
        self.half_open_calls = 0;
    }

    /// Snapshot for health/status endpoints.
    pub fn state_info(&self) -> serde_json::Value {
        let mut info = serde_json::json!({
            "state": match self.state {
                CircuitState::Closed => "closed",
                CircuitState::Open => "open",
                CircuitState::HalfOpen => "half_open",
            },
            "failure_count": self.failure_count,
            "failure_threshold": self.failure_threshold,
        });
        if self.state == CircuitState::Open {
            let remaining = self
                .last_failure_at
                .map(|t| self.reset_timeout.saturating_sub(t.elapsed()))
                .unwrap_or(Duration::ZERO);
            info["time_until_reset_secs"] =
                serde_json::json!((remaining.as_secs_f64() * 10.0).round() / 10.0);
        }
        info
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Embedding validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// True when every component is below the zero tolerance (or the vector is
/// empty).  An all-zero vector is the signature of a failed embedding call.
pub fn is_zero_vector(embedding: &[f32]) -> bool {
    embedding.is_empty() || embedding.iter().all(|v| v.abs() < ZERO_TOLERANCE)
}

/// Validate one embedding.  Returns `Err(message)` when invalid.
pub fn validate_embedding(
    embedding: &[f32],
    expected_dimension: Option<usize>,
    allow_zero: bool,
) -> Result<(), String> {
    if embedding.is_empty() {
        return Err("embedding is empty".into());
    }
    if let Some(expected) = expected_dimension {
        if embedding.len() != expected {
            return Err(format!(
                "embedding dimension mismatch: expected {expected}, got {}",
                embedding.len()
            ));
        }
    }
    for (i, v) in embedding.iter().enumerate() {
        if v.is_nan() {
            return Err(format!("embedding contains NaN at index {i}"));
        }
        if v.is_infinite() {
            return Err(format!("embedding contains Inf at index {i}"));
        }
    }
    if !allow_zero && is_zero_vector(embedding) {
        return Err("embedding is a zero vector (likely a failed embedding call)".into());
    }
    Ok(())
}

/// Validate a batch without short-circuiting.  Returns
/// `(all_valid, invalid_indices, messages)`.
pub fn validate_embeddings_batch(
    embeddings: &[Vec<f32>],
    expected_dimension: Option<usize>,
    allow_zero: bool,
) -> (bool, Vec<usize>, Vec<String>) {
    let mut invalid = Vec::new();
    let mut messages = Vec::new();
    for (i, embedding) in embeddings.iter().enumerate() {
        if let Err(msg) = validate_embedding(embedding, expected_dimension, allow_zero) {
            invalid.push(i);
            messages.push(format!("index {i}: {msg}"));
        }
    }
    (invalid.is_empty(), invalid, messages)
}

/// Count zero vectors in a batch.
pub fn count_zero_embeddings(embeddings: &[Vec<f32>]) -> usize {
    embeddings.iter().filter(|e| is_zero_vector(e)).count()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    // ── Circuit breaker ─────────────────────────────────────────────

    #[test]
    fn opens_after_threshold_failures() {
        let mut cb = CircuitBreaker::new(3, Duration::from_secs(60), 1);
        assert!(cb.can_execute());

        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.can_execute());
    }

    #[test]
    fn success_in_closed_resets_failure_count() {
        let mut cb = CircuitBreaker::new(3, Duration::from_secs(60), 1);
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        // Two more failures do not reach the threshold of three.
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_after_reset_timeout_then_closes_on_success() {
        let mut cb = CircuitBreaker::new(3, Duration::from_millis(50), 1);
        for _ in 0..3 {
            cb.record_failure();
        }
        assert!(!cb.can_execute());

        std::thread::sleep(Duration::from_millis(70));
        // Lazy transition on the first probe; exactly one call permitted.
        assert!(cb.can_execute());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(!cb.can_execute());

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.can_execute());
    }

    #[test]
    fn half_open_failure_reopens() {
        let mut cb = CircuitBreaker::new(2, Duration::from_millis(40), 1);
        cb.record_failure();
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(60));
        assert!(cb.can_execute());

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        // The reopen restarted the reset clock.
        assert!(!cb.can_execute());
    }

    #[test]
    fn force_reset_closes() {
        let mut cb = CircuitBreaker::new(1, Duration::from_secs(60), 1);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        cb.force_reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.can_execute());
    }

    #[test]
    fn state_info_reports_time_until_reset() {
        let mut cb = CircuitBreaker::new(1, Duration::from_secs(60), 1);
        cb.record_failure();
        let info = cb.state_info();
        assert_eq!(info["state"], "open");
        assert!(info["time_until_reset_secs"].as_f64().unwrap() > 0.0);
    }

    // ── Embedding validation ────────────────────────────────────────

    #[test]
    fn zero_vector_detection() {
        assert!(is_zero_vector(&[]));
        assert!(is_zero_vector(&[0.0, 0.0, 0.0]));
        assert!(is_zero_vector(&[1e-12, -1e-11]));
        assert!(!is_zero_vector(&[0.0, 0.1]));
    }

    #[test]
    fn empty_embedding_invalid() {
        assert!(validate_embedding(&[], None, false).is_err());
    }

    #[test]
    fn dimension_mismatch_invalid() {
        let err = validate_embedding(&[0.1, 0.2], Some(3), false).unwrap_err();
        assert!(err.contains("expected 3"));
    }

    #[test]
    fn nan_and_inf_invalid() {
        assert!(validate_embedding(&[0.1, f32::NAN], None, false)
            .unwrap_err()
            .contains("NaN"));
        assert!(validate_embedding(&[f32::INFINITY, 0.1], None, false)
            .unwrap_err()
            .contains("Inf"));
        assert!(validate_embedding(&[f32::NEG_INFINITY], None, false).is_err());
    }

    #[test]
    fn zero_vector_invalid_unless_allowed() {
        let zeros = vec![1e-12_f32; 4];
        assert!(validate_embedding(&zeros, None, false).is_err());
        assert!(validate_embedding(&zeros, None, true).is_ok());
    }

    #[test]
    fn valid_embedding_passes() {
        assert!(validate_embedding(&[0.1, -0.2, 0.3], Some(3), false).is_ok());
    }

    #[test]
    fn batch_validation_does_not_short_circuit() {
        let batch = vec![
            vec![0.1, 0.2],
            vec![0.0, 0.0],
            vec![f32::NAN, 0.1],
            vec![0.3, 0.4],
        ];
        let (all_valid, invalid, messages) = validate_embeddings_batch(&batch, Some(2), false);
        assert!(!all_valid);
        assert_eq!(invalid, vec![1, 2]);
        assert_eq!(messages.len(), 2);
        assert!(messages[0].contains("index 1"));
    }

    #[test]
    fn count_zero_embeddings_counts() {
        let batch = vec![vec![0.0, 0.0], vec![0.1, 0.0], vec![]];
        assert_eq!(count_zero_embeddings(&batch), 2);
    }
}
