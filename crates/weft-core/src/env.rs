//! Environment abstraction: the clock, the RNG, and the ability to sleep.
//!
//! Control-plane logic never reads the system clock or entropy pool
//! directly. Registration timestamps, setup-key expiry checks, backoff
//! jitter, and synthesized identifiers all go through this trait, which is
//! implemented twice:
//!
//! 1. [`SystemEnv`]: real wall clock, OS entropy, tokio timers
//! 2. `SimEnv` (harness crate): virtual clock and seeded RNG for
//!    reproducible tests
//!
//! # Invariants
//!
//! - `now()` never goes backwards within one execution context
//! - production `random_bytes()` draws from a cryptographically secure source

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::RngCore;
use uuid::Uuid;

/// Abstract clock, sleep, and randomness provider.
pub trait Environment: Clone + Send + Sync + 'static {
    /// Current wall-clock time.
    ///
    /// Wall-clock (not monotonic) because the values end up persisted:
    /// peer `last_seen` and setup-key expiry are compared across process
    /// restarts.
    fn now(&self) -> DateTime<Utc>;

    /// Suspend the current task for `duration`.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Fill `dest` with random bytes.
    fn random_bytes(&self, dest: &mut [u8]);

    /// Uniform value in `[0, 1)`, used for backoff jitter.
    fn random_f64(&self) -> f64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        // 53 significant bits, the float64 mantissa width.
        (u64::from_be_bytes(bytes) >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Random v4 UUID, used for synthesized account and setup-key identity.
    fn random_uuid(&self) -> Uuid {
        let mut bytes = [0u8; 16];
        self.random_bytes(&mut bytes);
        uuid::Builder::from_random_bytes(bytes).into_uuid()
    }
}

/// Production environment: system clock, OS entropy, tokio timers.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl Environment for SystemEnv {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn random_bytes(&self, dest: &mut [u8]) {
        rand::rngs::OsRng.fill_bytes(dest);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_f64_is_in_unit_interval() {
        let env = SystemEnv;
        for _ in 0..1000 {
            let v = env.random_f64();
            assert!((0.0..1.0).contains(&v), "{v} out of range");
        }
    }

    #[test]
    fn random_uuid_is_v4() {
        let env = SystemEnv;
        let id = env.random_uuid();
        assert_eq!(id.get_version_num(), 4);
    }
}
