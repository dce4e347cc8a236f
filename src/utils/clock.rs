//! Time source for drill measurements

use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};

/// Wall-clock and monotonic time, injectable for tests
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Monotonic reading used for elapsed-time measurement
    fn instant(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn instant(&self) -> Instant {
        Instant::now()
    }
}

/// Mock implementation for testing
/// Available for use in external test crates
pub mod mock {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Clock that only moves when told to
    #[derive(Clone)]
    pub struct FakeClock {
        state: Arc<Mutex<(DateTime<Utc>, Instant)>>,
    }

    impl FakeClock {
        pub fn at(now: DateTime<Utc>) -> Self {
            Self {
                state: Arc::new(Mutex::new((now, Instant::now()))),
            }
        }

        pub fn advance(&self, by: Duration) {
            let mut state = self.state.lock().unwrap();
            state.0 += chrono::Duration::from_std(by).unwrap();
            state.1 += by;
        }
    }

    impl Clock for FakeClock {
        fn now(&self) -> DateTime<Utc> {
            self.state.lock().unwrap().0
        }

        fn instant(&self) -> Instant {
            self.state.lock().unwrap().1
        }
    }
}

/// Whole minutes between two timestamps, rounded down
pub fn minutes_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> u32 {
    let seconds = (later - earlier).num_seconds().max(0);
    (seconds / 60) as u32
}

/// Elapsed time in minutes, rounded up
pub fn ceil_minutes(elapsed: Duration) -> u32 {
    let millis = elapsed.as_millis();
    millis.div_ceil(60_000) as u32
}
