//! Rotating anti-replay magic values.

use std::sync::RwLock;
use std::time::{Duration, Instant};

use rand::RngCore;

use nextroute_core::protocol::constants::MAGIC_BYTES;
use nextroute_core::protocol::packets::MagicValues;

pub trait MagicSource: Send + Sync {
    fn magic_values(&self) -> MagicValues;
}

/// Shifts `upcoming -> current -> previous` once per rotation period.
pub struct RotatingMagic {
    period: Duration,
    state: RwLock<(Instant, MagicValues)>,
}

fn random_magic() -> [u8; MAGIC_BYTES] {
    let mut out = [0u8; MAGIC_BYTES];
    rand::thread_rng().fill_bytes(&mut out);
    out
}

impl RotatingMagic {
    pub fn new(period: Duration) -> Self {
        let values = MagicValues {
            upcoming: random_magic(),
            current: random_magic(),
            previous: random_magic(),
        };
        Self {
            period,
            state: RwLock::new((Instant::now(), values)),
        }
    }

    /// Rotate if the period elapsed at `now`. Returns whether it rotated.
    pub fn rotate_if_due(&self, now: Instant) -> bool {
        let mut guard = match self.state.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let (rotated_at, values) = &mut *guard;
        if now.saturating_duration_since(*rotated_at) < self.period {
            return false;
        }
        *values = MagicValues {
            upcoming: random_magic(),
            current: values.upcoming,
            previous: values.current,
        };
        *rotated_at = now;
        true
    }
}

impl MagicSource for RotatingMagic {
    fn magic_values(&self) -> MagicValues {
        self.rotate_if_due(Instant::now());
        match self.state.read() {
            Ok(g) => g.1,
            Err(poisoned) => poisoned.into_inner().1,
        }
    }
}
