use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

/// Backoff applied between reconnection cycles.
///
/// A cycle is one full pass over the ensemble address list with no successful
/// handshake. Individual candidate failures inside a cycle advance to the
/// next candidate immediately; only the cycle boundary sleeps. Reconnection
/// itself never gives up, so there is no retry cap here: the delay doubles
/// from `base_delay_ms` and saturates at `max_delay_ms`.
#[derive(Debug, Serialize, Deserialize, Clone, Copy)]
pub struct BackoffPolicy {
    /// Backoff base (unit: milliseconds)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Maximum backoff time (unit: milliseconds)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl BackoffPolicy {
    /// Delay before the next cycle, given how many consecutive cycles have
    /// already failed.
    pub fn delay_for_cycle(
        &self,
        failed_cycles: u32,
    ) -> Duration {
        let shift = failed_cycles.min(16);
        let delay = self
            .base_delay_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_delay_ms.max(self.base_delay_ms));
        Duration::from_millis(delay)
    }
}

fn default_base_delay_ms() -> u64 {
    100
}
fn default_max_delay_ms() -> u64 {
    2000
}
