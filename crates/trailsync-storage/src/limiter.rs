use std::time::Duration;

use rand::Rng;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    #[default]
    Immediate,
    Delayed,
}

/// Randomized pause before each detail request, drawn uniformly from `[min, max]` seconds.
///
/// Pauses are taken one at a time behind a shared gate, so parallel workers never
/// push the request rate above what a sequential run would produce.
#[derive(Debug)]
pub struct RateLimiter {
    mode: ExecutionMode,
    min_secs: u64,
    max_secs: u64,
    gate: Mutex<()>,
}

impl RateLimiter {
    pub fn new(mode: ExecutionMode, min_secs: u64, max_secs: u64) -> Self {
        Self {
            mode,
            min_secs: min_secs.min(max_secs),
            max_secs: max_secs.max(min_secs),
            gate: Mutex::new(()),
        }
    }

    pub fn immediate() -> Self {
        Self::new(ExecutionMode::Immediate, 0, 0)
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn draw_delay<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<Duration> {
        match self.mode {
            ExecutionMode::Immediate => None,
            ExecutionMode::Delayed => Some(Duration::from_secs(
                rng.gen_range(self.min_secs..=self.max_secs),
            )),
        }
    }

    pub async fn delay(&self) {
        if self.mode == ExecutionMode::Immediate {
            return;
        }
        let _turn = self.gate.lock().await;
        let pause = self.draw_delay(&mut rand::thread_rng());
        if let Some(pause) = pause {
            debug!(?pause, "throttling before detail request");
            tokio::time::sleep(pause).await;
        }
    }
}
