//! Fixed-rate driver for the block graph.
//!
//! Hosts feed wall-clock time in whatever chunks their loop produces; blocks
//! always see whole logical ticks of `1 / tick_rate_hz` seconds.

use std::time::{Duration, Instant};

use crate::block_manager::BlockManager;

/// Ticks run per `advance` call at most. Anything beyond that is dropped so
/// a stalled host does not freeze in a catch-up burst.
const MAX_CATCH_UP_TICKS: u32 = 5;

pub struct Engine {
    manager: BlockManager,
    accumulator: f64,
    ticks: u64,
    last_update: Option<Instant>,
}

impl Engine {
    pub fn new(manager: BlockManager) -> Self {
        Self {
            manager,
            accumulator: 0.0,
            ticks: 0,
            last_update: None,
        }
    }

    pub fn manager(&self) -> &BlockManager {
        &self.manager
    }

    pub fn manager_mut(&mut self) -> &mut BlockManager {
        &mut self.manager
    }

    pub fn into_manager(self) -> BlockManager {
        self.manager
    }

    /// Total ticks run since creation.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Adds `elapsed` to the accumulator and runs the whole ticks it covers.
    /// Returns how many ticks ran.
    pub fn advance(&mut self, elapsed: Duration) -> u32 {
        let interval = self.manager.settings().tick_interval_secs();
        self.accumulator += elapsed.as_secs_f64();

        let mut ran = 0;
        while self.accumulator >= interval {
            if ran == MAX_CATCH_UP_TICKS {
                log::debug!(
                    "[Engine] Falling behind, dropping {:.3}s",
                    self.accumulator
                );
                self.accumulator = 0.0;
                break;
            }
            self.accumulator -= interval;
            self.manager.tick(interval);
            self.ticks += 1;
            ran += 1;
        }
        ran
    }

    /// Advances by the wall-clock time since the previous call. The first
    /// call only starts the clock.
    pub fn update(&mut self) -> u32 {
        let now = Instant::now();
        let elapsed = self
            .last_update
            .map(|last| now.duration_since(last))
            .unwrap_or_default();
        self.last_update = Some(now);
        self.advance(elapsed)
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("ticks", &self.ticks)
            .field("accumulator", &self.accumulator)
            .finish()
    }
}
