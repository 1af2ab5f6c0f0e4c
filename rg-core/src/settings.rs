//! Process-wide compiler settings.
//!
//! A single `Mutex`-guarded struct is the only global state in the crate;
//! every compiler instance reads it at compile time rather than being handed
//! its own copy.

use std::sync::{Mutex, OnceLock};

/// Aliasing aggressiveness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AutoAliasMode {
    /// No aliasing is attempted.
    Off,
    /// Only alias resources with unambiguous, short-lived use.
    #[default]
    Conservative,
    Balanced,
    Aggressive,
}

/// Which packing algorithm the aliasing planner uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AutoAliasPackingStrategy {
    #[default]
    GreedySweepLine,
    BranchAndBound,
}

/// Process-wide, last-wins settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub num_frames_in_flight: u32,
    pub use_async_compute: bool,
    pub auto_alias_mode: AutoAliasMode,
    pub auto_alias_packing_strategy: AutoAliasPackingStrategy,
    pub auto_alias_log_exclusion_reasons: bool,
    pub auto_alias_pool_retire_idle_frames: u32,
    pub auto_alias_pool_growth_headroom: f32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            num_frames_in_flight: 3,
            use_async_compute: true,
            auto_alias_mode: AutoAliasMode::Conservative,
            auto_alias_packing_strategy: AutoAliasPackingStrategy::GreedySweepLine,
            auto_alias_log_exclusion_reasons: false,
            auto_alias_pool_retire_idle_frames: 120,
            auto_alias_pool_growth_headroom: 1.5,
        }
    }
}

impl Settings {
    /// Clamp fields to their documented minimums (`numFramesInFlight >= 1`,
    /// `growthHeadroom >= 1.0`, `retireIdleFrames >= 1`).
    fn clamped(mut self) -> Self {
        self.num_frames_in_flight = self.num_frames_in_flight.max(1);
        self.auto_alias_pool_retire_idle_frames = self.auto_alias_pool_retire_idle_frames.max(1);
        self.auto_alias_pool_growth_headroom = self.auto_alias_pool_growth_headroom.max(1.0);
        self
    }
}

fn global() -> &'static Mutex<Settings> {
    static SETTINGS: OnceLock<Mutex<Settings>> = OnceLock::new();
    SETTINGS.get_or_init(|| Mutex::new(Settings::default()))
}

/// Replace the process-wide settings wholesale. Last caller wins.
pub fn configure(settings: Settings) {
    let mut guard = global().lock().expect("settings mutex poisoned");
    *guard = settings.clamped();
}

/// Snapshot the current process-wide settings.
pub fn current() -> Settings {
    global().lock().expect("settings mutex poisoned").clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let s = Settings::default();
        assert_eq!(s.num_frames_in_flight, 3);
        assert_eq!(s.auto_alias_pool_retire_idle_frames, 120);
        assert!((s.auto_alias_pool_growth_headroom - 1.5).abs() < f32::EPSILON);
    }

    #[test]
    fn configure_clamps_below_minimums() {
        configure(Settings {
            num_frames_in_flight: 0,
            auto_alias_pool_growth_headroom: 0.1,
            auto_alias_pool_retire_idle_frames: 0,
            ..Settings::default()
        });
        let s = current();
        assert_eq!(s.num_frames_in_flight, 1);
        assert_eq!(s.auto_alias_pool_retire_idle_frames, 1);
        assert!(s.auto_alias_pool_growth_headroom >= 1.0);
        // restore defaults so other tests in this process observe a clean slate
        configure(Settings::default());
    }
}
