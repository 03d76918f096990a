//! Early stopping on consecutive high validation error.
//!
//! The monitor counts epochs whose validation RMSE exceeds a fixed
//! threshold. Any epoch at or below the threshold resets the count; reaching
//! `patience` consecutive violations stops the run. Stopping early is a
//! normal terminal state, not a failure.

use serde::{Deserialize, Serialize};

/// Lifecycle of a run's epoch loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorState {
    Running,
    StoppedEarly,
    Completed,
}

impl MonitorState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// Consecutive-violation early-stop rule.
#[derive(Debug, Clone, PartialEq)]
pub struct EarlyStopMonitor {
    threshold: f64,
    patience: usize,
    violations: usize,
    state: MonitorState,
}

impl EarlyStopMonitor {
    pub const DEFAULT_THRESHOLD: f64 = 8.0;
    pub const DEFAULT_PATIENCE: usize = 10;

    pub fn new(threshold: f64, patience: usize) -> Self {
        Self {
            threshold,
            patience: patience.max(1),
            violations: 0,
            state: MonitorState::Running,
        }
    }

    pub fn violations(&self) -> usize {
        self.violations
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    /// Feed one epoch's validation RMSE. Ignored once terminal.
    pub fn observe(&mut self, validation_rmse: f64) -> MonitorState {
        if self.state.is_terminal() {
            return self.state;
        }
        if validation_rmse > self.threshold {
            self.violations += 1;
            if self.violations >= self.patience {
                self.state = MonitorState::StoppedEarly;
            }
        } else {
            self.violations = 0;
        }
        self.state
    }

    /// Mark the run finished after its last epoch.
    pub fn finish(&mut self) -> MonitorState {
        if self.state == MonitorState::Running {
            self.state = MonitorState::Completed;
        }
        self.state
    }
}

impl Default for EarlyStopMonitor {
    fn default() -> Self {
        Self::new(Self::DEFAULT_THRESHOLD, Self::DEFAULT_PATIENCE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(monitor: &mut EarlyStopMonitor, values: &[f64]) -> Vec<MonitorState> {
        values.iter().map(|v| monitor.observe(*v)).collect()
    }

    #[test]
    fn test_ten_violations_stop_on_tenth() {
        let mut monitor = EarlyStopMonitor::default();
        let states = feed(&mut monitor, &[9.0; 10]);
        assert!(states[..9].iter().all(|s| *s == MonitorState::Running));
        assert_eq!(states[9], MonitorState::StoppedEarly);
        assert_eq!(monitor.violations(), 10);
    }

    #[test]
    fn test_nine_violations_then_reset() {
        let mut monitor = EarlyStopMonitor::default();
        feed(&mut monitor, &[12.0; 9]);
        assert_eq!(monitor.violations(), 9);
        assert_eq!(monitor.observe(8.0), MonitorState::Running);
        assert_eq!(monitor.violations(), 0);
        assert_eq!(monitor.finish(), MonitorState::Completed);
    }

    #[test]
    fn test_threshold_is_strict() {
        let mut monitor = EarlyStopMonitor::new(8.0, 1);
        assert_eq!(monitor.observe(8.0), MonitorState::Running);
        assert_eq!(monitor.observe(8.000001), MonitorState::StoppedEarly);
    }

    #[test]
    fn test_terminal_state_is_sticky() {
        let mut monitor = EarlyStopMonitor::new(8.0, 2);
        feed(&mut monitor, &[9.0, 9.0]);
        assert_eq!(monitor.observe(1.0), MonitorState::StoppedEarly);
        assert_eq!(monitor.finish(), MonitorState::StoppedEarly);
        assert_eq!(monitor.violations(), 2);
    }

    #[test]
    fn test_nan_does_not_count_as_violation() {
        let mut monitor = EarlyStopMonitor::new(8.0, 2);
        monitor.observe(9.0);
        monitor.observe(f64::NAN);
        assert_eq!(monitor.violations(), 0);
    }
}
