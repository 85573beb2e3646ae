//! Session budget meter.
//!
//! Accumulates cost against a configured budget and exposes an
//! Ok/Warning/Exhausted state machine that gates new agent spawns.

use std::sync::RwLock;

use crate::config::BudgetConfig;

/// Budget state derived from usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetState {
    Ok,
    Warning,
    Exhausted,
}

impl std::fmt::Display for BudgetState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Warning => write!(f, "warning"),
            Self::Exhausted => write!(f, "exhausted"),
        }
    }
}

#[derive(Debug)]
struct Inner {
    budget: f64,
    used: f64,
    warning_threshold: f64,
    exhausted: bool,
}

/// Token/cost counter with a sticky exhaustion flag.
#[derive(Debug)]
pub struct BudgetMeter {
    inner: RwLock<Inner>,
}

impl BudgetMeter {
    /// A budget of zero (or below) means unlimited.
    pub fn new(budget: f64, warning_threshold: f64) -> Self {
        Self {
            inner: RwLock::new(Inner {
                budget,
                used: 0.0,
                warning_threshold: warning_threshold.clamp(0.0, 1.0),
                exhausted: false,
            }),
        }
    }

    pub fn from_config(config: &BudgetConfig) -> Self {
        Self::new(config.budget, config.warning_threshold)
    }

    /// Accumulate usage.
    pub fn update(&self, delta: f64) {
        let mut inner = self.inner.write().expect("budget lock poisoned");
        inner.used += delta;
    }

    /// Current state from usage versus budget.
    pub fn check(&self) -> BudgetState {
        let inner = self.inner.read().expect("budget lock poisoned");
        Self::state_of(&inner)
    }

    fn state_of(inner: &Inner) -> BudgetState {
        if inner.budget <= 0.0 {
            return BudgetState::Ok;
        }
        let ratio = inner.used / inner.budget;
        if ratio >= 1.0 {
            BudgetState::Exhausted
        } else if ratio >= inner.warning_threshold {
            BudgetState::Warning
        } else {
            BudgetState::Ok
        }
    }

    /// Whether new agent spawns are allowed (Ok or Warning, and the
    /// sticky flag unset).
    pub fn can_start_new(&self) -> bool {
        let inner = self.inner.read().expect("budget lock poisoned");
        !inner.exhausted && Self::state_of(&inner) != BudgetState::Exhausted
    }

    /// Latch exhaustion. Idempotent.
    pub fn on_exhausted(&self) {
        let mut inner = self.inner.write().expect("budget lock poisoned");
        inner.exhausted = true;
    }

    pub fn is_exhausted(&self) -> bool {
        self.inner.read().expect("budget lock poisoned").exhausted
    }

    /// Clear usage and the sticky flag.
    pub fn reset(&self) {
        let mut inner = self.inner.write().expect("budget lock poisoned");
        inner.used = 0.0;
        inner.exhausted = false;
    }

    pub fn set_budget(&self, budget: f64) {
        let mut inner = self.inner.write().expect("budget lock poisoned");
        inner.budget = budget;
    }

    /// Threshold is clamped to `[0, 1]`.
    pub fn set_warning_threshold(&self, threshold: f64) {
        let mut inner = self.inner.write().expect("budget lock poisoned");
        inner.warning_threshold = threshold.clamp(0.0, 1.0);
    }

    pub fn used(&self) -> f64 {
        self.inner.read().expect("budget lock poisoned").used
    }
}
