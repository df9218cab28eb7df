use std::collections::BTreeSet;

/// Phase of the controller-wide measurement scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Idle,
    Arming,
    PoweringUp,
    Sampling,
    PoweringDown,
    Rearming,
    Deactivated,
}

impl CyclePhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Arming => "ARMING",
            Self::PoweringUp => "POWERING_UP",
            Self::Sampling => "SAMPLING",
            Self::PoweringDown => "POWERING_DOWN",
            Self::Rearming => "REARMING",
            Self::Deactivated => "DEACTIVATED",
        }
    }
}

/// Units still awaiting a reading in the current cycle.
///
/// Completions may arrive in any order; unknown or repeated names are ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeasurementCycle {
    started_at_ms: i64,
    pending: BTreeSet<String>,
}

impl MeasurementCycle {
    pub fn start<I, S>(units: I, started_at_ms: i64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            started_at_ms,
            pending: units.into_iter().map(Into::into).collect(),
        }
    }

    /// Marks `name` as answered. Returns `false` if it was not pending.
    pub fn complete(&mut self, name: &str) -> bool {
        self.pending.remove(name)
    }

    pub fn remaining(&self) -> usize {
        self.pending.len()
    }

    pub fn is_complete(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn pending(&self) -> impl Iterator<Item = &str> {
        self.pending.iter().map(String::as_str)
    }

    pub fn started_at_ms(&self) -> i64 {
        self.started_at_ms
    }

    pub fn elapsed_ms(&self, now_ms: i64) -> u64 {
        now_ms.saturating_sub(self.started_at_ms).max(0) as u64
    }
}
