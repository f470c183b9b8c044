use serde::{Deserialize, Serialize};

/// Why a pagination loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StopReason {
    /// `patience` consecutive iterations added no new record.
    StallThreshold,
    /// `max_scroll_times` iterations ran.
    IterationCeiling,
    /// The page did not grow since the previous iteration.
    ExtentUnchanged,
    /// The page reported that no more content exists.
    EndMarker,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollState {
    Collecting,
    Stalling { stalls: u32 },
    Stopped(StopReason),
}

/// What one iteration saw, after dedup.
#[derive(Debug, Clone, Copy)]
pub struct Observation {
    /// Unique records accumulated so far.
    pub total: usize,
    pub extent: u64,
    pub end_marker: bool,
}

/// Decides when to stop scrolling. Guards are evaluated in a fixed order and
/// the first one that holds wins: stall threshold, iteration ceiling, extent
/// unchanged, end marker.
#[derive(Debug, Clone)]
pub struct ScrollMachine {
    patience: u32,
    max_iterations: u32,
    iterations: u32,
    last_total: usize,
    last_extent: u64,
    state: ScrollState,
}

impl ScrollMachine {
    pub fn new(patience: u32, max_iterations: u32) -> Self {
        ScrollMachine {
            patience: patience.max(1),
            max_iterations: max_iterations.max(1),
            iterations: 0,
            last_total: 0,
            last_extent: 0,
            state: ScrollState::Collecting,
        }
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    fn stalls(&self) -> u32 {
        match self.state {
            ScrollState::Stalling { stalls } => stalls,
            _ => 0,
        }
    }

    /// Feed one iteration. Once stopped, further observations are ignored.
    pub fn observe(&mut self, obs: Observation) -> ScrollState {
        if let ScrollState::Stopped(_) = self.state {
            return self.state;
        }
        self.iterations += 1;

        let stalls = if obs.total > self.last_total {
            0
        } else {
            self.stalls() + 1
        };
        // An extent of 0 means "unknown" and never counts as unchanged.
        let extent_unchanged = self.last_extent > 0 && obs.extent == self.last_extent;
        self.last_total = obs.total;
        self.last_extent = obs.extent;

        self.state = if stalls >= self.patience {
            ScrollState::Stopped(StopReason::StallThreshold)
        } else if self.iterations >= self.max_iterations {
            ScrollState::Stopped(StopReason::IterationCeiling)
        } else if extent_unchanged {
            ScrollState::Stopped(StopReason::ExtentUnchanged)
        } else if obs.end_marker {
            ScrollState::Stopped(StopReason::EndMarker)
        } else if stalls > 0 {
            ScrollState::Stalling { stalls }
        } else {
            ScrollState::Collecting
        };
        self.state
    }
}
