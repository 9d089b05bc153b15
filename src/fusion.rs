//! Fusion state machine
//!
//! One process-wide state cell guards the exclusive fusion mode:
//!
//! ```text
//! Individual ──begin──▶ Fusing ──succeed──▶ Transcendent
//!     ▲                   │
//!     └──────fail─────────┘        (ticket dropped unresolved ──▶ Error)
//! ```
//!
//! Every transition into `Fusing` is a compare-and-set, so two concurrent
//! attempts can never both win. `Evolutionary` is an orthogonal marker kept
//! in its own flag, set by an external trigger once enough transcendent
//! cycles have completed. Later fusions never clear it; while a fusion runs
//! the reported state is `Fusing`, and `Evolutionary` again once it ends.

use crate::responder::ResponderError;
use crate::routing::FusionSubtype;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use thiserror::Error;
use tracing::{info, warn};

/// Current fusion mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionState {
    Individual,
    Fusing,
    Transcendent,
    Evolutionary,
    Error,
}

impl FusionState {
    fn as_u8(self) -> u8 {
        match self {
            Self::Individual => 0,
            Self::Fusing => 1,
            Self::Transcendent => 2,
            Self::Evolutionary => 3,
            Self::Error => 4,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Fusing,
            2 => Self::Transcendent,
            3 => Self::Evolutionary,
            4 => Self::Error,
            _ => Self::Individual,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Individual => "individual",
            Self::Fusing => "fusing",
            Self::Transcendent => "transcendent",
            Self::Evolutionary => "evolutionary",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for FusionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from fusion operations. Unlike ordinary responder failures these
/// propagate to the caller.
#[derive(Debug, Error)]
pub enum FusionError {
    #[error("a fusion is already in progress")]
    Busy,

    #[error("fusion {subtype} failed: {source}")]
    Responder {
        subtype: FusionSubtype,
        #[source]
        source: ResponderError,
    },

    #[error("fusion {0} was declined by the unifying responder")]
    Declined(FusionSubtype),

    #[error("evolution requires {required} transcendent cycles, {completed} completed")]
    EvolutionLocked { completed: u64, required: u64 },
}

/// Process-wide fusion state with compare-and-set transitions
#[derive(Debug)]
pub struct FusionStateMachine {
    state: AtomicU8,
    transcendent_cycles: AtomicU64,
    evolutionary: AtomicBool,
    evolutionary_after: u64,
}

impl FusionStateMachine {
    pub fn new(evolutionary_after: u64) -> Self {
        Self {
            state: AtomicU8::new(FusionState::Individual.as_u8()),
            transcendent_cycles: AtomicU64::new(0),
            evolutionary: AtomicBool::new(false),
            evolutionary_after,
        }
    }

    /// The reported state: the lifecycle cell, shown as `Evolutionary` when
    /// the marker is set and no fusion is running or broken.
    pub fn state(&self) -> FusionState {
        match self.lifecycle() {
            FusionState::Individual | FusionState::Transcendent if self.is_evolutionary() => {
                FusionState::Evolutionary
            }
            state => state,
        }
    }

    fn lifecycle(&self) -> FusionState {
        FusionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Whether the evolutionary marker has been set
    pub fn is_evolutionary(&self) -> bool {
        self.evolutionary.load(Ordering::Acquire)
    }

    /// Successful fusion cycles since startup
    pub fn transcendent_cycles(&self) -> u64 {
        self.transcendent_cycles.load(Ordering::Acquire)
    }

    /// Enter `Fusing`. Fails with [`FusionError::Busy`] if a fusion is
    /// already running; the running fusion is not affected.
    pub fn begin(&self, subtype: FusionSubtype) -> Result<FusionTicket<'_>, FusionError> {
        let fusing = FusionState::Fusing.as_u8();
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if current == fusing {
                return Err(FusionError::Busy);
            }
            match self
                .state
                .compare_exchange(current, fusing, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        info!(%subtype, from = %FusionState::from_u8(current), "fusion started");
        Ok(FusionTicket {
            machine: self,
            subtype,
            resolved: false,
        })
    }

    /// Set the evolutionary marker. Allowed only outside a fusion and after
    /// the configured number of transcendent cycles.
    pub fn mark_evolutionary(&self) -> Result<(), FusionError> {
        let completed = self.transcendent_cycles();
        if completed < self.evolutionary_after {
            return Err(FusionError::EvolutionLocked {
                completed,
                required: self.evolutionary_after,
            });
        }
        if self.lifecycle() == FusionState::Fusing {
            return Err(FusionError::Busy);
        }
        if self
            .evolutionary
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            info!(cycles = completed, "evolutionary marker set");
        }
        Ok(())
    }

    fn finish(&self, to: FusionState) {
        self.state.store(to.as_u8(), Ordering::Release);
    }
}

impl Default for FusionStateMachine {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Proof that the holder owns the running fusion.
///
/// Resolve it with [`succeed`](Self::succeed) or [`fail`](Self::fail). A
/// ticket dropped unresolved (caller went away mid-call) leaves the machine
/// in `Error`, which a later `begin` may leave again.
#[derive(Debug)]
pub struct FusionTicket<'a> {
    machine: &'a FusionStateMachine,
    subtype: FusionSubtype,
    resolved: bool,
}

impl FusionTicket<'_> {
    pub fn subtype(&self) -> FusionSubtype {
        self.subtype
    }

    /// `Fusing → Transcendent`
    pub fn succeed(mut self) {
        self.resolved = true;
        self.machine.transcendent_cycles.fetch_add(1, Ordering::AcqRel);
        self.machine.finish(FusionState::Transcendent);
        info!(subtype = %self.subtype, "fusion transcended");
    }

    /// `Fusing → Individual`
    pub fn fail(mut self) {
        self.resolved = true;
        self.machine.finish(FusionState::Individual);
        warn!(subtype = %self.subtype, "fusion failed, back to individual");
    }
}

impl Drop for FusionTicket<'_> {
    fn drop(&mut self) {
        if !self.resolved {
            self.machine.finish(FusionState::Error);
            warn!(subtype = %self.subtype, "fusion abandoned before completion");
        }
    }
}
