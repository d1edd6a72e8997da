//! The undo log.

use std::collections::VecDeque;
use std::fmt;

use partix_common::UndoToken;
use tracing::{debug, error, trace};

use crate::error::{UndoError, UndoResult};

/// Which quantum, if any, receives new undo records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantumState {
    /// No token has ever been set. Records are accepted and discarded.
    Unset,
    /// The quantum with this token is current.
    Active(UndoToken),
    /// The last current quantum was released or undone.
    Idle,
}

impl QuantumState {
    /// Returns the current token, if any.
    pub fn token(self) -> Option<UndoToken> {
        match self {
            Self::Active(token) => Some(token),
            Self::Unset | Self::Idle => None,
        }
    }
}

impl fmt::Display for QuantumState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unset => write!(f, "Unset"),
            Self::Active(token) => write!(f, "Active({})", token),
            Self::Idle => write!(f, "Idle"),
        }
    }
}

/// All undo records attached to one token.
#[derive(Debug)]
pub struct UndoQuantum<A> {
    token: UndoToken,
    actions: Vec<A>,
}

impl<A> UndoQuantum<A> {
    fn new(token: UndoToken) -> Self {
        Self {
            token,
            actions: Vec::new(),
        }
    }

    /// The quantum's token.
    pub fn token(&self) -> UndoToken {
        self.token
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Returns true if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Records in the order they were made.
    pub fn actions(&self) -> &[A] {
        &self.actions
    }
}

/// Cumulative undo log counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UndoStats {
    /// Quanta opened by `set_undo_token`.
    pub quanta_created: u64,
    /// Quanta committed by `release`.
    pub quanta_released: u64,
    /// Quanta unwound by `undo`.
    pub quanta_undone: u64,
    /// Records appended to a quantum.
    pub actions_recorded: u64,
    /// Records discarded because no token had been set.
    pub actions_discarded: u64,
    /// Records handed back for reversal.
    pub actions_undone: u64,
}

/// The per-partition undo log.
///
/// Outstanding quanta are kept in token order; the newest is the only one
/// that can be current.
pub struct UndoLog<A> {
    quanta: VecDeque<UndoQuantum<A>>,
    state: QuantumState,
    last_token: Option<UndoToken>,
    stats: UndoStats,
}

impl<A> Default for UndoLog<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> fmt::Debug for UndoLog<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UndoLog")
            .field("state", &self.state)
            .field("outstanding", &self.quanta.len())
            .field("last_token", &self.last_token)
            .finish()
    }
}

impl<A> UndoLog<A> {
    /// Creates an empty log in the `Unset` state.
    pub fn new() -> Self {
        Self {
            quanta: VecDeque::new(),
            state: QuantumState::Unset,
            last_token: None,
            stats: UndoStats::default(),
        }
    }

    /// Current state.
    pub fn state(&self) -> QuantumState {
        self.state
    }

    /// The current quantum, if one is active.
    pub fn current_quantum(&self) -> Option<&UndoQuantum<A>> {
        match self.state {
            QuantumState::Active(_) => self.quanta.back(),
            QuantumState::Unset | QuantumState::Idle => None,
        }
    }

    /// Tokens of quanta not yet released or undone, oldest first.
    pub fn outstanding_tokens(&self) -> Vec<UndoToken> {
        self.quanta.iter().map(UndoQuantum::token).collect()
    }

    /// The most recently generated token.
    pub fn last_token(&self) -> Option<UndoToken> {
        self.last_token
    }

    /// Cumulative counters.
    pub fn stats(&self) -> UndoStats {
        self.stats
    }

    /// Makes `token` current.
    ///
    /// The no-op token is ignored, as is the token already current. A token
    /// lower than the last one generated is rejected and leaves the log
    /// unchanged.
    pub fn set_undo_token(&mut self, token: UndoToken) -> UndoResult<()> {
        if token.is_no_op() || self.state == QuantumState::Active(token) {
            return Ok(());
        }
        if let Some(last) = self.last_token {
            if token < last {
                error!(%token, %last, "undo token regression");
                return Err(UndoError::TokenRegression { token, last });
            }
        }

        trace!(%token, previous = %self.state, "undo quantum opened");
        self.quanta.push_back(UndoQuantum::new(token));
        self.state = QuantumState::Active(token);
        self.last_token = Some(token);
        self.stats.quanta_created += 1;
        Ok(())
    }

    /// Fails unless a mutation made now could be recorded.
    pub fn check_active(&self) -> UndoResult<()> {
        match (self.state, self.last_token) {
            (QuantumState::Idle, Some(last)) => Err(UndoError::NoActiveQuantum { last }),
            _ => Ok(()),
        }
    }

    /// Appends a record to the current quantum.
    pub fn record(&mut self, action: A) -> UndoResult<()> {
        self.check_active()?;
        match self.state {
            QuantumState::Active(_) => {
                if let Some(quantum) = self.quanta.back_mut() {
                    quantum.actions.push(action);
                    self.stats.actions_recorded += 1;
                }
            }
            QuantumState::Unset | QuantumState::Idle => self.stats.actions_discarded += 1,
        }
        Ok(())
    }

    /// Commits every quantum with a token at or below `token`.
    ///
    /// Returns the number of quanta committed. Releasing the same token
    /// twice commits nothing the second time.
    pub fn release(&mut self, token: UndoToken) -> usize {
        if self.state == QuantumState::Unset {
            return 0;
        }
        let mut released = 0;
        while self.quanta.front().is_some_and(|q| q.token <= token) {
            self.quanta.pop_front();
            released += 1;
        }
        if matches!(self.state, QuantumState::Active(current) if current <= token) {
            self.state = QuantumState::Idle;
        }
        self.stats.quanta_released += released as u64;
        if released > 0 {
            debug!(%token, released, "undo quanta released");
        }
        released
    }

    /// Unwinds every quantum with a token at or above `token`.
    ///
    /// Records are passed to `apply` newest first. Afterwards no quantum is
    /// current. Returns the number of records unwound.
    pub fn undo<F>(&mut self, token: UndoToken, mut apply: F) -> usize
    where
        F: FnMut(A),
    {
        if self.state == QuantumState::Unset {
            return 0;
        }
        let mut unwound = 0;
        while self.quanta.back().is_some_and(|q| q.token >= token) {
            if let Some(quantum) = self.quanta.pop_back() {
                for action in quantum.actions.into_iter().rev() {
                    apply(action);
                    unwound += 1;
                }
                self.stats.quanta_undone += 1;
            }
        }
        self.state = QuantumState::Idle;
        self.stats.actions_undone += unwound as u64;
        debug!(%token, unwound, "undo quanta rolled back");
        unwound
    }
}
