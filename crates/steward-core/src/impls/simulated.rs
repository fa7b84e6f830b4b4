//! SimulatedChain - in-memory chain for tests and dry runs.
//!
//! Implements every chain-facing port ([`OperationProber`], [`AccountState`],
//! [`ChainHeight`]) over one shared state, so a test can submit through a
//! [`ScriptedAction`], move the chain forward and watch the tracker react.
//!
//! Nonce model: submitting bumps the identity's outstanding count; an
//! operation settles (confirmed or reverted) and bumps the settled count; a
//! dropped operation gives its nonce back.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::domain::{Identity, OperationHandle, OperationStatus, StewardError};
use crate::ports::{AccountState, ChainHeight, FiringContext, OperationProber, TaskAction};

#[derive(Debug, Clone)]
struct SimOperation {
    identity: Identity,
    status: OperationStatus,
    submitted_height: u64,
}

#[derive(Debug, Default)]
struct Counts {
    outstanding: u64,
    settled: u64,
}

#[derive(Debug, Default)]
struct ChainState {
    height: u64,
    next_seq: u64,
    operations: HashMap<OperationHandle, SimOperation>,
    counts: HashMap<Identity, Counts>,
    /// Confirm unconfirmed operations this many blocks after submission.
    auto_confirm_after: Option<u64>,
    fail_probes: bool,
    fail_height: bool,
    probes: usize,
}

impl ChainState {
    fn settle(&mut self, handle: &OperationHandle, status: OperationStatus) {
        let Some(op) = self.operations.get_mut(handle) else {
            return;
        };
        let previous = op.status;
        op.status = status;
        let identity = op.identity.clone();

        let counts = self.counts.entry(identity).or_default();
        match (previous, status) {
            (OperationStatus::Unconfirmed, OperationStatus::Confirmed | OperationStatus::Reverted) => {
                counts.settled += 1;
            }
            (OperationStatus::Unconfirmed, OperationStatus::NotFound) => {
                counts.outstanding = counts.outstanding.saturating_sub(1);
            }
            _ => {}
        }
    }

    fn apply_auto_confirm(&mut self) {
        let Some(after) = self.auto_confirm_after else {
            return;
        };
        let height = self.height;
        let due: Vec<OperationHandle> = self
            .operations
            .iter()
            .filter(|(_, op)| {
                op.status == OperationStatus::Unconfirmed
                    && height >= op.submitted_height.saturating_add(after)
            })
            .map(|(handle, _)| handle.clone())
            .collect();
        for handle in due {
            self.settle(&handle, OperationStatus::Confirmed);
        }
    }
}

/// In-memory chain. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct SimulatedChain {
    state: Arc<Mutex<ChainState>>,
}

impl SimulatedChain {
    pub fn new(height: u64) -> Self {
        let chain = Self::default();
        chain.lock().height = height;
        chain
    }

    /// Confirm every operation `blocks` blocks after it was submitted.
    pub fn with_auto_confirm(self, blocks: u64) -> Self {
        self.lock().auto_confirm_after = Some(blocks);
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ChainState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn height(&self) -> u64 {
        self.lock().height
    }

    pub fn set_height(&self, height: u64) {
        let mut state = self.lock();
        state.height = height;
        state.apply_auto_confirm();
    }

    /// Produce `blocks` new blocks.
    pub fn advance(&self, blocks: u64) {
        let mut state = self.lock();
        state.height = state.height.saturating_add(blocks);
        state.apply_auto_confirm();
    }

    pub fn set_counts(&self, identity: &Identity, outstanding: u64, settled: u64) {
        let mut state = self.lock();
        let counts = state.counts.entry(identity.clone()).or_default();
        counts.outstanding = outstanding;
        counts.settled = settled;
    }

    /// Broadcast a new operation for `identity`.
    pub fn broadcast(&self, identity: &Identity) -> OperationHandle {
        let mut state = self.lock();
        state.next_seq += 1;
        let handle = OperationHandle::new(format!("0x{:064x}", state.next_seq));
        let submitted_height = state.height;
        state.operations.insert(
            handle.clone(),
            SimOperation {
                identity: identity.clone(),
                status: OperationStatus::Unconfirmed,
                submitted_height,
            },
        );
        state.counts.entry(identity.clone()).or_default().outstanding += 1;
        handle
    }

    /// Move an operation to a terminal (or back to unconfirmed) status.
    pub fn settle(&self, handle: &OperationHandle, status: OperationStatus) {
        self.lock().settle(handle, status);
    }

    pub fn status_of(&self, handle: &OperationHandle) -> Option<OperationStatus> {
        self.lock().operations.get(handle).map(|op| op.status)
    }

    pub fn fail_probes(&self, fail: bool) {
        self.lock().fail_probes = fail;
    }

    pub fn fail_height(&self, fail: bool) {
        self.lock().fail_height = fail;
    }

    pub fn probe_count(&self) -> usize {
        self.lock().probes
    }

    pub fn operation_count(&self) -> usize {
        self.lock().operations.len()
    }
}

#[async_trait]
impl OperationProber for SimulatedChain {
    async fn probe(&self, handle: &OperationHandle) -> Result<OperationStatus, StewardError> {
        let mut state = self.lock();
        state.probes += 1;
        if state.fail_probes {
            return Err(StewardError::collaborator("prober", "simulated rpc failure"));
        }
        Ok(state
            .operations
            .get(handle)
            .map(|op| op.status)
            .unwrap_or(OperationStatus::NotFound))
    }
}

#[async_trait]
impl AccountState for SimulatedChain {
    async fn outstanding_count(&self, identity: &Identity) -> Result<u64, StewardError> {
        Ok(self
            .lock()
            .counts
            .get(identity)
            .map(|c| c.outstanding)
            .unwrap_or(0))
    }

    async fn settled_count(&self, identity: &Identity) -> Result<u64, StewardError> {
        Ok(self
            .lock()
            .counts
            .get(identity)
            .map(|c| c.settled)
            .unwrap_or(0))
    }
}

#[async_trait]
impl ChainHeight for SimulatedChain {
    async fn block_height(&self) -> Result<u64, StewardError> {
        let state = self.lock();
        if state.fail_height {
            return Err(StewardError::collaborator("chain", "simulated rpc failure"));
        }
        Ok(state.height)
    }
}

/// Action with a switchable predicate that broadcasts on a [`SimulatedChain`].
#[derive(Debug, Clone)]
pub struct ScriptedAction {
    chain: SimulatedChain,
    identity: Identity,
    ready: Arc<AtomicBool>,
    fail_submit: Arc<AtomicBool>,
    evaluations: Arc<AtomicUsize>,
    submissions: Arc<AtomicUsize>,
    last_steps: Arc<Mutex<Option<u64>>>,
}

impl ScriptedAction {
    pub fn new(chain: SimulatedChain, identity: Identity) -> Self {
        Self {
            chain,
            identity,
            ready: Arc::new(AtomicBool::new(true)),
            fail_submit: Arc::new(AtomicBool::new(false)),
            evaluations: Arc::new(AtomicUsize::new(0)),
            submissions: Arc::new(AtomicUsize::new(0)),
            last_steps: Arc::new(Mutex::new(None)),
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn fail_submit(&self, fail: bool) {
        self.fail_submit.store(fail, Ordering::SeqCst);
    }

    pub fn evaluations(&self) -> usize {
        self.evaluations.load(Ordering::SeqCst)
    }

    pub fn submissions(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }

    /// `partial_execution_steps` seen by the last submit.
    pub fn last_steps(&self) -> Option<u64> {
        *self.last_steps.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl TaskAction for ScriptedAction {
    async fn evaluate(&self, _ctx: &FiringContext<'_>) -> Result<bool, StewardError> {
        self.evaluations.fetch_add(1, Ordering::SeqCst);
        Ok(self.ready.load(Ordering::SeqCst))
    }

    async fn submit(&self, ctx: &FiringContext<'_>) -> Result<OperationHandle, StewardError> {
        if self.fail_submit.load(Ordering::SeqCst) {
            return Err(StewardError::collaborator("submitter", "simulated broadcast failure"));
        }
        self.submissions.fetch_add(1, Ordering::SeqCst);
        *self.last_steps.lock().unwrap_or_else(|e| e.into_inner()) =
            ctx.params.partial_execution_steps;
        Ok(self.chain.broadcast(&self.identity))
    }
}
