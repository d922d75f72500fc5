//! Workflow runtime command router.
//!
//! A capacity-1 async command queue that serializes the download and combine
//! phases of one workflow, plus a dispatcher task that delivers every
//! callback from a single context so callbacks never race each other.
//!
//! The queue carries a gate: `attach` suspends it until the playlist is
//! known, a failed `attach` drops everything queued, and `cancel` drops
//! everything queued while cancelling the running unit's token.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::core::models::{WorkflowError, WorkflowResult};
use crate::core::workflow::{Completion, ProgressCallback, WorkflowCore, WorkflowListener};

type Callback = Box<dyn FnOnce() + Send + 'static>;

/// Delivers callbacks in submission order from one task.
#[derive(Clone)]
pub struct CallbackDispatcher {
    sender: mpsc::UnboundedSender<Callback>,
}

impl CallbackDispatcher {
    pub fn spawn(handle: &Handle) -> Self {
        let (sender, mut rx) = mpsc::unbounded_channel::<Callback>();
        handle.spawn(async move {
            while let Some(callback) = rx.recv().await {
                callback();
            }
            debug!("Callback dispatcher channel closed");
        });
        Self { sender }
    }

    pub fn dispatch(&self, callback: impl FnOnce() + Send + 'static) {
        if self.sender.send(Box::new(callback)).is_err() {
            warn!("Callback dispatcher unavailable, dropping callback");
        }
    }
}

/// Commands understood by the runtime router.
pub enum WorkflowCommand {
    Download {
        on_progress: ProgressCallback,
        respond_to: Completion<std::path::PathBuf>,
    },
    Combine {
        respond_to: Completion<std::path::PathBuf>,
    },
}

impl fmt::Debug for WorkflowCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Download { .. } => f.write_str("Download"),
            Self::Combine { .. } => f.write_str("Combine"),
        }
    }
}

/// Why queued commands were dropped without running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// `attach` failed; queued completions receive `WorkflowError::Cancelled`
    AttachFailed,
    /// `cancel()` was called; queued completions are cleared silently
    Cancelled,
    /// The router is gone; completions receive `WorkflowError::Cancelled`
    Shutdown,
}

#[derive(Debug, Clone)]
struct QueueGate {
    suspended: bool,
    epoch: u64,
    drop_reason: DropReason,
    cancel: CancellationToken,
}

struct Queued {
    epoch: u64,
    command: WorkflowCommand,
}

enum GateDecision {
    Run(CancellationToken),
    Drop(DropReason),
}

struct QueueShared {
    name: String,
    gate: watch::Sender<QueueGate>,
    pending: AtomicUsize,
    listener: RwLock<Option<Weak<dyn WorkflowListener>>>,
    dispatcher: CallbackDispatcher,
}

impl QueueShared {
    fn finish_unit(&self) {
        if self.pending.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }

        debug!("[RUNTIME] Queue drained for {}", self.name);
        let listener = self.listener.read().clone();
        let name = self.name.clone();
        self.dispatcher.dispatch(move || {
            if let Some(listener) = listener.and_then(|weak| weak.upgrade()) {
                listener.workflow_finished(&name);
            }
        });
    }

    fn deliver<T: Send + 'static>(
        &self,
        token: &CancellationToken,
        respond_to: Completion<T>,
        result: WorkflowResult<T>,
    ) {
        let cleared = token.is_cancelled() || matches!(&result, Err(e) if e.is_cancelled());
        if cleared {
            debug!("[RUNTIME] Completion cleared by cancellation");
            return;
        }
        self.dispatcher.dispatch(move || respond_to(result));
    }
}

/// Handle to the sequencing queue of one workflow.
#[derive(Clone)]
pub struct WorkQueue {
    handle: Handle,
    sender: mpsc::UnboundedSender<Queued>,
    shared: Arc<QueueShared>,
}

impl WorkQueue {
    /// Spawn the router loop on `handle` and return its queue handle.
    pub fn spawn(
        handle: Handle,
        core: Arc<WorkflowCore>,
        dispatcher: CallbackDispatcher,
        name: String,
    ) -> Self {
        let (gate, gate_rx) = watch::channel(QueueGate {
            suspended: false,
            epoch: 0,
            drop_reason: DropReason::Cancelled,
            cancel: CancellationToken::new(),
        });
        let shared = Arc::new(QueueShared {
            name,
            gate,
            pending: AtomicUsize::new(0),
            listener: RwLock::new(None),
            dispatcher,
        });

        let (sender, rx) = mpsc::unbounded_channel();
        handle.spawn(router_loop(core, Arc::clone(&shared), rx, gate_rx));
        debug!("[RUNTIME] Router loop spawned for {}", shared.name);

        Self {
            handle,
            sender,
            shared,
        }
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn set_listener(&self, listener: Weak<dyn WorkflowListener>) {
        *self.shared.listener.write() = Some(listener);
    }

    /// Queue a command behind any running or queued unit
    pub fn enqueue(&self, command: WorkflowCommand) {
        let epoch = self.shared.gate.borrow().epoch;
        self.begin_unit();
        debug!("[RUNTIME] Enqueue {:?} (epoch {})", command, epoch);

        if let Err(mpsc::error::SendError(queued)) = self.sender.send(Queued { epoch, command }) {
            warn!("[RUNTIME] Router unavailable, rejecting {:?}", queued.command);
            reject(&self.shared, queued.command, DropReason::Shutdown);
            self.shared.finish_unit();
        }
    }

    /// Track a unit of work that runs outside the router (attach)
    pub fn begin_unit(&self) {
        self.shared.pending.fetch_add(1, Ordering::AcqRel);
    }

    pub fn finish_unit(&self) {
        self.shared.finish_unit();
    }

    pub fn suspend(&self) {
        self.shared.gate.send_modify(|gate| gate.suspended = true);
    }

    pub fn resume(&self) {
        self.shared.gate.send_modify(|gate| gate.suspended = false);
    }

    /// Token observed by the unit that starts next
    pub fn current_token(&self) -> CancellationToken {
        self.shared.gate.borrow().cancel.clone()
    }

    /// Drop every queued command without touching the running one
    pub fn cancel_queued(&self, reason: DropReason) {
        self.shared.gate.send_modify(|gate| {
            gate.epoch += 1;
            gate.drop_reason = reason;
        });
    }

    /// Drop every queued command and cancel the running one
    pub fn cancel_all(&self) {
        self.shared.gate.send_modify(|gate| {
            gate.epoch += 1;
            gate.drop_reason = DropReason::Cancelled;
            gate.cancel.cancel();
            gate.cancel = CancellationToken::new();
        });
    }

    pub fn deliver<T: Send + 'static>(
        &self,
        token: &CancellationToken,
        respond_to: Completion<T>,
        result: WorkflowResult<T>,
    ) {
        self.shared.deliver(token, respond_to, result);
    }
}

fn reject(shared: &QueueShared, command: WorkflowCommand, reason: DropReason) {
    if reason == DropReason::Cancelled {
        return;
    }
    let respond_to = match command {
        WorkflowCommand::Download { respond_to, .. } => respond_to,
        WorkflowCommand::Combine { respond_to } => respond_to,
    };
    shared
        .dispatcher
        .dispatch(move || respond_to(Err(WorkflowError::Cancelled)));
}

async fn wait_for_gate(gate_rx: &mut watch::Receiver<QueueGate>, epoch: u64) -> GateDecision {
    loop {
        {
            let gate = gate_rx.borrow_and_update();
            if gate.epoch != epoch {
                return GateDecision::Drop(gate.drop_reason);
            }
            if !gate.suspended {
                return GateDecision::Run(gate.cancel.clone());
            }
        }
        if gate_rx.changed().await.is_err() {
            return GateDecision::Drop(DropReason::Shutdown);
        }
    }
}

async fn router_loop(
    core: Arc<WorkflowCore>,
    shared: Arc<QueueShared>,
    mut rx: mpsc::UnboundedReceiver<Queued>,
    mut gate_rx: watch::Receiver<QueueGate>,
) {
    while let Some(Queued { epoch, command }) = rx.recv().await {
        debug!("[RUNTIME] Processing command: {:?}", command);
        match wait_for_gate(&mut gate_rx, epoch).await {
            GateDecision::Run(token) => handle_command(&core, &shared, command, token).await,
            GateDecision::Drop(reason) => {
                debug!("[RUNTIME] Dropping {:?} ({:?})", command, reason);
                reject(&shared, command, reason);
            }
        }
        shared.finish_unit();
    }
    debug!("Workflow runtime channel closed, exiting router loop");
}

#[instrument(skip(core, shared, command, token), fields(?command, workflow = %shared.name))]
async fn handle_command(
    core: &Arc<WorkflowCore>,
    shared: &QueueShared,
    command: WorkflowCommand,
    token: CancellationToken,
) {
    match command {
        WorkflowCommand::Download {
            on_progress,
            respond_to,
        } => {
            let result = core.run_download(on_progress, token.clone()).await;
            debug!("[RUNTIME_CMD] Download finished, success: {}", result.is_ok());
            shared.deliver(&token, respond_to, result);
        }
        WorkflowCommand::Combine { respond_to } => {
            let result = core.run_combine().await;
            debug!("[RUNTIME_CMD] Combine finished, success: {}", result.is_ok());
            shared.deliver(&token, respond_to, result);
        }
    }
}
