//! The DApp executor
//!
//! Drives one transaction or nested call end to end: load the environment
//! counters (from the resumed frame if reentrant, the store otherwise),
//! push a frame, seed a helper, hydrate statics through the disk codec or
//! the reentrant capture, invoke the entry point, then commit or revert.
//! Every exit path pops the frame and drops the helper.

pub mod avm;
pub mod bridge;
pub mod context;
pub mod dapp;
pub mod interpreter;
pub mod result;
pub mod stack;
pub mod user_store;

use std::collections::HashMap;
use std::sync::Arc;

use log::debug;

use crate::executor::avm::Avm;
use crate::executor::context::{Address, TransactionContext};
use crate::executor::dapp::LoadedDApp;
use crate::executor::interpreter::ExecEnv;
use crate::executor::result::{LogEntry, TransactionResult, TransactionStatus};
use crate::executor::stack::{Frame, FramePhase, ReentrantStack};
use crate::persistence::env::EnvironmentState;
use crate::persistence::fees::StorageFees;
use crate::persistence::session::PersistenceSession;
use crate::persistence::store::GraphStore;
use crate::runtime::heap::{ObjectHeap, Payload};
use crate::runtime::helper::Helper;
use crate::runtime::interrupt::Interrupt;
use crate::runtime::value::{ObjHandle, ShadowValue};

/// Per-task execution state: one heap, one reentrant stack, one persistence
/// session and statics vector per touched address. Tasks are fully isolated
/// from each other.
#[derive(Default)]
pub struct TaskContext {
    pub heap: ObjectHeap,
    pub stack: ReentrantStack,
    pub sessions: HashMap<Address, PersistenceSession>,
    pub statics: HashMap<Address, Vec<ShadowValue>>,
    /// Frame depth at the most recent nested-call boundary; nested helpers
    /// resume it so the whole task shares one depth ceiling.
    pub live_stack_depth: u16,
}

impl TaskContext {
    pub fn new() -> Self {
        Self::default()
    }
}

/// What the executor invokes once statics are hydrated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EntryKind {
    /// The DApp's `main` entry point
    Main,
    /// Class initializers, in load order (deployment)
    Deployment,
}

/// Execute one call on the task. This is the entry for both external
/// transactions and the bridge's nested-call primitive.
pub fn execute_call<S: GraphStore + Default>(
    avm: &mut Avm<S>,
    task: &mut TaskContext,
    ctx: &TransactionContext,
) -> TransactionResult {
    execute(avm, task, ctx, EntryKind::Main)
}

pub(crate) fn execute<S: GraphStore + Default>(
    avm: &mut Avm<S>,
    task: &mut TaskContext,
    ctx: &TransactionContext,
    entry: EntryKind,
) -> TransactionResult {
    let Some(deployed) = avm.deployed(ctx.address) else {
        return TransactionResult {
            status: TransactionStatus::Failed,
            return_data: None,
            energy_used: 0,
            storage_root_hash: None,
            uncaught_message: None,
            logs: Vec::new(),
        };
    };
    let dapp = deployed.dapp.clone();

    // A running frame for this address means a reentrant call: resume its
    // environment instead of touching the store.
    let resume_env = task.stack.top_of_address(ctx.address).map(|frame| {
        assert_eq!(
            frame.phase(),
            FramePhase::Running,
            "nested call into a frame that is not running"
        );
        frame.environment
    });
    let reentrant = resume_env.is_some();
    let initial_env = match resume_env {
        Some(environment) => environment,
        None => match EnvironmentState::load(&deployed.store) {
            Ok(environment) => environment,
            Err(_) => {
                return TransactionResult {
                    status: TransactionStatus::Failed,
                    return_data: None,
                    energy_used: ctx.energy_limit,
                    storage_root_hash: None,
                    uncaught_message: None,
                    logs: Vec::new(),
                }
            }
        },
    };

    task.stack.push(Frame::new(ctx.address, initial_env));
    task.sessions.entry(ctx.address).or_default();
    let depth_before = task.sessions[&ctx.address].reentrant_depth();
    let mut helper = Helper::new(
        ctx.energy_limit,
        initial_env.next_instance_id,
        initial_env.next_hash_code,
        avm.config().max_stack_depth,
    );
    helper.preset_stack_depth(task.live_stack_depth);
    let mut logs: Vec<LogEntry> = Vec::new();
    avm.deployed_mut(ctx.address)
        .expect("deployment checked above")
        .user_kv
        .begin_transaction();

    let outcome = run_invocation(avm, task, &dapp, ctx, &mut helper, &mut logs, reentrant, entry);

    let result = match outcome {
        Ok(return_data) => {
            avm.deployed_mut(ctx.address)
                .expect("deployment checked above")
                .user_kv
                .commit_transaction();
            task.stack.top_mut().advance(FramePhase::Committed);
            TransactionResult {
                status: TransactionStatus::Success,
                return_data,
                energy_used: helper.energy_used(),
                storage_root_hash: Some(
                    avm.deployed(ctx.address)
                        .expect("deployment checked above")
                        .store
                        .simple_hash_code(),
                ),
                uncaught_message: None,
                logs,
            }
        }
        Err(interrupt) => {
            // A control-flow failure reverts the reentrant processor if one
            // was activated, discards pending store writes, and rolls back
            // user storage; a top-level failure therefore never flushes.
            let session = task
                .sessions
                .get_mut(&ctx.address)
                .expect("session created above");
            if session.reentrant_depth() > depth_before {
                let statics = task
                    .statics
                    .get_mut(&ctx.address)
                    .expect("statics exist once captured");
                session.revert_top(statics);
            }
            let deployed = avm
                .deployed_mut(ctx.address)
                .expect("deployment checked above");
            deployed.store.discard_writes();
            deployed.user_kv.rollback_transaction();

            let frame = task.stack.top_mut();
            if frame.phase() != FramePhase::Reverted {
                frame.advance(FramePhase::Reverted);
            }
            result_for_interrupt(interrupt, ctx, &helper, &task.heap)
        }
    };

    task.stack.pop();
    result
}

#[allow(clippy::too_many_arguments)]
fn run_invocation<S: GraphStore + Default>(
    avm: &mut Avm<S>,
    task: &mut TaskContext,
    dapp: &Arc<LoadedDApp>,
    ctx: &TransactionContext,
    helper: &mut Helper,
    logs: &mut Vec<LogEntry>,
    reentrant: bool,
    entry: EntryKind,
) -> Result<Option<Vec<u8>>, Interrupt> {
    let schedule = avm.config().schedule.clone();
    let max_call_depth = avm.config().max_call_depth;

    if entry == EntryKind::Deployment {
        helper.charge(dapp.code_size * schedule.deploy_per_byte)?;
    }

    // Hydrate: disk codec at top level, reentrant capture when nested into
    // the same address.
    {
        let deployed = avm.deployed(ctx.address).expect("deployment checked");
        let session = task
            .sessions
            .get_mut(&ctx.address)
            .expect("session created by execute");
        let statics = task.statics.entry(ctx.address).or_default();
        let mut fees = StorageFees::new(helper, &schedule);
        if reentrant {
            session.capture(&mut task.heap, &dapp.registry, &mut fees, statics)?;
        } else {
            session.codec.hydrate_statics(
                &mut task.heap,
                &dapp.registry,
                &deployed.store,
                &mut fees,
                statics,
            )?;
        }
    }
    task.stack.top_mut().advance(FramePhase::Hydrated);
    task.stack.top_mut().advance(FramePhase::Running);

    let return_data = {
        let mut env = ExecEnv {
            avm,
            task,
            dapp: dapp.clone(),
            ctx,
            helper,
            schedule: schedule.clone(),
            max_call_depth,
            logs,
        };
        match entry {
            EntryKind::Main => {
                let (class, method_idx) = dapp.entry_point();
                match interpreter::invoke(&mut env, class, method_idx, Vec::new())? {
                    Some(ShadowValue::Ref(Some(handle))) => {
                        Some(interpreter::read_byte_array(&mut env, handle)?)
                    }
                    _ => None,
                }
            }
            EntryKind::Deployment => {
                for &(class, method_idx) in dapp.clinits() {
                    interpreter::invoke(&mut env, class, method_idx, Vec::new())?;
                }
                None
            }
        }
    };

    // Commit: write back the reentrant graph when nested, save to the
    // store and flush when top-level.
    let session = task
        .sessions
        .get_mut(&ctx.address)
        .expect("session created by execute");
    let statics = task
        .statics
        .get_mut(&ctx.address)
        .expect("statics hydrated above");
    if reentrant {
        session.commit_top(&mut task.heap, &dapp.registry, statics)?;
        let updated = EnvironmentState {
            next_instance_id: helper.peek_next_instance_id(),
            next_hash_code: helper.peek_next_hash_code(),
        };
        task.stack.update_resumed_environment(ctx.address, updated);
    } else {
        let deployed = avm
            .deployed_mut(ctx.address)
            .expect("deployment checked above");
        let mut fees = StorageFees::new(helper, &schedule);
        session.codec.save_statics(
            &task.heap,
            &dapp.registry,
            &mut deployed.store,
            &mut fees,
            statics,
        )?;
        let updated = EnvironmentState {
            next_instance_id: helper.peek_next_instance_id(),
            next_hash_code: helper.peek_next_hash_code(),
        };
        updated.save(&mut deployed.store);
        deployed.store.flush_writes();
        debug!(
            "committed {} at depth {} (energy used {})",
            ctx.address,
            ctx.depth,
            helper.energy_used()
        );
    }
    Ok(return_data)
}

/// Map a control-flow interrupt to the result status table.
fn result_for_interrupt(
    interrupt: Interrupt,
    ctx: &TransactionContext,
    helper: &Helper,
    heap: &ObjectHeap,
) -> TransactionResult {
    let (status, energy_used, uncaught_message) = match interrupt {
        Interrupt::OutOfEnergy => (TransactionStatus::FailedOutOfEnergy, ctx.energy_limit, None),
        Interrupt::OutOfStack => (TransactionStatus::FailedOutOfStack, ctx.energy_limit, None),
        Interrupt::CallDepthExceeded => (
            TransactionStatus::FailedCallDepthLimit,
            ctx.energy_limit,
            None,
        ),
        Interrupt::Revert => (TransactionStatus::FailedRevert, helper.energy_used(), None),
        Interrupt::Invalid => (TransactionStatus::FailedInvalid, ctx.energy_limit, None),
        Interrupt::Abort => (TransactionStatus::FailedAbort, 0, None),
        Interrupt::Thrown(handle) => {
            let message = throwable_message(heap, handle);
            debug!("uncaught user exception: {:?}", message);
            (
                TransactionStatus::FailedException,
                ctx.energy_limit,
                message,
            )
        }
        Interrupt::Failure(kind) => {
            debug!("vm failure: {:?}", kind);
            (TransactionStatus::Failed, ctx.energy_limit, None)
        }
    };
    TransactionResult {
        status,
        return_data: None,
        energy_used,
        storage_root_hash: None,
        uncaught_message,
        logs: Vec::new(),
    }
}

/// Best-effort message extraction from an escaped throwable; never faults
/// the object in.
fn throwable_message(heap: &ObjectHeap, handle: ObjHandle) -> Option<String> {
    let object = heap.get(handle);
    let message_ref = object.fields.first()?.as_ref_handle().flatten()?;
    match &heap.get(message_ref).payload {
        Some(Payload::Utf8(text)) => Some(text.clone()),
        _ => None,
    }
}
