//! The runtime bridge
//!
//! Static invocations on `ember/rt/Chain` land here. Every operation is
//! metered; the nested call and create primitives re-enter the executor on
//! the same task, which is how the reentrant persistence path engages when
//! a DApp calls its own address.

use blake2::digest::consts::U32;
use blake2::Blake2b;
use sha2::{Digest, Sha256};
use sha3::Keccak256;

use crate::executor;
use crate::executor::context::Address;
use crate::executor::interpreter::{alloc_byte_array, read_byte_array, ExecEnv};
use crate::persistence::env::EnvironmentState;
use crate::persistence::store::GraphStore;
use crate::runtime::builtins;
use crate::runtime::interrupt::{FailureKind, Interrupt};
use crate::runtime::value::{ObjHandle, ShadowValue};
use crate::transform::RawModule;

type Blake2b256 = Blake2b<U32>;

pub fn dispatch<S: GraphStore + Default>(
    env: &mut ExecEnv<'_, S>,
    name: &str,
    args: Vec<ShadowValue>,
) -> Result<Option<ShadowValue>, Interrupt> {
    env.helper.charge(env.schedule.bridge_base)?;
    match name {
        "getSender" => address_value(env, env.ctx.sender),
        "getAddress" => address_value(env, env.ctx.address),
        "getOrigin" => address_value(env, env.ctx.origin),
        "getData" => {
            let data = env.ctx.data.clone();
            let handle = alloc_byte_array(env, &data)?;
            Ok(Some(ShadowValue::Ref(Some(handle))))
        }
        "getValue" => Ok(Some(ShadowValue::Long(env.ctx.value as i64))),
        "getBlockEpochSeconds" => Ok(Some(ShadowValue::Long(env.ctx.block_epoch_seconds as i64))),
        "getBlockNumber" => Ok(Some(ShadowValue::Long(env.ctx.block_number as i64))),
        "getBlockDifficulty" => Ok(Some(ShadowValue::Long(env.ctx.block_difficulty as i64))),
        "getRemainingEnergy" => Ok(Some(ShadowValue::Long(env.helper.energy_remaining() as i64))),

        "call" => nested_call(env, args),
        "create" => nested_create(env, args),

        "getStorage" => {
            let key = byte_array_arg(env, &args, 0)?;
            let deployed = env
                .avm
                .deployed(env.ctx.address)
                .expect("executing an undeployed address");
            let value = deployed.user_kv.get(&key).cloned();
            match value {
                Some(bytes) => {
                    let handle = alloc_byte_array(env, &bytes)?;
                    Ok(Some(ShadowValue::Ref(Some(handle))))
                }
                None => Ok(Some(ShadowValue::Ref(None))),
            }
        }
        "putStorage" => {
            let key = byte_array_arg(env, &args, 0)?;
            let value = byte_array_arg(env, &args, 1)?;
            env.helper.charge(
                env.schedule.storage_write_base
                    + (key.len() + value.len()) as u64 * env.schedule.storage_write_per_byte,
            )?;
            let deployed = env
                .avm
                .deployed_mut(env.ctx.address)
                .expect("executing an undeployed address");
            deployed.user_kv.put(key, value);
            Ok(None)
        }

        "log" => {
            if args.is_empty() || args.len() > 4 {
                return Err(Interrupt::Failure(FailureKind::UnresolvedSymbol));
            }
            let mut blobs = Vec::with_capacity(args.len());
            for idx in 0..args.len() {
                blobs.push(byte_array_arg(env, &args, idx)?);
            }
            let data = blobs.pop().expect("at least one blob");
            let total: usize = blobs.iter().map(|t| t.len()).sum::<usize>() + data.len();
            env.helper
                .charge(env.schedule.log_base + total as u64 * env.schedule.log_per_byte)?;
            env.logs.push(crate::executor::result::LogEntry {
                topics: blobs,
                data,
            });
            Ok(None)
        }

        "revert" => Err(Interrupt::Revert),
        "invalid" => Err(Interrupt::Invalid),

        "sha256" => hash_arg(env, &args, |data| Sha256::digest(data).to_vec()),
        "blake2b" => hash_arg(env, &args, |data| Blake2b256::digest(data).to_vec()),
        "keccak256" => hash_arg(env, &args, |data| Keccak256::digest(data).to_vec()),

        _ => Err(Interrupt::Failure(FailureKind::UnresolvedSymbol)),
    }
}

fn address_value<S: GraphStore + Default>(
    env: &mut ExecEnv<'_, S>,
    address: Address,
) -> Result<Option<ShadowValue>, Interrupt> {
    let handle = alloc_byte_array(env, address.as_bytes())?;
    Ok(Some(ShadowValue::Ref(Some(handle))))
}

fn handle_arg<S: GraphStore>(
    env: &mut ExecEnv<'_, S>,
    args: &[ShadowValue],
    idx: usize,
) -> Result<ObjHandle, Interrupt> {
    match args.get(idx).and_then(|v| v.as_ref_handle()) {
        Some(Some(handle)) => Ok(handle),
        Some(None) => Err(env.throw_builtin(builtins::SHADOW_NULL_POINTER_EXCEPTION, None)),
        None => Err(Interrupt::Failure(FailureKind::TypeMismatch)),
    }
}

fn byte_array_arg<S: GraphStore>(
    env: &mut ExecEnv<'_, S>,
    args: &[ShadowValue],
    idx: usize,
) -> Result<Vec<u8>, Interrupt> {
    let handle = handle_arg(env, args, idx)?;
    read_byte_array(env, handle)
}

fn long_arg(args: &[ShadowValue], idx: usize) -> Result<i64, Interrupt> {
    args.get(idx)
        .and_then(|v| v.as_integral())
        .ok_or(Interrupt::Failure(FailureKind::TypeMismatch))
}

fn hash_arg<S: GraphStore>(
    env: &mut ExecEnv<'_, S>,
    args: &[ShadowValue],
    digest: impl Fn(&[u8]) -> Vec<u8>,
) -> Result<Option<ShadowValue>, Interrupt> {
    let data = byte_array_arg(env, args, 0)?;
    env.helper
        .charge(data.len() as u64 * env.schedule.hash_per_byte)?;
    let hashed = digest(&data);
    let handle = alloc_byte_array(env, &hashed)?;
    Ok(Some(ShadowValue::Ref(Some(handle))))
}

/// `call(address, value, data, energyLimit) -> Result`
fn nested_call<S: GraphStore + Default>(
    env: &mut ExecEnv<'_, S>,
    args: Vec<ShadowValue>,
) -> Result<Option<ShadowValue>, Interrupt> {
    let target_bytes = byte_array_arg(env, &args, 0)?;
    let target = Address::from_slice(&target_bytes)
        .ok_or(Interrupt::Failure(FailureKind::TypeMismatch))?;
    let value = long_arg(&args, 1)?.max(0) as u64;
    let data = byte_array_arg(env, &args, 2)?;
    let energy = long_arg(&args, 3)?.max(0) as u64;

    // The frame at the ceiling fails itself; its caller just sees a failed
    // result.
    if env.ctx.depth + 1 > env.max_call_depth {
        return Err(Interrupt::CallDepthExceeded);
    }

    let inner_ctx = env
        .ctx
        .nested(target, value, data, energy.min(env.helper.energy_remaining()));
    // Publish the live counters so a reentrant callee continues this
    // frame's id space; adopt whatever the callee's commit pushed back.
    publish_counters(env);
    let inner = {
        let avm = &mut *env.avm;
        let task = &mut *env.task;
        executor::execute_call(avm, task, &inner_ctx)
    };
    adopt_counters(env);
    env.helper.charge(inner.energy_used)?;
    if inner.is_success() {
        env.logs.extend(inner.logs.iter().cloned());
    }
    let result = make_result_object(env, inner.is_success(), inner.return_data.as_deref())?;
    Ok(Some(ShadowValue::Ref(Some(result))))
}

/// `create(value, code, energyLimit) -> Result` with the new address as data
fn nested_create<S: GraphStore + Default>(
    env: &mut ExecEnv<'_, S>,
    args: Vec<ShadowValue>,
) -> Result<Option<ShadowValue>, Interrupt> {
    let value = long_arg(&args, 0)?.max(0) as u64;
    let code = byte_array_arg(env, &args, 1)?;
    let energy = long_arg(&args, 2)?.max(0) as u64;

    if env.ctx.depth + 1 > env.max_call_depth {
        return Err(Interrupt::CallDepthExceeded);
    }

    let module: RawModule = match serde_json::from_slice(&code) {
        Ok(module) => module,
        Err(_) => {
            let result = make_result_object(env, false, None)?;
            return Ok(Some(ShadowValue::Ref(Some(result))));
        }
    };
    let energy_limit = energy.min(env.helper.energy_remaining());
    publish_counters(env);
    let (address, inner) = {
        let avm = &mut *env.avm;
        let task = &mut *env.task;
        avm.deploy_in_task(
            task,
            &module,
            env.ctx.address,
            env.ctx.origin,
            value,
            energy_limit,
            env.ctx.depth + 1,
            (
                env.ctx.block_number,
                env.ctx.block_epoch_seconds,
                env.ctx.block_difficulty,
            ),
        )
    };
    adopt_counters(env);
    env.helper.charge(inner.energy_used)?;
    let address_bytes = address.map(|a| a.as_bytes().to_vec());
    let result = make_result_object(env, inner.is_success(), address_bytes.as_deref())?;
    Ok(Some(ShadowValue::Ref(Some(result))))
}

/// Record the caller's live counters on its own frame, where a reentrant
/// callee resumes them.
fn publish_counters<S: GraphStore>(env: &mut ExecEnv<'_, S>) {
    env.task.stack.top_mut().environment = EnvironmentState {
        next_instance_id: env.helper.peek_next_instance_id(),
        next_hash_code: env.helper.peek_next_hash_code(),
    };
    env.task.live_stack_depth = env.helper.stack_depth();
}

/// Fast-forward past whatever a committed reentrant callee allocated.
fn adopt_counters<S: GraphStore>(env: &mut ExecEnv<'_, S>) {
    let resumed = env.task.stack.top_mut().environment;
    env.helper
        .adopt_counters(resumed.next_instance_id, resumed.next_hash_code);
}

fn make_result_object<S: GraphStore>(
    env: &mut ExecEnv<'_, S>,
    success: bool,
    data: Option<&[u8]>,
) -> Result<ObjHandle, Interrupt> {
    let class = env
        .dapp
        .registry
        .id_of(builtins::BRIDGE_RESULT)
        .expect("bridge result class is always registered");
    let handle = env.new_object(class);
    env.task.heap.get_mut(handle).fields[0] = ShadowValue::Bool(success);
    if let Some(data) = data {
        let array = alloc_byte_array(env, data)?;
        env.task.heap.get_mut(handle).fields[1] = ShadowValue::Ref(Some(array));
    }
    Ok(handle)
}
