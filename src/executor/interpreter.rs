//! The bytecode interpreter
//!
//! Executes transformed method bodies against the task's heap, statics, and
//! helper. All control flow, user throws included, travels the
//! `Interrupt` channel: a throw unwinds until a frame's handler table
//! covers the faulting pc with a matching catch type. VM-internal
//! interrupts never match a handler, so they unwind to the executor no
//! matter what user code catches.

use std::sync::Arc;

use crate::bytecode::descriptor::parse_method_descriptor;
use crate::bytecode::instr::{Cond, Const, Instruction, InvokeKind};
use crate::bytecode::Intrinsic;
use crate::config::EnergySchedule;
use crate::executor::avm::Avm;
use crate::executor::context::TransactionContext;
use crate::executor::dapp::LoadedDApp;
use crate::executor::result::LogEntry;
use crate::executor::{bridge, TaskContext};
use crate::persistence::fees::StorageFees;
use crate::persistence::store::GraphStore;
use crate::runtime::builtins;
use crate::runtime::heap::{LoaderState, Payload, ShadowObject};
use crate::runtime::helper::Helper;
use crate::runtime::interrupt::{FailureKind, Interrupt};
use crate::runtime::registry::{ClassId, CompiledCode, ElemKind, RuntimeBody};
use crate::runtime::value::{ObjHandle, ShadowValue};

/// Everything one invocation executes against. Nested calls build a fresh
/// environment over the same task.
pub struct ExecEnv<'a, S: GraphStore> {
    pub avm: &'a mut Avm<S>,
    pub task: &'a mut TaskContext,
    pub dapp: Arc<LoadedDApp>,
    pub ctx: &'a TransactionContext,
    pub helper: &'a mut Helper,
    pub schedule: EnergySchedule,
    pub max_call_depth: u16,
    pub logs: &'a mut Vec<LogEntry>,
}

impl<'a, S: GraphStore> ExecEnv<'a, S> {
    /// Make an object resident, faulting through its recorded loader.
    pub fn ensure_loaded(&mut self, handle: ObjHandle) -> Result<(), Interrupt> {
        if !self.task.heap.is_stub(handle) {
            return Ok(());
        }
        let deployed = self
            .avm
            .deployed(self.ctx.address)
            .expect("executing an undeployed address");
        let task = &mut *self.task;
        let session = task
            .sessions
            .get_mut(&self.ctx.address)
            .expect("no persistence session for the executing address");
        let mut fees = StorageFees::new(self.helper, &self.schedule);
        session.ensure_loaded(
            &mut task.heap,
            &self.dapp.registry,
            &deployed.store,
            &mut fees,
            handle,
        )
    }

    /// Allocate a resident object of `class` with default fields.
    pub fn new_object(&mut self, class: ClassId) -> ObjHandle {
        let fields = self
            .dapp
            .registry
            .info(class)
            .layout
            .iter()
            .map(|f| ShadowValue::default_for(&f.layout.ty))
            .collect();
        let instance_id = self.helper.next_instance_id();
        let identity_hash = self.helper.next_hash_code();
        self.task.heap.alloc(ShadowObject {
            class,
            instance_id,
            loader: LoaderState::Resident,
            fields,
            payload: None,
            identity_hash,
        })
    }

    /// Raise a built-in shadow exception as an in-flight throw.
    pub fn throw_builtin(&mut self, class_name: &str, message: Option<&str>) -> Interrupt {
        let class = self
            .dapp
            .registry
            .id_of(class_name)
            .expect("builtin exception classes always resolve");
        let handle = self.new_object(class);
        if let Some(text) = message {
            let string = self.new_string(text);
            self.task.heap.get_mut(handle).fields[0] = ShadowValue::Ref(Some(string));
        }
        Interrupt::Thrown(handle)
    }

    pub fn new_string(&mut self, text: &str) -> ObjHandle {
        let class = self
            .dapp
            .registry
            .id_of(builtins::SHADOW_STRING)
            .expect("shadow string is always registered");
        let handle = self.new_object(class);
        self.task.heap.get_mut(handle).payload = Some(Payload::Utf8(text.to_string()));
        handle
    }

    fn statics(&self) -> &Vec<ShadowValue> {
        self.task
            .statics
            .get(&self.ctx.address)
            .expect("statics hydrated before execution")
    }

    fn statics_mut(&mut self) -> &mut Vec<ShadowValue> {
        self.task
            .statics
            .get_mut(&self.ctx.address)
            .expect("statics hydrated before execution")
    }
}

/// Invoke a resolved method with the given arguments (receiver first for
/// instance methods).
pub fn invoke<S: GraphStore + Default>(
    env: &mut ExecEnv<'_, S>,
    class: ClassId,
    method_idx: usize,
    args: Vec<ShadowValue>,
) -> Result<Option<ShadowValue>, Interrupt> {
    let dapp = env.dapp.clone();
    let method = &dapp.registry.info(class).methods[method_idx];
    match &method.body {
        RuntimeBody::Intrinsic(intrinsic) => run_intrinsic(env, class, *intrinsic, args),
        RuntimeBody::Code(code) => run_bytecode(env, code, args),
    }
}

enum Flow {
    Next,
    Goto(usize),
    Return(Option<ShadowValue>),
}

fn run_bytecode<S: GraphStore + Default>(
    env: &mut ExecEnv<'_, S>,
    code: &CompiledCode,
    args: Vec<ShadowValue>,
) -> Result<Option<ShadowValue>, Interrupt> {
    let mut locals = vec![ShadowValue::Ref(None); (code.max_locals as usize).max(args.len())];
    locals[..args.len()].copy_from_slice(&args);
    let mut stack: Vec<ShadowValue> = Vec::new();
    let mut pc = 0usize;
    let mut entered_frame = false;

    loop {
        if pc >= code.code.len() {
            // Falling off the end is a malformed body that slipped through.
            if entered_frame {
                env.helper.exit_frame();
            }
            return Err(Interrupt::Failure(FailureKind::OperandUnderflow));
        }
        let step = exec_instr(env, code, &mut locals, &mut stack, pc, &mut entered_frame);
        match step {
            Ok(Flow::Next) => pc += 1,
            Ok(Flow::Goto(target)) => pc = target,
            Ok(Flow::Return(value)) => return Ok(value),
            Err(Interrupt::Thrown(thrown)) => {
                match find_handler(env, code, pc, thrown) {
                    Some(target) => {
                        stack.clear();
                        stack.push(ShadowValue::Ref(Some(thrown)));
                        pc = target;
                    }
                    None => {
                        if entered_frame {
                            env.helper.exit_frame();
                        }
                        return Err(Interrupt::Thrown(thrown));
                    }
                }
            }
            Err(other) => {
                // Non-catchable control flow; balance the depth counter on
                // the way out.
                if entered_frame {
                    env.helper.exit_frame();
                }
                return Err(other);
            }
        }
    }
}

/// A handler matches when it covers the pc and its catch type (if any) is a
/// supertype of the thrown object's class.
fn find_handler<S: GraphStore>(
    env: &ExecEnv<'_, S>,
    code: &CompiledCode,
    pc: usize,
    thrown: ObjHandle,
) -> Option<usize> {
    let thrown_class = env.task.heap.class_of(thrown);
    for handler in &code.handlers {
        let start = *code.labels.get(&handler.start)?;
        let end = *code.labels.get(&handler.end)?;
        if pc < start || pc >= end {
            continue;
        }
        let matches = match &handler.catch_type {
            None => true,
            Some(name) => match env.dapp.registry.id_of(name) {
                Some(catch_class) => env.dapp.registry.is_subtype(thrown_class, catch_class),
                None => false,
            },
        };
        if matches {
            return code.labels.get(&handler.target).copied();
        }
    }
    None
}

#[allow(clippy::too_many_arguments)]
fn exec_instr<S: GraphStore + Default>(
    env: &mut ExecEnv<'_, S>,
    code: &CompiledCode,
    locals: &mut [ShadowValue],
    stack: &mut Vec<ShadowValue>,
    pc: usize,
    entered_frame: &mut bool,
) -> Result<Flow, Interrupt> {
    let instr = &code.code[pc];
    match instr {
        Instruction::Const(c) => {
            let value = match c {
                Const::Null => ShadowValue::Ref(None),
                Const::Int(v) => ShadowValue::Int(*v),
                Const::Long(v) => ShadowValue::Long(*v),
                Const::Float(v) => ShadowValue::Float(*v),
                Const::Double(v) => ShadowValue::Double(*v),
                Const::Str(text) => {
                    let handle = env.new_string(text);
                    ShadowValue::Ref(Some(handle))
                }
                Const::ClassRef(name) => {
                    let handle = env.new_class_token(name);
                    ShadowValue::Ref(Some(handle))
                }
                Const::MethodHandle(_) => {
                    return Err(Interrupt::Failure(FailureKind::UnresolvedSymbol))
                }
            };
            stack.push(value);
            Ok(Flow::Next)
        }
        Instruction::Load(slot) => {
            stack.push(locals[*slot as usize]);
            Ok(Flow::Next)
        }
        Instruction::Store(slot) => {
            let value = pop(stack)?;
            locals[*slot as usize] = value;
            Ok(Flow::Next)
        }
        Instruction::Dup => {
            let top = *stack.last().ok_or(underflow())?;
            stack.push(top);
            Ok(Flow::Next)
        }
        Instruction::Pop => {
            pop(stack)?;
            Ok(Flow::Next)
        }
        Instruction::Swap => {
            let len = stack.len();
            if len < 2 {
                return Err(underflow());
            }
            stack.swap(len - 1, len - 2);
            Ok(Flow::Next)
        }

        Instruction::Add => arithmetic(env, stack, |a, b| Some(a.wrapping_add(b))),
        Instruction::Sub => arithmetic(env, stack, |a, b| Some(a.wrapping_sub(b))),
        Instruction::Mul => arithmetic(env, stack, |a, b| Some(a.wrapping_mul(b))),
        Instruction::Div => arithmetic(env, stack, |a, b| a.checked_div(b)),
        Instruction::Rem => arithmetic(env, stack, |a, b| a.checked_rem(b)),
        Instruction::Neg => {
            let value = pop(stack)?;
            let negated = match value {
                ShadowValue::Int(v) => ShadowValue::Int(v.wrapping_neg()),
                ShadowValue::Long(v) => ShadowValue::Long(v.wrapping_neg()),
                _ => return Err(Interrupt::Failure(FailureKind::TypeMismatch)),
            };
            stack.push(negated);
            Ok(Flow::Next)
        }
        Instruction::FAdd | Instruction::FSub | Instruction::FMul | Instruction::FDiv => {
            // The validator refuses these; reaching one means a corrupted
            // artifact.
            Err(Interrupt::Failure(FailureKind::TypeMismatch))
        }

        Instruction::Label(_) => Ok(Flow::Next),
        Instruction::Jump(target) => Ok(Flow::Goto(resolve_label(code, *target)?)),
        Instruction::Branch(cond, target) => {
            let taken = eval_cond(stack, *cond)?;
            if taken {
                Ok(Flow::Goto(resolve_label(code, *target)?))
            } else {
                Ok(Flow::Next)
            }
        }
        Instruction::Return => Ok(Flow::Return(None)),
        Instruction::ReturnValue => {
            let value = pop(stack)?;
            Ok(Flow::Return(Some(value)))
        }

        Instruction::New(name) => {
            let target = env
                .dapp
                .registry
                .id_of(name)
                .ok_or(Interrupt::Failure(FailureKind::UnresolvedSymbol))?;
            let handle = env.new_object(target);
            stack.push(ShadowValue::Ref(Some(handle)));
            Ok(Flow::Next)
        }
        Instruction::GetField(r) => {
            let receiver = pop_receiver(env, stack)?;
            env.ensure_loaded(receiver)?;
            let slot = env
                .dapp
                .registry
                .field_slot(env.task.heap.class_of(receiver), &r.name)
                .ok_or(Interrupt::Failure(FailureKind::UnresolvedSymbol))?;
            stack.push(env.task.heap.get(receiver).fields[slot]);
            Ok(Flow::Next)
        }
        Instruction::PutField(r) => {
            let value = pop(stack)?;
            let receiver = pop_receiver(env, stack)?;
            env.ensure_loaded(receiver)?;
            let slot = env
                .dapp
                .registry
                .field_slot(env.task.heap.class_of(receiver), &r.name)
                .ok_or(Interrupt::Failure(FailureKind::UnresolvedSymbol))?;
            env.task.heap.get_mut(receiver).fields[slot] = value;
            Ok(Flow::Next)
        }
        Instruction::GetStatic(r) => {
            let slot = env
                .dapp
                .registry
                .statics_layout()
                .slot_of(&r.owner, &r.name)
                .ok_or(Interrupt::Failure(FailureKind::UnresolvedSymbol))?;
            let value = env.statics()[slot];
            stack.push(value);
            Ok(Flow::Next)
        }
        Instruction::PutStatic(r) => {
            let value = pop(stack)?;
            let slot = env
                .dapp
                .registry
                .statics_layout()
                .slot_of(&r.owner, &r.name)
                .ok_or(Interrupt::Failure(FailureKind::UnresolvedSymbol))?;
            env.statics_mut()[slot] = value;
            Ok(Flow::Next)
        }

        Instruction::Invoke(kind, r) => {
            if r.owner == builtins::BRIDGE_CLASS {
                let sig = parse_method_descriptor(&r.descriptor)
                    .map_err(|_| Interrupt::Failure(FailureKind::UnresolvedSymbol))?;
                let args = pop_n(stack, sig.params.len())?;
                if let Some(value) = bridge::dispatch(env, &r.name, args)? {
                    stack.push(value);
                }
                return Ok(Flow::Next);
            }

            let sig = parse_method_descriptor(&r.descriptor)
                .map_err(|_| Interrupt::Failure(FailureKind::UnresolvedSymbol))?;
            let mut args = pop_n(stack, sig.params.len())?;
            let (dispatch_class, receiver) = match kind {
                InvokeKind::Static => {
                    let owner = env
                        .dapp
                        .registry
                        .id_of(&r.owner)
                        .ok_or(Interrupt::Failure(FailureKind::UnresolvedSymbol))?;
                    (owner, None)
                }
                InvokeKind::Virtual | InvokeKind::Special => {
                    let receiver = pop_receiver(env, stack)?;
                    let dispatch_class = if *kind == InvokeKind::Virtual {
                        env.task.heap.class_of(receiver)
                    } else {
                        env.dapp
                            .registry
                            .id_of(&r.owner)
                            .ok_or(Interrupt::Failure(FailureKind::UnresolvedSymbol))?
                    };
                    (dispatch_class, Some(receiver))
                }
            };
            if let Some(receiver) = receiver {
                args.insert(0, ShadowValue::Ref(Some(receiver)));
            }
            let (resolved_class, method_idx) = env
                .dapp
                .registry
                .resolve_method(dispatch_class, &r.name, &r.descriptor)
                .or_else(|| env.dapp.registry.resolve_method_named(dispatch_class, &r.name))
                .ok_or(Interrupt::Failure(FailureKind::UnresolvedSymbol))?;
            let result = invoke(env, resolved_class, method_idx, args)?;
            if sig.ret.is_some() {
                stack.push(result.ok_or(Interrupt::Failure(FailureKind::TypeMismatch))?);
            }
            Ok(Flow::Next)
        }
        Instruction::InvokeDynamic(_) => Err(Interrupt::Failure(FailureKind::UnresolvedSymbol)),

        Instruction::NewArray(elem) => {
            // Survives only in artifacts that bypassed the array pass; the
            // wrapper construction path is the canonical route.
            let length = pop_integral(stack)?;
            let wrapper = crate::transform::arrays::wrapper_name(elem);
            let target = env
                .dapp
                .registry
                .id_of(wrapper)
                .ok_or(Interrupt::Failure(FailureKind::UnresolvedSymbol))?;
            let handle = alloc_array(env, target, length)?;
            stack.push(ShadowValue::Ref(Some(handle)));
            Ok(Flow::Next)
        }
        Instruction::ArrayLength => {
            let array = pop_receiver(env, stack)?;
            env.ensure_loaded(array)?;
            let length = array_elements(env, array)?.len();
            stack.push(ShadowValue::Int(length as i32));
            Ok(Flow::Next)
        }
        Instruction::ArrayGet => {
            let index = pop_integral(stack)?;
            let array = pop_receiver(env, stack)?;
            env.ensure_loaded(array)?;
            let len = array_elements(env, array)?.len();
            let idx = match usize::try_from(index).ok().filter(|i| *i < len) {
                Some(idx) => idx,
                None => return Err(env.throw_builtin(builtins::SHADOW_BOUNDS_EXCEPTION, None)),
            };
            let value = array_elements(env, array)?[idx];
            stack.push(value);
            Ok(Flow::Next)
        }
        Instruction::ArraySet => {
            let value = pop(stack)?;
            let index = pop_integral(stack)?;
            let array = pop_receiver(env, stack)?;
            env.ensure_loaded(array)?;
            let len = array_elements(env, array)?.len();
            let idx = usize::try_from(index)
                .ok()
                .filter(|i| *i < len)
                .ok_or_else(|| env.throw_builtin(builtins::SHADOW_BOUNDS_EXCEPTION, None))?;
            let kind = env
                .dapp
                .registry
                .info(env.task.heap.class_of(array))
                .elem_kind
                .ok_or(Interrupt::Failure(FailureKind::TypeMismatch))?;
            let value = coerce_element(kind, value)?;
            match &mut env.task.heap.get_mut(array).payload {
                Some(Payload::Elements(elements)) => elements[idx] = value,
                _ => return Err(Interrupt::Failure(FailureKind::TypeMismatch)),
            }
            Ok(Flow::Next)
        }

        Instruction::Throw => {
            let thrown = pop_receiver(env, stack)?;
            Err(Interrupt::Thrown(thrown))
        }

        Instruction::ChargeEnergy(cost) => {
            env.helper.charge(*cost)?;
            Ok(Flow::Next)
        }
        Instruction::ChargeArrayAllocation(elem_size) => {
            let length = *stack.last().ok_or(underflow())?;
            let length = length
                .as_integral()
                .ok_or(Interrupt::Failure(FailureKind::TypeMismatch))?;
            if length < 0 {
                return Err(env.throw_builtin(builtins::SHADOW_BOUNDS_EXCEPTION, None));
            }
            let cost = env.schedule.allocation_base
                + (length as u64) * elem_size * env.schedule.allocation_per_byte;
            env.helper.charge(cost)?;
            Ok(Flow::Next)
        }
        Instruction::EnterFrame => {
            env.helper.enter_frame()?;
            *entered_frame = true;
            Ok(Flow::Next)
        }
        Instruction::ExitFrame => {
            env.helper.exit_frame();
            *entered_frame = false;
            Ok(Flow::Next)
        }
        Instruction::WrapString | Instruction::WrapClassRef => {
            // The constant was materialized unblessed; wrapping assigns its
            // shadow identity.
            let value = pop(stack)?;
            let handle = value
                .as_ref_handle()
                .flatten()
                .ok_or(Interrupt::Failure(FailureKind::TypeMismatch))?;
            let hash = env.helper.next_hash_code();
            env.task.heap.get_mut(handle).identity_hash = hash;
            stack.push(ShadowValue::Ref(Some(handle)));
            Ok(Flow::Next)
        }
        Instruction::WrapThrown => {
            let value = pop(stack)?;
            let handle = match value.as_ref_handle() {
                Some(Some(h)) => h,
                _ => return Err(env.throw_builtin(builtins::SHADOW_NULL_POINTER_EXCEPTION, None)),
            };
            let throwable = env
                .dapp
                .registry
                .id_of(builtins::SHADOW_THROWABLE)
                .expect("shadow throwable is always registered");
            let wrapped = if env
                .dapp
                .registry
                .is_subtype(env.task.heap.class_of(handle), throwable)
            {
                handle
            } else {
                let boxed = env.new_object(throwable);
                // Keep the original object reachable through the cause slot.
                env.task.heap.get_mut(boxed).fields[1] = ShadowValue::Ref(Some(handle));
                boxed
            };
            stack.push(ShadowValue::Ref(Some(wrapped)));
            Ok(Flow::Next)
        }
        Instruction::FilterControlFlow => {
            // Internal control flow travels the interrupt channel and never
            // materializes as a heap object, so there is nothing to unwrap;
            // the instruction stands as the handler-entry barrier.
            Ok(Flow::Next)
        }
    }
}

fn run_intrinsic<S: GraphStore + Default>(
    env: &mut ExecEnv<'_, S>,
    owner: ClassId,
    intrinsic: Intrinsic,
    mut args: Vec<ShadowValue>,
) -> Result<Option<ShadowValue>, Interrupt> {
    match intrinsic {
        Intrinsic::ObjectInit | Intrinsic::ThrowableInit => Ok(None),
        Intrinsic::ObjectHashCode | Intrinsic::ArrayHashCode => {
            let receiver = receiver_of(&args)?;
            env.ensure_loaded(receiver)?;
            Ok(Some(ShadowValue::Int(
                env.task.heap.get(receiver).identity_hash,
            )))
        }
        Intrinsic::ArrayInit => {
            let length = args
                .pop()
                .and_then(|v| v.as_integral())
                .ok_or(Interrupt::Failure(FailureKind::TypeMismatch))?;
            let handle = alloc_array(env, owner, length)?;
            Ok(Some(ShadowValue::Ref(Some(handle))))
        }
        Intrinsic::ArrayLength => {
            let receiver = receiver_of(&args)?;
            env.ensure_loaded(receiver)?;
            let length = array_elements(env, receiver)?.len();
            Ok(Some(ShadowValue::Int(length as i32)))
        }
        Intrinsic::ArrayGet => {
            let receiver = receiver_of(&args)?;
            let index = arg_integral(&args, 1)?;
            env.ensure_loaded(receiver)?;
            let len = array_elements(env, receiver)?.len();
            let idx = usize::try_from(index)
                .ok()
                .filter(|i| *i < len)
                .ok_or_else(|| env.throw_builtin(builtins::SHADOW_BOUNDS_EXCEPTION, None))?;
            Ok(Some(array_elements(env, receiver)?[idx]))
        }
        Intrinsic::ArraySet => {
            let receiver = receiver_of(&args)?;
            let index = arg_integral(&args, 1)?;
            let value = *args
                .get(2)
                .ok_or(Interrupt::Failure(FailureKind::TypeMismatch))?;
            env.ensure_loaded(receiver)?;
            let len = array_elements(env, receiver)?.len();
            let idx = usize::try_from(index)
                .ok()
                .filter(|i| *i < len)
                .ok_or_else(|| env.throw_builtin(builtins::SHADOW_BOUNDS_EXCEPTION, None))?;
            let kind = env
                .dapp
                .registry
                .info(env.task.heap.class_of(receiver))
                .elem_kind
                .ok_or(Interrupt::Failure(FailureKind::TypeMismatch))?;
            let value = coerce_element(kind, value)?;
            match &mut env.task.heap.get_mut(receiver).payload {
                Some(Payload::Elements(elements)) => elements[idx] = value,
                _ => return Err(Interrupt::Failure(FailureKind::TypeMismatch)),
            }
            Ok(None)
        }
        Intrinsic::StringLength => {
            let receiver = receiver_of(&args)?;
            env.ensure_loaded(receiver)?;
            match &env.task.heap.get(receiver).payload {
                Some(Payload::Utf8(text)) => Ok(Some(ShadowValue::Int(text.len() as i32))),
                _ => Err(Interrupt::Failure(FailureKind::TypeMismatch)),
            }
        }
        Intrinsic::ThrowableInitMessage => {
            let receiver = receiver_of(&args)?;
            env.task.heap.get_mut(receiver).fields[0] = arg_value(&args, 1)?;
            Ok(None)
        }
        Intrinsic::ThrowableInitMessageCause => {
            let receiver = receiver_of(&args)?;
            env.task.heap.get_mut(receiver).fields[0] = arg_value(&args, 1)?;
            env.task.heap.get_mut(receiver).fields[1] = arg_value(&args, 2)?;
            Ok(None)
        }
        Intrinsic::ThrowableGetMessage => {
            let receiver = receiver_of(&args)?;
            env.ensure_loaded(receiver)?;
            Ok(Some(env.task.heap.get(receiver).fields[0]))
        }
    }
}

impl<'a, S: GraphStore> ExecEnv<'a, S> {
    fn new_class_token(&mut self, name: &str) -> ObjHandle {
        let class = self
            .dapp
            .registry
            .id_of(builtins::SHADOW_CLASS)
            .expect("shadow class token is always registered");
        let handle = self.new_object(class);
        self.task.heap.get_mut(handle).payload = Some(Payload::Utf8(name.to_string()));
        handle
    }
}

fn alloc_array<S: GraphStore>(
    env: &mut ExecEnv<'_, S>,
    class: ClassId,
    length: i64,
) -> Result<ObjHandle, Interrupt> {
    if length < 0 {
        return Err(env.throw_builtin(builtins::SHADOW_BOUNDS_EXCEPTION, None));
    }
    let kind = env
        .dapp
        .registry
        .info(class)
        .elem_kind
        .ok_or(Interrupt::Failure(FailureKind::TypeMismatch))?;
    let default = match kind {
        ElemKind::Bool => ShadowValue::Bool(false),
        ElemKind::Byte => ShadowValue::Byte(0),
        ElemKind::Short => ShadowValue::Short(0),
        ElemKind::Char => ShadowValue::Char(0),
        ElemKind::Int => ShadowValue::Int(0),
        ElemKind::Long => ShadowValue::Long(0),
        ElemKind::Float => ShadowValue::Float(0.0),
        ElemKind::Double => ShadowValue::Double(0.0),
        ElemKind::Ref => ShadowValue::Ref(None),
    };
    let handle = env.new_object(class);
    env.task.heap.get_mut(handle).payload =
        Some(Payload::Elements(vec![default; length as usize]));
    Ok(handle)
}

/// Narrow a value to the element kind its array stores. Reference kinds
/// pass references through; integral kinds truncate like a primitive cast.
fn coerce_element(kind: ElemKind, value: ShadowValue) -> Result<ShadowValue, Interrupt> {
    let mismatch = Interrupt::Failure(FailureKind::TypeMismatch);
    match kind {
        ElemKind::Ref => match value {
            ShadowValue::Ref(_) => Ok(value),
            _ => Err(mismatch),
        },
        ElemKind::Float => match value {
            ShadowValue::Float(_) => Ok(value),
            ShadowValue::Double(v) => Ok(ShadowValue::Float(v as f32)),
            _ => Err(mismatch),
        },
        ElemKind::Double => match value {
            ShadowValue::Double(_) => Ok(value),
            ShadowValue::Float(v) => Ok(ShadowValue::Double(v as f64)),
            _ => Err(mismatch),
        },
        _ => {
            let v = value.as_integral().ok_or(mismatch)?;
            Ok(match kind {
                ElemKind::Bool => ShadowValue::Bool(v != 0),
                ElemKind::Byte => ShadowValue::Byte(v as i8),
                ElemKind::Short => ShadowValue::Short(v as i16),
                ElemKind::Char => ShadowValue::Char(v as u16),
                ElemKind::Int => ShadowValue::Int(v as i32),
                ElemKind::Long => ShadowValue::Long(v),
                _ => unreachable!(),
            })
        }
    }
}

fn array_elements<'h, S: GraphStore>(
    env: &'h ExecEnv<'_, S>,
    array: ObjHandle,
) -> Result<&'h Vec<ShadowValue>, Interrupt> {
    match &env.task.heap.get(array).payload {
        Some(Payload::Elements(elements)) => Ok(elements),
        _ => Err(Interrupt::Failure(FailureKind::TypeMismatch)),
    }
}

fn receiver_of(args: &[ShadowValue]) -> Result<ObjHandle, Interrupt> {
    args.first()
        .and_then(|v| v.as_ref_handle())
        .flatten()
        .ok_or(Interrupt::Failure(FailureKind::TypeMismatch))
}

fn arg_value(args: &[ShadowValue], idx: usize) -> Result<ShadowValue, Interrupt> {
    args.get(idx)
        .copied()
        .ok_or(Interrupt::Failure(FailureKind::TypeMismatch))
}

fn arg_integral(args: &[ShadowValue], idx: usize) -> Result<i64, Interrupt> {
    arg_value(args, idx)?
        .as_integral()
        .ok_or(Interrupt::Failure(FailureKind::TypeMismatch))
}

fn underflow() -> Interrupt {
    Interrupt::Failure(FailureKind::OperandUnderflow)
}

fn pop(stack: &mut Vec<ShadowValue>) -> Result<ShadowValue, Interrupt> {
    stack.pop().ok_or_else(underflow)
}

fn pop_n(stack: &mut Vec<ShadowValue>, n: usize) -> Result<Vec<ShadowValue>, Interrupt> {
    if stack.len() < n {
        return Err(underflow());
    }
    Ok(stack.split_off(stack.len() - n))
}

fn pop_integral(stack: &mut Vec<ShadowValue>) -> Result<i64, Interrupt> {
    pop(stack)?
        .as_integral()
        .ok_or(Interrupt::Failure(FailureKind::TypeMismatch))
}

/// Pop a reference, raising the shadow NPE on null.
fn pop_receiver<S: GraphStore>(
    env: &mut ExecEnv<'_, S>,
    stack: &mut Vec<ShadowValue>,
) -> Result<ObjHandle, Interrupt> {
    match pop(stack)?.as_ref_handle() {
        Some(Some(handle)) => Ok(handle),
        Some(None) => Err(env.throw_builtin(builtins::SHADOW_NULL_POINTER_EXCEPTION, None)),
        None => Err(Interrupt::Failure(FailureKind::TypeMismatch)),
    }
}

fn resolve_label(code: &CompiledCode, label: u32) -> Result<usize, Interrupt> {
    code.labels
        .get(&label)
        .copied()
        .ok_or(Interrupt::Failure(FailureKind::UnresolvedSymbol))
}

fn eval_cond(stack: &mut Vec<ShadowValue>, cond: Cond) -> Result<bool, Interrupt> {
    match cond {
        Cond::Eq | Cond::Ne | Cond::Lt | Cond::Ge | Cond::Gt | Cond::Le => {
            let b = pop_integral(stack)?;
            let a = pop_integral(stack)?;
            Ok(match cond {
                Cond::Eq => a == b,
                Cond::Ne => a != b,
                Cond::Lt => a < b,
                Cond::Ge => a >= b,
                Cond::Gt => a > b,
                Cond::Le => a <= b,
                _ => unreachable!(),
            })
        }
        Cond::IsNull | Cond::NonNull => {
            let r = pop(stack)?
                .as_ref_handle()
                .ok_or(Interrupt::Failure(FailureKind::TypeMismatch))?;
            Ok(match cond {
                Cond::IsNull => r.is_none(),
                Cond::NonNull => r.is_some(),
                _ => unreachable!(),
            })
        }
        Cond::RefEq | Cond::RefNe => {
            let b = pop(stack)?
                .as_ref_handle()
                .ok_or(Interrupt::Failure(FailureKind::TypeMismatch))?;
            let a = pop(stack)?
                .as_ref_handle()
                .ok_or(Interrupt::Failure(FailureKind::TypeMismatch))?;
            Ok(match cond {
                Cond::RefEq => a == b,
                Cond::RefNe => a != b,
                _ => unreachable!(),
            })
        }
    }
}

/// Integer arithmetic over Int/Long with widening; a `None` from the
/// operation is division by zero.
fn arithmetic<S: GraphStore>(
    env: &mut ExecEnv<'_, S>,
    stack: &mut Vec<ShadowValue>,
    op: impl Fn(i64, i64) -> Option<i64>,
) -> Result<Flow, Interrupt> {
    let b = pop(stack)?;
    let a = pop(stack)?;
    let wide = matches!(a, ShadowValue::Long(_)) || matches!(b, ShadowValue::Long(_));
    let (a, b) = match (a.as_integral(), b.as_integral()) {
        (Some(a), Some(b)) => (a, b),
        _ => return Err(Interrupt::Failure(FailureKind::TypeMismatch)),
    };
    let result = op(a, b)
        .ok_or_else(|| env.throw_builtin(builtins::SHADOW_ARITHMETIC_EXCEPTION, Some("/ by zero")))?;
    if wide {
        stack.push(ShadowValue::Long(result));
    } else {
        stack.push(ShadowValue::Int(result as i32));
    }
    Ok(Flow::Next)
}

/// Read a shadow byte array into host bytes.
pub fn read_byte_array<S: GraphStore>(
    env: &mut ExecEnv<'_, S>,
    handle: ObjHandle,
) -> Result<Vec<u8>, Interrupt> {
    env.ensure_loaded(handle)?;
    let elements = array_elements(env, handle)?;
    let mut out = Vec::with_capacity(elements.len());
    for value in elements {
        match value {
            ShadowValue::Byte(b) => out.push(*b as u8),
            _ => return Err(Interrupt::Failure(FailureKind::TypeMismatch)),
        }
    }
    Ok(out)
}

/// Allocate a shadow byte array holding `bytes`.
pub fn alloc_byte_array<S: GraphStore>(
    env: &mut ExecEnv<'_, S>,
    bytes: &[u8],
) -> Result<ObjHandle, Interrupt> {
    let class = env
        .dapp
        .registry
        .id_of(builtins::BYTE_ARRAY)
        .expect("byte array wrapper is always registered");
    let handle = alloc_array(env, class, bytes.len() as i64)?;
    let elements: Vec<ShadowValue> = bytes.iter().map(|b| ShadowValue::Byte(*b as i8)).collect();
    env.task.heap.get_mut(handle).payload = Some(Payload::Elements(elements));
    Ok(handle)
}
