//! The instruction set of the DApp bytecode language
//!
//! Instructions come in two tiers: the user-visible tier that compilers emit,
//! and the injected tier (`ChargeEnergy`, `EnterFrame`, wrapping helpers)
//! that only the transformation pipeline may produce. The validator rejects
//! injected opcodes arriving in user input, so their presence in an artifact
//! proves the artifact passed through the pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Branch and handler targets are symbolic labels resolved at load time.
pub type Label = u32;

/// A loadable constant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Const {
    Null,
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Str(String),
    /// A class token, by internal name
    ClassRef(String),
    /// A method-handle constant; always fatal in the type-name mapper
    MethodHandle(String),
}

/// Comparison condition for `Branch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cond {
    /// Pop two integers, branch if equal
    Eq,
    Ne,
    Lt,
    Ge,
    Gt,
    Le,
    /// Pop one reference, branch if null
    IsNull,
    NonNull,
    /// Pop two references, branch on identity
    RefEq,
    RefNe,
}

/// A symbolic field reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRef {
    pub owner: String,
    pub name: String,
    pub descriptor: String,
}

/// A symbolic method reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodRef {
    pub owner: String,
    pub name: String,
    pub descriptor: String,
}

/// Dispatch mode for `Invoke`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvokeKind {
    Static,
    /// Dispatch on the runtime class of the receiver
    Virtual,
    /// Exact dispatch: constructors and super calls
    Special,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Instruction {
    Const(Const),
    /// Load a local variable slot onto the operand stack
    Load(u16),
    Store(u16),
    Dup,
    Pop,
    Swap,

    // Integer arithmetic (operates on Int or Long pairs)
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Neg,

    // Floating arithmetic: present in the grammar, refused by the validator
    FAdd,
    FSub,
    FMul,
    FDiv,

    Label(Label),
    Jump(Label),
    Branch(Cond, Label),
    Return,
    ReturnValue,

    New(String),
    GetField(FieldRef),
    PutField(FieldRef),
    GetStatic(FieldRef),
    PutStatic(FieldRef),
    Invoke(InvokeKind, MethodRef),
    /// Dynamic invocation; always fatal in the type-name mapper
    InvokeDynamic(String),

    /// Allocate an array of the given element descriptor; pops the length
    NewArray(String),
    ArrayLength,
    ArrayGet,
    ArraySet,

    Throw,

    // --- injected tier: produced only by the transformation pipeline ---
    /// Debit the helper before the basic block runs
    ChargeEnergy(u64),
    /// Debit header + length x element size; peeks the pending array length
    ChargeArrayAllocation(u64),
    /// Frame-depth accounting against the configured ceiling
    EnterFrame,
    ExitFrame,
    /// Box the host string constant just loaded into a shadow string
    WrapString,
    /// Box the class token just loaded into a shadow class token
    WrapClassRef,
    /// Ensure the value about to be thrown is a shadow throwable
    WrapThrown,
    /// Handler prologue: rethrow VM-internal control-flow carriers
    FilterControlFlow,
}

impl Instruction {
    /// True for instructions that end a basic block.
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Instruction::Jump(_)
                | Instruction::Branch(_, _)
                | Instruction::Return
                | Instruction::ReturnValue
                | Instruction::Throw
        )
    }

    /// True for the tier only the pipeline may emit.
    pub fn is_injected(&self) -> bool {
        matches!(
            self,
            Instruction::ChargeEnergy(_)
                | Instruction::ChargeArrayAllocation(_)
                | Instruction::EnterFrame
                | Instruction::ExitFrame
                | Instruction::WrapString
                | Instruction::WrapClassRef
                | Instruction::WrapThrown
                | Instruction::FilterControlFlow
        )
    }

    /// True for the float arithmetic tier the validator refuses.
    pub fn is_float_arithmetic(&self) -> bool {
        matches!(
            self,
            Instruction::FAdd | Instruction::FSub | Instruction::FMul | Instruction::FDiv
        )
    }

    /// Short opcode name for diagnostics.
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Instruction::Const(_) => "const",
            Instruction::Load(_) => "load",
            Instruction::Store(_) => "store",
            Instruction::Dup => "dup",
            Instruction::Pop => "pop",
            Instruction::Swap => "swap",
            Instruction::Add => "add",
            Instruction::Sub => "sub",
            Instruction::Mul => "mul",
            Instruction::Div => "div",
            Instruction::Rem => "rem",
            Instruction::Neg => "neg",
            Instruction::FAdd => "fadd",
            Instruction::FSub => "fsub",
            Instruction::FMul => "fmul",
            Instruction::FDiv => "fdiv",
            Instruction::Label(_) => "label",
            Instruction::Jump(_) => "jump",
            Instruction::Branch(_, _) => "branch",
            Instruction::Return => "return",
            Instruction::ReturnValue => "returnvalue",
            Instruction::New(_) => "new",
            Instruction::GetField(_) => "getfield",
            Instruction::PutField(_) => "putfield",
            Instruction::GetStatic(_) => "getstatic",
            Instruction::PutStatic(_) => "putstatic",
            Instruction::Invoke(_, _) => "invoke",
            Instruction::InvokeDynamic(_) => "invokedynamic",
            Instruction::NewArray(_) => "newarray",
            Instruction::ArrayLength => "arraylength",
            Instruction::ArrayGet => "arrayget",
            Instruction::ArraySet => "arrayset",
            Instruction::Throw => "throw",
            Instruction::ChargeEnergy(_) => "chargeenergy",
            Instruction::ChargeArrayAllocation(_) => "chargearrayallocation",
            Instruction::EnterFrame => "enterframe",
            Instruction::ExitFrame => "exitframe",
            Instruction::WrapString => "wrapstring",
            Instruction::WrapClassRef => "wrapclassref",
            Instruction::WrapThrown => "wrapthrown",
            Instruction::FilterControlFlow => "filtercontrolflow",
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mnemonic())
    }
}

/// One entry of a method's exception handler table. A handler covers the
/// instructions between `start` and `end` (label-delimited, end exclusive)
/// and transfers control to `target` with the thrown object on the stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExceptionHandler {
    pub start: Label,
    pub end: Label,
    pub target: Label,
    /// Internal name of the catchable type; `None` is a catch-all
    pub catch_type: Option<String>,
}

/// Bodies of methods provided by the runtime rather than by bytecode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Intrinsic {
    ObjectInit,
    ObjectHashCode,
    ArrayInit,
    ArrayLength,
    ArrayGet,
    ArraySet,
    ArrayHashCode,
    StringLength,
    ThrowableInit,
    ThrowableInitMessage,
    ThrowableInitMessageCause,
    ThrowableGetMessage,
}
