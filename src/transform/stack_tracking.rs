//! Stack tracking
//!
//! Every method entry charges one unit of frame depth against the per-task
//! ceiling; every return gives it back. Exceptional exits are balanced by
//! the interpreter's frame pop, so the injected `ExitFrame` only needs to
//! cover the normal paths.

use crate::bytecode::instr::Instruction;
use crate::bytecode::{ClassFile, MethodBody};

pub fn track_stack(mut class: ClassFile) -> ClassFile {
    for method in &mut class.methods {
        if let MethodBody::Bytecode(code) = &mut method.body {
            *code = inject(std::mem::take(code));
        }
    }
    class
}

fn inject(code: Vec<Instruction>) -> Vec<Instruction> {
    let mut out = Vec::with_capacity(code.len() + 2);
    out.push(Instruction::EnterFrame);
    for instr in code {
        if matches!(instr, Instruction::Return | Instruction::ReturnValue) {
            out.push(Instruction::ExitFrame);
        }
        out.push(instr);
    }
    out
}
