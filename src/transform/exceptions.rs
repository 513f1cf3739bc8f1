//! Exception wrapping
//!
//! User code may only throw and catch shadow throwables, and VM-internal
//! control flow must never be swallowed by a user handler. Two injections
//! enforce this: `WrapThrown` before every throw site boxes whatever is on
//! the stack into a shadow throwable, and `FilterControlFlow` at every
//! handler entry rethrows internal control-flow carriers before user code
//! can look at the operand.

use std::collections::HashSet;

use crate::bytecode::instr::Instruction;
use crate::bytecode::{ClassFile, Label, MethodBody};

pub fn wrap_exceptions(mut class: ClassFile) -> ClassFile {
    for method in &mut class.methods {
        let targets: HashSet<Label> = method.handlers.iter().map(|h| h.target).collect();
        if let MethodBody::Bytecode(code) = &mut method.body {
            *code = inject(std::mem::take(code), &targets);
        }
    }
    class
}

fn inject(code: Vec<Instruction>, handler_targets: &HashSet<Label>) -> Vec<Instruction> {
    let mut out = Vec::with_capacity(code.len());
    for instr in code {
        match instr {
            Instruction::Throw => {
                out.push(Instruction::WrapThrown);
                out.push(Instruction::Throw);
            }
            Instruction::Label(l) => {
                out.push(Instruction::Label(l));
                if handler_targets.contains(&l) {
                    out.push(Instruction::FilterControlFlow);
                }
            }
            other => out.push(other),
        }
    }
    out
}
