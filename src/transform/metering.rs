//! Class metering
//!
//! Before each basic block a single `ChargeEnergy` is injected carrying the
//! summed cost of the block's instructions; allocations additionally charge
//! proportional to the computed object size. Blocks are delimited by labels
//! and terminators, so a charge is paid exactly once per entry into the
//! block no matter how control arrives.

use std::collections::{BTreeSet, HashMap};

use crate::bytecode::instr::Instruction;
use crate::bytecode::{ClassFile, MethodBody};
use crate::config::EnergySchedule;
use crate::transform::hierarchy::OBJECT_HEADER_BYTES;

/// Allocation size assumed for runtime-provided classes absent from the
/// user module's size map.
const RUNTIME_CLASS_BYTES: u64 = OBJECT_HEADER_BYTES + 16;

pub fn meter_class(
    mut class: ClassFile,
    sizes: &HashMap<String, u64>,
    schedule: &EnergySchedule,
) -> ClassFile {
    for method in &mut class.methods {
        if let MethodBody::Bytecode(code) = &mut method.body {
            *code = meter_code(std::mem::take(code), sizes, schedule);
        }
    }
    class
}

fn meter_code(
    code: Vec<Instruction>,
    sizes: &HashMap<String, u64>,
    schedule: &EnergySchedule,
) -> Vec<Instruction> {
    let leaders = block_leaders(&code);
    let costs = block_costs(&code, &leaders, schedule);

    let mut out = Vec::with_capacity(code.len() + leaders.len());
    for (idx, instr) in code.into_iter().enumerate() {
        let block_charge = costs.get(&idx).copied().filter(|c| *c > 0);
        match (&instr, block_charge) {
            // A leader that is a label keeps the label first so branches
            // land before the charge.
            (Instruction::Label(_), Some(cost)) => {
                out.push(instr);
                out.push(Instruction::ChargeEnergy(cost));
                continue;
            }
            (_, Some(cost)) => {
                out.push(Instruction::ChargeEnergy(cost));
            }
            (_, None) => {}
        }
        if let Instruction::New(name) = &instr {
            let size = sizes.get(name).copied().unwrap_or(RUNTIME_CLASS_BYTES);
            out.push(Instruction::ChargeEnergy(allocation_cost(size, schedule)));
        }
        // `newarray` charges at construction time inside the array pass,
        // where the length is known.
        out.push(instr);
    }
    out
}

/// Indices of block leaders: entry, labels, and terminator successors.
fn block_leaders(code: &[Instruction]) -> BTreeSet<usize> {
    let mut leaders = BTreeSet::new();
    if !code.is_empty() {
        leaders.insert(0);
    }
    for (idx, instr) in code.iter().enumerate() {
        if matches!(instr, Instruction::Label(_)) {
            leaders.insert(idx);
        }
        if instr.is_terminator() && idx + 1 < code.len() {
            leaders.insert(idx + 1);
        }
    }
    leaders
}

fn block_costs(
    code: &[Instruction],
    leaders: &BTreeSet<usize>,
    schedule: &EnergySchedule,
) -> HashMap<usize, u64> {
    let mut costs = HashMap::new();
    let bounds: Vec<usize> = leaders.iter().copied().collect();
    for (i, &start) in bounds.iter().enumerate() {
        let end = bounds.get(i + 1).copied().unwrap_or(code.len());
        let cost: u64 = code[start..end]
            .iter()
            .map(|instr| instruction_cost(instr, schedule))
            .sum();
        costs.insert(start, cost);
    }
    costs
}

fn allocation_cost(size: u64, schedule: &EnergySchedule) -> u64 {
    schedule.allocation_base + size * schedule.allocation_per_byte
}

/// Element width used by the runtime array construction charge.
pub fn element_size(elem_descriptor: &str) -> u64 {
    match elem_descriptor.as_bytes().first() {
        Some(b'Z') | Some(b'B') => 1,
        Some(b'S') | Some(b'C') => 2,
        Some(b'I') | Some(b'F') => 4,
        Some(b'J') | Some(b'D') => 8,
        _ => 8,
    }
}

/// The per-opcode cost vector. Injected instructions cost nothing here;
/// their runtime effects debit the helper directly.
pub fn instruction_cost(instr: &Instruction, schedule: &EnergySchedule) -> u64 {
    use Instruction::*;
    match instr {
        Const(_) | Load(_) | Store(_) | Dup | Pop | Swap => schedule.memory_op,
        Add | Sub | Mul | Div | Rem | Neg => schedule.step,
        FAdd | FSub | FMul | FDiv => schedule.step,
        Label(_) => 0,
        Jump(_) | Branch(_, _) => schedule.branch,
        Return | ReturnValue => schedule.step,
        New(_) | NewArray(_) => schedule.step,
        GetField(_) | PutField(_) | GetStatic(_) | PutStatic(_) => schedule.field_access,
        ArrayLength | ArrayGet | ArraySet => schedule.field_access,
        Invoke(_, _) | InvokeDynamic(_) => schedule.invoke,
        Throw => schedule.throw,
        ChargeEnergy(_) | ChargeArrayAllocation(_) | EnterFrame | ExitFrame | WrapString
        | WrapClassRef | WrapThrown | FilterControlFlow => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::instr::{Cond, Const};
    use crate::bytecode::MethodDef;

    fn meter(code: Vec<Instruction>) -> Vec<Instruction> {
        let class = ClassFile {
            name: "app/M".to_string(),
            superclass: Some("ember/lang/Object".to_string()),
            interfaces: vec![],
            is_interface: false,
            manual_persistence: false,
            signature: None,
            fields: vec![],
            methods: vec![MethodDef {
                name: "run".to_string(),
                descriptor: "()V".to_string(),
                is_static: true,
                is_native: false,
                max_locals: 0,
                body: MethodBody::Bytecode(code),
                handlers: vec![],
            }],
        };
        let metered = meter_class(class, &HashMap::new(), &EnergySchedule::default());
        match metered.methods.into_iter().next().unwrap().body {
            MethodBody::Bytecode(c) => c,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_straight_line_gets_single_charge() {
        let schedule = EnergySchedule::default();
        let code = meter(vec![
            Instruction::Const(Const::Int(1)),
            Instruction::Const(Const::Int(2)),
            Instruction::Add,
            Instruction::Return,
        ]);
        let expected = schedule.memory_op * 2 + schedule.step * 2;
        assert_eq!(code[0], Instruction::ChargeEnergy(expected));
        assert_eq!(code.len(), 5);
    }

    #[test]
    fn test_each_block_charged_once() {
        let code = meter(vec![
            Instruction::Const(Const::Int(0)),
            Instruction::Branch(Cond::Eq, 9),
            Instruction::Const(Const::Int(1)),
            Instruction::Return,
            Instruction::Label(9),
            Instruction::Return,
        ]);
        let charges = code
            .iter()
            .filter(|i| matches!(i, Instruction::ChargeEnergy(_)))
            .count();
        assert_eq!(charges, 3);
        // The label stays ahead of its block's charge.
        let label_pos = code.iter().position(|i| *i == Instruction::Label(9)).unwrap();
        assert!(matches!(code[label_pos + 1], Instruction::ChargeEnergy(_)));
    }

    #[test]
    fn test_allocation_charge_precedes_new() {
        let schedule = EnergySchedule::default();
        let code = meter(vec![
            Instruction::New("app/M".to_string()),
            Instruction::Return,
        ]);
        let new_pos = code
            .iter()
            .position(|i| matches!(i, Instruction::New(_)))
            .unwrap();
        let expected =
            schedule.allocation_base + RUNTIME_CLASS_BYTES * schedule.allocation_per_byte;
        assert_eq!(code[new_pos - 1], Instruction::ChargeEnergy(expected));
    }

}
