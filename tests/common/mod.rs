//! Shared builders for test DApp modules.
//!
//! Modules are constructed as pre-transform class files, the shapes a
//! compiler for the DApp language would emit, and pushed through the full
//! pipeline by `Avm::deploy`, so every end-to-end test exercises the
//! transformed artifact, not the raw input.

#![allow(dead_code)]

use ember_vm::bytecode::instr::{Cond, Const, FieldRef, Instruction, InvokeKind, MethodRef};
use ember_vm::bytecode::{ClassFile, FieldDef, MethodBody, MethodDef};
use ember_vm::{Address, RawModule, TransactionContext};

pub const ENERGY: u64 = 10_000_000;

pub fn deployer() -> Address {
    Address([0x11; 32])
}

pub fn tx(address: Address, data: Vec<u8>) -> TransactionContext {
    TransactionContext {
        address,
        sender: deployer(),
        origin: deployer(),
        value: 0,
        data,
        energy_limit: ENERGY,
        block_number: 1,
        block_epoch_seconds: 10,
        block_difficulty: 1,
        depth: 0,
    }
}

pub fn field(name: &str, descriptor: &str) -> FieldDef {
    FieldDef {
        name: name.to_string(),
        descriptor: descriptor.to_string(),
        is_static: false,
        is_synthetic: false,
    }
}

pub fn static_field(name: &str, descriptor: &str) -> FieldDef {
    FieldDef {
        name: name.to_string(),
        descriptor: descriptor.to_string(),
        is_static: true,
        is_synthetic: false,
    }
}

pub fn static_method(
    name: &str,
    descriptor: &str,
    max_locals: u16,
    code: Vec<Instruction>,
) -> MethodDef {
    MethodDef {
        name: name.to_string(),
        descriptor: descriptor.to_string(),
        is_static: true,
        is_native: false,
        max_locals,
        body: MethodBody::Bytecode(code),
        handlers: vec![],
    }
}

pub fn instance_method(
    name: &str,
    descriptor: &str,
    max_locals: u16,
    code: Vec<Instruction>,
) -> MethodDef {
    MethodDef {
        name: name.to_string(),
        descriptor: descriptor.to_string(),
        is_static: false,
        is_native: false,
        max_locals,
        body: MethodBody::Bytecode(code),
        handlers: vec![],
    }
}

pub fn class(name: &str, fields: Vec<FieldDef>, methods: Vec<MethodDef>) -> ClassFile {
    ClassFile {
        name: name.to_string(),
        superclass: Some("host/lang/Object".to_string()),
        interfaces: vec![],
        is_interface: false,
        manual_persistence: false,
        signature: None,
        fields,
        methods,
    }
}

// Instruction shorthands keep the hand-written bodies legible.

pub fn iconst(v: i32) -> Instruction {
    Instruction::Const(Const::Int(v))
}

pub fn lconst(v: i64) -> Instruction {
    Instruction::Const(Const::Long(v))
}

pub fn load(slot: u16) -> Instruction {
    Instruction::Load(slot)
}

pub fn store(slot: u16) -> Instruction {
    Instruction::Store(slot)
}

pub fn label(l: u32) -> Instruction {
    Instruction::Label(l)
}

pub fn branch_eq(l: u32) -> Instruction {
    Instruction::Branch(Cond::Eq, l)
}

pub fn jump(l: u32) -> Instruction {
    Instruction::Jump(l)
}

pub fn get_static(owner: &str, name: &str, descriptor: &str) -> Instruction {
    Instruction::GetStatic(FieldRef {
        owner: owner.to_string(),
        name: name.to_string(),
        descriptor: descriptor.to_string(),
    })
}

pub fn put_static(owner: &str, name: &str, descriptor: &str) -> Instruction {
    Instruction::PutStatic(FieldRef {
        owner: owner.to_string(),
        name: name.to_string(),
        descriptor: descriptor.to_string(),
    })
}

pub fn get_field(owner: &str, name: &str, descriptor: &str) -> Instruction {
    Instruction::GetField(FieldRef {
        owner: owner.to_string(),
        name: name.to_string(),
        descriptor: descriptor.to_string(),
    })
}

pub fn put_field(owner: &str, name: &str, descriptor: &str) -> Instruction {
    Instruction::PutField(FieldRef {
        owner: owner.to_string(),
        name: name.to_string(),
        descriptor: descriptor.to_string(),
    })
}

pub fn invoke_static(owner: &str, name: &str, descriptor: &str) -> Instruction {
    Instruction::Invoke(
        InvokeKind::Static,
        MethodRef {
            owner: owner.to_string(),
            name: name.to_string(),
            descriptor: descriptor.to_string(),
        },
    )
}

pub fn invoke_special(owner: &str, name: &str, descriptor: &str) -> Instruction {
    Instruction::Invoke(
        InvokeKind::Special,
        MethodRef {
            owner: owner.to_string(),
            name: name.to_string(),
            descriptor: descriptor.to_string(),
        },
    )
}

pub fn invoke_virtual(owner: &str, name: &str, descriptor: &str) -> Instruction {
    Instruction::Invoke(
        InvokeKind::Virtual,
        MethodRef {
            owner: owner.to_string(),
            name: name.to_string(),
            descriptor: descriptor.to_string(),
        },
    )
}

pub fn chain(name: &str, descriptor: &str) -> Instruction {
    invoke_static("ember/rt/Chain", name, descriptor)
}

/// `[local] = new byte[1]{ value_local }` then return it. Expects two free
/// local slots starting at `scratch`.
pub fn return_byte(value_local: u16, scratch: u16) -> Vec<Instruction> {
    vec![
        iconst(1),
        Instruction::NewArray("B".to_string()),
        store(scratch),
        load(scratch),
        iconst(0),
        load(value_local),
        Instruction::ArraySet,
        load(scratch),
        Instruction::ReturnValue,
    ]
}

/// Return a fresh empty byte array.
pub fn return_empty() -> Vec<Instruction> {
    vec![
        iconst(0),
        Instruction::NewArray("B".to_string()),
        Instruction::ReturnValue,
    ]
}

/// The identity contract: `main` returns its call data.
pub fn echo_module() -> RawModule {
    let main = static_method(
        "main",
        "()[B",
        0,
        vec![chain("getData", "()[B"), Instruction::ReturnValue],
    );
    RawModule::from_classes("app/Echo", vec![class("app/Echo", vec![], vec![main])])
}

/// `main` returns `[data[0] + data[1]]`.
pub fn add_module() -> RawModule {
    let mut code = vec![
        chain("getData", "()[B"),
        store(0),
        load(0),
        iconst(0),
        Instruction::ArrayGet,
        load(0),
        iconst(1),
        Instruction::ArrayGet,
        Instruction::Add,
        store(1),
    ];
    code.extend(return_byte(1, 2));
    let main = static_method("main", "()[B", 3, code);
    RawModule::from_classes("app/Calc", vec![class("app/Calc", vec![], vec![main])])
}

/// The diamond-reachability contract:
///
/// R -> (rootLeft = A, rootRight = B); A -> C; B -> D; C -> E; D -> E
///
/// Selector protocol on `data[0]`:
/// 1 build the graph, 2 reentrant modify then read right, 3 modify left,
/// 4 nested modify+revert then read right, 5 modify then revert,
/// 6 read right.
pub fn graph_module() -> RawModule {
    let node_ctor = instance_method(
        "<init>",
        "(I)V",
        2,
        vec![
            load(0),
            invoke_special("host/lang/Object", "<init>", "()V"),
            load(0),
            load(1),
            put_field("app/Node", "value", "I"),
            Instruction::Return,
        ],
    );
    let node = class(
        "app/Node",
        vec![field("value", "I"), field("next", "Lapp/Node;")],
        vec![node_ctor],
    );

    let new_node = |value: i32| {
        vec![
            Instruction::New("app/Node".to_string()),
            Instruction::Dup,
            iconst(value),
            invoke_special("app/Node", "<init>", "(I)V"),
        ]
    };

    let mut setup = Vec::new();
    for (slot, value) in (0..5).map(|i| (i as u16, i as i32)) {
        setup.extend(new_node(value));
        setup.push(store(slot));
    }
    setup.extend(vec![
        load(0),
        put_static("app/Graph", "rootLeft", "Lapp/Node;"),
        load(1),
        put_static("app/Graph", "rootRight", "Lapp/Node;"),
        // a.next = c; b.next = d; c.next = e; d.next = e
        load(0),
        load(2),
        put_field("app/Node", "next", "Lapp/Node;"),
        load(1),
        load(3),
        put_field("app/Node", "next", "Lapp/Node;"),
        load(2),
        load(4),
        put_field("app/Node", "next", "Lapp/Node;"),
        load(3),
        load(4),
        put_field("app/Node", "next", "Lapp/Node;"),
        Instruction::Return,
    ]);

    let modify = static_method(
        "modify",
        "()V",
        0,
        vec![
            get_static("app/Graph", "rootLeft", "Lapp/Node;"),
            get_field("app/Node", "next", "Lapp/Node;"),
            get_field("app/Node", "next", "Lapp/Node;"),
            iconst(5),
            put_field("app/Node", "value", "I"),
            Instruction::Return,
        ],
    );

    // selfCall(selector): call our own address with [selector], discarding
    // the result object.
    let self_call = static_method(
        "selfCall",
        "(I)V",
        2,
        vec![
            iconst(1),
            Instruction::NewArray("B".to_string()),
            store(1),
            load(1),
            iconst(0),
            load(0),
            Instruction::ArraySet,
            chain("getAddress", "()[B"),
            lconst(0),
            load(1),
            lconst(1_000_000),
            chain("call", "([BJ[BJ)Lember/rt/Result;"),
            Instruction::Pop,
            Instruction::Return,
        ],
    );

    let mut main = vec![
        chain("getData", "()[B"),
        iconst(0),
        Instruction::ArrayGet,
        store(0),
    ];
    for selector in 1..=6u32 {
        main.push(load(0));
        main.push(iconst(selector as i32));
        main.push(branch_eq(selector));
    }
    main.extend(return_empty());
    // 1: build the graph
    main.push(label(1));
    main.push(invoke_static("app/Graph", "setup", "()V"));
    main.extend(return_empty());
    // 2: reentrant modify, then read the right-hand path
    main.push(label(2));
    main.push(iconst(3));
    main.push(invoke_static("app/Graph", "selfCall", "(I)V"));
    main.push(jump(6));
    // 3: modify through the left-hand path
    main.push(label(3));
    main.push(invoke_static("app/Graph", "modify", "()V"));
    main.extend(return_empty());
    // 4: nested modify-then-revert, then read the right-hand path
    main.push(label(4));
    main.push(iconst(5));
    main.push(invoke_static("app/Graph", "selfCall", "(I)V"));
    main.push(jump(6));
    // 5: modify, then revert this call
    main.push(label(5));
    main.push(invoke_static("app/Graph", "modify", "()V"));
    main.push(chain("revert", "()V"));
    main.extend(return_empty());
    // 6: read rootRight.next.next.value
    main.push(label(6));
    main.push(get_static("app/Graph", "rootRight", "Lapp/Node;"));
    main.push(get_field("app/Node", "next", "Lapp/Node;"));
    main.push(get_field("app/Node", "next", "Lapp/Node;"));
    main.push(get_field("app/Node", "value", "I"));
    main.push(store(1));
    main.extend(return_byte(1, 2));

    let graph = class(
        "app/Graph",
        vec![
            static_field("rootLeft", "Lapp/Node;"),
            static_field("rootRight", "Lapp/Node;"),
        ],
        vec![
            static_method("main", "()[B", 3, main),
            static_method("setup", "()V", 5, setup),
            modify,
            self_call,
        ],
    );
    RawModule::from_classes("app/Graph", vec![graph, node])
}
