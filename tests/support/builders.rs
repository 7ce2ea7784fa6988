#![allow(dead_code)]

//! Small builders for hand-written method bodies.

use param_validation::ir::{
    BasicBlock, BinaryOperator, BlockId, BlockKind, Branch, BranchSemantics, Cfg, ConditionKind, ConditionalBranch,
    MethodBody, MethodId, MethodRef, MethodSymbol, Operation, OperationId, OperationKind, ParameterSymbol, SourceSpan,
    UnaryOperator,
};
use param_validation::points_to::PointsToResult;
use std::sync::atomic::{AtomicU32, Ordering};

static NEXT_ID: AtomicU32 = AtomicU32::new(1);

/// Operations get increasing ids; spans follow creation order.
fn op(kind: OperationKind) -> Operation {
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    Operation::new(OperationId(id), SourceSpan::new(id * 10, id * 10 + 5).at(id, 1), kind)
}

fn boxed(operation: Operation) -> Box<Operation> {
    Box::new(operation)
}

pub fn param(ordinal: u32) -> Operation {
    op(OperationKind::ParameterReference { ordinal })
}

pub fn local(name: &str) -> Operation {
    op(OperationKind::LocalReference { name: name.to_string() })
}

pub fn null() -> Operation {
    op(OperationKind::NullLiteral)
}

pub fn lit(text: &str) -> Operation {
    op(OperationKind::Literal { text: text.to_string() })
}

pub fn this() -> Operation {
    op(OperationKind::InstanceReference)
}

pub fn field(instance: Operation, name: &str) -> Operation {
    op(OperationKind::FieldReference {
        instance: Some(boxed(instance)),
        field: name.to_string(),
    })
}

pub fn element(instance: Operation, index: Operation) -> Operation {
    op(OperationKind::ElementAccess {
        instance: boxed(instance),
        indices: vec![index],
    })
}

fn method_ref(id: &str) -> MethodRef {
    match id.rsplit_once('.') {
        Some((ty, name)) => MethodRef::new(id, name).in_type(ty),
        None => MethodRef::new(id, id),
    }
}

/// Static call.
pub fn call(target: &str, arguments: Vec<Operation>) -> Operation {
    op(OperationKind::Invocation {
        target: method_ref(target),
        instance: None,
        arguments,
    })
}

/// Instance call, dereferencing `receiver`.
pub fn call_on(receiver: Operation, target: &str, arguments: Vec<Operation>) -> Operation {
    op(OperationKind::Invocation {
        target: method_ref(target),
        instance: Some(boxed(receiver)),
        arguments,
    })
}

pub fn new_object(type_name: &str, arguments: Vec<Operation>) -> Operation {
    op(OperationKind::ObjectCreation {
        type_name: type_name.to_string(),
        constructor: None,
        arguments,
    })
}

pub fn assign(target: Operation, value: Operation) -> Operation {
    op(OperationKind::Assignment {
        target: boxed(target),
        value: boxed(value),
    })
}

pub fn eq(left: Operation, right: Operation) -> Operation {
    op(OperationKind::Binary {
        operator: BinaryOperator::Equals,
        left: boxed(left),
        right: boxed(right),
    })
}

pub fn ne(left: Operation, right: Operation) -> Operation {
    op(OperationKind::Binary {
        operator: BinaryOperator::NotEquals,
        left: boxed(left),
        right: boxed(right),
    })
}

pub fn not(operand: Operation) -> Operation {
    op(OperationKind::Unary {
        operator: UnaryOperator::Not,
        operand: boxed(operand),
    })
}

pub fn is_type(operand: Operation, type_name: &str) -> Operation {
    op(OperationKind::IsType {
        operand: boxed(operand),
        type_name: type_name.to_string(),
    })
}

pub fn coalesce(value: Operation, fallback: Operation) -> Operation {
    op(OperationKind::Coalesce {
        value: boxed(value),
        fallback: boxed(fallback),
    })
}

pub fn throw_new() -> Operation {
    op(OperationKind::Throw {
        exception: Some(boxed(new_object("ArgumentNullException", Vec::new()))),
    })
}

// ----------------------------------------------------------------------------
// Blocks
// ----------------------------------------------------------------------------

fn goto(destination: usize) -> Option<Branch> {
    Some(Branch {
        destination: Some(BlockId(destination)),
        semantics: BranchSemantics::Regular,
        value: None,
    })
}

pub fn entry(next: usize) -> BasicBlock {
    BasicBlock {
        id: BlockId(0),
        kind: BlockKind::Entry,
        operations: Vec::new(),
        fall_through: goto(next),
        conditional: None,
        exception_handlers: Vec::new(),
    }
}

pub fn block(id: usize, operations: Vec<Operation>, next: usize) -> BasicBlock {
    BasicBlock {
        id: BlockId(id),
        kind: BlockKind::Block,
        operations,
        fall_through: goto(next),
        conditional: None,
        exception_handlers: Vec::new(),
    }
}

/// Block ending in `if condition` that jumps to `on_kind` when the condition
/// evaluates to `kind` and falls through to `otherwise`.
pub fn branch(
    id: usize,
    operations: Vec<Operation>,
    condition: Operation,
    kind: ConditionKind,
    on_kind: usize,
    otherwise: usize,
) -> BasicBlock {
    BasicBlock {
        conditional: Some(ConditionalBranch {
            condition,
            kind,
            destination: BlockId(on_kind),
        }),
        ..block(id, operations, otherwise)
    }
}

/// Block that throws a fresh exception out of the method.
pub fn throwing(id: usize) -> BasicBlock {
    BasicBlock {
        id: BlockId(id),
        kind: BlockKind::Block,
        operations: Vec::new(),
        fall_through: Some(Branch {
            destination: None,
            semantics: BranchSemantics::Throw,
            value: Some(new_object("ArgumentNullException", Vec::new())),
        }),
        conditional: None,
        exception_handlers: Vec::new(),
    }
}

pub fn exit(id: usize) -> BasicBlock {
    BasicBlock {
        id: BlockId(id),
        kind: BlockKind::Exit,
        operations: Vec::new(),
        fall_through: None,
        conditional: None,
        exception_handlers: Vec::new(),
    }
}

// ----------------------------------------------------------------------------
// Methods
// ----------------------------------------------------------------------------

/// Static method symbol `Type.Name` with by-reference parameters.
pub fn method(id: &str, parameters: &[&str]) -> MethodSymbol {
    method_with(
        id,
        parameters
            .iter()
            .enumerate()
            .map(|(ordinal, name)| ParameterSymbol::new(ordinal as u32, *name))
            .collect(),
    )
}

pub fn method_with(id: &str, parameters: Vec<ParameterSymbol>) -> MethodSymbol {
    let (containing_type, name) = match id.rsplit_once('.') {
        Some((ty, name)) => (Some(ty.to_string()), name.to_string()),
        None => (None, id.to_string()),
    };
    MethodSymbol {
        id: MethodId::new(id),
        name,
        containing_type,
        parameters,
        is_static: true,
    }
}

/// Body whose points-to result is derived from parameter aliasing.
pub fn body(symbol: MethodSymbol, blocks: Vec<BasicBlock>) -> MethodBody {
    let cfg = Cfg { blocks };
    let points_to = PointsToResult::parameter_aliases(&symbol, &cfg);
    MethodBody::new(symbol, cfg, points_to)
}

/// `entry -> B1(operations) -> exit`.
pub fn straight_line(symbol: MethodSymbol, operations: Vec<Operation>) -> MethodBody {
    body(symbol, vec![entry(1), block(1, operations, 2), exit(2)])
}
