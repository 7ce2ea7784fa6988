//! Control-flow graph and operation model consumed by the analysis.
//!
//! These types are produced by the compiler front end and are treated as
//! immutable, already-validated inputs. Everything here is serde-decodable
//! so a whole [`Program`] can be handed over as JSON.

use crate::error::{FlowAnalysisError, FlowResult};
use crate::points_to::PointsToResult;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

// ============================================================================
// Identities
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(pub u32);

/// Stable identity of a method, e.g. `C.M(object)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MethodId(pub String);

impl MethodId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "B{}", self.0)
    }
}

/// Source span of an operation. `start`/`end` are byte offsets; `line` and
/// `column` are 1-based and only used for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceSpan {
    pub start: u32,
    pub end: u32,
    #[serde(default)]
    pub line: u32,
    #[serde(default)]
    pub column: u32,
}

impl SourceSpan {
    pub const fn new(start: u32, end: u32) -> Self {
        Self {
            start,
            end,
            line: 0,
            column: 0,
        }
    }

    #[must_use]
    pub const fn at(mut self, line: u32, column: u32) -> Self {
        self.line = line;
        self.column = column;
        self
    }
}

// ============================================================================
// Symbols
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParameterSymbol {
    pub ordinal: u32,
    pub name: String,
    #[serde(default = "default_true")]
    pub is_reference_type: bool,
    /// Carries a `ValidatedNotNull`-style contract attribute.
    #[serde(default)]
    pub validated_not_null: bool,
}

fn default_true() -> bool {
    true
}

impl ParameterSymbol {
    pub fn new(ordinal: u32, name: impl Into<String>) -> Self {
        Self {
            ordinal,
            name: name.into(),
            is_reference_type: true,
            validated_not_null: false,
        }
    }

    #[must_use]
    pub fn value_type(mut self) -> Self {
        self.is_reference_type = false;
        self
    }

    #[must_use]
    pub fn validated_not_null(mut self) -> Self {
        self.validated_not_null = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodSymbol {
    pub id: MethodId,
    pub name: String,
    #[serde(default)]
    pub containing_type: Option<String>,
    #[serde(default)]
    pub parameters: Vec<ParameterSymbol>,
    #[serde(default)]
    pub is_static: bool,
}

impl MethodSymbol {
    pub fn parameter(&self, ordinal: u32) -> Option<&ParameterSymbol> {
        self.parameters.iter().find(|p| p.ordinal == ordinal)
    }
}

/// Call target as it appears at an invocation site.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodRef {
    pub id: MethodId,
    pub name: String,
    #[serde(default)]
    pub containing_type: Option<String>,
}

impl MethodRef {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: MethodId::new(id),
            name: name.into(),
            containing_type: None,
        }
    }

    #[must_use]
    pub fn in_type(mut self, containing_type: impl Into<String>) -> Self {
        self.containing_type = Some(containing_type.into());
        self
    }

    /// `Type.Name` when the containing type is known, otherwise the bare name.
    pub fn qualified_name(&self) -> String {
        match &self.containing_type {
            Some(ty) => format!("{ty}.{}", self.name),
            None => self.name.clone(),
        }
    }
}

// ============================================================================
// Operations
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub id: OperationId,
    pub span: SourceSpan,
    #[serde(flatten)]
    pub kind: OperationKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOperator {
    Equals,
    NotEquals,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOperator {
    Not,
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperationKind {
    ParameterReference {
        ordinal: u32,
    },
    LocalReference {
        name: String,
    },
    InstanceReference,
    NullLiteral,
    Literal {
        #[serde(default)]
        text: String,
    },
    FieldReference {
        #[serde(default)]
        instance: Option<Box<Operation>>,
        field: String,
    },
    ElementAccess {
        instance: Box<Operation>,
        #[serde(default)]
        indices: Vec<Operation>,
    },
    Invocation {
        target: MethodRef,
        #[serde(default)]
        instance: Option<Box<Operation>>,
        #[serde(default)]
        arguments: Vec<Operation>,
    },
    ObjectCreation {
        type_name: String,
        #[serde(default)]
        constructor: Option<MethodRef>,
        #[serde(default)]
        arguments: Vec<Operation>,
    },
    Assignment {
        target: Box<Operation>,
        value: Box<Operation>,
    },
    Binary {
        operator: BinaryOperator,
        left: Box<Operation>,
        right: Box<Operation>,
    },
    Unary {
        operator: UnaryOperator,
        operand: Box<Operation>,
    },
    IsType {
        operand: Box<Operation>,
        type_name: String,
    },
    Conversion {
        operand: Box<Operation>,
        #[serde(default)]
        type_name: String,
    },
    Coalesce {
        value: Box<Operation>,
        fallback: Box<Operation>,
    },
    Throw {
        #[serde(default)]
        exception: Option<Box<Operation>>,
    },
    /// Anything the front end lowers without a dedicated kind.
    Unknown {
        #[serde(default)]
        children: Vec<Operation>,
    },
}

impl Operation {
    pub fn new(id: OperationId, span: SourceSpan, kind: OperationKind) -> Self {
        Self { id, span, kind }
    }

    /// Direct child operations, in evaluation order.
    pub fn children(&self) -> Vec<&Operation> {
        use OperationKind as K;
        match &self.kind {
            K::ParameterReference { .. }
            | K::LocalReference { .. }
            | K::InstanceReference
            | K::NullLiteral
            | K::Literal { .. } => Vec::new(),
            K::FieldReference { instance, .. } => instance.iter().map(|i| &**i).collect(),
            K::ElementAccess { instance, indices } => std::iter::once(&**instance)
                .chain(indices.iter())
                .collect(),
            K::Invocation {
                instance,
                arguments,
                ..
            } => instance
                .iter()
                .map(|i| &**i)
                .chain(arguments.iter())
                .collect(),
            K::ObjectCreation { arguments, .. } => arguments.iter().collect(),
            K::Assignment { target, value } => vec![&**target, &**value],
            K::Binary { left, right, .. } => vec![&**left, &**right],
            K::Unary { operand, .. }
            | K::IsType { operand, .. }
            | K::Conversion { operand, .. } => vec![&**operand],
            K::Coalesce { value, fallback } => vec![&**value, &**fallback],
            K::Throw { exception } => exception.iter().map(|e| &**e).collect(),
            K::Unknown { children } => children.iter().collect(),
        }
    }

    pub fn is_null_literal(&self) -> bool {
        match &self.kind {
            OperationKind::NullLiteral => true,
            OperationKind::Conversion { operand, .. } => operand.is_null_literal(),
            _ => false,
        }
    }

    pub fn is_throw(&self) -> bool {
        match &self.kind {
            OperationKind::Throw { .. } => true,
            OperationKind::Conversion { operand, .. } => operand.is_throw(),
            _ => false,
        }
    }
}

// ============================================================================
// Control flow graph
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    Entry,
    Block,
    Exit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchSemantics {
    #[default]
    Regular,
    Return,
    Throw,
    Rethrow,
}

impl BranchSemantics {
    pub fn is_throw(self) -> bool {
        matches!(self, BranchSemantics::Throw | BranchSemantics::Rethrow)
    }
}

/// Which outcome of a branch condition a flow edge corresponds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionKind {
    #[default]
    None,
    WhenTrue,
    WhenFalse,
}

impl ConditionKind {
    #[must_use]
    pub fn negate(self) -> Self {
        match self {
            ConditionKind::None => ConditionKind::None,
            ConditionKind::WhenTrue => ConditionKind::WhenFalse,
            ConditionKind::WhenFalse => ConditionKind::WhenTrue,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    /// `None` for throws that leave the method.
    #[serde(default)]
    pub destination: Option<BlockId>,
    #[serde(default)]
    pub semantics: BranchSemantics,
    /// Returned or thrown value.
    #[serde(default)]
    pub value: Option<Operation>,
}

/// Edge taken when `condition` evaluates to `kind`; the block's fall-through
/// is taken on the opposite outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionalBranch {
    pub condition: Operation,
    pub kind: ConditionKind,
    pub destination: BlockId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasicBlock {
    pub id: BlockId,
    pub kind: BlockKind,
    #[serde(default)]
    pub operations: Vec<Operation>,
    #[serde(default)]
    pub fall_through: Option<Branch>,
    #[serde(default)]
    pub conditional: Option<ConditionalBranch>,
    #[serde(default)]
    pub exception_handlers: Vec<BlockId>,
}

impl BasicBlock {
    /// Normal-flow and exceptional successors of this block.
    pub fn successors(&self) -> Vec<BlockId> {
        let mut succs = Vec::new();
        if let Some(cond) = &self.conditional {
            succs.push(cond.destination);
        }
        if let Some(dest) = self.fall_through.as_ref().and_then(|b| b.destination) {
            succs.push(dest);
        }
        succs.extend(self.exception_handlers.iter().copied());
        succs
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Cfg {
    pub blocks: Vec<BasicBlock>,
}

impl Cfg {
    pub fn entry(&self) -> BlockId {
        BlockId(0)
    }

    pub fn exit(&self) -> Option<BlockId> {
        self.blocks
            .iter()
            .find(|b| b.kind == BlockKind::Exit)
            .map(|b| b.id)
    }

    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.0]
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Checks the invariants the CFG builder guarantees: dense block ids,
    /// a single entry at index 0, a single exit, successors in range.
    pub fn validate(&self, method: &MethodId) -> FlowResult<()> {
        if self.blocks.is_empty() {
            return Err(FlowAnalysisError::malformed(method, "graph has no blocks"));
        }
        let mut exits = 0;
        for (index, block) in self.blocks.iter().enumerate() {
            if block.id.0 != index {
                return Err(FlowAnalysisError::malformed(
                    method,
                    format!("block at index {index} has id {}", block.id),
                ));
            }
            match block.kind {
                BlockKind::Entry if index != 0 => {
                    return Err(FlowAnalysisError::malformed(
                        method,
                        format!("entry block {} is not first", block.id),
                    ));
                }
                BlockKind::Exit => exits += 1,
                _ => {}
            }
            if index == 0 && block.kind != BlockKind::Entry {
                return Err(FlowAnalysisError::malformed(method, "first block is not the entry"));
            }
            for succ in block.successors() {
                if succ.0 >= self.blocks.len() {
                    return Err(FlowAnalysisError::malformed(
                        method,
                        format!("{} branches to missing block {succ}", block.id),
                    ));
                }
            }
        }
        if exits != 1 {
            return Err(FlowAnalysisError::malformed(
                method,
                format!("expected exactly one exit block, found {exits}"),
            ));
        }
        Ok(())
    }

    /// Reverse post-order of the blocks reachable from the entry.
    pub fn reverse_postorder(&self) -> Vec<BlockId> {
        let mut visited = vec![false; self.blocks.len()];
        let mut postorder = Vec::with_capacity(self.blocks.len());
        // Iterative DFS: (block, next successor index).
        let mut stack: Vec<(BlockId, usize)> = vec![(self.entry(), 0)];
        visited[0] = true;
        while let Some((block, next)) = stack.pop() {
            let succs = self.block(block).successors();
            if next < succs.len() {
                stack.push((block, next + 1));
                let succ = succs[next];
                if !visited[succ.0] {
                    visited[succ.0] = true;
                    stack.push((succ, 0));
                }
            } else {
                postorder.push(block);
            }
        }
        postorder.reverse();
        postorder
    }

    /// All operations of the graph, including branch conditions and values.
    pub fn operations(&self) -> impl Iterator<Item = &Operation> {
        self.blocks.iter().flat_map(|b| {
            b.operations
                .iter()
                .chain(b.conditional.iter().map(|c| &c.condition))
                .chain(b.fall_through.iter().filter_map(|f| f.value.as_ref()))
        })
    }
}

// ============================================================================
// Program
// ============================================================================

/// A method body as handed over by the front end: its symbol, its CFG and
/// the points-to result computed for it.
#[derive(Debug, Clone)]
pub struct MethodBody {
    pub method: MethodSymbol,
    pub cfg: Cfg,
    pub points_to: Option<PointsToResult>,
}

impl MethodBody {
    pub fn new(method: MethodSymbol, cfg: Cfg, points_to: PointsToResult) -> Self {
        Self {
            method,
            cfg,
            points_to: Some(points_to),
        }
    }

    pub fn id(&self) -> &MethodId {
        &self.method.id
    }

    pub fn points_to(&self) -> FlowResult<&PointsToResult> {
        self.points_to
            .as_ref()
            .ok_or_else(|| FlowAnalysisError::MissingPointsTo(self.method.id.clone()))
    }
}

/// The set of method bodies available for (interprocedural) analysis.
#[derive(Debug, Clone, Default)]
pub struct Program {
    methods: HashMap<MethodId, Arc<MethodBody>>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, body: MethodBody) -> FlowResult<()> {
        let id = body.method.id.clone();
        crate::flow_ensure!(
            !self.methods.contains_key(&id),
            "duplicate method `{id}` in program"
        );
        self.methods.insert(id, Arc::new(body));
        Ok(())
    }

    #[must_use]
    pub fn with(mut self, body: MethodBody) -> Self {
        let id = body.method.id.clone();
        self.methods.insert(id, Arc::new(body));
        self
    }

    pub fn method(&self, id: &MethodId) -> Option<&Arc<MethodBody>> {
        self.methods.get(id)
    }

    pub fn method_ids(&self) -> impl Iterator<Item = &MethodId> {
        self.methods.keys()
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// Reads and decodes a program file.
    pub fn from_path(path: &Path) -> FlowResult<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_json(&source)
    }

    /// Decodes a JSON [`ProgramFile`], deriving points-to results with
    /// [`PointsToResult::parameter_aliases`] plus any explicit null facts.
    pub fn from_json(source: &str) -> FlowResult<Self> {
        let file: ProgramFile = serde_json::from_str(source)?;
        let mut program = Program::new();
        for method in file.methods {
            let mut points_to = PointsToResult::parameter_aliases(&method.method, &method.cfg);
            for fact in method.null_states {
                let Some(param) = method.method.parameter(fact.parameter) else {
                    crate::flow_bail!(
                        "null fact for unknown parameter {} of `{}`",
                        fact.parameter,
                        method.method.id
                    );
                };
                let location = crate::points_to::AbstractLocation::parameter(&method.method.id, param);
                match fact.at {
                    NullFactSite::BlockEntry(block) => {
                        points_to.set_null_state_at_block_entry(block, location, fact.state)
                    }
                    NullFactSite::UnhandledThrows => {
                        points_to.set_null_state_at_unhandled_throws(location, fact.state)
                    }
                }
            }
            program.add(MethodBody::new(method.method, method.cfg, points_to))?;
        }
        Ok(program)
    }
}

/// On-disk JSON form of a [`Program`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProgramFile {
    #[serde(default)]
    pub methods: Vec<MethodFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodFile {
    pub method: MethodSymbol,
    pub cfg: Cfg,
    #[serde(default)]
    pub null_states: Vec<NullFact>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NullFact {
    pub parameter: u32,
    pub at: NullFactSite,
    pub state: crate::points_to::NullState,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NullFactSite {
    BlockEntry(BlockId),
    UnhandledThrows,
}
