//! Intermediate representation
//!
//! This module defines the structured SSA-like IR that the analyses and
//! transforms operate on. Functions contain blocks; structured constructs
//! (`loop`, `if`) own child blocks; every value is either a constant, an
//! instruction result, or a function parameter.
//!
//! Storage is id-based: values, instructions and blocks live in arenas on
//! the [`Module`] and are referred to by copyable ids. Arenas are never
//! shrunk, so ids collected before a rewrite remain valid while the rewrite
//! mutates block contents and operand slots.

pub mod builder;
pub mod types;
pub mod validator;

pub use builder::Builder;
pub use types::{
    AddressSpace, ArrayCount, ScalarKind, TextureClass, TextureDim, Type, TypeId, TypeStore,
};
pub use validator::{validate, Capabilities, Diagnostic};

use rustc_hash::FxHashMap as HashMap;

/// Handle to a value in a module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValueId(u32);

/// Handle to an instruction in a module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstId(u32);

/// Handle to a block in a module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(u32);

/// Handle to a function in a module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FuncId(u32);

/// Placeholder for results allocated before their instruction exists.
const PENDING_INST: InstId = InstId(u32::MAX);

/// A compile-time constant
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConstValue {
    Bool(bool),
    I32(i32),
    U32(u32),
    /// A vector whose lanes all hold the same scalar
    Splat { elem: Box<ConstValue>, width: u32 },
}

/// Shader built-in inputs that can be attached to function parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinValue {
    LocalInvocationIndex,
    LocalInvocationId,
    GlobalInvocationId,
    WorkgroupId,
}

/// A resource binding point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindingPoint {
    pub group: u32,
    pub binding: u32,
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Shl,
    Shr,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl BinaryOp {
    /// Check if this operator produces a boolean
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge | BinaryOp::Eq | BinaryOp::Ne
        )
    }
}

/// Core builtin functions callable from the IR
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinFn {
    Min,
    Max,
    ArrayLength,
    TextureDimensions,
    TextureLoad,
    TextureStore,
    TextureNumLevels,
    TextureNumLayers,
    SubgroupMatrixLoad,
    SubgroupMatrixStore,
}

/// Instruction opcodes
///
/// Structured constructs carry their child block ids; everything else is
/// fully described by the opcode plus the instruction's operand list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    /// Declare a variable; the result is a pointer. A variable without an
    /// initializer operand is zero-initialized.
    Var { binding: Option<BindingPoint> },
    /// Load from a pointer. Operands: `[ptr]`
    Load,
    /// Store to a pointer. Operands: `[ptr, value]`
    Store,
    /// Index a path into a composite. Operands: `[base, idx0, idx1, ...]`
    Access,
    /// Name a value (aliasing move). Operands: `[value]`
    Let,
    /// Binary operation. Operands: `[lhs, rhs]`
    Binary(BinaryOp),
    /// Numeric conversion to the result type. Operands: `[value]`
    Convert,
    /// Load one lane of a vector through a pointer. Operands: `[ptr, index]`
    LoadVectorElement,
    /// Store one lane of a vector through a pointer. Operands: `[ptr, index, value]`
    StoreVectorElement,
    /// Call a core builtin. Operands are the arguments.
    Call(BuiltinFn),
    /// Structured loop with dedicated initializer, body and continuing blocks
    Loop {
        initializer: BlockId,
        body: BlockId,
        continuing: BlockId,
    },
    /// Two-armed conditional. Operands: `[condition]`
    If {
        true_block: BlockId,
        false_block: BlockId,
    },
    /// Return from the function. Operands: `[value]` or empty
    Return,
    /// Transfer from the loop body to the continuing block
    Continue,
    /// Branch back to the loop body via the continuing block
    NextIteration,
    /// Exit the innermost enclosing loop
    ExitLoop,
    /// Exit the innermost enclosing if
    ExitIf,
}

impl Op {
    /// Check if this opcode terminates a block
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Op::Return | Op::Continue | Op::NextIteration | Op::ExitLoop | Op::ExitIf
        )
    }
}

/// An instruction
#[derive(Debug, Clone)]
pub struct InstData {
    pub op: Op,
    pub operands: Vec<ValueId>,
    pub result: Option<ValueId>,
    pub block: BlockId,
}

/// What produces a value
#[derive(Debug, Clone)]
pub enum ValueKind {
    Constant(ConstValue),
    InstResult { inst: InstId },
    Param { func: FuncId, index: u32 },
}

/// A value and its type
#[derive(Debug, Clone)]
pub struct ValueData {
    pub kind: ValueKind,
    pub ty: TypeId,
}

/// A block: an ordered list of instructions
#[derive(Debug, Clone, Default)]
pub struct BlockData {
    pub insts: Vec<InstId>,
    /// The structured construct (`loop` or `if`) that owns this block, if any
    pub parent: Option<InstId>,
}

/// A function parameter and its optional built-in binding
#[derive(Debug, Clone)]
pub struct FunctionParam {
    pub value: ValueId,
    pub builtin: Option<BuiltinValue>,
}

/// A function
#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub params: Vec<FunctionParam>,
    pub body: BlockId,
    /// Constant workgroup size, present on compute entry points
    pub workgroup_size: Option<[u32; 3]>,
}

/// An IR module: types, values, instructions, blocks and functions
#[derive(Debug)]
pub struct Module {
    pub types: TypeStore,
    values: Vec<ValueData>,
    insts: Vec<InstData>,
    blocks: Vec<BlockData>,
    functions: Vec<Function>,
    constants: HashMap<ConstValue, ValueId>,
    root_block: BlockId,
}

impl Default for Module {
    fn default() -> Self {
        Self::new()
    }
}

impl Module {
    /// Create an empty module with a root block for module-scope variables
    pub fn new() -> Self {
        let mut module = Self {
            types: TypeStore::new(),
            values: Vec::new(),
            insts: Vec::new(),
            blocks: Vec::new(),
            functions: Vec::new(),
            constants: HashMap::default(),
            root_block: BlockId(0),
        };
        module.root_block = module.alloc_block(None);
        module
    }

    /// The block holding module-scope `var` declarations
    pub fn root_block(&self) -> BlockId {
        self.root_block
    }

    /// Create a new function with an empty body block
    pub fn create_function(&mut self, name: &str, workgroup_size: Option<[u32; 3]>) -> FuncId {
        let body = self.alloc_block(None);
        let id = FuncId(self.functions.len() as u32);
        self.functions.push(Function {
            name: name.to_string(),
            params: Vec::new(),
            body,
            workgroup_size,
        });
        id
    }

    /// Append a parameter to a function, returning its value
    pub fn add_param(
        &mut self,
        func: FuncId,
        ty: TypeId,
        builtin: Option<BuiltinValue>,
    ) -> ValueId {
        let index = self.functions[func.0 as usize].params.len() as u32;
        let value = self.alloc_value(ValueKind::Param { func, index }, ty);
        self.functions[func.0 as usize]
            .params
            .push(FunctionParam { value, builtin });
        value
    }

    pub fn function(&self, id: FuncId) -> &Function {
        &self.functions[id.0 as usize]
    }

    pub fn function_ids(&self) -> impl Iterator<Item = FuncId> {
        (0..self.functions.len() as u32).map(FuncId)
    }

    pub fn value(&self, id: ValueId) -> &ValueData {
        &self.values[id.0 as usize]
    }

    /// The type of a value
    pub fn value_ty(&self, id: ValueId) -> TypeId {
        self.values[id.0 as usize].ty
    }

    pub fn inst(&self, id: InstId) -> &InstData {
        &self.insts[id.0 as usize]
    }

    pub(crate) fn inst_mut(&mut self, id: InstId) -> &mut InstData {
        &mut self.insts[id.0 as usize]
    }

    pub fn block(&self, id: BlockId) -> &BlockData {
        &self.blocks[id.0 as usize]
    }

    /// Number of values allocated in this module
    pub fn value_count(&self) -> usize {
        self.values.len()
    }

    pub(crate) fn alloc_block(&mut self, parent: Option<InstId>) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(BlockData {
            insts: Vec::new(),
            parent,
        });
        id
    }

    pub(crate) fn alloc_value(&mut self, kind: ValueKind, ty: TypeId) -> ValueId {
        let id = ValueId(self.values.len() as u32);
        self.values.push(ValueData { kind, ty });
        id
    }

    pub(crate) fn alloc_inst(&mut self, op: Op, operands: Vec<ValueId>, block: BlockId) -> InstId {
        let id = InstId(self.insts.len() as u32);
        self.insts.push(InstData {
            op,
            operands,
            result: None,
            block,
        });
        id
    }

    /// Allocate an instruction-result value that is not yet attached to an
    /// instruction; a later `load` with this result adopts it.
    pub fn detached_result(&mut self, ty: TypeId) -> ValueId {
        self.alloc_value(ValueKind::InstResult { inst: PENDING_INST }, ty)
    }

    pub(crate) fn adopt_result(&mut self, value: ValueId, inst: InstId) {
        debug_assert!(matches!(
            self.values[value.0 as usize].kind,
            ValueKind::InstResult { inst } if inst == PENDING_INST
        ));
        self.values[value.0 as usize].kind = ValueKind::InstResult { inst };
    }

    /// Intern a constant, returning the existing value if one was already
    /// allocated for the same literal
    pub fn constant(&mut self, value: ConstValue) -> ValueId {
        if let Some(&id) = self.constants.get(&value) {
            return id;
        }
        let ty = self.const_type(&value);
        let id = self.alloc_value(ValueKind::Constant(value.clone()), ty);
        self.constants.insert(value, id);
        id
    }

    fn const_type(&mut self, value: &ConstValue) -> TypeId {
        match value {
            ConstValue::Bool(_) => self.types.bool(),
            ConstValue::I32(_) => self.types.i32(),
            ConstValue::U32(_) => self.types.u32(),
            ConstValue::Splat { elem, width } => {
                let width = *width;
                let elem_ty = self.const_type(elem);
                self.types.vec(elem_ty, width)
            }
        }
    }

    /// The literal a value holds, if it is a constant
    pub fn const_value(&self, id: ValueId) -> Option<&ConstValue> {
        match &self.value(id).kind {
            ValueKind::Constant(c) => Some(c),
            _ => None,
        }
    }

    /// A constant u32 literal, if the value is one
    pub fn as_const_u32(&self, id: ValueId) -> Option<u32> {
        match self.const_value(id)? {
            ConstValue::U32(x) => Some(*x),
            _ => None,
        }
    }

    /// A constant index: a u32 literal, or a non-negative i32 literal
    pub fn as_const_index(&self, id: ValueId) -> Option<u32> {
        match self.const_value(id)? {
            ConstValue::U32(x) => Some(*x),
            ConstValue::I32(x) if *x >= 0 => Some(*x as u32),
            _ => None,
        }
    }

    /// A constant bool literal, if the value is one
    pub fn as_const_bool(&self, id: ValueId) -> Option<bool> {
        match self.const_value(id)? {
            ConstValue::Bool(x) => Some(*x),
            _ => None,
        }
    }

    /// The instruction that produced a value, if any
    pub fn producer(&self, id: ValueId) -> Option<InstId> {
        match self.value(id).kind {
            ValueKind::InstResult { inst } if inst != PENDING_INST => Some(inst),
            _ => None,
        }
    }

    /// The built-in binding of a parameter value, if any
    pub fn param_builtin(&self, id: ValueId) -> Option<BuiltinValue> {
        match self.value(id).kind {
            ValueKind::Param { func, index } => {
                self.functions[func.0 as usize].params[index as usize].builtin
            }
            _ => None,
        }
    }

    /// The function that owns a parameter value
    pub fn param_function(&self, id: ValueId) -> Option<FuncId> {
        match self.value(id).kind {
            ValueKind::Param { func, .. } => Some(func),
            _ => None,
        }
    }

    /// All instructions of the module in order: the root block, then each
    /// function body, descending into structured constructs as they appear
    pub fn instructions(&self) -> Vec<InstId> {
        let mut out = Vec::new();
        self.walk_block(self.root_block, &mut out);
        for func in &self.functions {
            self.walk_block(func.body, &mut out);
        }
        out
    }

    /// All instructions reachable from a block, in order
    pub fn instructions_in(&self, block: BlockId) -> Vec<InstId> {
        let mut out = Vec::new();
        self.walk_block(block, &mut out);
        out
    }

    fn walk_block(&self, block: BlockId, out: &mut Vec<InstId>) {
        for &inst in &self.block(block).insts {
            out.push(inst);
            match self.inst(inst).op {
                Op::Loop {
                    initializer,
                    body,
                    continuing,
                } => {
                    self.walk_block(initializer, out);
                    self.walk_block(body, out);
                    self.walk_block(continuing, out);
                }
                Op::If {
                    true_block,
                    false_block,
                } => {
                    self.walk_block(true_block, out);
                    self.walk_block(false_block, out);
                }
                _ => {}
            }
        }
    }

    /// Replace operand `slot` of an instruction
    pub fn set_operand(&mut self, inst: InstId, slot: usize, value: ValueId) {
        self.insts[inst.0 as usize].operands[slot] = value;
    }

    /// Replace every operand use of `old` with `new`, module-wide
    pub fn replace_all_uses(&mut self, old: ValueId, new: ValueId) {
        for inst in &mut self.insts {
            for operand in &mut inst.operands {
                if *operand == old {
                    *operand = new;
                }
            }
        }
    }

    /// Remove an instruction from its block. The instruction stays in the
    /// arena and can be re-attached with [`Module::attach`].
    pub fn detach(&mut self, inst: InstId) {
        let block = self.insts[inst.0 as usize].block;
        let insts = &mut self.blocks[block.0 as usize].insts;
        if let Some(pos) = insts.iter().position(|&i| i == inst) {
            insts.remove(pos);
        }
    }

    /// Append a detached instruction to the end of a block
    pub fn attach(&mut self, block: BlockId, inst: InstId) {
        self.insts[inst.0 as usize].block = block;
        self.blocks[block.0 as usize].insts.push(inst);
    }

    /// Position of an instruction within its block
    pub fn position_in_block(&self, inst: InstId) -> Option<usize> {
        let block = self.inst(inst).block;
        self.block(block).insts.iter().position(|&i| i == inst)
    }

    pub(crate) fn insert_in_block_at(&mut self, block: BlockId, index: usize, inst: InstId) {
        self.insts[inst.0 as usize].block = block;
        self.blocks[block.0 as usize].insts.insert(index, inst);
    }

    /// The `(true, false)` arms of an `if` instruction.
    ///
    /// Panics if the instruction is not an `if`.
    pub fn if_blocks(&self, inst: InstId) -> (BlockId, BlockId) {
        match self.inst(inst).op {
            Op::If {
                true_block,
                false_block,
            } => (true_block, false_block),
            _ => panic!("if_blocks called on a non-if instruction"),
        }
    }

    /// The `(initializer, body, continuing)` blocks of a `loop` instruction.
    ///
    /// Panics if the instruction is not a `loop`.
    pub fn loop_blocks(&self, inst: InstId) -> (BlockId, BlockId, BlockId) {
        match self.inst(inst).op {
            Op::Loop {
                initializer,
                body,
                continuing,
            } => (initializer, body, continuing),
            _ => panic!("loop_blocks called on a non-loop instruction"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_interning() {
        let mut module = Module::new();
        let a = module.constant(ConstValue::U32(7));
        let b = module.constant(ConstValue::U32(7));
        let c = module.constant(ConstValue::I32(7));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(module.as_const_u32(a), Some(7));
        assert_eq!(module.as_const_u32(c), None);
        assert_eq!(module.as_const_index(c), Some(7));
    }

    #[test]
    fn test_replace_all_uses() {
        let mut module = Module::new();
        let func = module.create_function("f", None);
        let body = module.function(func).body;
        let u32_ty = module.types.u32();

        let mut b = Builder::append_to(&mut module, body);
        let one = b.const_u32(1);
        let two = b.const_u32(2);
        let sum = b.add(u32_ty, one, two);
        let prod = b.mul(u32_ty, sum, one);
        b.ret(None);
        drop(b);

        let replacement = module.constant(ConstValue::U32(9));
        module.replace_all_uses(sum, replacement);

        let prod_inst = module.producer(prod).unwrap();
        assert_eq!(module.inst(prod_inst).operands[0], replacement);
    }

    #[test]
    fn test_instruction_order_descends_into_constructs() {
        let mut module = Module::new();
        let func = module.create_function("f", None);
        let body = module.function(func).body;

        let mut b = Builder::append_to(&mut module, body);
        let cond = b.const_bool(true);
        let if_inst = b.if_(cond);
        b.ret(None);
        drop(b);

        let true_block = match module.inst(if_inst).op {
            Op::If { true_block, .. } => true_block,
            _ => unreachable!(),
        };
        let mut b = Builder::append_to(&mut module, true_block);
        b.exit_if();
        drop(b);

        let order = module.instructions();
        // if, exit_if (inside the true arm), return
        assert_eq!(order.len(), 3);
        assert_eq!(order[0], if_inst);
    }
}
