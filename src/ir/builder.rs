//! IR instruction builder
//!
//! A [`Builder`] holds a cursor into one block and emits instructions at
//! that position, advancing past each one. Rewrites create a builder just
//! before their anchor instruction so that new instructions land
//! immediately before their consumer.

use super::types::{AddressSpace, TypeId};
use super::{
    BindingPoint, BinaryOp, BlockId, BuiltinFn, ConstValue, InstId, Module, Op, ValueId, ValueKind,
};

/// Emits instructions into a block at a cursor position
pub struct Builder<'m> {
    module: &'m mut Module,
    block: BlockId,
    at: usize,
}

impl<'m> Builder<'m> {
    /// Create a builder appending to the end of a block
    pub fn append_to(module: &'m mut Module, block: BlockId) -> Self {
        let at = module.block(block).insts.len();
        Self { module, block, at }
    }

    /// Create a builder inserting immediately before an instruction
    pub fn before(module: &'m mut Module, anchor: InstId) -> Self {
        let block = module.inst(anchor).block;
        let at = module
            .position_in_block(anchor)
            .expect("builder anchor is not attached to a block");
        Self { module, block, at }
    }

    /// The module being built into
    pub fn module(&mut self) -> &mut Module {
        self.module
    }

    fn emit(
        &mut self,
        op: Op,
        operands: Vec<ValueId>,
        result_ty: Option<TypeId>,
    ) -> (InstId, Option<ValueId>) {
        let inst = self.module.alloc_inst(op, operands, self.block);
        let result = result_ty.map(|ty| self.module.alloc_value(ValueKind::InstResult { inst }, ty));
        if let Some(value) = result {
            self.module.inst_mut(inst).result = Some(value);
        }
        self.module.insert_in_block_at(self.block, self.at, inst);
        self.at += 1;
        (inst, result)
    }

    pub fn const_u32(&mut self, value: u32) -> ValueId {
        self.module.constant(ConstValue::U32(value))
    }

    pub fn const_i32(&mut self, value: i32) -> ValueId {
        self.module.constant(ConstValue::I32(value))
    }

    pub fn const_bool(&mut self, value: bool) -> ValueId {
        self.module.constant(ConstValue::Bool(value))
    }

    /// A constant `value` widened to the shape of `like`: the scalar itself
    /// for scalars, a splat vector of the same width for vectors
    pub fn const_u32_match_width(&mut self, value: u32, like: TypeId) -> ValueId {
        match self.module.types.vector_width(like) {
            Some(width) => self.module.constant(ConstValue::Splat {
                elem: Box::new(ConstValue::U32(value)),
                width,
            }),
            None => self.const_u32(value),
        }
    }

    /// Declare a zero-initialized variable; the result is a pointer
    pub fn var(&mut self, space: AddressSpace, store_ty: TypeId) -> ValueId {
        let ptr_ty = self.module.types.ptr(space, store_ty);
        let (_, result) = self.emit(Op::Var { binding: None }, Vec::new(), Some(ptr_ty));
        result.unwrap()
    }

    /// Declare a variable with an initializer
    pub fn var_init(&mut self, space: AddressSpace, store_ty: TypeId, init: ValueId) -> ValueId {
        let ptr_ty = self.module.types.ptr(space, store_ty);
        let (_, result) = self.emit(Op::Var { binding: None }, vec![init], Some(ptr_ty));
        result.unwrap()
    }

    /// Declare a module-scope variable at a binding point
    pub fn var_with_binding(
        &mut self,
        space: AddressSpace,
        store_ty: TypeId,
        binding: BindingPoint,
    ) -> ValueId {
        let ptr_ty = self.module.types.ptr(space, store_ty);
        let (_, result) = self.emit(
            Op::Var {
                binding: Some(binding),
            },
            Vec::new(),
            Some(ptr_ty),
        );
        result.unwrap()
    }

    /// Load through a pointer
    pub fn load(&mut self, ptr: ValueId) -> ValueId {
        let ty = self.module.value_ty(ptr);
        let store_ty = self.module.types.unwrap_ptr(ty);
        let (_, result) = self.emit(Op::Load, vec![ptr], Some(store_ty));
        result.unwrap()
    }

    /// Load through a pointer into a result value allocated earlier with
    /// [`Module::detached_result`]
    pub fn load_with_result(&mut self, result: ValueId, ptr: ValueId) -> InstId {
        let (inst, _) = self.emit(Op::Load, vec![ptr], None);
        self.module.adopt_result(result, inst);
        self.module.inst_mut(inst).result = Some(result);
        inst
    }

    pub fn store(&mut self, ptr: ValueId, value: ValueId) -> InstId {
        let (inst, _) = self.emit(Op::Store, vec![ptr, value], None);
        inst
    }

    /// Index a path into a composite; `result_ty` is the type at the end of
    /// the path (a pointer when the base is a pointer)
    pub fn access(&mut self, result_ty: TypeId, base: ValueId, indices: &[ValueId]) -> ValueId {
        let mut operands = Vec::with_capacity(1 + indices.len());
        operands.push(base);
        operands.extend_from_slice(indices);
        let (_, result) = self.emit(Op::Access, operands, Some(result_ty));
        result.unwrap()
    }

    /// Load one lane of a vector through a pointer
    pub fn load_vector_element(&mut self, ptr: ValueId, index: ValueId) -> ValueId {
        let vec_ty = {
            let ty = self.module.value_ty(ptr);
            self.module.types.unwrap_ptr(ty)
        };
        let elem_ty = self
            .module
            .types
            .element(vec_ty, None)
            .expect("vector element load through a non-vector pointer");
        let (_, result) = self.emit(Op::LoadVectorElement, vec![ptr, index], Some(elem_ty));
        result.unwrap()
    }

    /// Store one lane of a vector through a pointer
    pub fn store_vector_element(&mut self, ptr: ValueId, index: ValueId, value: ValueId) -> InstId {
        let (inst, _) = self.emit(Op::StoreVectorElement, vec![ptr, index, value], None);
        inst
    }

    /// Bind a value to a new name
    pub fn let_(&mut self, value: ValueId) -> ValueId {
        let ty = self.module.value_ty(value);
        let (_, result) = self.emit(Op::Let, vec![value], Some(ty));
        result.unwrap()
    }

    pub fn binary(&mut self, op: BinaryOp, ty: TypeId, lhs: ValueId, rhs: ValueId) -> ValueId {
        let (_, result) = self.emit(Op::Binary(op), vec![lhs, rhs], Some(ty));
        result.unwrap()
    }

    pub fn add(&mut self, ty: TypeId, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.binary(BinaryOp::Add, ty, lhs, rhs)
    }

    pub fn sub(&mut self, ty: TypeId, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.binary(BinaryOp::Sub, ty, lhs, rhs)
    }

    pub fn mul(&mut self, ty: TypeId, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.binary(BinaryOp::Mul, ty, lhs, rhs)
    }

    pub fn lt(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        let bool_ty = self.module.types.bool();
        self.binary(BinaryOp::Lt, bool_ty, lhs, rhs)
    }

    pub fn le(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        let bool_ty = self.module.types.bool();
        self.binary(BinaryOp::Le, bool_ty, lhs, rhs)
    }

    pub fn gt(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        let bool_ty = self.module.types.bool();
        self.binary(BinaryOp::Gt, bool_ty, lhs, rhs)
    }

    pub fn ge(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        let bool_ty = self.module.types.bool();
        self.binary(BinaryOp::Ge, bool_ty, lhs, rhs)
    }

    /// Convert a value to the given type
    pub fn convert(&mut self, ty: TypeId, value: ValueId) -> ValueId {
        let (_, result) = self.emit(Op::Convert, vec![value], Some(ty));
        result.unwrap()
    }

    /// Call a builtin that produces a value
    pub fn call(&mut self, ty: TypeId, func: BuiltinFn, args: &[ValueId]) -> ValueId {
        let (_, result) = self.emit(Op::Call(func), args.to_vec(), Some(ty));
        result.unwrap()
    }

    /// Call a builtin with no result (e.g. `textureStore`)
    pub fn call_no_result(&mut self, func: BuiltinFn, args: &[ValueId]) -> InstId {
        let (inst, _) = self.emit(Op::Call(func), args.to_vec(), None);
        inst
    }

    /// Emit an `if` with two fresh empty arms
    pub fn if_(&mut self, condition: ValueId) -> InstId {
        let inst_placeholder = self.module.alloc_inst(
            Op::If {
                // Blocks are allocated after the instruction so the parent
                // link can point at it; patched below.
                true_block: BlockId(0),
                false_block: BlockId(0),
            },
            vec![condition],
            self.block,
        );
        let true_block = self.module.alloc_block(Some(inst_placeholder));
        let false_block = self.module.alloc_block(Some(inst_placeholder));
        self.module.inst_mut(inst_placeholder).op = Op::If {
            true_block,
            false_block,
        };
        self.module
            .insert_in_block_at(self.block, self.at, inst_placeholder);
        self.at += 1;
        inst_placeholder
    }

    /// Emit a `loop` with fresh empty initializer, body and continuing blocks
    pub fn loop_(&mut self) -> InstId {
        let inst_placeholder = self.module.alloc_inst(
            Op::Loop {
                initializer: BlockId(0),
                body: BlockId(0),
                continuing: BlockId(0),
            },
            Vec::new(),
            self.block,
        );
        let initializer = self.module.alloc_block(Some(inst_placeholder));
        let body = self.module.alloc_block(Some(inst_placeholder));
        let continuing = self.module.alloc_block(Some(inst_placeholder));
        self.module.inst_mut(inst_placeholder).op = Op::Loop {
            initializer,
            body,
            continuing,
        };
        self.module
            .insert_in_block_at(self.block, self.at, inst_placeholder);
        self.at += 1;
        inst_placeholder
    }

    pub fn ret(&mut self, value: Option<ValueId>) -> InstId {
        let operands = value.into_iter().collect();
        let (inst, _) = self.emit(Op::Return, operands, None);
        inst
    }

    pub fn continue_(&mut self) -> InstId {
        let (inst, _) = self.emit(Op::Continue, Vec::new(), None);
        inst
    }

    pub fn next_iteration(&mut self) -> InstId {
        let (inst, _) = self.emit(Op::NextIteration, Vec::new(), None);
        inst
    }

    pub fn exit_loop(&mut self) -> InstId {
        let (inst, _) = self.emit(Op::ExitLoop, Vec::new(), None);
        inst
    }

    pub fn exit_if(&mut self) -> InstId {
        let (inst, _) = self.emit(Op::ExitIf, Vec::new(), None);
        inst
    }

    /// Insert a detached instruction at the cursor
    pub fn append_existing(&mut self, inst: InstId) {
        self.module.insert_in_block_at(self.block, self.at, inst);
        self.at += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Op;

    #[test]
    fn test_insert_before_anchors() {
        let mut module = Module::new();
        let func = module.create_function("f", None);
        let body = module.function(func).body;
        let u32_ty = module.types.u32();

        let mut b = Builder::append_to(&mut module, body);
        let one = b.const_u32(1);
        let two = b.const_u32(2);
        let sum = b.add(u32_ty, one, two);
        b.ret(Some(sum));

        let sum_inst = module.producer(sum).unwrap();
        let mut b = Builder::before(&mut module, sum_inst);
        let three = b.const_u32(3);
        b.let_(three);

        let insts = &module.block(body).insts;
        assert_eq!(insts.len(), 3);
        assert!(matches!(module.inst(insts[0]).op, Op::Let));
        assert_eq!(insts[1], sum_inst);
    }

    #[test]
    fn test_if_creates_linked_arms() {
        let mut module = Module::new();
        let func = module.create_function("f", None);
        let body = module.function(func).body;

        let mut b = Builder::append_to(&mut module, body);
        let cond = b.const_bool(false);
        let if_inst = b.if_(cond);
        b.ret(None);

        let (true_block, false_block) = module.if_blocks(if_inst);
        assert_eq!(module.block(true_block).parent, Some(if_inst));
        assert_eq!(module.block(false_block).parent, Some(if_inst));
    }

    #[test]
    fn test_splat_constant_matches_vector_width() {
        let mut module = Module::new();
        let func = module.create_function("f", None);
        let body = module.function(func).body;
        let u32_ty = module.types.u32();
        let vec2u = module.types.vec(u32_ty, 2);

        let mut b = Builder::append_to(&mut module, body);
        let one = b.const_u32_match_width(1, vec2u);
        b.ret(None);

        assert_eq!(module.value_ty(one), vec2u);
    }
}
