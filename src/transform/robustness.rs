//! Robustness transform
//!
//! Rewrites potentially out-of-bounds memory accesses so they cannot read
//! or write outside their containers: indices are clamped to `min(idx,
//! limit)`, texture arguments are clamped against the texture's actual
//! dimensions, and subgroup matrix loads/stores get their stride repaired
//! and (optionally) the whole call predicated behind an `if (end <=
//! length)` guard.
//!
//! Integer range analysis is consulted before emitting a clamp; an index
//! whose range provably fits the container keeps its original form. The
//! analysis is conservative, so the worst case is an unnecessary clamp,
//! never a missing one.

use rustc_hash::FxHashSet as HashSet;
use tracing::{debug, trace};

use crate::analysis::{IntegerRangeAnalysis, RangeInfo};
use crate::error::{Error, Result};
use crate::ir::types::{ScalarKind, Type};
use crate::ir::{
    validate, AddressSpace, ArrayCount, BindingPoint, Builder, BuiltinFn, Capabilities, ConstValue,
    InstId, Module, Op, ValueId, ValueKind,
};

/// Configuration for the robustness transform
#[derive(Debug, Clone)]
pub struct RobustnessConfig {
    /// Clamp indices into `function` address space pointers
    pub clamp_function: bool,
    /// Clamp indices into `private` address space pointers
    pub clamp_private: bool,
    /// Clamp indices into `workgroup` address space pointers
    pub clamp_workgroup: bool,
    /// Clamp indices into `uniform` address space pointers
    pub clamp_uniform: bool,
    /// Clamp indices into `storage` address space pointers
    pub clamp_storage: bool,
    /// Clamp indices into immediate-data pointers
    pub clamp_immediate_data: bool,
    /// Clamp indices into by-value aggregates
    pub clamp_value: bool,
    /// Clamp texture builtin arguments (levels, coordinates, array indices)
    pub clamp_texture: bool,
    /// Skip index clamping for the runtime-sized array dimension
    pub disable_runtime_sized_array_index_clamping: bool,
    /// Move subgroup matrix loads/stores behind an in-bounds guard
    pub predicate_subgroup_matrix: bool,
    /// Consult integer range analysis to skip provably-unnecessary clamps
    pub use_integer_range_analysis: bool,
    /// Storage/uniform binding points excluded from clamping
    pub bindings_ignored: HashSet<BindingPoint>,
}

impl Default for RobustnessConfig {
    fn default() -> Self {
        Self {
            clamp_function: true,
            clamp_private: true,
            clamp_workgroup: true,
            clamp_uniform: true,
            clamp_storage: true,
            clamp_immediate_data: true,
            clamp_value: true,
            clamp_texture: true,
            disable_runtime_sized_array_index_clamping: false,
            predicate_subgroup_matrix: false,
            use_integer_range_analysis: true,
            bindings_ignored: HashSet::default(),
        }
    }
}

/// Run the robustness transform over a module.
///
/// Returns the validator's diagnostics unchanged if the module fails the
/// pre-pass validation; in that case the IR has not been mutated.
pub fn robustness(module: &mut Module, config: &RobustnessConfig) -> Result<()> {
    let caps = Capabilities::ALLOW_8BIT_INTEGERS | Capabilities::ALLOW_OUT_OF_BOUNDS_INDEX;
    validate(module, caps).map_err(Error::Validation)?;

    let analysis = config
        .use_integer_range_analysis
        .then(IntegerRangeAnalysis::new);
    State {
        config,
        module,
        analysis,
    }
    .process();

    Ok(())
}

/// Per-run state of the transform
struct State<'a> {
    config: &'a RobustnessConfig,
    module: &'a mut Module,
    analysis: Option<IntegerRangeAnalysis>,
}

impl<'a> State<'a> {
    fn process(mut self) {
        // Collect the instructions that may need to be rewritten before
        // mutating anything; ids stay valid across the rewrites.
        let mut accesses = Vec::new();
        let mut vector_loads = Vec::new();
        let mut vector_stores = Vec::new();
        let mut texture_calls = Vec::new();
        let mut subgroup_matrix_calls = Vec::new();

        for inst in self.module.instructions() {
            let data = self.module.inst(inst);
            match &data.op {
                Op::Access => {
                    let base = data.operands[0];
                    let base_ty = self.module.value_ty(base);
                    if self.module.types.pointer_space(base_ty).is_some() {
                        if self.should_clamp(base) {
                            accesses.push(inst);
                        }
                    } else if self.config.clamp_value {
                        accesses.push(inst);
                    }
                }
                Op::LoadVectorElement => {
                    if self.should_clamp(data.operands[0]) {
                        vector_loads.push(inst);
                    }
                }
                Op::StoreVectorElement => {
                    if self.should_clamp(data.operands[0]) {
                        vector_stores.push(inst);
                    }
                }
                Op::Call(func) => {
                    if self.config.clamp_texture
                        && matches!(
                            func,
                            BuiltinFn::TextureDimensions
                                | BuiltinFn::TextureLoad
                                | BuiltinFn::TextureStore
                        )
                    {
                        texture_calls.push(inst);
                    }
                    if matches!(
                        func,
                        BuiltinFn::SubgroupMatrixLoad | BuiltinFn::SubgroupMatrixStore
                    ) {
                        subgroup_matrix_calls.push(inst);
                    }
                }
                _ => {}
            }
        }

        debug!(
            accesses = accesses.len(),
            vector_loads = vector_loads.len(),
            vector_stores = vector_stores.len(),
            texture_calls = texture_calls.len(),
            subgroup_matrix_calls = subgroup_matrix_calls.len(),
            "robustness work items collected"
        );

        for access in accesses {
            self.clamp_access_indices(access);
        }
        for lve in vector_loads {
            self.clamp_vector_element(lve);
        }
        for sve in vector_stores {
            self.clamp_vector_element(sve);
        }
        for call in texture_calls {
            self.clamp_texture_call_args(call);
        }
        for call in subgroup_matrix_calls {
            self.predicate_subgroup_matrix_call(call);
        }
    }

    /// Check if accesses through a pointer should be clamped
    fn should_clamp(&self, value: ValueId) -> bool {
        let ty = self.module.value_ty(value);
        let space = self
            .module
            .types
            .pointer_space(ty)
            .expect("clamp candidate must be a pointer");
        match space {
            AddressSpace::Function => self.config.clamp_function,
            AddressSpace::Private => self.config.clamp_private,
            AddressSpace::Immediate => self.config.clamp_immediate_data,
            AddressSpace::Storage => {
                self.config.clamp_storage && !self.is_root_var_ignored(value)
            }
            AddressSpace::Uniform => {
                self.config.clamp_uniform && !self.is_root_var_ignored(value)
            }
            AddressSpace::Workgroup => self.config.clamp_workgroup,
            AddressSpace::Handle | AddressSpace::In | AddressSpace::Out => false,
        }
    }

    /// The root `var` a pointer ultimately derives from, found by walking
    /// up through access and let chains. Function parameters have no root.
    fn root_var_for(&self, value: ValueId) -> Option<InstId> {
        let mut current = value;
        loop {
            match self.module.value(current).kind {
                ValueKind::InstResult { inst } => match self.module.inst(inst).op {
                    Op::Access | Op::Let => current = self.module.inst(inst).operands[0],
                    Op::Var { .. } => return Some(inst),
                    _ => unreachable!("pointer chain contains an unexpected producer"),
                },
                ValueKind::Param { .. } => return None,
                ValueKind::Constant(_) => unreachable!("a constant is never a pointer"),
            }
        }
    }

    /// Check if the binding of a pointer's root variable is ignored
    fn is_root_var_ignored(&self, value: ValueId) -> bool {
        if let Some(var) = self.root_var_for(value) {
            if let Op::Var {
                binding: Some(binding),
            } = self.module.inst(var).op
            {
                return self.config.bindings_ignored.contains(&binding);
            }
        }
        false
    }

    /// Clamp every index of an access instruction against the limit of the
    /// type it steps into
    fn clamp_access_indices(&mut self, access: InstId) {
        let base = self.module.inst(access).operands[0];
        let indices: Vec<ValueId> = self.module.inst(access).operands[1..].to_vec();
        let mut ty = self
            .module
            .types
            .unwrap_ptr(self.module.value_ty(base));

        for (i, &idx) in indices.iter().enumerate() {
            let limit = match self.module.types.get(ty).clone() {
                Type::Vector { width, .. } => {
                    Some(self.module.constant(ConstValue::U32(width - 1)))
                }
                Type::Matrix { columns, .. } => {
                    Some(self.module.constant(ConstValue::U32(columns - 1)))
                }
                Type::Array {
                    count: ArrayCount::Fixed(n),
                    ..
                } => Some(self.module.constant(ConstValue::U32(n - 1))),
                Type::Array {
                    count: ArrayCount::Runtime,
                    ..
                } => {
                    if self.config.disable_runtime_sized_array_index_clamping {
                        None
                    } else {
                        Some(self.runtime_array_limit(access, base, &indices, i, ty))
                    }
                }
                // Struct member indices are constants the validator has
                // already bounds-checked.
                _ => None,
            };

            if let Some(limit) = limit {
                self.clamp_operand(access, 1 + i, limit);
            }

            let const_idx = self.module.as_const_index(idx);
            ty = match self.module.types.element(ty, const_idx) {
                Some(next) => next,
                None => break,
            };
        }
    }

    /// Materialize `arrayLength(arr) - 1` before the access. When the
    /// runtime array is not the access base, an auxiliary access to it is
    /// generated first.
    fn runtime_array_limit(
        &mut self,
        access: InstId,
        base: ValueId,
        indices: &[ValueId],
        index_pos: usize,
        array_ty: crate::ir::TypeId,
    ) -> ValueId {
        let mut object = base;
        if index_pos > 0 {
            let space = self
                .module
                .types
                .pointer_space(self.module.value_ty(base))
                .expect("runtime-sized array access must go through a pointer");
            assert!(
                index_pos == 1,
                "runtime-sized array nested deeper than one level"
            );
            let arr_ptr_ty = self.module.types.ptr(space, array_ty);
            let mut b = Builder::before(self.module, access);
            object = b.access(arr_ptr_ty, base, &indices[..1]);
        }

        let mut b = Builder::before(self.module, access);
        let u32_ty = b.module().types.u32();
        let length = b.call(u32_ty, BuiltinFn::ArrayLength, &[object]);
        let one = b.const_u32(1);
        b.sub(u32_ty, length, one)
    }

    /// Clamp the lane index of a vector element load/store
    fn clamp_vector_element(&mut self, inst: InstId) {
        let ptr = self.module.inst(inst).operands[0];
        let vec_ty = self.module.types.unwrap_ptr(self.module.value_ty(ptr));
        let width = self
            .module
            .types
            .vector_width(vec_ty)
            .expect("vector element access through a non-vector pointer");
        let limit = self.module.constant(ConstValue::U32(width - 1));
        self.clamp_operand(inst, 1, limit);
    }

    /// Clamp operand `slot` of an instruction to `limit`.
    ///
    /// Constant index and constant limit fold to a new constant; an index
    /// the analysis proves in-bounds is left untouched; everything else is
    /// wrapped in `min(as_u32(idx), limit)`.
    fn clamp_operand(&mut self, inst: InstId, slot: usize, limit: ValueId) {
        let idx = self.module.inst(inst).operands[slot];
        let const_idx = self.module.as_const_index(idx);
        let const_limit = self.module.as_const_u32(limit);

        if let (Some(index), Some(limit_value)) = (const_idx, const_limit) {
            let clamped = self
                .module
                .constant(ConstValue::U32(index.min(limit_value)));
            self.module.set_operand(inst, slot, clamped);
        } else if self.index_may_be_out_of_bounds(idx, limit) {
            let mut b = Builder::before(self.module, inst);
            let u32_ty = b.module().types.u32();
            let idx_u32 = cast_to_u32(&mut b, idx);
            let clamped = b.call(u32_ty, BuiltinFn::Min, &[idx_u32, limit]);
            self.module.set_operand(inst, slot, clamped);
        } else {
            trace!(?inst, "clamp skipped: index proven in-bounds");
        }
    }

    /// Check if an index may be negative or exceed the limit. Only a valid
    /// analysis range against a constant limit can prove otherwise.
    fn index_may_be_out_of_bounds(&mut self, idx: ValueId, limit: ValueId) -> bool {
        let Some(analysis) = self.analysis.as_mut() else {
            return true;
        };
        let Some(limit_value) = self.module.as_const_u32(limit) else {
            return true;
        };
        match analysis.range_of(self.module, idx) {
            RangeInfo::Invalid => true,
            RangeInfo::Unsigned { max, .. } => max > limit_value as u64,
            RangeInfo::Signed { min, max } => min < 0 || max > limit_value as i64,
        }
    }

    /// Clamp the level, coordinate and array-index arguments of a texture
    /// builtin call. Coordinates are clamped against the dimensions at the
    /// clamped level, so level clamping runs first.
    fn clamp_texture_call_args(&mut self, call: InstId) {
        let func = match self.module.inst(call).op {
            Op::Call(func) => func,
            _ => unreachable!("texture candidate is not a call"),
        };
        let args = self.module.inst(call).operands.clone();
        let texture_ty = self.module.value_ty(args[0]);
        let (dim, class) = match self.module.types.get(texture_ty) {
            Type::Texture { dim, class } => (*dim, *class),
            _ => unreachable!("texture builtin called on a non-texture"),
        };

        match func {
            BuiltinFn::TextureDimensions => {
                if args.len() > 1 {
                    self.clamp_level(call, 1);
                }
            }
            BuiltinFn::TextureLoad => {
                let mut next_arg = 2;
                if dim.is_arrayed() {
                    self.clamp_array_index(call, next_arg);
                    next_arg += 1;
                }
                let clamped_level = class.has_mip_levels().then(|| {
                    self.clamp_level(call, next_arg)
                });
                // Must run after the level clamp so the limit uses the
                // correct mip size.
                self.clamp_coords(call, 1, clamped_level);
            }
            BuiltinFn::TextureStore => {
                self.clamp_coords(call, 1, None);
                if dim.is_arrayed() {
                    self.clamp_array_index(call, 3);
                }
            }
            _ => unreachable!("not a texture builtin"),
        }
    }

    /// Clamp a mip level argument to `[0, textureNumLevels - 1]`, returning
    /// the clamped value for later coordinate clamping
    fn clamp_level(&mut self, call: InstId, arg_idx: usize) -> ValueId {
        let texture = self.module.inst(call).operands[0];
        let level = self.module.inst(call).operands[arg_idx];
        let mut b = Builder::before(self.module, call);
        let u32_ty = b.module().types.u32();
        let num_levels = b.call(u32_ty, BuiltinFn::TextureNumLevels, &[texture]);
        let one = b.const_u32(1);
        let limit = b.sub(u32_ty, num_levels, one);
        let level_u32 = cast_to_u32(&mut b, level);
        let clamped = b.call(u32_ty, BuiltinFn::Min, &[level_u32, limit]);
        self.module.set_operand(call, arg_idx, clamped);
        clamped
    }

    /// Clamp a coordinate argument to `[0, textureDimensions - 1]`, using
    /// the clamped level's dimensions when one was produced
    fn clamp_coords(&mut self, call: InstId, arg_idx: usize, clamped_level: Option<ValueId>) {
        let texture = self.module.inst(call).operands[0];
        let coord = self.module.inst(call).operands[arg_idx];
        let coord_ty = self.module.value_ty(coord);
        let mut b = Builder::before(self.module, call);
        let u32_ty = b.module().types.u32();
        let dims_ty = b.module().types.match_width(u32_ty, coord_ty);
        let one = b.const_u32_match_width(1, coord_ty);
        let dims = match clamped_level {
            Some(level) => b.call(dims_ty, BuiltinFn::TextureDimensions, &[texture, level]),
            None => b.call(dims_ty, BuiltinFn::TextureDimensions, &[texture]),
        };
        let limit = b.sub(dims_ty, dims, one);
        let coord_u32 = cast_to_u32(&mut b, coord);
        let clamped = b.call(dims_ty, BuiltinFn::Min, &[coord_u32, limit]);
        self.module.set_operand(call, arg_idx, clamped);
    }

    /// Clamp a texture array index to `[0, textureNumLayers - 1]`
    fn clamp_array_index(&mut self, call: InstId, arg_idx: usize) {
        let texture = self.module.inst(call).operands[0];
        let index = self.module.inst(call).operands[arg_idx];
        let mut b = Builder::before(self.module, call);
        let u32_ty = b.module().types.u32();
        let num_layers = b.call(u32_ty, BuiltinFn::TextureNumLayers, &[texture]);
        let one = b.const_u32(1);
        let limit = b.sub(u32_ty, num_layers, one);
        let index_u32 = cast_to_u32(&mut b, index);
        let clamped = b.call(u32_ty, BuiltinFn::Min, &[index_u32, limit]);
        self.module.set_operand(call, arg_idx, clamped);
    }

    /// Repair the stride of a subgroup matrix load/store and, when
    /// configured, move the call behind an `if (end <= length)` guard
    fn predicate_subgroup_matrix_call(&mut self, call: InstId) {
        let func = match self.module.inst(call).op {
            Op::Call(func) => func,
            _ => unreachable!("subgroup matrix candidate is not a call"),
        };
        let args = self.module.inst(call).operands.clone();
        let arr = args[0];
        let offset = args[1];
        let (col_major, mut stride, stride_index, matrix_ty) = match func {
            BuiltinFn::SubgroupMatrixLoad => {
                let result = self
                    .module
                    .inst(call)
                    .result
                    .expect("subgroup matrix load has a result");
                (args[2], args[3], 3, self.module.value_ty(result))
            }
            BuiltinFn::SubgroupMatrixStore => (args[3], args[4], 4, self.module.value_ty(args[2])),
            _ => unreachable!("not a subgroup matrix builtin"),
        };
        let (rows, columns, elem) = match self.module.types.get(matrix_ty) {
            Type::SubgroupMatrix {
                rows,
                columns,
                elem,
            } => (*rows, *columns, *elem),
            _ => unreachable!("subgroup matrix builtin without a subgroup matrix type"),
        };

        // The minimum valid stride, and the dimension whose slices the
        // stride steps over.
        let col_major = self
            .module
            .as_const_bool(col_major)
            .expect("subgroup matrix layout flag must be a constant");
        let (min_stride, major_dim) = if col_major {
            (rows, columns)
        } else {
            (columns, rows)
        };

        // Raise the stride to at least `min_stride`.
        if let Some(const_stride) = self.module.as_const_u32(stride) {
            if const_stride < min_stride {
                stride = self.module.constant(ConstValue::U32(min_stride));
                self.module.set_operand(call, stride_index, stride);
            }
        } else {
            let mut b = Builder::before(self.module, call);
            let u32_ty = b.module().types.u32();
            let min_stride_value = b.const_u32(min_stride);
            stride = b.call(u32_ty, BuiltinFn::Max, &[stride, min_stride_value]);
            self.module.set_operand(call, stride_index, stride);
        }

        if !self.config.predicate_subgroup_matrix {
            return;
        }

        // 8-bit component types pack four components into one array
        // element; scale the length to component units.
        let elem_kind = self
            .module
            .types
            .scalar_kind(elem)
            .expect("subgroup matrix component is a scalar");
        let components_per_element = match elem_kind {
            ScalarKind::I8 | ScalarKind::U8 => 4u32,
            ScalarKind::I32 | ScalarKind::U32 | ScalarKind::F16 | ScalarKind::F32 => 1,
            ScalarKind::Bool => panic!("subgroup matrix with bool components"),
        };

        let arr_ty = self.module.types.unwrap_ptr(self.module.value_ty(arr));
        let count = match self.module.types.get(arr_ty) {
            Type::Array { count, .. } => *count,
            _ => unreachable!("subgroup matrix memory operand is not an array"),
        };
        let array_length = match count {
            ArrayCount::Fixed(n) => self
                .module
                .constant(ConstValue::U32(n * components_per_element)),
            ArrayCount::Runtime => {
                let mut b = Builder::before(self.module, call);
                let u32_ty = b.module().types.u32();
                let length = b.call(u32_ty, BuiltinFn::ArrayLength, &[arr]);
                if components_per_element > 1 {
                    let scale = b.const_u32(components_per_element);
                    b.mul(u32_ty, length, scale)
                } else {
                    length
                }
            }
        };

        // With a fully constant length, stride and offset the bounds check
        // resolves now; skip the guard when it passes.
        if let (Some(length), Some(stride_value), Some(offset_value)) = (
            self.module.as_const_u32(array_length),
            self.module.as_const_u32(stride),
            self.module.as_const_u32(offset),
        ) {
            let end = offset_value as u64
                + stride_value as u64 * (major_dim as u64 - 1)
                + min_stride as u64;
            if end <= length as u64 {
                trace!(?call, "subgroup matrix call statically in bounds");
                return;
            }
        }

        // Detach the call and rebuild it inside the guard at the same spot.
        let block = self.module.inst(call).block;
        let position = self
            .module
            .position_in_block(call)
            .expect("subgroup matrix call is attached");
        self.module.detach(call);
        let anchor = self.module.block(block).insts[position];

        let call_result = self.module.inst(call).result;
        let mut b = Builder::before(self.module, anchor);
        let u32_ty = b.module().types.u32();
        // The last row/column starts at `offset + (major_dim-1)*stride`;
        // the access ends `min_stride` components later.
        let major_minus_one = b.const_u32(major_dim - 1);
        let slice = b.mul(u32_ty, stride, major_minus_one);
        let last_slice = b.add(u32_ty, offset, slice);
        let min_stride_value = b.const_u32(min_stride);
        let end = b.add(u32_ty, last_slice, min_stride_value);
        let in_bounds = b.le(end, array_length);

        match func {
            BuiltinFn::SubgroupMatrixLoad => {
                let call_result = call_result.expect("subgroup matrix load has a result");
                // A zero-initialized variable holds the result; out of
                // bounds loads observe the zero matrix.
                let result_var = b.var(AddressSpace::Function, matrix_ty);
                let load_result = b.module().detached_result(matrix_ty);
                b.module().replace_all_uses(call_result, load_result);
                let if_inst = b.if_(in_bounds);

                let (true_block, false_block) = self.module.if_blocks(if_inst);
                self.module.attach(true_block, call);
                let mut tb = Builder::append_to(self.module, true_block);
                tb.store(result_var, call_result);
                tb.exit_if();
                let mut fb = Builder::append_to(self.module, false_block);
                fb.exit_if();

                let mut after = Builder::before(self.module, anchor);
                after.load_with_result(load_result, result_var);
            }
            BuiltinFn::SubgroupMatrixStore => {
                let if_inst = b.if_(in_bounds);
                let (true_block, false_block) = self.module.if_blocks(if_inst);
                self.module.attach(true_block, call);
                let mut tb = Builder::append_to(self.module, true_block);
                tb.exit_if();
                let mut fb = Builder::append_to(self.module, false_block);
                fb.exit_if();
            }
            _ => unreachable!(),
        }
    }
}

/// Convert a value to u32 (or a u32 vector of the same width) unless it
/// already is one
fn cast_to_u32(b: &mut Builder, value: ValueId) -> ValueId {
    let ty = b.module().value_ty(value);
    if b.module().types.is_unsigned_integer_scalar_or_vector(ty) {
        return value;
    }
    let u32_ty = b.module().types.u32();
    let target = b.module().types.match_width(u32_ty, ty);
    b.convert(target, value)
}
