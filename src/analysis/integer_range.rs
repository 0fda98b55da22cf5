//! On-demand integer range evaluation
//!
//! [`IntegerRangeAnalysis`] computes a conservative range for any integer
//! value in a module, dispatching on the value's producer and memoizing
//! results. Absence of information is not an error: any value the analysis
//! cannot bound evaluates to [`RangeInfo::Invalid`].
//!
//! Queries take the module by reference so a transform can interleave lazy
//! range queries with its own rewriting; the analysis itself never mutates
//! the IR, it only fills its caches.

use rustc_hash::{FxHashMap as HashMap, FxHashSet as HashSet};
use tracing::trace;

use crate::ir::{BuiltinFn, BuiltinValue, InstId, Module, Op, ScalarKind, ValueId, ValueKind};

use super::loop_shape;
use super::range::RangeInfo;

/// Lazy, memoized integer range analysis over one module
#[derive(Debug, Default)]
pub struct IntegerRangeAnalysis {
    /// Write-once cache of computed ranges, keyed by value identity
    value_ranges: HashMap<ValueId, RangeInfo>,
    /// Per-component ranges for integer-vector function parameters
    param_components: HashMap<ValueId, Vec<RangeInfo>>,
    /// Values currently being computed; re-entry means a cycle
    in_flight: HashSet<ValueId>,
}

impl IntegerRangeAnalysis {
    pub fn new() -> Self {
        Self::default()
    }

    /// The range of a value, computing and caching it on first query
    pub fn range_of(&mut self, module: &Module, value: ValueId) -> RangeInfo {
        if let Some(&cached) = self.value_ranges.get(&value) {
            return cached;
        }
        if !self.in_flight.insert(value) {
            // Cycle through the value graph; break with no information.
            return RangeInfo::Invalid;
        }
        let range = self.compute(module, value);
        self.in_flight.remove(&value);
        self.value_ranges.insert(value, range);
        trace!(?value, ?range, "range computed");
        range
    }

    /// The range of one component of a function parameter. `component` must
    /// be 0 for scalar parameters and within the vector width otherwise.
    pub fn param_component_range(
        &mut self,
        module: &Module,
        param: ValueId,
        component: u32,
    ) -> RangeInfo {
        let ty = module.value_ty(param);
        if !module.types.is_integer_scalar_or_vector(ty) {
            return RangeInfo::Invalid;
        }

        if !self.param_components.contains_key(&param) {
            let ranges = compute_param_ranges(module, param);
            self.param_components.insert(param, ranges);
        }
        let ranges = &self.param_components[&param];
        assert!(
            (component as usize) < ranges.len(),
            "parameter component index out of range"
        );
        ranges[component as usize]
    }

    fn compute(&mut self, module: &Module, value: ValueId) -> RangeInfo {
        match &module.value(value).kind {
            ValueKind::Constant(_) => constant_range(module, value),
            ValueKind::Param { .. } => {
                if module.types.is_integer_scalar(module.value_ty(value)) {
                    self.param_component_range(module, value, 0)
                } else {
                    RangeInfo::Invalid
                }
            }
            ValueKind::InstResult { inst } => self.compute_inst(module, *inst),
        }
    }

    fn compute_inst(&mut self, module: &Module, inst: InstId) -> RangeInfo {
        let data = module.inst(inst);
        match &data.op {
            // A constant lane of an integer-vector parameter.
            Op::Access => {
                let base = data.operands[0];
                if !matches!(module.value(base).kind, ValueKind::Param { .. }) {
                    return RangeInfo::Invalid;
                }
                if !module.types.is_integer_scalar_or_vector(module.value_ty(base))
                    || module.types.vector_width(module.value_ty(base)).is_none()
                {
                    return RangeInfo::Invalid;
                }
                if data.operands.len() != 2 {
                    return RangeInfo::Invalid;
                }
                match module.as_const_index(data.operands[1]) {
                    Some(lane) => self.param_component_range(module, base, lane),
                    None => RangeInfo::Invalid,
                }
            }

            // A load observes the control variable of a recognized loop.
            Op::Load => {
                let ptr = data.operands[0];
                let Some(var_inst) = module.producer(ptr) else {
                    return RangeInfo::Invalid;
                };
                if !matches!(module.inst(var_inst).op, Op::Var { .. }) {
                    return RangeInfo::Invalid;
                }
                let Some(owner) = module.block(module.inst(var_inst).block).parent else {
                    return RangeInfo::Invalid;
                };
                if !matches!(module.inst(owner).op, Op::Loop { .. }) {
                    return RangeInfo::Invalid;
                }
                if loop_shape::loop_control_variable(module, owner) != Some(var_inst) {
                    return RangeInfo::Invalid;
                }
                loop_shape::control_variable_range(module, owner)
            }

            Op::Let => self.range_of(module, data.operands[0]),

            Op::Binary(op) => {
                use crate::ir::BinaryOp;
                let lhs = self.range_of(module, data.operands[0]);
                let rhs = self.range_of(module, data.operands[1]);
                match op {
                    BinaryOp::Add => lhs.add(rhs),
                    BinaryOp::Sub => lhs.sub(rhs),
                    BinaryOp::Mul => lhs.mul(rhs),
                    BinaryOp::Div => lhs.div(rhs),
                    BinaryOp::Mod => lhs.modulo(rhs),
                    BinaryOp::Shl => lhs.shl(rhs),
                    BinaryOp::Shr => lhs.shr(rhs),
                    _ => RangeInfo::Invalid,
                }
            }

            Op::Convert => {
                let result_ty = match data.result {
                    Some(result) => module.value_ty(result),
                    None => return RangeInfo::Invalid,
                };
                let src_ty = module.value_ty(data.operands[0]);
                if !module.types.is_integer_scalar(result_ty)
                    || !module.types.is_integer_scalar(src_ty)
                {
                    return RangeInfo::Invalid;
                }
                let src = self.range_of(module, data.operands[0]);
                if module.types.is_unsigned_integer_scalar(result_ty) {
                    src.to_unsigned()
                } else {
                    src.to_signed()
                }
            }

            // Scalar integer min/max clamp the known side even when the
            // other operand is unbounded.
            Op::Call(func @ (BuiltinFn::Min | BuiltinFn::Max)) => {
                let result_ty = match data.result {
                    Some(result) => module.value_ty(result),
                    None => return RangeInfo::Invalid,
                };
                if !module.types.is_integer_scalar(result_ty) || data.operands.len() != 2 {
                    return RangeInfo::Invalid;
                }
                let kind = module
                    .types
                    .scalar_kind(result_ty)
                    .expect("integer scalar has a kind");
                let lhs = saturate_if_invalid(self.range_of(module, data.operands[0]), kind);
                let rhs = saturate_if_invalid(self.range_of(module, data.operands[1]), kind);
                match func {
                    BuiltinFn::Min => lhs.min_of(rhs),
                    BuiltinFn::Max => lhs.max_of(rhs),
                    _ => unreachable!(),
                }
            }

            _ => RangeInfo::Invalid,
        }
    }
}

fn constant_range(module: &Module, value: ValueId) -> RangeInfo {
    use crate::ir::ConstValue;
    match module.const_value(value) {
        Some(&ConstValue::I32(x)) => RangeInfo::signed(x as i64, x as i64),
        Some(&ConstValue::U32(x)) => RangeInfo::unsigned(x as u64, x as u64),
        _ => RangeInfo::Invalid,
    }
}

fn saturate_if_invalid(range: RangeInfo, kind: ScalarKind) -> RangeInfo {
    if range.is_valid() {
        range
    } else {
        RangeInfo::saturated(kind)
    }
}

fn compute_param_ranges(module: &Module, param: ValueId) -> Vec<RangeInfo> {
    let ty = module.value_ty(param);

    match module.param_builtin(param) {
        Some(BuiltinValue::LocalInvocationIndex) => {
            let [x, y, z] = constant_workgroup_size(module, param);
            let max = (x as u64) * (y as u64) * (z as u64) - 1;
            vec![RangeInfo::unsigned(0, max)]
        }
        Some(BuiltinValue::LocalInvocationId) => {
            let size = constant_workgroup_size(module, param);
            size.iter()
                .map(|&n| RangeInfo::unsigned(0, n as u64 - 1))
                .collect()
        }
        _ => {
            let kind = module
                .types
                .scalar_kind(ty)
                .expect("integer parameter has a scalar kind");
            let lanes = module.types.vector_width(ty).unwrap_or(1);
            vec![RangeInfo::saturated(kind); lanes as usize]
        }
    }
}

fn constant_workgroup_size(module: &Module, param: ValueId) -> [u32; 3] {
    // Pipeline overrides are replaced with constants before analysis runs,
    // so a compute built-in without a concrete workgroup size is a bug in
    // the caller, not an analyzable state.
    let func = module
        .param_function(param)
        .expect("built-in is attached to a function parameter");
    module
        .function(func)
        .workgroup_size
        .expect("compute built-in parameter on a function without a constant workgroup size")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{AddressSpace, Builder, ConstValue};

    #[test]
    fn test_constant_ranges() {
        let mut module = Module::new();
        let c_i = module.constant(ConstValue::I32(-4));
        let c_u = module.constant(ConstValue::U32(9));
        let c_b = module.constant(ConstValue::Bool(true));

        let mut analysis = IntegerRangeAnalysis::new();
        assert_eq!(analysis.range_of(&module, c_i), RangeInfo::signed(-4, -4));
        assert_eq!(analysis.range_of(&module, c_u), RangeInfo::unsigned(9, 9));
        assert_eq!(analysis.range_of(&module, c_b), RangeInfo::Invalid);
    }

    #[test]
    fn test_plain_param_saturates() {
        let mut module = Module::new();
        let u32_ty = module.types.u32();
        let i32_ty = module.types.i32();
        let func = module.create_function("main", None);
        let p_u = module.add_param(func, u32_ty, None);
        let p_i = module.add_param(func, i32_ty, None);

        let mut analysis = IntegerRangeAnalysis::new();
        assert_eq!(
            analysis.range_of(&module, p_u),
            RangeInfo::saturated(ScalarKind::U32)
        );
        assert_eq!(
            analysis.range_of(&module, p_i),
            RangeInfo::saturated(ScalarKind::I32)
        );
    }

    #[test]
    fn test_let_propagates_and_caches() {
        let mut module = Module::new();
        let func = module.create_function("main", None);
        let body = module.function(func).body;
        let u32_ty = module.types.u32();

        let mut b = Builder::append_to(&mut module, body);
        let five = b.const_u32(5);
        let named = b.let_(five);
        let sum = b.add(u32_ty, named, five);
        b.ret(None);

        let mut analysis = IntegerRangeAnalysis::new();
        assert_eq!(analysis.range_of(&module, named), RangeInfo::unsigned(5, 5));
        assert_eq!(analysis.range_of(&module, sum), RangeInfo::unsigned(10, 10));
        // Second query hits the cache and agrees.
        assert_eq!(analysis.range_of(&module, sum), RangeInfo::unsigned(10, 10));
    }

    #[test]
    fn test_min_saturates_unknown_operand() {
        let mut module = Module::new();
        let u32_ty = module.types.u32();
        let func = module.create_function("main", None);
        let p = module.add_param(func, u32_ty, None);
        let body = module.function(func).body;

        let mut b = Builder::append_to(&mut module, body);
        let seven = b.const_u32(7);
        let clamped = b.call(u32_ty, BuiltinFn::Min, &[p, seven]);
        let widened = b.call(u32_ty, BuiltinFn::Max, &[p, seven]);
        b.ret(None);

        let mut analysis = IntegerRangeAnalysis::new();
        // min(saturated, 7) clamps the upper bound.
        assert_eq!(
            analysis.range_of(&module, clamped),
            RangeInfo::unsigned(0, 7)
        );
        // max(saturated, 7) lifts the lower bound.
        assert_eq!(
            analysis.range_of(&module, widened),
            RangeInfo::unsigned(7, u32::MAX as u64)
        );
    }

    #[test]
    fn test_load_of_plain_var_is_unknown() {
        let mut module = Module::new();
        let func = module.create_function("main", None);
        let body = module.function(func).body;
        let u32_ty = module.types.u32();

        let mut b = Builder::append_to(&mut module, body);
        let zero = b.const_u32(0);
        let v = b.var_init(AddressSpace::Function, u32_ty, zero);
        let loaded = b.load(v);
        b.ret(None);

        let mut analysis = IntegerRangeAnalysis::new();
        assert_eq!(analysis.range_of(&module, loaded), RangeInfo::Invalid);
    }
}
