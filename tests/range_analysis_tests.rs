//! Integration tests for integer range analysis

mod common;

use common::{counting_loop, counting_loop_with, LoopSpec};
use prism::analysis::{loop_shape, IntegerRangeAnalysis, RangeInfo};
use prism::ir::{
    AddressSpace, BinaryOp, Builder, BuiltinFn, BuiltinValue, ConstValue, Module,
};

mod builtin_params {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_local_invocation_index_bounded_by_workgroup_size() {
        let mut module = Module::new();
        let u32_ty = module.types.u32();
        let func = module.create_function("main", Some([4, 3, 2]));
        let index = module.add_param(func, u32_ty, Some(BuiltinValue::LocalInvocationIndex));

        let mut analysis = IntegerRangeAnalysis::new();
        assert_eq!(
            analysis.range_of(&module, index),
            RangeInfo::unsigned(0, 23)
        );
    }

    #[test]
    fn test_local_invocation_id_components() {
        let mut module = Module::new();
        let u32_ty = module.types.u32();
        let vec3u = module.types.vec(u32_ty, 3);
        let func = module.create_function("main", Some([1, 8, 1]));
        let id = module.add_param(func, vec3u, Some(BuiltinValue::LocalInvocationId));

        let mut analysis = IntegerRangeAnalysis::new();
        assert_eq!(
            analysis.param_component_range(&module, id, 0),
            RangeInfo::unsigned(0, 0)
        );
        assert_eq!(
            analysis.param_component_range(&module, id, 1),
            RangeInfo::unsigned(0, 7)
        );
        assert_eq!(
            analysis.param_component_range(&module, id, 2),
            RangeInfo::unsigned(0, 0)
        );
    }

    #[test]
    fn test_vector_access_at_constant_lane() {
        let mut module = Module::new();
        let u32_ty = module.types.u32();
        let vec3u = module.types.vec(u32_ty, 3);
        let func = module.create_function("main", Some([1, 8, 1]));
        let id = module.add_param(func, vec3u, Some(BuiltinValue::LocalInvocationId));
        let body = module.function(func).body;

        let mut b = Builder::append_to(&mut module, body);
        let one = b.const_u32(1);
        let lane = b.access(u32_ty, id, &[one]);
        b.ret(None);

        let mut analysis = IntegerRangeAnalysis::new();
        assert_eq!(analysis.range_of(&module, lane), RangeInfo::unsigned(0, 7));
    }

    #[test]
    fn test_vector_access_at_dynamic_lane_is_unknown() {
        let mut module = Module::new();
        let u32_ty = module.types.u32();
        let vec3u = module.types.vec(u32_ty, 3);
        let func = module.create_function("main", Some([2, 2, 2]));
        let id = module.add_param(func, vec3u, Some(BuiltinValue::LocalInvocationId));
        let dynamic = module.add_param(func, u32_ty, None);
        let body = module.function(func).body;

        let mut b = Builder::append_to(&mut module, body);
        let lane = b.access(u32_ty, id, &[dynamic]);
        b.ret(None);

        let mut analysis = IntegerRangeAnalysis::new();
        assert_eq!(analysis.range_of(&module, lane), RangeInfo::Invalid);
    }

    #[test]
    #[should_panic(expected = "constant workgroup size")]
    fn test_builtin_without_workgroup_size_aborts() {
        let mut module = Module::new();
        let u32_ty = module.types.u32();
        let func = module.create_function("main", None);
        let index = module.add_param(func, u32_ty, Some(BuiltinValue::LocalInvocationIndex));

        let mut analysis = IntegerRangeAnalysis::new();
        analysis.range_of(&module, index);
    }
}

mod loop_ranges {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_increasing_loop_with_less_than() {
        let mut module = Module::new();
        let func = module.create_function("main", None);
        let body = module.function(func).body;
        let parts = counting_loop(
            &mut module,
            body,
            ConstValue::I32(0),
            BinaryOp::Lt,
            ConstValue::I32(10),
            BinaryOp::Add,
            ConstValue::I32(1),
        );
        let mut b = Builder::append_to(&mut module, body);
        b.ret(None);

        assert_eq!(
            loop_shape::loop_control_variable(&module, parts.loop_inst),
            Some(parts.lcv)
        );
        assert!(loop_shape::update_binary(&module, parts.loop_inst, parts.lcv).is_some());
        assert!(loop_shape::comparison_binary(&module, parts.loop_inst, parts.lcv).is_some());
        assert_eq!(
            loop_shape::control_variable_range(&module, parts.loop_inst),
            RangeInfo::signed(0, 9)
        );

        // Loading the control variable in the body observes the same range.
        let mut analysis = IntegerRangeAnalysis::new();
        assert_eq!(
            analysis.range_of(&module, parts.body_load),
            RangeInfo::signed(0, 9)
        );
    }

    #[test]
    fn test_non_unit_step_is_not_recognized() {
        let mut module = Module::new();
        let func = module.create_function("main", None);
        let body = module.function(func).body;
        let parts = counting_loop(
            &mut module,
            body,
            ConstValue::I32(0),
            BinaryOp::Lt,
            ConstValue::I32(10),
            BinaryOp::Add,
            ConstValue::I32(2),
        );
        let mut b = Builder::append_to(&mut module, body);
        b.ret(None);

        assert!(loop_shape::update_binary(&module, parts.loop_inst, parts.lcv).is_none());
        assert_eq!(
            loop_shape::control_variable_range(&module, parts.loop_inst),
            RangeInfo::Invalid
        );

        let mut analysis = IntegerRangeAnalysis::new();
        assert_eq!(analysis.range_of(&module, parts.body_load), RangeInfo::Invalid);
    }

    #[test]
    fn test_unsigned_loop_with_less_than_equal() {
        let mut module = Module::new();
        let func = module.create_function("main", None);
        let body = module.function(func).body;
        let parts = counting_loop(
            &mut module,
            body,
            ConstValue::U32(2),
            BinaryOp::Le,
            ConstValue::U32(100),
            BinaryOp::Add,
            ConstValue::U32(1),
        );
        let mut b = Builder::append_to(&mut module, body);
        b.ret(None);

        assert_eq!(
            loop_shape::control_variable_range(&module, parts.loop_inst),
            RangeInfo::unsigned(2, 100)
        );
    }

    #[test]
    fn test_decreasing_loop_with_greater_than() {
        let mut module = Module::new();
        let func = module.create_function("main", None);
        let body = module.function(func).body;
        let parts = counting_loop(
            &mut module,
            body,
            ConstValue::I32(10),
            BinaryOp::Gt,
            ConstValue::I32(0),
            BinaryOp::Sub,
            ConstValue::I32(1),
        );
        let mut b = Builder::append_to(&mut module, body);
        b.ret(None);

        assert_eq!(
            loop_shape::control_variable_range(&module, parts.loop_inst),
            RangeInfo::signed(1, 10)
        );
    }

    #[test]
    fn test_decreasing_loop_with_greater_than_equal() {
        let mut module = Module::new();
        let func = module.create_function("main", None);
        let body = module.function(func).body;
        let parts = counting_loop(
            &mut module,
            body,
            ConstValue::U32(9),
            BinaryOp::Ge,
            ConstValue::U32(3),
            BinaryOp::Sub,
            ConstValue::U32(1),
        );
        let mut b = Builder::append_to(&mut module, body);
        b.ret(None);

        assert_eq!(
            loop_shape::control_variable_range(&module, parts.loop_inst),
            RangeInfo::unsigned(3, 9)
        );
    }

    #[test]
    fn test_exit_direction_inconsistent_with_update() {
        let mut module = Module::new();
        let func = module.create_function("main", None);
        let body = module.function(func).body;
        // Decrementing while continuing on `i < 10` never exits through the
        // comparison.
        let parts = counting_loop(
            &mut module,
            body,
            ConstValue::I32(5),
            BinaryOp::Lt,
            ConstValue::I32(10),
            BinaryOp::Sub,
            ConstValue::I32(1),
        );
        let mut b = Builder::append_to(&mut module, body);
        b.ret(None);

        assert_eq!(
            loop_shape::control_variable_range(&module, parts.loop_inst),
            RangeInfo::Invalid
        );
    }

    #[test]
    fn test_init_already_violating_predicate_is_a_point() {
        let mut module = Module::new();
        let func = module.create_function("main", None);
        let body = module.function(func).body;
        let parts = counting_loop(
            &mut module,
            body,
            ConstValue::I32(42),
            BinaryOp::Lt,
            ConstValue::I32(10),
            BinaryOp::Add,
            ConstValue::I32(1),
        );
        let mut b = Builder::append_to(&mut module, body);
        b.ret(None);

        assert_eq!(
            loop_shape::control_variable_range(&module, parts.loop_inst),
            RangeInfo::signed(42, 42)
        );
    }

    #[test]
    fn test_exit_through_true_arm_inverts_the_predicate() {
        let mut module = Module::new();
        let func = module.create_function("main", None);
        let body = module.function(func).body;
        // `if (i >= 10) { exit_loop }` continues while `i < 10`.
        let parts = counting_loop_with(
            &mut module,
            body,
            LoopSpec {
                init: ConstValue::I32(0),
                cmp: BinaryOp::Ge,
                limit: ConstValue::I32(10),
                step: BinaryOp::Add,
                amount: ConstValue::I32(1),
                exit_on_true: true,
            },
        );
        let mut b = Builder::append_to(&mut module, body);
        b.ret(None);

        assert_eq!(
            loop_shape::control_variable_range(&module, parts.loop_inst),
            RangeInfo::signed(0, 9)
        );
    }

    #[test]
    fn test_impossible_boundary_comparison_is_rejected() {
        let mut module = Module::new();
        let func = module.create_function("main", None);
        let body = module.function(func).body;
        // `i < 0u` can never continue the loop.
        let parts = counting_loop(
            &mut module,
            body,
            ConstValue::U32(0),
            BinaryOp::Lt,
            ConstValue::U32(0),
            BinaryOp::Add,
            ConstValue::U32(1),
        );
        let mut b = Builder::append_to(&mut module, body);
        b.ret(None);

        assert!(loop_shape::comparison_binary(&module, parts.loop_inst, parts.lcv).is_none());
        assert_eq!(
            loop_shape::control_variable_range(&module, parts.loop_inst),
            RangeInfo::Invalid
        );
    }

    #[test]
    fn test_extra_use_of_control_variable_disqualifies() {
        let mut module = Module::new();
        let func = module.create_function("main", None);
        let body = module.function(func).body;
        let parts = counting_loop(
            &mut module,
            body,
            ConstValue::I32(0),
            BinaryOp::Lt,
            ConstValue::I32(10),
            BinaryOp::Add,
            ConstValue::I32(1),
        );

        // Store to the control variable inside the body's if-arm.
        let lcv_ptr = module.inst(parts.lcv).result.unwrap();
        let if_inst = module.block(parts.body).insts[2];
        let (true_block, _) = module.if_blocks(if_inst);
        let exit_if = module.block(true_block).insts[0];
        let mut b = Builder::before(&mut module, exit_if);
        let zero = b.const_i32(0);
        b.store(lcv_ptr, zero);

        let mut b = Builder::append_to(&mut module, body);
        b.ret(None);

        assert!(loop_shape::comparison_binary(&module, parts.loop_inst, parts.lcv).is_none());
        assert_eq!(
            loop_shape::control_variable_range(&module, parts.loop_inst),
            RangeInfo::Invalid
        );
    }

    #[test]
    fn test_wrong_initializer_arity_disqualifies() {
        let mut module = Module::new();
        let func = module.create_function("main", None);
        let body = module.function(func).body;
        let i32_ty = module.types.i32();

        // An initializer with an extra declaration has three instructions.
        let mut b = Builder::append_to(&mut module, body);
        let loop_inst = b.loop_();
        b.ret(None);
        let (initializer, loop_body, continuing) = module.loop_blocks(loop_inst);

        let mut b = Builder::append_to(&mut module, initializer);
        let zero = b.const_i32(0);
        b.var_init(AddressSpace::Function, i32_ty, zero);
        b.var_init(AddressSpace::Function, i32_ty, zero);
        b.next_iteration();

        let mut b = Builder::append_to(&mut module, loop_body);
        b.exit_loop();
        let mut b = Builder::append_to(&mut module, continuing);
        b.next_iteration();

        assert!(loop_shape::loop_control_variable(&module, loop_inst).is_none());
        assert_eq!(
            loop_shape::control_variable_range(&module, loop_inst),
            RangeInfo::Invalid
        );
    }
}

mod evaluator {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_arithmetic_over_loop_variable() {
        let mut module = Module::new();
        let func = module.create_function("main", None);
        let body = module.function(func).body;
        let i32_ty = module.types.i32();
        let parts = counting_loop(
            &mut module,
            body,
            ConstValue::I32(0),
            BinaryOp::Lt,
            ConstValue::I32(10),
            BinaryOp::Add,
            ConstValue::I32(1),
        );

        // Insert arithmetic between the body head and its terminator.
        let continue_inst = *module.block(parts.body).insts.last().unwrap();
        let mut b = Builder::before(&mut module, continue_inst);
        let two = b.const_i32(2);
        let four = b.const_i32(4);
        let doubled = b.mul(i32_ty, parts.body_load, two);
        let shifted = b.binary(BinaryOp::Shl, i32_ty, parts.body_load, two);
        let halved = b.binary(BinaryOp::Div, i32_ty, parts.body_load, two);
        let wrapped = b.binary(BinaryOp::Mod, i32_ty, parts.body_load, four);
        let offset = b.add(i32_ty, parts.body_load, four);

        let mut b = Builder::append_to(&mut module, body);
        b.ret(None);

        let mut analysis = IntegerRangeAnalysis::new();
        assert_eq!(analysis.range_of(&module, doubled), RangeInfo::signed(0, 18));
        assert_eq!(analysis.range_of(&module, shifted), RangeInfo::signed(0, 36));
        assert_eq!(analysis.range_of(&module, halved), RangeInfo::signed(0, 4));
        assert_eq!(analysis.range_of(&module, wrapped), RangeInfo::signed(0, 3));
        assert_eq!(analysis.range_of(&module, offset), RangeInfo::signed(4, 13));
    }

    #[test]
    fn test_convert_sanity() {
        let mut module = Module::new();
        let func = module.create_function("main", None);
        let body = module.function(func).body;
        let i32_ty = module.types.i32();
        let u32_ty = module.types.u32();
        let signed_param = module.add_param(func, i32_ty, None);
        let unsigned_param = module.add_param(func, u32_ty, None);

        let mut b = Builder::append_to(&mut module, body);
        // A possibly-negative source cannot become unsigned.
        let widened = b.convert(u32_ty, signed_param);
        // A source that may exceed i32::MAX cannot become signed.
        let narrowed = b.convert(i32_ty, unsigned_param);
        b.ret(None);

        let mut analysis = IntegerRangeAnalysis::new();
        assert_eq!(analysis.range_of(&module, widened), RangeInfo::Invalid);
        assert_eq!(analysis.range_of(&module, narrowed), RangeInfo::Invalid);
    }

    #[test]
    fn test_convert_of_bounded_loop_variable() {
        let mut module = Module::new();
        let func = module.create_function("main", None);
        let body = module.function(func).body;
        let u32_ty = module.types.u32();
        let parts = counting_loop(
            &mut module,
            body,
            ConstValue::I32(0),
            BinaryOp::Lt,
            ConstValue::I32(10),
            BinaryOp::Add,
            ConstValue::I32(1),
        );

        let continue_inst = *module.block(parts.body).insts.last().unwrap();
        let mut b = Builder::before(&mut module, continue_inst);
        let as_u32 = b.convert(u32_ty, parts.body_load);
        let mut b = Builder::append_to(&mut module, body);
        b.ret(None);

        let mut analysis = IntegerRangeAnalysis::new();
        assert_eq!(analysis.range_of(&module, as_u32), RangeInfo::unsigned(0, 9));
    }

    #[test]
    fn test_min_of_builtin_and_constant() {
        let mut module = Module::new();
        let u32_ty = module.types.u32();
        let func = module.create_function("main", Some([64, 1, 1]));
        let index = module.add_param(func, u32_ty, Some(BuiltinValue::LocalInvocationIndex));
        let body = module.function(func).body;

        let mut b = Builder::append_to(&mut module, body);
        let cap = b.const_u32(15);
        let clamped = b.call(u32_ty, BuiltinFn::Min, &[index, cap]);
        b.ret(None);

        let mut analysis = IntegerRangeAnalysis::new();
        assert_eq!(
            analysis.range_of(&module, clamped),
            RangeInfo::unsigned(0, 15)
        );
    }
}
