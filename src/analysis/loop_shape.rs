//! Structured loop recognition
//!
//! A loop is analyzable when its initializer declares a control variable
//! with a constant integer, its continuing block steps that variable by
//! exactly one, and its body opens with a load / compare-against-constant /
//! two-armed branch where one arm is nothing but the loop exit. From those
//! three shapes the control variable's inclusive range follows directly.

use crate::ir::{BinaryOp, ConstValue, InstId, Module, Op, ValueId};

use super::range::RangeInfo;

/// Comparison operator with the control variable normalized to the left
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    fn from_binary(op: BinaryOp) -> Option<CmpOp> {
        match op {
            BinaryOp::Lt => Some(CmpOp::Lt),
            BinaryOp::Le => Some(CmpOp::Le),
            BinaryOp::Gt => Some(CmpOp::Gt),
            BinaryOp::Ge => Some(CmpOp::Ge),
            _ => None,
        }
    }

    /// Mirror the operator for swapped operands (`K op idx` -> `idx op' K`)
    fn swapped(self) -> CmpOp {
        match self {
            CmpOp::Lt => CmpOp::Gt,
            CmpOp::Le => CmpOp::Ge,
            CmpOp::Gt => CmpOp::Lt,
            CmpOp::Ge => CmpOp::Le,
        }
    }

    /// Logical negation (`!(idx < K)` is `idx >= K`)
    fn inverted(self) -> CmpOp {
        match self {
            CmpOp::Lt => CmpOp::Ge,
            CmpOp::Le => CmpOp::Gt,
            CmpOp::Gt => CmpOp::Le,
            CmpOp::Ge => CmpOp::Lt,
        }
    }
}

/// The constant limit of a recognized comparison, in the LCV's domain
#[derive(Debug, Clone, Copy)]
enum Limit {
    Signed(i64),
    Unsigned(u64),
}

/// Returns the loop control variable declaration of a loop whose
/// initializer block holds exactly a constant-initialized integer variable
/// followed by the back-edge terminator.
pub fn loop_control_variable(module: &Module, loop_inst: InstId) -> Option<InstId> {
    let (initializer, _, _) = match module.inst(loop_inst).op {
        Op::Loop {
            initializer,
            body,
            continuing,
        } => (initializer, body, continuing),
        _ => return None,
    };

    let insts = &module.block(initializer).insts;
    if insts.len() != 2 {
        return None;
    }

    let var = insts[0];
    let var_data = module.inst(var);
    if !matches!(var_data.op, Op::Var { .. }) || var_data.operands.len() != 1 {
        return None;
    }
    match module.const_value(var_data.operands[0]) {
        Some(ConstValue::I32(_)) | Some(ConstValue::U32(_)) => {}
        _ => return None,
    }

    if !matches!(module.inst(insts[1]).op, Op::NextIteration) {
        return None;
    }

    Some(var)
}

/// Returns the binary that steps the control variable in the continuing
/// block: a load of the variable, an add-one or subtract-one of the loaded
/// value, a store back, and the back-edge terminator, in that order.
pub fn update_binary(module: &Module, loop_inst: InstId, lcv: InstId) -> Option<InstId> {
    continuing_update(module, loop_inst, lcv).map(|(inst, _)| inst)
}

fn continuing_update(
    module: &Module,
    loop_inst: InstId,
    lcv: InstId,
) -> Option<(InstId, bool)> {
    let (_, _, continuing) = match module.inst(loop_inst).op {
        Op::Loop {
            initializer,
            body,
            continuing,
        } => (initializer, body, continuing),
        _ => return None,
    };
    let lcv_ptr = module.inst(lcv).result?;

    let insts = &module.block(continuing).insts;
    if insts.len() != 4 {
        return None;
    }

    let load = module.inst(insts[0]);
    if !matches!(load.op, Op::Load) || load.operands[0] != lcv_ptr {
        return None;
    }
    let loaded = load.result?;

    let binary = module.inst(insts[1]);
    let increment = match binary.op {
        Op::Binary(BinaryOp::Add) => true,
        Op::Binary(BinaryOp::Sub) => false,
        _ => return None,
    };
    let one = unit_step_constant(module, lcv_ptr)?;
    let operands_match = if increment {
        // Addition commutes.
        (binary.operands[0] == loaded && module.const_value(binary.operands[1]) == Some(&one))
            || (binary.operands[1] == loaded
                && module.const_value(binary.operands[0]) == Some(&one))
    } else {
        binary.operands[0] == loaded && module.const_value(binary.operands[1]) == Some(&one)
    };
    if !operands_match {
        return None;
    }
    let stepped = binary.result?;

    let store = module.inst(insts[2]);
    if !matches!(store.op, Op::Store)
        || store.operands[0] != lcv_ptr
        || store.operands[1] != stepped
    {
        return None;
    }

    if !matches!(module.inst(insts[3]).op, Op::NextIteration) {
        return None;
    }

    Some((insts[1], increment))
}

/// The literal `1` in the control variable's signedness
fn unit_step_constant(module: &Module, lcv_ptr: ValueId) -> Option<ConstValue> {
    let store_ty = module.types.unwrap_ptr(module.value_ty(lcv_ptr));
    if module.types.is_signed_integer_scalar(store_ty) {
        Some(ConstValue::I32(1))
    } else if module.types.is_unsigned_integer_scalar(store_ty) {
        Some(ConstValue::U32(1))
    } else {
        None
    }
}

/// Returns the comparison that bounds the control variable at the head of
/// the loop body: a load of the variable, a compare of the loaded value
/// against a constant of the variable's type, and a two-armed branch on the
/// result where exactly one arm is the lone loop exit. No other instruction
/// in the body may touch the control variable's pointer.
pub fn comparison_binary(module: &Module, loop_inst: InstId, lcv: InstId) -> Option<InstId> {
    body_comparison(module, loop_inst, lcv).map(|cmp| cmp.inst)
}

struct BodyComparison {
    inst: InstId,
    /// Continuation predicate, normalized to `lcv op limit`
    op: CmpOp,
    limit: Limit,
}

fn body_comparison(module: &Module, loop_inst: InstId, lcv: InstId) -> Option<BodyComparison> {
    let (_, body, _) = match module.inst(loop_inst).op {
        Op::Loop {
            initializer,
            body,
            continuing,
        } => (initializer, body, continuing),
        _ => return None,
    };
    let lcv_ptr = module.inst(lcv).result?;
    let lcv_ty = module.types.unwrap_ptr(module.value_ty(lcv_ptr));
    let lcv_signed = module.types.is_signed_integer_scalar(lcv_ty);

    let insts = &module.block(body).insts;
    if insts.len() < 3 {
        return None;
    }

    let load = module.inst(insts[0]);
    if !matches!(load.op, Op::Load) || load.operands[0] != lcv_ptr {
        return None;
    }
    let loaded = load.result?;

    // Beyond the leading load, nothing in the body may touch the pointer;
    // a store inside nested control flow also lands here.
    let uses = module
        .instructions_in(body)
        .into_iter()
        .filter(|&inst| module.inst(inst).operands.contains(&lcv_ptr))
        .count();
    if uses != 1 {
        return None;
    }

    let cmp_inst = insts[1];
    let cmp = module.inst(cmp_inst);
    let raw_op = match cmp.op {
        Op::Binary(op) => CmpOp::from_binary(op)?,
        _ => return None,
    };
    let (op, limit_value) = if cmp.operands[0] == loaded {
        (raw_op, cmp.operands[1])
    } else if cmp.operands[1] == loaded {
        (raw_op.swapped(), cmp.operands[0])
    } else {
        return None;
    };
    let limit = match module.const_value(limit_value) {
        Some(&ConstValue::I32(k)) if lcv_signed => Limit::Signed(k as i64),
        Some(&ConstValue::U32(k)) if !lcv_signed => Limit::Unsigned(k as u64),
        _ => return None,
    };
    let cmp_result = cmp.result?;

    let branch = module.inst(insts[2]);
    let (true_block, false_block) = match branch.op {
        Op::If {
            true_block,
            false_block,
        } => (true_block, false_block),
        _ => return None,
    };
    if branch.operands[0] != cmp_result {
        return None;
    }

    let true_exits = block_is_lone_exit(module, true_block);
    let false_exits = block_is_lone_exit(module, false_block);
    let op = match (true_exits, false_exits) {
        // Exit on false: the comparison is the continuation predicate.
        (false, true) => {
            if contains_exit_loop(module, true_block) {
                return None;
            }
            op
        }
        // Exit on true: continuing means the comparison was false.
        (true, false) => {
            if contains_exit_loop(module, false_block) {
                return None;
            }
            op.inverted()
        }
        _ => return None,
    };

    if comparison_is_trivial(op, limit) {
        return None;
    }

    Some(BodyComparison {
        inst: cmp_inst,
        op,
        limit,
    })
}

fn block_is_lone_exit(module: &Module, block: crate::ir::BlockId) -> bool {
    let insts = &module.block(block).insts;
    insts.len() == 1 && matches!(module.inst(insts[0]).op, Op::ExitLoop)
}

fn contains_exit_loop(module: &Module, block: crate::ir::BlockId) -> bool {
    module
        .instructions_in(block)
        .into_iter()
        .any(|inst| matches!(module.inst(inst).op, Op::ExitLoop))
}

/// A comparison that is constant at a scalar boundary can never bound a
/// loop (`idx < 0u` never continues, `idx >= 0u` never exits).
fn comparison_is_trivial(op: CmpOp, limit: Limit) -> bool {
    match limit {
        Limit::Unsigned(k) => match op {
            CmpOp::Lt => k == 0,
            CmpOp::Le => k == u32::MAX as u64,
            CmpOp::Gt => k == u32::MAX as u64,
            CmpOp::Ge => k == 0,
        },
        Limit::Signed(k) => match op {
            CmpOp::Lt => k == i32::MIN as i64,
            CmpOp::Le => k == i32::MAX as i64,
            CmpOp::Gt => k == i32::MAX as i64,
            CmpOp::Ge => k == i32::MIN as i64,
        },
    }
}

/// Computes the control variable's range for a fully recognized loop, or
/// `Invalid` when any of the three shapes fails to match.
pub fn control_variable_range(module: &Module, loop_inst: InstId) -> RangeInfo {
    let Some(lcv) = loop_control_variable(module, loop_inst) else {
        return RangeInfo::Invalid;
    };
    let Some((_, increment)) = continuing_update(module, loop_inst, lcv) else {
        return RangeInfo::Invalid;
    };
    let Some(cmp) = body_comparison(module, loop_inst, lcv) else {
        return RangeInfo::Invalid;
    };

    let init = module.inst(lcv).operands[0];
    match (module.const_value(init), cmp.limit) {
        (Some(&ConstValue::I32(v0)), Limit::Signed(k)) => {
            signed_lcv_range(v0 as i64, k, increment, cmp.op)
        }
        (Some(&ConstValue::U32(v0)), Limit::Unsigned(k)) => {
            unsigned_lcv_range(v0 as u64, k, increment, cmp.op)
        }
        _ => RangeInfo::Invalid,
    }
}

// An exit direction inconsistent with the update direction is Invalid;
// an initial value that already fails the continuation predicate never
// runs the update, leaving the single point {v0}.
fn signed_lcv_range(v0: i64, k: i64, increment: bool, op: CmpOp) -> RangeInfo {
    match (op, increment) {
        (CmpOp::Lt, true) => {
            if v0 < k {
                RangeInfo::signed(v0, k - 1)
            } else {
                RangeInfo::signed(v0, v0)
            }
        }
        (CmpOp::Le, true) => {
            if v0 <= k {
                RangeInfo::signed(v0, k)
            } else {
                RangeInfo::signed(v0, v0)
            }
        }
        (CmpOp::Gt, false) => {
            if k < v0 {
                RangeInfo::signed(k + 1, v0)
            } else {
                RangeInfo::signed(v0, v0)
            }
        }
        (CmpOp::Ge, false) => {
            if k <= v0 {
                RangeInfo::signed(k, v0)
            } else {
                RangeInfo::signed(v0, v0)
            }
        }
        _ => RangeInfo::Invalid,
    }
}

fn unsigned_lcv_range(v0: u64, k: u64, increment: bool, op: CmpOp) -> RangeInfo {
    match (op, increment) {
        (CmpOp::Lt, true) => {
            if v0 < k {
                RangeInfo::unsigned(v0, k - 1)
            } else {
                RangeInfo::unsigned(v0, v0)
            }
        }
        (CmpOp::Le, true) => {
            if v0 <= k {
                RangeInfo::unsigned(v0, k)
            } else {
                RangeInfo::unsigned(v0, v0)
            }
        }
        (CmpOp::Gt, false) => {
            if k < v0 {
                RangeInfo::unsigned(k + 1, v0)
            } else {
                RangeInfo::unsigned(v0, v0)
            }
        }
        (CmpOp::Ge, false) => {
            if k <= v0 {
                RangeInfo::unsigned(k, v0)
            } else {
                RangeInfo::unsigned(v0, v0)
            }
        }
        _ => RangeInfo::Invalid,
    }
}
