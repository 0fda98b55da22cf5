//! IR module validation
//!
//! Transforms call [`validate`] before touching a module; a failure means
//! the pass reports the diagnostics and leaves the IR untouched.

use std::fmt;

use bitflags::bitflags;
use rustc_hash::FxHashSet as HashSet;

use super::types::{ScalarKind, Type};
use super::{BlockId, InstId, Module, Op, ValueId};

bitflags! {
    /// Relaxations a pass may grant the validator for the IR shapes it
    /// knows how to handle.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Capabilities: u32 {
        /// Allow i8/u8 scalar values (subgroup matrix component types)
        const ALLOW_8BIT_INTEGERS = 1 << 0;
        /// Allow two module-scope variables to share a binding point
        const ALLOW_DUPLICATE_BINDINGS = 1 << 1;
        /// Allow constant access indices past the end of a fixed-size
        /// composite (granted by passes that exist to clamp them)
        const ALLOW_OUT_OF_BOUNDS_INDEX = 1 << 2;
    }
}

/// A single validation failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub message: String,
    pub inst: Option<InstId>,
}

impl Diagnostic {
    fn new(message: impl Into<String>, inst: Option<InstId>) -> Self {
        Self {
            message: message.into(),
            inst,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inst {
            Some(inst) => write!(f, "error: {} ({:?})", self.message, inst),
            None => write!(f, "error: {}", self.message),
        }
    }
}

/// Validate a module, returning every diagnostic found
pub fn validate(module: &Module, caps: Capabilities) -> Result<(), Vec<Diagnostic>> {
    let mut v = Validator {
        module,
        caps,
        diagnostics: Vec::new(),
    };
    v.run();
    if v.diagnostics.is_empty() {
        Ok(())
    } else {
        Err(v.diagnostics)
    }
}

struct Validator<'m> {
    module: &'m Module,
    caps: Capabilities,
    diagnostics: Vec<Diagnostic>,
}

impl<'m> Validator<'m> {
    fn run(&mut self) {
        self.check_root_block();
        self.check_bindings();
        for func in self.module.function_ids() {
            let body = self.module.function(func).body;
            self.check_block(body, true);
        }
        for inst in self.module.instructions() {
            self.check_inst(inst);
        }
    }

    fn error(&mut self, message: impl Into<String>, inst: Option<InstId>) {
        self.diagnostics.push(Diagnostic::new(message, inst));
    }

    fn check_root_block(&mut self) {
        for &inst in &self.module.block(self.module.root_block()).insts {
            if !matches!(self.module.inst(inst).op, Op::Var { .. }) {
                self.error(
                    "root block may only contain variable declarations",
                    Some(inst),
                );
            }
        }
    }

    fn check_bindings(&mut self) {
        if self.caps.contains(Capabilities::ALLOW_DUPLICATE_BINDINGS) {
            return;
        }
        let mut seen = HashSet::default();
        for &inst in &self.module.block(self.module.root_block()).insts {
            if let Op::Var {
                binding: Some(binding),
            } = self.module.inst(inst).op
            {
                if !seen.insert(binding) {
                    self.error(
                        format!(
                            "duplicate binding point (group {}, binding {})",
                            binding.group, binding.binding
                        ),
                        Some(inst),
                    );
                }
            }
        }
    }

    /// Check terminator placement for a block and, recursively, the blocks
    /// of any structured construct it contains.
    fn check_block(&mut self, block: BlockId, must_terminate: bool) {
        let insts = &self.module.block(block).insts;
        for (i, &inst) in insts.iter().enumerate() {
            let data = self.module.inst(inst);
            if data.op.is_terminator() && i + 1 != insts.len() {
                self.error("terminator before the end of its block", Some(inst));
            }
            match data.op {
                Op::Loop {
                    initializer,
                    body,
                    continuing,
                } => {
                    self.check_block(initializer, true);
                    self.check_block(body, true);
                    self.check_block(continuing, true);
                }
                Op::If {
                    true_block,
                    false_block,
                } => {
                    self.check_block(true_block, true);
                    self.check_block(false_block, true);
                }
                _ => {}
            }
        }
        if must_terminate {
            let terminated = insts
                .last()
                .is_some_and(|&inst| self.module.inst(inst).op.is_terminator());
            if !terminated {
                self.error("block does not end with a terminator", None);
            }
        }
    }

    fn check_inst(&mut self, inst: InstId) {
        let data = self.module.inst(inst);
        for &operand in &data.operands {
            self.check_value(operand, inst);
        }
        match &data.op {
            Op::Load => {
                let ptr_ty = self.module.value_ty(data.operands[0]);
                if self.module.types.pointer_space(ptr_ty).is_none() {
                    self.error("load operand is not a pointer", Some(inst));
                }
            }
            Op::Store => {
                let ptr_ty = self.module.value_ty(data.operands[0]);
                if self.module.types.pointer_space(ptr_ty).is_none() {
                    self.error("store destination is not a pointer", Some(inst));
                } else {
                    let store_ty = self.module.types.unwrap_ptr(ptr_ty);
                    if self.module.value_ty(data.operands[1]) != store_ty {
                        self.error("store value does not match pointer store type", Some(inst));
                    }
                }
            }
            Op::Access => self.check_access(inst),
            Op::Binary(op) if op.is_comparison() => {
                let result_is_bool = data.result.is_some_and(|r| {
                    self.module.types.scalar_kind(self.module.value_ty(r)) == Some(ScalarKind::Bool)
                });
                if !result_is_bool {
                    self.error("comparison result is not bool", Some(inst));
                }
            }
            _ => {}
        }
    }

    fn check_value(&mut self, value: ValueId, inst: InstId) {
        let ty = self.module.value_ty(value);
        if let Type::Scalar(kind @ (ScalarKind::I8 | ScalarKind::U8)) = self.module.types.get(ty) {
            if !self.caps.contains(Capabilities::ALLOW_8BIT_INTEGERS) {
                self.error(format!("8-bit scalar value ({:?}) not allowed", kind), Some(inst));
            }
        }
    }

    fn check_access(&mut self, inst: InstId) {
        let data = self.module.inst(inst);
        let base = data.operands[0];
        let indices: Vec<ValueId> = data.operands[1..].to_vec();
        let mut ty = self.module.types.unwrap_ptr(self.module.value_ty(base));

        for idx in indices {
            let idx_ty = self.module.value_ty(idx);
            if !self.module.types.is_integer_scalar(idx_ty) {
                self.error("access index is not an integer scalar", Some(inst));
                return;
            }
            let const_idx = self.module.as_const_index(idx);
            let limit = match self.module.types.get(ty) {
                Type::Vector { width, .. } => Some(*width),
                Type::Matrix { columns, .. } => Some(*columns),
                Type::Array { count, .. } => match count {
                    super::ArrayCount::Fixed(n) => Some(*n),
                    super::ArrayCount::Runtime => None,
                },
                Type::Struct { members } => {
                    if const_idx.is_none() {
                        self.error("struct member index must be a constant", Some(inst));
                        return;
                    }
                    Some(members.len() as u32)
                }
                _ => {
                    self.error("access into a non-composite type", Some(inst));
                    return;
                }
            };
            let is_struct = matches!(self.module.types.get(ty), Type::Struct { .. });
            let bounds_enforced =
                is_struct || !self.caps.contains(Capabilities::ALLOW_OUT_OF_BOUNDS_INDEX);
            if let (Some(idx), Some(limit)) = (const_idx, limit) {
                if bounds_enforced && idx >= limit {
                    self.error(
                        format!("constant index {} out of bounds (limit {})", idx, limit),
                        Some(inst),
                    );
                    return;
                }
            }
            ty = match self.element_of(ty, const_idx) {
                Some(next) => next,
                None => return,
            };
        }
    }

    // Read-only variant of `TypeStore::element`; matrix columns end the
    // walk here since constructing the column type would need interning.
    fn element_of(&self, ty: super::TypeId, index: Option<u32>) -> Option<super::TypeId> {
        match self.module.types.get(ty) {
            Type::Vector { elem, .. } => Some(*elem),
            Type::Array { elem, .. } => Some(*elem),
            Type::Struct { members } => members.get(index? as usize).copied(),
            Type::Matrix { .. } => None,
            _ => None,
        }
    }
}
