//! IR transforms
//!
//! Transforms mutate a module in place. Each one validates the module
//! before touching it and either runs to completion or reports the
//! validator's diagnostics without mutating anything.

mod robustness;

pub use robustness::{robustness, RobustnessConfig};
