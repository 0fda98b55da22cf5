//! Prism: a memory-safe shader compiler IR core written in Rust
//!
//! Prism provides the intermediate representation at the center of a shader
//! compiler, together with the analyses and transforms that make untrusted
//! shaders safe to run on a GPU. Unlike the large C++ shader compilers it
//! takes after, Prism keeps the whole pipeline in safe Rust.
//!
//! # Features
//!
//! - **Structured IR**: SSA-like values over structured loops and
//!   conditionals, with an arena-backed module that keeps ids stable
//!   across rewrites
//! - **Integer range analysis**: lazy, memoized bounds for every integer
//!   value, from workgroup built-ins through recognized loop induction
//!   variables
//! - **Robustness**: a transform that clamps or predicates every
//!   potentially out-of-bounds access, using the range analysis to skip
//!   clamps it can prove away
//!
//! # Example
//!
//! ```no_run
//! use prism::ir::Module;
//! use prism::{robustness, RobustnessConfig};
//!
//! fn main() -> prism::Result<()> {
//!     let mut module = Module::new();
//!     // ... build or load the module ...
//!     robustness(&mut module, &RobustnessConfig::default())?;
//!     Ok(())
//! }
//! ```

pub mod analysis;
pub mod ir;
pub mod transform;

mod error;

pub use error::{Error, Result};
pub use transform::{robustness, RobustnessConfig};

/// Prism version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
