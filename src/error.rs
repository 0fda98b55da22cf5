//! Error types for the Prism IR core

use thiserror::Error;

use crate::ir::validator::Diagnostic;

/// Main error type for Prism
#[derive(Error, Debug)]
pub enum Error {
    /// A module failed pre-pass validation. The diagnostics are forwarded
    /// unchanged from the validator; the IR has not been mutated.
    #[error("validation failed:\n{}", format_diagnostics(.0))]
    Validation(Vec<Diagnostic>),
}

impl Error {
    /// The validator diagnostics carried by this error.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            Error::Validation(diags) => diags,
        }
    }
}

fn format_diagnostics(diags: &[Diagnostic]) -> String {
    let mut out = String::new();
    for diag in diags {
        out.push_str(&format!("  {}\n", diag));
    }
    out
}

/// Result type alias for Prism
pub type Result<T> = std::result::Result<T, Error>;
