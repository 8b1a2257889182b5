// Error taxonomy for the analysis pipeline (spec.md §7).
//
// Grounded in luars's LuaError/LuaFullError pair (reference/lua_error.rs.ref):
// a compact enum with a hand-written Display, plus a context wrapper that
// carries the function/value the error concerns. No thiserror — the teacher
// crate never pulls it in, and neither does this one.

use crate::ir::ValueId;

/// The only errors this crate raises are the "unsupported-IR" class from
/// spec.md §7: structurally impossible input. Everything else (unknown
/// bounds, ineligible conversions, dominance violations) degrades to
/// `Top`/invalid values or a warning string instead of an `Err`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisError {
    /// A use resolved to an operand handle with no corresponding definition.
    NonInstructionUse { value: ValueId },
    /// The dataflow driver or a pass visited an opcode it has no rule for.
    UnsupportedOpcode { value: ValueId },
    /// A phi in a loop header had no operand whose definition dominates it.
    PhiMissingDominatingOperand { phi: ValueId },
    /// An operand required to be a floating-point constant was not one.
    ExpectedFloatConstant { value: ValueId },
}

impl std::fmt::Display for AnalysisError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnalysisError::NonInstructionUse { value } => {
                write!(f, "use of {:?} does not resolve to a defining instruction", value)
            }
            AnalysisError::UnsupportedOpcode { value } => {
                write!(f, "unsupported opcode at {:?}", value)
            }
            AnalysisError::PhiMissingDominatingOperand { phi } => {
                write!(f, "phi {:?} in loop header has no dominating operand", phi)
            }
            AnalysisError::ExpectedFloatConstant { value } => {
                write!(f, "expected a floating-point constant at {:?}", value)
            }
        }
    }
}

impl std::error::Error for AnalysisError {}

/// Richer-context wrapper: which function the error occurred in, alongside
/// the bare [`AnalysisError`] kind. Mirrors `LuaFullError` carrying a full
/// message next to a `LuaError` kind.
#[derive(Debug, Clone)]
pub struct AnalysisErrorWithContext {
    pub function: String,
    pub error: AnalysisError,
}

impl std::fmt::Display for AnalysisErrorWithContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "in function `{}`: {}", self.function, self.error)
    }
}

impl std::error::Error for AnalysisErrorWithContext {}

impl AnalysisErrorWithContext {
    pub fn new(function: impl Into<String>, error: AnalysisError) -> Self {
        Self { function: function.into(), error }
    }
}
