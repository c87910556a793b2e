// Template Module
// Placeholder lexing and evaluation for command templates and scope expressions

pub mod evaluator;
pub mod lexer;

// Re-export key types
pub use evaluator::{EvaluationError, EvaluationResult, Evaluator};
pub use lexer::{extract_placeholders, first_static, DynamicRef, Segment};
