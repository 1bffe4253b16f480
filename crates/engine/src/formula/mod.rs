// Formula parsing, evaluation and reference rewriting

pub mod parser;
pub mod expr;
pub mod eval;
pub mod functions;
pub mod rewrite;
