//! Ingredient resolution pipeline.
//!
//! Pipeline: Normalization → Ingredient parsing → Translation to international names

mod parser;
mod tokenizer;
mod translator;

pub use parser::*;
pub use tokenizer::*;
pub use translator::*;
