//! Filter rule compilation and evaluation

pub mod ast;
mod compiler;
mod engine;
mod reloader;

pub use ast::{Condition, Operand, Operator};
pub use compiler::{CompiledRule, Program, RuleCompiler};
pub use engine::{Decision, KnowledgeBase, RuleEngine};
pub use reloader::RuleReloader;
