//! The patter language — block text → lexical tokens → semantic tokens →
//! generative automaton.
//!
//! The analyzer is cheap enough to re-run on every edit and produces the
//! `{tokens, errors}` contract the host editor highlights from; only a
//! statement that actually (re)binds a variable pays for an automaton build.

pub mod analyzer;
pub mod builder;
pub mod functions;
pub mod lexer;
pub mod token;

pub use analyzer::{analyze, AnalyzerContext};
pub use token::{Analysis, ErrorToken, LexToken, SemanticKind, SemanticToken};

use crate::pattern::{AutomatonError, Node};

/// Analyze one block of source text end to end.
pub fn analyze_block(block: usize, text: &str, ctx: &dyn AnalyzerContext) -> Analysis {
    let tokens = lexer::tokenize(block, text);
    analyzer::analyze(block, text.len(), &tokens, ctx)
}

/// Build the automaton for an analysis' expression, if it has one.
pub fn build_automaton(analysis: &Analysis, seed: u64) -> Result<Node, AutomatonError> {
    builder::build(&analysis.expression_tokens(), seed)
}
