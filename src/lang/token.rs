//! Token types for the patter language.
//!
//! Two layers: [`LexToken`]s are the primitive stream the block lexer emits,
//! [`SemanticToken`]s are the role-tagged output of the semantic analyzer.

use std::collections::BTreeMap;

/// The kind of a primitive lexical token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LexKind {
    Ident,
    Number,
    Assign,   // =
    Star,     // *
    Pipe,     // |
    Dot,      // .
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Colon,
    Comment,  // // to end of line
    Unknown,
}

/// A primitive token with its source span inside one block.
#[derive(Debug, Clone, PartialEq)]
pub struct LexToken {
    pub kind: LexKind,
    pub text: String,
    pub start: usize,
    pub len: usize,
    pub block: usize,
}

/// Role tag assigned by the semantic analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SemanticKind {
    /// Identifier on the left of `=`.
    VariableDecl,
    /// The `=` operator.
    AssignOp,
    /// A reference to an already-declared variable.
    VariableRef,
    /// A bare numeric value.
    NumberLiteral,
    /// The `hz` unit following a number.
    HzUnit,
    /// An identifier naming a sound sample, query parameters folded in.
    SoundLiteral,
    /// The `.` chaining operator.
    ChainOp,
    /// A built-in function name in a chain.
    FunctionName,
    /// `(` or `)` delimiting a function's arguments.
    FunctionBracket,
    /// A parameter key or value inside a function's arguments.
    FunctionParam,
    /// `:` or `,` inside a parameter list.
    ParamDelimiter,
    /// `(` or `)` grouping a sub-sequence.
    SequenceBracket,
    /// `[` or `]` enclosing a beat-division group.
    BeatBracket,
    /// The `|` choice operator.
    ChoiceOp,
    /// A parenthesized weight immediately after `|`.
    ChoiceWeight,
    /// The `*` repetition operator.
    RepeatOp,
    /// The numeric operand of `*`.
    RepeatCount,
    /// A `//` comment.
    Comment,
}

/// A parameter value in a sound query or function call.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Number(f64),
    Word(String),
}

impl ParamValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            ParamValue::Number(n) => Some(*n),
            ParamValue::Word(_) => None,
        }
    }
}

pub type ParamMap = BTreeMap<String, ParamValue>;

/// A role-tagged token produced by the semantic analyzer.
///
/// `id` carries cross-reference identity: for a [`SemanticKind::SoundLiteral`]
/// it is the composite identity (literal text plus sorted parameter suffix),
/// so identical literal+parameter combinations share one symbol. `instance`
/// is unique per occurrence.
#[derive(Debug, Clone, PartialEq)]
pub struct SemanticToken {
    pub id: String,
    pub instance: String,
    pub kind: SemanticKind,
    pub text: String,
    pub start: usize,
    pub len: usize,
    pub block: usize,
    pub params: Option<ParamMap>,
}

impl SemanticToken {
    pub fn new(kind: SemanticKind, text: &str, start: usize, len: usize, block: usize) -> Self {
        Self {
            id: text.to_string(),
            instance: format!("{block}:{start}"),
            kind,
            text: text.to_string(),
            start,
            len,
            block,
            params: None,
        }
    }

    pub fn with_id(mut self, id: String) -> Self {
        self.id = id;
        self
    }

    pub fn with_params(mut self, params: ParamMap) -> Self {
        self.params = Some(params);
        self
    }
}

/// A recoverable semantic error spanning the offending source range.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorToken {
    pub start: usize,
    pub len: usize,
    pub reasons: Vec<String>,
    pub block: usize,
}

impl ErrorToken {
    pub fn new(start: usize, len: usize, block: usize) -> Self {
        Self {
            start,
            len,
            reasons: Vec::new(),
            block,
        }
    }

    pub fn reason(mut self, why: impl Into<String>) -> Self {
        self.reasons.push(why.into());
        self
    }
}

/// Analyzer output for one block: tokens and errors may both be non-empty.
#[derive(Debug, Clone, Default)]
pub struct Analysis {
    pub tokens: Vec<SemanticToken>,
    pub errors: Vec<ErrorToken>,
}

impl Analysis {
    /// Semantic tokens belonging to the statement's right-hand side
    /// (everything except the declaration, `=`, and comments).
    pub fn expression_tokens(&self) -> Vec<SemanticToken> {
        self.tokens
            .iter()
            .filter(|t| {
                !matches!(
                    t.kind,
                    SemanticKind::VariableDecl | SemanticKind::AssignOp | SemanticKind::Comment
                )
            })
            .cloned()
            .collect()
    }
}

/// Builds the composite identity for a sound literal: the literal text plus
/// a sorted `key:value` suffix, so `hat(n:2)` and `hat(n: 2)` collide and
/// `hat` alone does not.
pub fn composite_identity(name: &str, params: &ParamMap) -> String {
    if params.is_empty() {
        return name.to_string();
    }
    let suffix: Vec<String> = params
        .iter()
        .map(|(k, v)| match v {
            ParamValue::Number(n) => format!("{k}:{n}"),
            ParamValue::Word(w) => format!("{k}:{w}"),
        })
        .collect();
    format!("{name}({})", suffix.join(","))
}
