//! Semantic analyzer — first pass over a block's lexical tokens.
//!
//! A single forward scan with bounded bidirectional lookahead classifies the
//! block's one statement (assignment, bare sequence/choice, or comment) and
//! emits role-tagged [`SemanticToken`]s plus recoverable [`ErrorToken`]s.
//! This pass deliberately builds no tree: it re-runs on every edit, and the
//! [`builder`](super::builder) turns its output into an automaton afterwards.

use super::functions::{self, FnSig};
use super::token::{
    composite_identity, Analysis, ErrorToken, LexKind, LexToken, ParamMap, ParamValue,
    SemanticKind, SemanticToken,
};

/// Identifier classification the analyzer cannot do alone: whether a name is
/// a declared variable. Implemented by the symbol table.
pub trait AnalyzerContext {
    fn is_variable(&self, name: &str) -> bool;
}

/// A context with no declared variables, useful in tests.
pub struct EmptyContext;

impl AnalyzerContext for EmptyContext {
    fn is_variable(&self, _name: &str) -> bool {
        false
    }
}

pub struct Analyzer<'a> {
    tokens: Vec<&'a LexToken>,
    pos: usize,
    block: usize,
    block_len: usize,
    ctx: &'a dyn AnalyzerContext,
    out: Vec<SemanticToken>,
    errors: Vec<ErrorToken>,
}

/// Analyze one block. `block_len` is the block's source length in bytes,
/// used to span whole-statement errors.
pub fn analyze(
    block: usize,
    block_len: usize,
    tokens: &[LexToken],
    ctx: &dyn AnalyzerContext,
) -> Analysis {
    Analyzer::new(block, block_len, tokens, ctx).run()
}

impl<'a> Analyzer<'a> {
    fn new(
        block: usize,
        block_len: usize,
        tokens: &'a [LexToken],
        ctx: &'a dyn AnalyzerContext,
    ) -> Self {
        let mut out = Vec::new();
        // Comments are emitted up front and excluded from the grammar stream.
        let grammar: Vec<&LexToken> = tokens
            .iter()
            .filter(|t| {
                if t.kind == LexKind::Comment {
                    out.push(SemanticToken::new(
                        SemanticKind::Comment,
                        &t.text,
                        t.start,
                        t.len,
                        block,
                    ));
                    false
                } else {
                    true
                }
            })
            .collect();

        Self {
            tokens: grammar,
            pos: 0,
            block,
            block_len,
            ctx,
            out,
            errors: Vec::new(),
        }
    }

    fn run(mut self) -> Analysis {
        if self.tokens.is_empty() {
            return self.finish();
        }

        let is_assignment =
            self.kind_at(0) == Some(LexKind::Ident) && self.kind_at(1) == Some(LexKind::Assign);

        if is_assignment {
            self.statement_assignment();
        } else if matches!(
            self.kind_at(0),
            Some(LexKind::Ident | LexKind::LParen | LexKind::LBracket)
        ) {
            self.scan_expression();
        } else {
            let start = self.tokens[0].start;
            self.errors.push(
                ErrorToken::new(start, self.block_len.saturating_sub(start), self.block)
                    .reason("statement must be an assignment, a sequence, or a comment"),
            );
        }

        self.finish()
    }

    fn finish(mut self) -> Analysis {
        self.out.sort_by_key(|t| t.start);
        Analysis {
            tokens: self.out,
            errors: self.errors,
        }
    }

    /// Bounded bidirectional lookahead; out-of-range returns `None`.
    fn peek(&self, k: isize) -> Option<&'a LexToken> {
        let idx = self.pos as isize + k;
        if idx < 0 {
            return None;
        }
        self.tokens.get(idx as usize).copied()
    }

    fn kind_at(&self, k: isize) -> Option<LexKind> {
        self.peek(k).map(|t| t.kind)
    }

    fn emit(&mut self, kind: SemanticKind, tok: &LexToken) -> usize {
        self.out.push(SemanticToken::new(
            kind, &tok.text, tok.start, tok.len, self.block,
        ));
        self.out.len() - 1
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn statement_assignment(&mut self) {
        let decl = self.tokens[self.pos];
        self.emit(SemanticKind::VariableDecl, decl);
        let eq = self.tokens[self.pos + 1];
        self.emit(SemanticKind::AssignOp, eq);
        self.pos += 2;

        if self.peek(0).is_none() {
            self.errors.push(
                ErrorToken::new(
                    eq.start,
                    self.block_len.saturating_sub(eq.start),
                    self.block,
                )
                .reason("assignment is missing a right-hand side"),
            );
            return;
        }

        // Numeric right-hand sides: NUMBER or a HZ value+unit pair.
        if self.kind_at(0) == Some(LexKind::Number) {
            let unit_follows = self
                .peek(1)
                .is_some_and(|t| t.kind == LexKind::Ident && t.text.eq_ignore_ascii_case("hz"));
            if unit_follows {
                let num = self.tokens[self.pos];
                self.emit(SemanticKind::NumberLiteral, num);
                let unit = self.tokens[self.pos + 1];
                self.emit(SemanticKind::HzUnit, unit);
                self.pos += 2;
                self.reject_trailing("unexpected tokens after hz value");
                return;
            }
            if self.peek(1).is_none() {
                let num = self.tokens[self.pos];
                self.emit(SemanticKind::NumberLiteral, num);
                self.pos += 1;
                return;
            }
        }

        self.scan_expression();
    }

    fn reject_trailing(&mut self, why: &str) {
        if let Some(tok) = self.peek(0) {
            let start = tok.start;
            let end = self.tokens.last().map(|t| t.start + t.len).unwrap_or(start);
            self.errors
                .push(ErrorToken::new(start, end - start, self.block).reason(why));
            self.pos = self.tokens.len();
        }
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn scan_expression(&mut self) {
        // Stack of open-bracket offsets, to flag unclosed ones at the end.
        let mut parens: Vec<usize> = Vec::new();
        let mut beats: Vec<usize> = Vec::new();

        while let Some(tok) = self.peek(0) {
            match tok.kind {
                LexKind::Ident => self.scan_ident(tok),
                LexKind::Dot => self.scan_chain(tok),
                LexKind::LParen => {
                    parens.push(tok.start);
                    self.emit(SemanticKind::SequenceBracket, tok);
                    self.pos += 1;
                }
                LexKind::RParen => {
                    if parens.pop().is_some() {
                        self.emit(SemanticKind::SequenceBracket, tok);
                    } else {
                        self.errors.push(
                            ErrorToken::new(tok.start, tok.len, self.block)
                                .reason("unmatched ')'"),
                        );
                    }
                    self.pos += 1;
                }
                LexKind::LBracket => {
                    beats.push(tok.start);
                    self.emit(SemanticKind::BeatBracket, tok);
                    self.pos += 1;
                }
                LexKind::RBracket => {
                    if beats.pop().is_some() {
                        self.emit(SemanticKind::BeatBracket, tok);
                    } else {
                        self.errors.push(
                            ErrorToken::new(tok.start, tok.len, self.block)
                                .reason("unmatched ']'"),
                        );
                    }
                    self.pos += 1;
                }
                LexKind::Star => self.scan_postfix_repeat(tok),
                LexKind::Number => self.scan_prefix_repeat(tok),
                LexKind::Pipe => self.scan_choice(tok),
                LexKind::Assign => {
                    self.errors.push(
                        ErrorToken::new(tok.start, tok.len, self.block)
                            .reason("unexpected '=' inside an expression"),
                    );
                    self.pos += 1;
                }
                LexKind::Colon | LexKind::Comma => {
                    self.errors.push(
                        ErrorToken::new(tok.start, tok.len, self.block)
                            .reason(format!("unexpected '{}'", tok.text)),
                    );
                    self.pos += 1;
                }
                LexKind::Comment => self.pos += 1,
                LexKind::Unknown => {
                    self.errors.push(
                        ErrorToken::new(tok.start, tok.len, self.block)
                            .reason(format!("unrecognized character '{}'", tok.text)),
                    );
                    self.pos += 1;
                }
            }
        }

        for start in parens.into_iter().chain(beats) {
            self.errors.push(
                ErrorToken::new(start, self.block_len.saturating_sub(start), self.block)
                    .reason("unclosed bracket"),
            );
        }
    }

    /// Identifier in step position: declared variable, misplaced function
    /// name, or sound literal (with optional query parameters).
    fn scan_ident(&mut self, tok: &LexToken) {
        if self.ctx.is_variable(&tok.text) {
            self.emit(SemanticKind::VariableRef, tok);
            self.pos += 1;
            return;
        }
        if functions::is_function(&tok.text) {
            self.errors.push(
                ErrorToken::new(tok.start, tok.len, self.block).reason(format!(
                    "'{}' is a function and can only follow '.' in a chain",
                    tok.text
                )),
            );
            self.pos += 1;
            return;
        }

        // Sound literal. Query parameters fold into the composite identity:
        // `hat(note: c4)` and `hat` are distinct symbols.
        let has_query = self.kind_at(1) == Some(LexKind::LParen)
            && self.kind_at(2) == Some(LexKind::Ident)
            && self.kind_at(3) == Some(LexKind::Colon);

        if !has_query {
            let idx = self.emit(SemanticKind::SoundLiteral, tok);
            self.out[idx].params = Some(ParamMap::new());
            self.pos += 1;
            return;
        }

        self.pos += 1; // past the name, onto '('
        let (params, end) = self.parse_param_scope(None, false);
        let token = SemanticToken::new(
            SemanticKind::SoundLiteral,
            &tok.text,
            tok.start,
            end.saturating_sub(tok.start),
            self.block,
        )
        .with_id(composite_identity(&tok.text, &params))
        .with_params(params);
        self.out.push(token);
    }

    /// `.` chains a function onto the preceding literal or group.
    fn scan_chain(&mut self, dot: &LexToken) {
        let prev_ok = matches!(
            self.kind_at(-1),
            Some(LexKind::Ident | LexKind::RParen | LexKind::RBracket)
        );
        let next_fn = self
            .peek(1)
            .filter(|t| t.kind == LexKind::Ident)
            .and_then(|t| functions::signature(&t.text));

        let (Some(sig), true) = (next_fn, prev_ok) else {
            self.errors.push(
                ErrorToken::new(dot.start, dot.len, self.block)
                    .reason("'.' must chain a known function onto a step or group"),
            );
            self.pos += 1;
            return;
        };

        self.emit(SemanticKind::ChainOp, dot);
        let name_tok = self.tokens[self.pos + 1];
        let name_idx = self.emit(SemanticKind::FunctionName, name_tok);
        self.pos += 2;

        if self.kind_at(0) == Some(LexKind::LParen) {
            let (params, _) = self.parse_param_scope(Some(sig), true);
            self.out[name_idx].params = Some(params);
        } else {
            self.out[name_idx].params = Some(ParamMap::new());
        }
    }

    /// `expr * NUMBER` — the operand has already been scanned.
    fn scan_postfix_repeat(&mut self, star: &LexToken) {
        let prev_ok = matches!(
            self.kind_at(-1),
            Some(LexKind::Ident | LexKind::RParen | LexKind::RBracket)
        );
        let next = self.peek(1);
        if prev_ok && next.is_some_and(|t| t.kind == LexKind::Number) {
            self.emit(SemanticKind::RepeatOp, star);
            let count = self.tokens[self.pos + 1];
            self.emit(SemanticKind::RepeatCount, count);
            self.pos += 2;
        } else {
            self.errors.push(
                ErrorToken::new(star.start, star.len, self.block)
                    .reason("'*' must sit between a sequence and a number"),
            );
            self.pos += 1;
        }
    }

    /// `NUMBER * expr` — count first, operand follows.
    fn scan_prefix_repeat(&mut self, num: &LexToken) {
        if self.kind_at(1) == Some(LexKind::Star) {
            self.emit(SemanticKind::RepeatCount, num);
            let star = self.tokens[self.pos + 1];
            self.emit(SemanticKind::RepeatOp, star);
            self.pos += 2;
        } else {
            self.errors.push(
                ErrorToken::new(num.start, num.len, self.block)
                    .reason("a bare number is not a step"),
            );
            self.pos += 1;
        }
    }

    /// `|` with an optional parenthesized weight for the branch it opens.
    fn scan_choice(&mut self, pipe: &LexToken) {
        self.emit(SemanticKind::ChoiceOp, pipe);
        self.pos += 1;

        let weighted = self.kind_at(0) == Some(LexKind::LParen)
            && self.kind_at(1) == Some(LexKind::Number)
            && self.kind_at(2) == Some(LexKind::RParen);
        if !weighted {
            return;
        }

        let open = self.tokens[self.pos];
        let num = self.tokens[self.pos + 1];
        let close = self.tokens[self.pos + 2];
        let span_len = close.start + close.len - open.start;
        let weight: f64 = num.text.parse().unwrap_or(0.0);

        if weight > 0.0 {
            let mut params = ParamMap::new();
            params.insert("weight".to_string(), ParamValue::Number(weight));
            let token = SemanticToken::new(
                SemanticKind::ChoiceWeight,
                &num.text,
                open.start,
                span_len,
                self.block,
            )
            .with_params(params);
            self.out.push(token);
        } else {
            self.errors.push(
                ErrorToken::new(open.start, span_len, self.block)
                    .reason("choice weight must be a positive number"),
            );
        }
        self.pos += 3;
    }

    // ------------------------------------------------------------------
    // Parameter scopes
    // ------------------------------------------------------------------

    /// Parse `( key: value, ... )` with `pos` at the opening paren.
    ///
    /// With a signature, keys and value types are validated against it and
    /// bracket/param/delimiter tokens are emitted (`emit = true`); without
    /// one this is a sound query scope, any key is accepted, values may be
    /// words, and no tokens are emitted (the literal's span absorbs them).
    ///
    /// A malformed parameter produces an [`ErrorToken`] from the offending
    /// token through the end of its scope (next comma or closing bracket)
    /// and scanning resumes past it.
    ///
    /// Returns the collected parameters and the scope's end offset.
    fn parse_param_scope(
        &mut self,
        sig: Option<&'static FnSig>,
        emit: bool,
    ) -> (ParamMap, usize) {
        let open = self.tokens[self.pos];
        if emit {
            self.emit(SemanticKind::FunctionBracket, open);
        }
        self.pos += 1;

        let mut params = ParamMap::new();

        loop {
            let Some(tok) = self.peek(0) else {
                self.errors.push(
                    ErrorToken::new(
                        open.start,
                        self.block_len.saturating_sub(open.start),
                        self.block,
                    )
                    .reason("unclosed parameter list"),
                );
                return (params, self.block_len);
            };

            if tok.kind == LexKind::RParen {
                if emit {
                    self.emit(SemanticKind::FunctionBracket, tok);
                }
                self.pos += 1;
                return (params, tok.start + tok.len);
            }

            // Key
            if tok.kind != LexKind::Ident {
                self.recover_param("expected a parameter name");
                continue;
            }
            if let Some(sig) = sig {
                if !sig.accepts(&tok.text) {
                    self.recover_param(format!(
                        "unknown parameter '{}' for '{}'",
                        tok.text, sig.name
                    ));
                    continue;
                }
            }
            let key = tok.text.clone();
            if emit {
                self.emit(SemanticKind::FunctionParam, tok);
            }
            self.pos += 1;

            // Delimiter
            let Some(colon) = self.peek(0).filter(|t| t.kind == LexKind::Colon) else {
                self.recover_param(format!(
                    "missing ':' between parameter '{key}' and its value"
                ));
                continue;
            };
            if emit {
                self.emit(SemanticKind::ParamDelimiter, colon);
            }
            self.pos += 1;

            // Value
            let value = match self.peek(0) {
                Some(v) if v.kind == LexKind::Number => {
                    if emit {
                        self.emit(SemanticKind::FunctionParam, v);
                    }
                    self.pos += 1;
                    ParamValue::Number(v.text.parse().unwrap_or(0.0))
                }
                Some(v) if v.kind == LexKind::Ident && sig.is_none() => {
                    self.pos += 1;
                    ParamValue::Word(v.text.clone())
                }
                _ => {
                    self.recover_param(format!("expected a number for parameter '{key}'"));
                    continue;
                }
            };
            params.insert(key, value);

            // Separator or close
            match self.peek(0) {
                Some(t) if t.kind == LexKind::Comma => {
                    if emit {
                        self.emit(SemanticKind::ParamDelimiter, t);
                    }
                    self.pos += 1;
                }
                Some(t) if t.kind == LexKind::RParen => {} // closed next iteration
                _ => self.recover_param("expected ',' or ')' after a parameter"),
            }
        }
    }

    /// Skip to the end of the current parameter scope (just past the next
    /// comma, or up to the closing paren), flagging the skipped range.
    fn recover_param(&mut self, why: impl Into<String>) {
        let start = match self.peek(0) {
            Some(t) => t.start,
            None => self.block_len,
        };
        let mut end = start;
        while let Some(tok) = self.peek(0) {
            match tok.kind {
                LexKind::RParen => break,
                LexKind::Comma => {
                    end = tok.start + tok.len;
                    self.pos += 1;
                    break;
                }
                _ => {
                    end = tok.start + tok.len;
                    self.pos += 1;
                }
            }
        }
        self.errors
            .push(ErrorToken::new(start, end - start, self.block).reason(why));
    }
}
