//! Block lexer — converts one block's source text into [`LexToken`]s.
//!
//! The language is line-free inside a block: whitespace only separates
//! tokens. The lexer never fails; characters it does not recognize become
//! [`LexKind::Unknown`] tokens for the analyzer to report.

use super::token::{LexKind, LexToken};

pub struct Lexer<'a> {
    chars: Vec<(usize, char)>,
    text: &'a str,
    pos: usize,
    block: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(block: usize, text: &'a str) -> Self {
        Self {
            chars: text.char_indices().collect(),
            text,
            pos: 0,
            block,
        }
    }

    pub fn tokenize(mut self) -> Vec<LexToken> {
        let mut tokens = Vec::new();

        while !self.is_at_end() {
            self.skip_whitespace();
            if self.is_at_end() {
                break;
            }

            let (offset, ch) = self.chars[self.pos];
            let token = match ch {
                '=' => self.single(LexKind::Assign),
                '*' => self.single(LexKind::Star),
                '|' => self.single(LexKind::Pipe),
                '.' => self.single(LexKind::Dot),
                '(' => self.single(LexKind::LParen),
                ')' => self.single(LexKind::RParen),
                '[' => self.single(LexKind::LBracket),
                ']' => self.single(LexKind::RBracket),
                ',' => self.single(LexKind::Comma),
                ':' => self.single(LexKind::Colon),
                '/' if self.peek_next() == Some('/') => self.lex_comment(),
                '0'..='9' => self.lex_number(),
                c if c.is_alphabetic() || c == '_' => self.lex_ident(),
                _ => {
                    self.pos += 1;
                    self.make(LexKind::Unknown, offset, ch.len_utf8())
                }
            };
            tokens.push(token);
        }

        tokens
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek_next(&self) -> Option<char> {
        self.chars.get(self.pos + 1).map(|&(_, c)| c)
    }

    fn skip_whitespace(&mut self) {
        while !self.is_at_end() && self.chars[self.pos].1.is_whitespace() {
            self.pos += 1;
        }
    }

    fn single(&mut self, kind: LexKind) -> LexToken {
        let (offset, ch) = self.chars[self.pos];
        self.pos += 1;
        self.make(kind, offset, ch.len_utf8())
    }

    fn lex_comment(&mut self) -> LexToken {
        let start = self.chars[self.pos].0;
        while !self.is_at_end() && self.chars[self.pos].1 != '\n' {
            self.pos += 1;
        }
        let end = self.end_offset();
        self.make(LexKind::Comment, start, end - start)
    }

    fn lex_number(&mut self) -> LexToken {
        let start = self.chars[self.pos].0;
        while !self.is_at_end() && self.chars[self.pos].1.is_ascii_digit() {
            self.pos += 1;
        }
        // One decimal point, only when followed by a digit.
        if !self.is_at_end()
            && self.chars[self.pos].1 == '.'
            && self.peek_next().is_some_and(|c| c.is_ascii_digit())
        {
            self.pos += 1;
            while !self.is_at_end() && self.chars[self.pos].1.is_ascii_digit() {
                self.pos += 1;
            }
        }
        let end = self.end_offset();
        self.make(LexKind::Number, start, end - start)
    }

    fn lex_ident(&mut self) -> LexToken {
        let start = self.chars[self.pos].0;
        while !self.is_at_end() {
            let c = self.chars[self.pos].1;
            if c.is_alphanumeric() || c == '_' {
                self.pos += 1;
            } else {
                break;
            }
        }
        let end = self.end_offset();
        self.make(LexKind::Ident, start, end - start)
    }

    fn end_offset(&self) -> usize {
        match self.chars.get(self.pos) {
            Some(&(offset, _)) => offset,
            None => self.text.len(),
        }
    }

    fn make(&self, kind: LexKind, start: usize, len: usize) -> LexToken {
        LexToken {
            kind,
            text: self.text[start..start + len].to_string(),
            start,
            len,
            block: self.block,
        }
    }
}

/// Tokenize one block of source text.
pub fn tokenize(block: usize, text: &str) -> Vec<LexToken> {
    Lexer::new(block, text).tokenize()
}

/// Collect the identifier words appearing anywhere in `text`.
///
/// Used to recover references from error spans, so a half-broken statement
/// still keeps its identifiers alive in the symbol table.
pub fn idents_in(text: &str) -> Vec<String> {
    tokenize(0, text)
        .into_iter()
        .filter(|t| t.kind == LexKind::Ident)
        .map(|t| t.text)
        .collect()
}
