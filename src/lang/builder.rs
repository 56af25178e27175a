//! Automaton builder — second pass, semantic tokens → generative automaton.
//!
//! Consumes the analyzer's role-tagged tokens for one statement's right-hand
//! side and produces a [`Node`] tree. Operator precedence, tightest first:
//! `.` chains, `*` repetition, juxtaposition (sequence), `|` choice. So
//! `kick.gain(amount:0.5)*2 | snare` is a two-branch choice whose first
//! branch repeats the effected kick twice.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use super::token::{ParamValue, SemanticKind, SemanticToken};
use crate::pattern::{AutomatonError, Choice, Effect, Node, Sequence, Step, Terminal};

/// Build the automaton for one statement's expression tokens.
///
/// `seed` keys the deterministic randomness of every choice node in the
/// tree; rebuilding with the same seed reproduces the same draw stream.
pub fn build(tokens: &[SemanticToken], seed: u64) -> Result<Node, AutomatonError> {
    let mut b = Builder {
        tokens,
        pos: 0,
        seed,
        choices_built: 0,
    };
    let node = b.parse_choice()?;
    if let Some(tok) = b.peek() {
        return Err(AutomatonError::new(format!(
            "unexpected '{}' after the end of the expression",
            tok.text
        )));
    }
    Ok(node)
}

struct Builder<'a> {
    tokens: &'a [SemanticToken],
    pos: usize,
    seed: u64,
    choices_built: u64,
}

impl<'a> Builder<'a> {
    fn peek(&self) -> Option<&SemanticToken> {
        self.tokens.get(self.pos)
    }

    fn kind(&self) -> Option<SemanticKind> {
        self.peek().map(|t| t.kind)
    }

    fn bump(&mut self) -> &SemanticToken {
        let tok = &self.tokens[self.pos];
        self.pos += 1;
        tok
    }

    /// Each choice node gets its own rng stream, derived from the build
    /// seed, so sibling choices do not mirror each other.
    fn next_rng(&mut self) -> ChaCha8Rng {
        self.choices_built += 1;
        ChaCha8Rng::seed_from_u64(self.seed.wrapping_add(self.choices_built))
    }

    // `|` — loosest.
    fn parse_choice(&mut self) -> Result<Node, AutomatonError> {
        let first = self.parse_sequence()?;
        if self.kind() != Some(SemanticKind::ChoiceOp) {
            return Ok(first);
        }

        let mut branches = vec![first];
        let mut weights = vec![1.0];
        while self.kind() == Some(SemanticKind::ChoiceOp) {
            self.bump();
            let weight = if self.kind() == Some(SemanticKind::ChoiceWeight) {
                let tok = self.bump();
                tok.params
                    .as_ref()
                    .and_then(|p| p.get("weight"))
                    .and_then(ParamValue::as_number)
                    .unwrap_or(1.0)
            } else {
                1.0
            };
            branches.push(self.parse_sequence()?);
            weights.push(weight);
        }
        Choice::new(branches, weights, self.next_rng())
    }

    // Juxtaposition.
    fn parse_sequence(&mut self) -> Result<Node, AutomatonError> {
        let mut items = Vec::new();
        while self.starts_item() {
            items.push(self.parse_repeat()?);
        }
        match items.len() {
            0 => Err(AutomatonError::new("empty sequence")),
            1 => Ok(items.pop().expect("len checked")),
            _ => Sequence::new(items),
        }
    }

    fn starts_item(&self) -> bool {
        match self.kind() {
            Some(
                SemanticKind::SoundLiteral
                | SemanticKind::VariableRef
                | SemanticKind::RepeatCount,
            ) => true,
            Some(SemanticKind::SequenceBracket | SemanticKind::BeatBracket) => {
                self.peek().map(|t| t.text.as_str()) == Some("(")
                    || self.peek().map(|t| t.text.as_str()) == Some("[")
            }
            _ => false,
        }
    }

    // `*` — binds tighter than juxtaposition, in either operand order.
    fn parse_repeat(&mut self) -> Result<Node, AutomatonError> {
        // Prefix form: NUMBER * expr.
        if self.kind() == Some(SemanticKind::RepeatCount) {
            let count = self.repeat_count()?;
            if self.kind() != Some(SemanticKind::RepeatOp) {
                return Err(AutomatonError::new("expected '*' after repetition count"));
            }
            self.bump();
            let operand = self.parse_primary()?;
            return repeat(operand, count);
        }

        let operand = self.parse_primary()?;

        // Postfix form: expr * NUMBER.
        if self.kind() == Some(SemanticKind::RepeatOp) {
            self.bump();
            if self.kind() != Some(SemanticKind::RepeatCount) {
                return Err(AutomatonError::new("expected a number after '*'"));
            }
            let count = self.repeat_count()?;
            return repeat(operand, count);
        }

        Ok(operand)
    }

    fn repeat_count(&mut self) -> Result<usize, AutomatonError> {
        let tok = self.bump();
        let n: f64 = tok
            .text
            .parse()
            .map_err(|_| AutomatonError::new(format!("bad repetition count '{}'", tok.text)))?;
        if n < 1.0 || n.fract() != 0.0 {
            return Err(AutomatonError::new(
                "repetition count must be a whole number of at least 1",
            ));
        }
        Ok(n as usize)
    }

    fn parse_primary(&mut self) -> Result<Node, AutomatonError> {
        match self.kind() {
            Some(SemanticKind::SoundLiteral) => {
                let tok = self.bump().clone();
                let mut step = Step::new(tok.id.clone());
                step.label = tok.text.clone();
                let mut node = Terminal::new(step);
                self.apply_chains(&mut node)?;
                Ok(node)
            }
            Some(SemanticKind::VariableRef) => {
                let tok = self.bump().clone();
                let mut node = Terminal::new(Step::new(tok.text.clone()));
                self.apply_chains(&mut node)?;
                Ok(node)
            }
            Some(SemanticKind::SequenceBracket) => {
                self.bump(); // '('
                let inner = self.parse_choice()?;
                self.expect_close(SemanticKind::SequenceBracket, ")")?;
                let mut node = inner;
                self.apply_chains(&mut node)?;
                Ok(node)
            }
            Some(SemanticKind::BeatBracket) => {
                self.bump(); // '['
                let mut items = Vec::new();
                while self.starts_item() {
                    items.push(self.parse_repeat()?);
                }
                self.expect_close(SemanticKind::BeatBracket, "]")?;
                if items.is_empty() {
                    return Err(AutomatonError::new("empty beat-division group"));
                }
                let divisor = items.len() as f64;
                let mut node = if items.len() == 1 {
                    items.pop().expect("len checked")
                } else {
                    Sequence::new(items)?
                };
                // Members of a beat group share one beat.
                node.scale_weights(1.0 / divisor);
                self.apply_chains(&mut node)?;
                Ok(node)
            }
            _ => Err(AutomatonError::new(match self.peek() {
                Some(t) => format!("'{}' cannot start a step", t.text),
                None => "expected a step".to_string(),
            })),
        }
    }

    fn expect_close(
        &mut self,
        kind: SemanticKind,
        what: &str,
    ) -> Result<(), AutomatonError> {
        match self.peek() {
            Some(t) if t.kind == kind && t.text == what => {
                self.bump();
                Ok(())
            }
            _ => Err(AutomatonError::new(format!("expected '{what}'"))),
        }
    }

    /// Fold a run of chain tokens into effects on every terminal reachable
    /// from `node`. The analyzer has already validated names and values;
    /// bracket and delimiter tokens are highlight-only and skipped here.
    fn apply_chains(&mut self, node: &mut Node) -> Result<(), AutomatonError> {
        loop {
            match self.kind() {
                Some(SemanticKind::ChainOp) => {
                    self.bump();
                    let Some(SemanticKind::FunctionName) = self.kind() else {
                        return Err(AutomatonError::new("dangling '.' in a chain"));
                    };
                    let tok = self.bump().clone();
                    let params = tok
                        .params
                        .as_ref()
                        .map(|p| {
                            p.iter()
                                .filter_map(|(k, v)| v.as_number().map(|n| (k.clone(), n)))
                                .collect()
                        })
                        .unwrap_or_default();
                    append_effect(
                        node,
                        Effect {
                            name: tok.text.clone(),
                            params,
                        },
                    );
                }
                Some(
                    SemanticKind::FunctionBracket
                    | SemanticKind::FunctionParam
                    | SemanticKind::ParamDelimiter,
                ) => {
                    self.bump();
                }
                _ => return Ok(()),
            }
        }
    }
}

fn append_effect(node: &mut Node, effect: Effect) {
    match node {
        Node::Terminal(_) => {
            // Terminals expose their step only immutably; rebuild it.
            let mut step = node.current().clone();
            step.effects.push(effect);
            *node = Terminal::new(step);
        }
        Node::Sequence(_) | Node::Choice(_) => {
            for_each_terminal(node, &mut |step| step.effects.push(effect.clone()));
        }
    }
}

fn for_each_terminal(node: &mut Node, f: &mut dyn FnMut(&mut Step)) {
    match node {
        Node::Terminal(_) => {
            let mut step = node.current().clone();
            f(&mut step);
            *node = Terminal::new(step);
        }
        Node::Sequence(s) => {
            for child in s.children_mut() {
                for_each_terminal(child, f);
            }
        }
        Node::Choice(c) => {
            for child in c.children_mut() {
                for_each_terminal(child, f);
            }
        }
    }
}

/// Expand `operand * count` into a sequence of clones.
fn repeat(operand: Node, count: usize) -> Result<Node, AutomatonError> {
    if count == 1 {
        return Ok(operand);
    }
    let children: Vec<Node> = std::iter::repeat(operand).take(count).collect();
    Sequence::new(children)
}
