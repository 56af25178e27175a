//! The generative pattern automaton.
//!
//! A compiled statement is a tree of [`Node`]s — a closed tagged-variant
//! type over [`Terminal`], [`Sequence`], and [`Choice`]. Every node exposes
//! one resolved [`Step`] and its successor: `current()` is what plays now,
//! `next()` is what plays after the coming advance, and `advance()` moves
//! the cursor, reporting `true` when the node completed a full period.
//!
//! Separating `current` from `next` lets the scheduler read one step ahead
//! while the automaton's state is already primed for the following tick.
//! `advance()` is called at most once per tick per node; `current()` and
//! `next()` are pure queries.

use std::collections::BTreeMap;
use std::fmt;

use rand::Rng;
use rand_chacha::ChaCha8Rng;

/// One applied effect in a step's chain, e.g. `gain(amount: 0.5)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Effect {
    pub name: String,
    pub params: BTreeMap<String, f64>,
}

/// A fully resolved playback unit. Immutable once produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    /// Symbol-table key of the sound: the literal's composite identity, or
    /// a variable name.
    pub sound: String,
    /// The literal text as written, for display.
    pub label: String,
    /// Effect chain, outermost last.
    pub effects: Vec<Effect>,
    /// Subdivision weight: fraction of one beat this step occupies.
    pub weight: f64,
}

impl Step {
    pub fn new(sound: impl Into<String>) -> Self {
        let sound = sound.into();
        Self {
            label: sound.clone(),
            sound,
            effects: Vec::new(),
            weight: 1.0,
        }
    }
}

/// Fault raised when an automaton cannot be constructed. Construction is the
/// only place these surface; a constructed tree never fails at tick time.
#[derive(Debug, Clone, PartialEq)]
pub struct AutomatonError {
    pub message: String,
}

impl AutomatonError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for AutomatonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "automaton error: {}", self.message)
    }
}

impl std::error::Error for AutomatonError {}

/// A node of the generative automaton.
#[derive(Debug, Clone)]
pub enum Node {
    Terminal(Terminal),
    Sequence(Sequence),
    Choice(Choice),
}

impl Node {
    /// The step at the cursor.
    pub fn current(&self) -> &Step {
        match self {
            Node::Terminal(t) => &t.step,
            Node::Sequence(s) => s.children[s.idx].current(),
            Node::Choice(c) => c.children[c.cur].current(),
        }
    }

    /// The step that will be at the cursor after the next `advance()`.
    pub fn next(&self) -> &Step {
        match self {
            Node::Terminal(t) => &t.step,
            Node::Sequence(s) => {
                if s.children[s.idx].will_cycle() {
                    s.children[(s.idx + 1) % s.children.len()].current()
                } else {
                    s.children[s.idx].next()
                }
            }
            Node::Choice(c) => {
                if !c.children[c.cur].will_cycle() {
                    c.children[c.cur].next()
                } else if c.pending == c.cur {
                    // The branch re-selects itself while mid-cycle: its own
                    // lookahead already accounts for the wraparound.
                    c.children[c.cur].next()
                } else {
                    // A resting branch is never advanced, so its current
                    // step is the one it will open with.
                    c.children[c.pending].current()
                }
            }
        }
    }

    /// Move the cursor one step. Returns `true` iff this node completed a
    /// full period on this call.
    pub fn advance(&mut self) -> bool {
        match self {
            // A one-element stream completes its period every call.
            Node::Terminal(_) => true,
            Node::Sequence(s) => {
                if !s.children[s.idx].advance() {
                    return false;
                }
                s.idx = (s.idx + 1) % s.children.len();
                s.idx == 0
            }
            Node::Choice(c) => {
                if !c.children[c.cur].advance() {
                    return false;
                }
                c.cur = c.pending;
                c.pending = c.draw();
                true
            }
        }
    }

    /// Return the cursor to the start without discarding structure.
    pub fn reset(&mut self) {
        match self {
            Node::Terminal(_) => {}
            Node::Sequence(s) => {
                s.idx = 0;
                for child in &mut s.children {
                    child.reset();
                }
            }
            Node::Choice(c) => {
                for child in &mut c.children {
                    child.reset();
                }
            }
        }
    }

    /// Whether the next `advance()` call will report a completed period.
    fn will_cycle(&self) -> bool {
        match self {
            Node::Terminal(_) => true,
            Node::Sequence(s) => {
                s.idx == s.children.len() - 1 && s.children[s.idx].will_cycle()
            }
            Node::Choice(c) => c.children[c.cur].will_cycle(),
        }
    }

    /// Multiply every terminal step's subdivision weight by `factor`.
    /// Used by beat-division groups, whose members share one beat.
    pub fn scale_weights(&mut self, factor: f64) {
        match self {
            Node::Terminal(t) => t.step.weight *= factor,
            Node::Sequence(s) => {
                for child in &mut s.children {
                    child.scale_weights(factor);
                }
            }
            Node::Choice(c) => {
                for child in &mut c.children {
                    child.scale_weights(factor);
                }
            }
        }
    }
}

/// A single step, cycling every call.
#[derive(Debug, Clone)]
pub struct Terminal {
    step: Step,
}

impl Terminal {
    pub fn new(step: Step) -> Node {
        Node::Terminal(Self { step })
    }
}

/// Deterministic round-robin over fixed ordered children;
/// period = child count.
#[derive(Debug, Clone)]
pub struct Sequence {
    children: Vec<Node>,
    idx: usize,
}

impl Sequence {
    /// Precondition: `children` must be non-empty. The builder guarantees
    /// this; violating it is a construction fault, not a runtime error.
    pub fn new(children: Vec<Node>) -> Result<Node, AutomatonError> {
        if children.is_empty() {
            return Err(AutomatonError::new("a sequence must have at least one step"));
        }
        Ok(Node::Sequence(Self { children, idx: 0 }))
    }

    pub(crate) fn children_mut(&mut self) -> &mut [Node] {
        &mut self.children
    }
}

/// Weighted random selection over fixed children. The cumulative weight
/// table is built once at construction and is strictly increasing, with as
/// many entries as children. Every completed child period reports a cycle.
#[derive(Debug, Clone)]
pub struct Choice {
    children: Vec<Node>,
    cumulative: Vec<f64>,
    total: f64,
    cur: usize,
    pending: usize,
    rng: ChaCha8Rng,
}

impl Choice {
    pub fn new(
        children: Vec<Node>,
        weights: Vec<f64>,
        mut rng: ChaCha8Rng,
    ) -> Result<Node, AutomatonError> {
        if children.is_empty() {
            return Err(AutomatonError::new("a choice must have at least one branch"));
        }
        if children.len() != weights.len() {
            return Err(AutomatonError::new(format!(
                "{} branches but {} weights",
                children.len(),
                weights.len()
            )));
        }
        let mut cumulative = Vec::with_capacity(weights.len());
        let mut total = 0.0;
        for w in &weights {
            if *w <= 0.0 {
                return Err(AutomatonError::new("choice weights must be positive"));
            }
            total += w;
            cumulative.push(total);
        }

        // Prime both cursors so current/next are defined from construction.
        let cur = draw_index(&cumulative, total, &mut rng);
        let pending = draw_index(&cumulative, total, &mut rng);
        Ok(Node::Choice(Self {
            children,
            cumulative,
            total,
            cur,
            pending,
            rng,
        }))
    }

    fn draw(&mut self) -> usize {
        draw_index(&self.cumulative, self.total, &mut self.rng)
    }

    pub(crate) fn children_mut(&mut self) -> &mut [Node] {
        &mut self.children
    }
}

/// Uniform draw over `[0, total)`, mapped to the first cumulative entry
/// greater than the draw.
fn draw_index(cumulative: &[f64], total: f64, rng: &mut ChaCha8Rng) -> usize {
    let r: f64 = rng.gen_range(0.0..total);
    cumulative
        .iter()
        .position(|&c| r < c)
        .unwrap_or(cumulative.len() - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn term(name: &str) -> Node {
        Terminal::new(Step::new(name))
    }

    fn rng() -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(42)
    }

    #[test]
    fn terminal_always_cycles() {
        let mut n = term("kick");
        for _ in 0..5 {
            assert_eq!(n.current().sound, "kick");
            assert_eq!(n.next().sound, "kick");
            assert!(n.advance());
        }
    }

    #[test]
    fn sequence_cycles_exactly_on_nth_advance() {
        let mut n = Sequence::new(vec![term("a"), term("b"), term("c"), term("d")]).unwrap();
        let mut cycles = 0;
        for i in 0..4 {
            let cycled = n.advance();
            if cycled {
                cycles += 1;
                assert_eq!(i, 3, "must cycle on the 4th call only");
            }
        }
        assert_eq!(cycles, 1);
        assert_eq!(n.current().sound, "a", "index back at 0 after wraparound");
    }

    #[test]
    fn sequence_visits_children_in_order() {
        let mut n = Sequence::new(vec![term("a"), term("b"), term("c")]).unwrap();
        let mut seen = Vec::new();
        for _ in 0..6 {
            seen.push(n.current().sound.clone());
            n.advance();
        }
        assert_eq!(seen, vec!["a", "b", "c", "a", "b", "c"]);
    }

    #[test]
    fn sequence_next_looks_one_step_ahead() {
        let mut n = Sequence::new(vec![term("a"), term("b")]).unwrap();
        assert_eq!(n.current().sound, "a");
        assert_eq!(n.next().sound, "b");
        n.advance();
        assert_eq!(n.current().sound, "b");
        assert_eq!(n.next().sound, "a");
    }

    #[test]
    fn empty_sequence_fails_at_construction() {
        assert!(Sequence::new(vec![]).is_err());
    }

    #[test]
    fn nested_sequence_period_is_product() {
        // (a b) (c d): outer cycles after 4 advances.
        let inner1 = Sequence::new(vec![term("a"), term("b")]).unwrap();
        let inner2 = Sequence::new(vec![term("c"), term("d")]).unwrap();
        let mut outer = Sequence::new(vec![inner1, inner2]).unwrap();
        let mut seen = Vec::new();
        let mut cycles = Vec::new();
        for _ in 0..8 {
            seen.push(outer.current().sound.clone());
            cycles.push(outer.advance());
        }
        assert_eq!(seen, vec!["a", "b", "c", "d", "a", "b", "c", "d"]);
        assert_eq!(
            cycles,
            vec![false, false, false, true, false, false, false, true]
        );
    }

    #[test]
    fn choice_always_reports_cycle() {
        let mut n = Choice::new(vec![term("a"), term("b")], vec![1.0, 1.0], rng()).unwrap();
        for _ in 0..50 {
            assert!(n.advance());
        }
    }

    #[test]
    fn choice_equal_weights_split_evenly() {
        let mut n = Choice::new(vec![term("a"), term("b")], vec![1.0, 1.0], rng()).unwrap();
        let trials = 10_000;
        let mut a_count = 0u32;
        for _ in 0..trials {
            if n.current().sound == "a" {
                a_count += 1;
            }
            n.advance();
        }
        let ratio = a_count as f64 / trials as f64;
        assert!(
            (ratio - 0.5).abs() < 0.03,
            "expected ~0.5, got {ratio} ({a_count}/{trials})"
        );
    }

    #[test]
    fn choice_respects_skewed_weights() {
        let mut n = Choice::new(vec![term("a"), term("b")], vec![9.0, 1.0], rng()).unwrap();
        let trials = 10_000;
        let mut a_count = 0u32;
        for _ in 0..trials {
            if n.current().sound == "a" {
                a_count += 1;
            }
            n.advance();
        }
        let ratio = a_count as f64 / trials as f64;
        assert!(
            (ratio - 0.9).abs() < 0.03,
            "expected ~0.9, got {ratio}"
        );
    }

    #[test]
    fn choice_cumulative_table_invariants() {
        let node = Choice::new(
            vec![term("a"), term("b"), term("c")],
            vec![1.0, 2.0, 0.5],
            rng(),
        )
        .unwrap();
        let Node::Choice(c) = node else { unreachable!() };
        assert_eq!(c.cumulative.len(), 3);
        assert!(c.cumulative.windows(2).all(|w| w[0] < w[1]));
        assert!((c.total - 3.5).abs() < f64::EPSILON);
    }

    #[test]
    fn choice_rejects_bad_construction() {
        assert!(Choice::new(vec![], vec![], rng()).is_err());
        assert!(Choice::new(vec![term("a")], vec![1.0, 2.0], rng()).is_err());
        assert!(Choice::new(vec![term("a")], vec![0.0], rng()).is_err());
        assert!(Choice::new(vec![term("a")], vec![-1.0], rng()).is_err());
    }

    #[test]
    fn choice_next_matches_pending_selection() {
        let mut n = Choice::new(vec![term("a"), term("b")], vec![1.0, 1.0], rng()).unwrap();
        for _ in 0..100 {
            let predicted = n.next().sound.clone();
            n.advance();
            assert_eq!(n.current().sound, predicted);
        }
    }

    #[test]
    fn choice_next_predicts_across_branch_reselection() {
        // Multi-step branches: when a branch re-selects itself while on its
        // last step, the lookahead must wrap to the branch's first step, not
        // repeat its last one.
        let ab = Sequence::new(vec![term("a"), term("b")]).unwrap();
        let cd = Sequence::new(vec![term("c"), term("d")]).unwrap();
        let mut n = Choice::new(vec![ab, cd], vec![1.0, 1.0], rng()).unwrap();
        for i in 0..500 {
            let predicted = n.next().sound.clone();
            n.advance();
            assert_eq!(n.current().sound, predicted, "mispredicted at step {i}");
        }
    }

    #[test]
    fn nested_choice_next_stays_consistent() {
        let inner = Choice::new(
            vec![term("a"), term("b")],
            vec![1.0, 1.0],
            ChaCha8Rng::seed_from_u64(7),
        )
        .unwrap();
        let cd = Sequence::new(vec![term("c"), term("d")]).unwrap();
        let mut n = Choice::new(vec![inner, cd], vec![1.0, 1.0], rng()).unwrap();
        for i in 0..500 {
            let predicted = n.next().sound.clone();
            n.advance();
            assert_eq!(n.current().sound, predicted, "mispredicted at step {i}");
        }
    }

    #[test]
    fn choice_is_deterministic_under_seed() {
        let run = || {
            let mut n =
                Choice::new(vec![term("a"), term("b")], vec![1.0, 1.0], rng()).unwrap();
            let mut seen = Vec::new();
            for _ in 0..64 {
                seen.push(n.current().sound.clone());
                n.advance();
            }
            seen
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn reset_returns_sequence_to_start() {
        let mut n = Sequence::new(vec![term("a"), term("b"), term("c")]).unwrap();
        n.advance();
        n.advance();
        assert_eq!(n.current().sound, "c");
        n.reset();
        assert_eq!(n.current().sound, "a");
    }

    #[test]
    fn scale_weights_reaches_all_terminals() {
        let inner = Sequence::new(vec![term("a"), term("b")]).unwrap();
        let mut outer = Sequence::new(vec![inner, term("c")]).unwrap();
        outer.scale_weights(0.5);
        assert!((outer.current().weight - 0.5).abs() < f64::EPSILON);
        outer.advance();
        outer.advance();
        assert!((outer.current().weight - 0.5).abs() < f64::EPSILON);
    }
}
