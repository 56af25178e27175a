//! Per-variable playback cursor.

use crate::pattern::{Node, Step};

/// One live variable's position in musical time.
///
/// The playhead owns its automaton and a countdown to the next step
/// boundary. Ticks feed it wall-clock time; it converts each step's
/// subdivision weight to seconds at the current tempo, so a beat-division
/// group's members fire proportionally faster and a tempo change scales
/// everything from the next step onward.
#[derive(Debug)]
pub struct Playhead {
    node: Node,
    /// Seconds until the current step ends. Starts at zero so the first
    /// tick emits immediately.
    countdown: f64,
}

impl Playhead {
    pub fn new(node: Node) -> Self {
        Self {
            node,
            countdown: 0.0,
        }
    }

    /// Swap in a rebuilt automaton, restarting from its first step.
    pub fn replace(&mut self, node: Node) {
        self.node = node;
        self.countdown = 0.0;
    }

    pub fn reset(&mut self) {
        self.node.reset();
        self.countdown = 0.0;
    }

    /// Advance musical time by `dt` seconds at `bpm`, appending every step
    /// whose boundary was crossed. The countdown carries the fractional
    /// remainder so timing never drifts against the tick grid.
    pub fn advance_by(&mut self, dt: f64, bpm: f64, out: &mut Vec<Step>) {
        self.countdown -= dt;
        while self.countdown <= 0.0 {
            let step = self.node.current().clone();
            self.countdown += 60.0 / bpm * step.weight;
            out.push(step);
            self.node.advance();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::{Sequence, Terminal};

    fn seq(names: &[&str]) -> Node {
        Sequence::new(names.iter().map(|n| Terminal::new(Step::new(*n))).collect()).unwrap()
    }

    #[test]
    fn first_tick_emits_immediately() {
        let mut head = Playhead::new(seq(&["a", "b"]));
        let mut out = Vec::new();
        head.advance_by(0.001, 120.0, &mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].sound, "a");
    }

    #[test]
    fn emits_one_step_per_beat_at_tempo() {
        // 120 bpm: one step every 0.5 s. 2.0 s of time crosses 4 boundaries
        // plus the immediate first step.
        let mut head = Playhead::new(seq(&["a", "b", "c", "d"]));
        let mut out = Vec::new();
        for _ in 0..80 {
            head.advance_by(0.025, 120.0, &mut out);
        }
        assert_eq!(out.len(), 5);
        let sounds: Vec<&str> = out.iter().map(|s| s.sound.as_str()).collect();
        assert_eq!(sounds, vec!["a", "b", "c", "d", "a"]);
    }

    #[test]
    fn faster_tempo_emits_proportionally_more() {
        let run = |bpm: f64| {
            let mut head = Playhead::new(seq(&["a", "b"]));
            let mut out = Vec::new();
            for _ in 0..400 {
                head.advance_by(0.025, bpm, &mut out);
            }
            out.len()
        };
        let at_120 = run(120.0);
        let at_240 = run(240.0);
        assert!(
            (at_240 as f64 / at_120 as f64 - 2.0).abs() < 0.1,
            "doubling the tempo should double the step count ({at_120} vs {at_240})"
        );
    }

    #[test]
    fn subdivision_weight_shortens_the_slot() {
        // Weight 0.5 at 120 bpm means a 0.25 s slot.
        let mut node = seq(&["a", "b"]);
        node.scale_weights(0.5);
        let mut head = Playhead::new(node);
        let mut out = Vec::new();
        // 1.0 s: immediate step plus boundaries at 0.25, 0.5, 0.75, 1.0.
        for _ in 0..40 {
            head.advance_by(0.025, 120.0, &mut out);
        }
        assert_eq!(out.len(), 5);
    }

    #[test]
    fn oversized_tick_catches_up_without_losing_steps() {
        let mut head = Playhead::new(seq(&["a", "b", "c"]));
        let mut out = Vec::new();
        // One huge 1.5 s slice at 120 bpm covers three 0.5 s slots plus the
        // immediate first step.
        head.advance_by(1.5, 120.0, &mut out);
        assert_eq!(out.len(), 4);
    }

    #[test]
    fn replace_restarts_from_the_new_first_step() {
        let mut head = Playhead::new(seq(&["a", "b"]));
        let mut out = Vec::new();
        head.advance_by(0.001, 120.0, &mut out);
        head.replace(seq(&["x", "y"]));
        out.clear();
        head.advance_by(0.001, 120.0, &mut out);
        assert_eq!(out[0].sound, "x");
    }
}
