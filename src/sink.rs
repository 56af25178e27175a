//! The playback boundary — where scheduled steps leave the engine.
//!
//! The scheduler does not render audio itself; it hands timed step events
//! to an [`AudioSink`]. A sink may drive a soundcard, print to a console,
//! or just record for inspection. Steps whose sample has not resolved yet
//! still arrive, flagged, so a sink can render silence without losing the
//! rhythmic slot.

use std::sync::{Arc, Mutex};

use crate::pattern::Step;
use crate::symbols::SampleData;

/// Sample availability at the moment a step fires.
#[derive(Debug, Clone)]
pub enum SampleState {
    /// Decoded audio, ready to play.
    Ready(Arc<SampleData>),
    /// Resolution still in flight; play silence for this slot.
    Pending,
    /// Resolution finished without a sample; play silence for this slot.
    Missing,
}

/// One step leaving the scheduler.
#[derive(Debug, Clone)]
pub struct StepEvent {
    /// The live variable whose playback cursor emitted this step.
    pub variable: String,
    /// Scheduler tick at which the step fired.
    pub tick: u64,
    pub step: Step,
    pub sample: SampleState,
}

/// Receives timed steps from the scheduler. Called with the scheduler
/// lock held, so implementations must not block.
pub trait AudioSink: Send {
    fn play(&mut self, event: StepEvent);

    /// While muted, `play` keeps being called; the sink stays silent.
    fn set_muted(&mut self, muted: bool);

    /// Transport paused; release or quiet any ongoing voices.
    fn suspend(&mut self);

    fn resume(&mut self);

    fn start_recording(&mut self);

    /// Stop recording and hand back what was captured, if anything.
    fn stop_recording(&mut self) -> Option<Vec<StepEvent>>;
}

/// Captures every event in memory. The test workhorse.
pub struct MemorySink {
    events: Arc<Mutex<Vec<StepEvent>>>,
    recorded: Vec<StepEvent>,
    muted: bool,
    recording: bool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
            recorded: Vec::new(),
            muted: false,
            recording: false,
        }
    }

    /// Shared handle onto everything played so far.
    pub fn handle(&self) -> Arc<Mutex<Vec<StepEvent>>> {
        self.events.clone()
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSink for MemorySink {
    fn play(&mut self, event: StepEvent) {
        if self.recording {
            self.recorded.push(event.clone());
        }
        if !self.muted {
            if let Ok(mut events) = self.events.lock() {
                events.push(event);
            }
        }
    }

    fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    fn suspend(&mut self) {}

    fn resume(&mut self) {}

    fn start_recording(&mut self) {
        if self.recording {
            return;
        }
        self.recorded.clear();
        self.recording = true;
    }

    fn stop_recording(&mut self) -> Option<Vec<StepEvent>> {
        if !self.recording {
            return None;
        }
        self.recording = false;
        Some(std::mem::take(&mut self.recorded))
    }
}

/// Prints each step, one line per event. Useful when no audio device is
/// wired up.
pub struct ConsoleSink {
    muted: bool,
    recording: bool,
    recorded: Vec<StepEvent>,
}

impl ConsoleSink {
    pub fn new() -> Self {
        Self {
            muted: false,
            recording: false,
            recorded: Vec::new(),
        }
    }
}

impl Default for ConsoleSink {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSink for ConsoleSink {
    fn play(&mut self, event: StepEvent) {
        if self.recording {
            self.recorded.push(event.clone());
        }
        if self.muted {
            return;
        }
        let marker = match event.sample {
            SampleState::Ready(_) => "▶",
            SampleState::Pending => "…",
            SampleState::Missing => "✗",
        };
        println!(
            "{:>6} {} {:<12} {}",
            event.tick, marker, event.variable, event.step.label
        );
    }

    fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    fn suspend(&mut self) {}

    fn resume(&mut self) {}

    fn start_recording(&mut self) {
        if self.recording {
            return;
        }
        self.recorded.clear();
        self.recording = true;
    }

    fn stop_recording(&mut self) -> Option<Vec<StepEvent>> {
        if !self.recording {
            return None;
        }
        self.recording = false;
        Some(std::mem::take(&mut self.recorded))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(tick: u64) -> StepEvent {
        StepEvent {
            variable: "x".into(),
            tick,
            step: Step::new("kick"),
            sample: SampleState::Missing,
        }
    }

    #[test]
    fn memory_sink_captures_events() {
        let mut sink = MemorySink::new();
        let handle = sink.handle();
        sink.play(event(0));
        sink.play(event(1));
        assert_eq!(handle.lock().unwrap().len(), 2);
    }

    #[test]
    fn muted_sink_drops_playback_but_keeps_recording() {
        let mut sink = MemorySink::new();
        let handle = sink.handle();
        sink.start_recording();
        sink.set_muted(true);
        sink.play(event(0));
        assert!(handle.lock().unwrap().is_empty());
        let recorded = sink.stop_recording().unwrap();
        assert_eq!(recorded.len(), 1);
    }

    #[test]
    fn stop_without_start_returns_none() {
        let mut sink = MemorySink::new();
        assert!(sink.stop_recording().is_none());
    }

    #[test]
    fn recording_restarts_clean() {
        let mut sink = MemorySink::new();
        sink.start_recording();
        sink.play(event(0));
        assert_eq!(sink.stop_recording().unwrap().len(), 1);
        sink.start_recording();
        assert!(sink.stop_recording().unwrap().is_empty());
    }
}
