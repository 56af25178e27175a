//! Tempo-synced step scheduling.
//!
//! The scheduler owns one [`Playhead`] per live variable and a periodic
//! tick thread. Each tick advances every playhead by the tick interval,
//! resolves fired steps against the symbol table, and forwards them to the
//! sink. All mutation goes through one mutex around the core; the tick
//! thread and the editing thread never race on partial state.

pub mod playhead;

pub use playhead::Playhead;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::pattern::Node;
use crate::sink::{AudioSink, SampleState, StepEvent};
use crate::symbols::{ResolveStatus, SymbolKind, SymbolValue, SymbolView};

/// Transport commands from the host surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportSignal {
    Play,
    Pause,
    Record(bool),
    Mute(bool),
    /// New tempo in beats per minute, applied at the next tick boundary.
    Tempo(u16),
}

struct SchedulerCore {
    playheads: HashMap<String, Playhead>,
    symbols: SymbolView,
    sink: Box<dyn AudioSink>,
    bpm: f64,
    /// Tempo changes land here and take effect between ticks, never
    /// mid-sweep.
    pending_bpm: Option<f64>,
    tick: u64,
}

impl SchedulerCore {
    fn tick(&mut self, dt: f64) {
        if let Some(bpm) = self.pending_bpm.take() {
            self.bpm = bpm;
        }

        // Stable order keeps sink output reproducible across runs.
        let mut variables: Vec<String> = self.playheads.keys().cloned().collect();
        variables.sort();

        let mut fired = Vec::new();
        for variable in variables {
            if let Some(head) = self.playheads.get_mut(&variable) {
                let mut steps = Vec::new();
                head.advance_by(dt, self.bpm, &mut steps);
                for step in steps {
                    fired.push((variable.clone(), step));
                }
            }
        }

        for (variable, step) in fired {
            let sample = self.sample_state(&step.sound);
            self.sink.play(StepEvent {
                variable,
                tick: self.tick,
                step,
                sample,
            });
        }
        self.tick += 1;
    }

    /// Look the step's sound up at emission time, so a sample that
    /// resolved since the last tick is picked up without a rebuild.
    /// A record of any non-sound kind never resolves, so it reads as
    /// `Missing` rather than claiming a resolution is in flight.
    fn sample_state(&self, sound: &str) -> SampleState {
        match self.symbols.get(sound) {
            Some(rec) if rec.kind == SymbolKind::Sound => match rec.status {
                ResolveStatus::Available => match rec.value {
                    Some(SymbolValue::Sample(data)) => SampleState::Ready(data),
                    _ => SampleState::Missing,
                },
                ResolveStatus::Unavailable => SampleState::Missing,
                _ => SampleState::Pending,
            },
            Some(_) => SampleState::Missing,
            None => SampleState::Pending,
        }
    }
}

struct TickTimer {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl TickTimer {
    fn spawn(core: Arc<Mutex<SchedulerCore>>, interval: Duration) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let dt = interval.as_secs_f64();
        let handle = thread::spawn(move || loop {
            thread::sleep(interval);
            if stop_flag.load(Ordering::SeqCst) {
                break;
            }
            let mut core = core.lock().expect("scheduler core poisoned");
            core.tick(dt);
        });
        Self {
            stop,
            handle: Some(handle),
        }
    }
}

impl Drop for TickTimer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Owning handle to the scheduler core and its tick thread.
pub struct Scheduler {
    core: Arc<Mutex<SchedulerCore>>,
    timer: Option<TickTimer>,
    tick_interval: Duration,
}

impl Scheduler {
    pub fn new(
        symbols: SymbolView,
        sink: Box<dyn AudioSink>,
        bpm: f64,
        tick_interval: Duration,
    ) -> Self {
        Self {
            core: Arc::new(Mutex::new(SchedulerCore {
                playheads: HashMap::new(),
                symbols,
                sink,
                bpm,
                pending_bpm: None,
                tick: 0,
            })),
            timer: None,
            tick_interval,
        }
    }

    /// Start ticking. Returns `false` if already running.
    pub fn start(&mut self) -> bool {
        if self.timer.is_some() {
            return false;
        }
        self.core
            .lock()
            .expect("scheduler core poisoned")
            .sink
            .resume();
        self.timer = Some(TickTimer::spawn(self.core.clone(), self.tick_interval));
        true
    }

    /// Stop ticking and rewind every playhead to its first step.
    pub fn stop(&mut self) {
        self.timer = None;
        let mut core = self.core.lock().expect("scheduler core poisoned");
        for head in core.playheads.values_mut() {
            head.reset();
        }
        core.tick = 0;
        core.sink.suspend();
    }

    /// Stop ticking but keep every playhead where it is.
    pub fn pause(&mut self) {
        self.timer = None;
        let mut core = self.core.lock().expect("scheduler core poisoned");
        core.sink.suspend();
    }

    pub fn is_running(&self) -> bool {
        self.timer.is_some()
    }

    /// Attach (or replace) the playback cursor for a live variable. The
    /// new automaton starts from its first step on the next tick.
    pub fn bind(&self, variable: &str, node: Node) {
        let mut core = self.core.lock().expect("scheduler core poisoned");
        match core.playheads.get_mut(variable) {
            Some(head) => head.replace(node),
            None => {
                core.playheads.insert(variable.to_string(), Playhead::new(node));
            }
        }
    }

    pub fn unbind(&self, variable: &str) {
        let mut core = self.core.lock().expect("scheduler core poisoned");
        core.playheads.remove(variable);
    }

    /// Stage a tempo change for the next tick boundary. A non-positive
    /// tempo would stall every playhead, so it is ignored.
    pub fn set_tempo(&self, bpm: f64) {
        if bpm <= 0.0 {
            return;
        }
        let mut core = self.core.lock().expect("scheduler core poisoned");
        core.pending_bpm = Some(bpm);
    }

    pub fn set_muted(&self, muted: bool) {
        let mut core = self.core.lock().expect("scheduler core poisoned");
        core.sink.set_muted(muted);
    }

    pub fn start_recording(&self) {
        let mut core = self.core.lock().expect("scheduler core poisoned");
        core.sink.start_recording();
    }

    pub fn stop_recording(&self) -> Option<Vec<StepEvent>> {
        let mut core = self.core.lock().expect("scheduler core poisoned");
        core.sink.stop_recording()
    }

    /// Dispatch a transport command. `Record(false)` returns the captured
    /// events, every other signal returns `None`.
    pub fn handle(&mut self, signal: TransportSignal) -> Option<Vec<StepEvent>> {
        match signal {
            TransportSignal::Play => {
                self.start();
                None
            }
            TransportSignal::Pause => {
                self.pause();
                None
            }
            TransportSignal::Record(true) => {
                self.start_recording();
                None
            }
            TransportSignal::Record(false) => self.stop_recording(),
            TransportSignal::Mute(muted) => {
                self.set_muted(muted);
                None
            }
            TransportSignal::Tempo(bpm) => {
                self.set_tempo(bpm as f64);
                None
            }
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.timer = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::{Sequence, Step, Terminal};
    use crate::sink::MemorySink;
    use crate::symbols::{NullObserver, NullSource, SymbolPatch, SymbolTable};

    fn seq(names: &[&str]) -> Node {
        Sequence::new(names.iter().map(|n| Terminal::new(Step::new(*n))).collect()).unwrap()
    }

    fn scheduler_with_sink(bpm: f64) -> (Scheduler, Arc<Mutex<Vec<StepEvent>>>, SymbolTable) {
        let table = SymbolTable::new(
            Arc::new(NullSource),
            Arc::new(NullObserver),
            Duration::from_secs(60),
        );
        let sink = MemorySink::new();
        let events = sink.handle();
        let sched = Scheduler::new(
            table.view(),
            Box::new(sink),
            bpm,
            Duration::from_millis(5),
        );
        (sched, events, table)
    }

    #[test]
    fn start_is_idempotent() {
        let (mut sched, _events, _table) = scheduler_with_sink(120.0);
        assert!(sched.start());
        assert!(!sched.start());
        assert!(sched.is_running());
        sched.pause();
        assert!(!sched.is_running());
        assert!(sched.start());
    }

    #[test]
    fn bound_variable_emits_its_steps_in_order() {
        let (mut sched, events, _table) = scheduler_with_sink(600.0);
        sched.bind("x", seq(&["a", "b"]));
        sched.start();
        thread::sleep(Duration::from_millis(450));
        sched.pause();
        let events = events.lock().unwrap();
        assert!(events.len() >= 4, "got {} events", events.len());
        for (i, ev) in events.iter().enumerate() {
            assert_eq!(ev.variable, "x");
            let expected = if i % 2 == 0 { "a" } else { "b" };
            assert_eq!(ev.step.sound, expected);
        }
    }

    #[test]
    fn unbind_silences_the_variable() {
        let (mut sched, events, _table) = scheduler_with_sink(600.0);
        sched.bind("x", seq(&["a"]));
        sched.start();
        thread::sleep(Duration::from_millis(100));
        sched.unbind("x");
        thread::sleep(Duration::from_millis(20));
        let count = events.lock().unwrap().len();
        thread::sleep(Duration::from_millis(150));
        sched.pause();
        assert_eq!(events.lock().unwrap().len(), count);
    }

    #[test]
    fn stop_rewinds_pause_does_not() {
        let (mut sched, events, _table) = scheduler_with_sink(600.0);
        sched.bind("x", seq(&["a", "b", "c", "d"]));
        sched.start();
        thread::sleep(Duration::from_millis(150));
        sched.stop();
        events.lock().unwrap().clear();
        sched.start();
        thread::sleep(Duration::from_millis(30));
        sched.pause();
        let events = events.lock().unwrap();
        assert_eq!(events[0].step.sound, "a", "stop must rewind to the first step");
    }

    #[test]
    fn unknown_sound_arrives_pending() {
        let (mut sched, events, _table) = scheduler_with_sink(600.0);
        sched.bind("x", seq(&["kick"]));
        sched.start();
        thread::sleep(Duration::from_millis(50));
        sched.pause();
        let events = events.lock().unwrap();
        assert!(!events.is_empty());
        assert!(matches!(events[0].sample, SampleState::Pending));
    }

    #[test]
    fn variable_step_reads_as_missing_not_pending() {
        let table = SymbolTable::new(
            Arc::new(NullSource),
            Arc::new(NullObserver),
            Duration::from_secs(60),
        );
        table.merge(SymbolPatch::variable("drums"));
        let sink = MemorySink::new();
        let events = sink.handle();
        let mut sched = Scheduler::new(
            table.view(),
            Box::new(sink),
            600.0,
            Duration::from_millis(5),
        );
        sched.bind("x", seq(&["drums"]));
        sched.start();
        thread::sleep(Duration::from_millis(50));
        sched.pause();
        let events = events.lock().unwrap();
        assert!(!events.is_empty());
        // No resolution will ever arrive for a variable record.
        assert!(matches!(events[0].sample, SampleState::Missing));
    }

    #[test]
    fn record_signal_round_trip() {
        let (mut sched, _events, _table) = scheduler_with_sink(600.0);
        sched.bind("x", seq(&["a"]));
        sched.handle(TransportSignal::Record(true));
        sched.handle(TransportSignal::Play);
        thread::sleep(Duration::from_millis(100));
        sched.handle(TransportSignal::Pause);
        let captured = sched.handle(TransportSignal::Record(false)).unwrap();
        assert!(!captured.is_empty());
    }

    #[test]
    fn mute_suppresses_output() {
        let (mut sched, events, _table) = scheduler_with_sink(600.0);
        sched.bind("x", seq(&["a"]));
        sched.handle(TransportSignal::Mute(true));
        sched.start();
        thread::sleep(Duration::from_millis(100));
        sched.pause();
        assert!(events.lock().unwrap().is_empty());
    }

    #[test]
    fn zero_tempo_signal_is_ignored() {
        let (mut sched, events, _table) = scheduler_with_sink(600.0);
        sched.bind("x", seq(&["a"]));
        sched.start();
        sched.handle(TransportSignal::Tempo(0));
        thread::sleep(Duration::from_millis(200));
        sched.pause();
        // Emission continues at the previous tempo rather than freezing.
        assert!(events.lock().unwrap().len() >= 2);
    }

    #[test]
    fn tempo_signal_changes_emission_rate() {
        let (mut sched, events, _table) = scheduler_with_sink(60.0);
        sched.bind("x", seq(&["a"]));
        sched.start();
        thread::sleep(Duration::from_millis(100));
        let slow = events.lock().unwrap().len();
        sched.handle(TransportSignal::Tempo(1200));
        thread::sleep(Duration::from_millis(200));
        sched.pause();
        let total = events.lock().unwrap().len();
        assert!(
            total > slow + 2,
            "tempo jump should multiply emissions ({slow} then {total})"
        );
    }
}
