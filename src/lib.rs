//! Patter — a live-coded probabilistic step-sequencer language and engine.
//!
//! A program is a set of text blocks, each holding one statement. Each
//! edit re-runs a per-block pipeline: lex, semantic analysis with error
//! recovery, symbol-table upserts with debounced sound resolution, and an
//! automaton rebuild that swaps the block's playback cursor in without
//! stopping the others.

pub mod config;
pub mod engine;
pub mod lang;
pub mod pattern;
pub mod sched;
pub mod sink;
pub mod symbols;

pub use config::EngineConfig;
pub use engine::Engine;
pub use lang::{Analysis, ErrorToken, SemanticToken};
pub use pattern::{Node, Step};
pub use sched::TransportSignal;
pub use sink::{AudioSink, ConsoleSink, MemorySink, SampleState, StepEvent};
pub use symbols::{DirSource, NullObserver, NullSource, ResolveStatus, SymbolTable};
