//! The live-coding engine facade.
//!
//! One [`Engine`] owns the symbol table, the scheduler, and the per-block
//! bookkeeping that connects them. The host surface calls
//! [`Engine::update_block`] on every edit and gets the analysis back for
//! highlighting; everything else (symbol upserts, pruning, automaton
//! rebuilds, playhead swaps) happens as a side effect of that call.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::EngineConfig;
use crate::lang::token::{ErrorToken, SemanticKind};
use crate::lang::{self, Analysis};
use crate::sched::{Scheduler, TransportSignal};
use crate::sink::{AudioSink, StepEvent};
use crate::symbols::{
    SampleSource, SoundQuery, StatusObserver, SymbolPatch, SymbolRecord, SymbolTable, SymbolValue,
};

/// Engine construction failures.
#[derive(Debug)]
pub enum EngineError {
    InvalidConfig(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::InvalidConfig(msg) => write!(f, "invalid configuration: {msg}"),
        }
    }
}

impl std::error::Error for EngineError {}

pub struct Engine {
    symbols: SymbolTable,
    scheduler: Scheduler,
    seed: u64,
    /// Which variable each block currently drives, so a rewritten block
    /// releases its old playhead.
    targets: HashMap<usize, String>,
}

impl Engine {
    pub fn new(
        config: &EngineConfig,
        source: Arc<dyn SampleSource>,
        observer: Arc<dyn StatusObserver>,
        sink: Box<dyn AudioSink>,
    ) -> Result<Self, EngineError> {
        if config.bpm == 0 {
            return Err(EngineError::InvalidConfig("bpm must be positive".into()));
        }
        if config.tick_ms == 0 {
            return Err(EngineError::InvalidConfig(
                "tick interval must be positive".into(),
            ));
        }
        let symbols = SymbolTable::new(
            source,
            observer,
            Duration::from_millis(config.debounce_ms),
        );
        let scheduler = Scheduler::new(
            symbols.view(),
            sink,
            config.bpm as f64,
            Duration::from_millis(config.tick_ms),
        );
        Ok(Self {
            symbols,
            scheduler,
            seed: config.seed,
            targets: HashMap::new(),
        })
    }

    /// Re-analyze one block after an edit. Returns the analysis for
    /// highlighting; as a side effect the symbol table, the automaton, and
    /// the block's playhead are brought up to date. A statement that fails
    /// to build leaves the previous playhead running.
    pub fn update_block(&mut self, block: usize, text: &str) -> Analysis {
        let mut analysis = lang::analyze_block(block, text, &self.symbols.view());

        self.merge_symbols(&analysis);
        let referenced = referenced_identifiers(&analysis, text);
        for gone in self.symbols.update_active_identifiers(block, referenced) {
            self.scheduler.unbind(&gone);
        }

        let target = self.target_variable(block, &analysis);
        if let Some(prev) = self.targets.get(&block) {
            if Some(prev.as_str()) != target.as_deref() {
                self.scheduler.unbind(prev);
                self.targets.remove(&block);
            }
        }

        let Some(target) = target else {
            return analysis;
        };

        let expression = analysis.expression_tokens();
        let playable = expression.iter().any(|t| {
            matches!(
                t.kind,
                SemanticKind::SoundLiteral | SemanticKind::VariableRef
            )
        });
        if !playable {
            // A clean numeric assignment (or comment-only rewrite) means the
            // block deliberately stopped playing; a broken statement keeps
            // its previous playhead instead.
            if analysis.errors.is_empty() {
                self.scheduler.unbind(&target);
                self.targets.remove(&block);
            }
            return analysis;
        }

        match lang::build_automaton(&analysis, self.seed ^ block as u64) {
            Ok(node) => {
                self.scheduler.bind(&target, node);
                self.targets.insert(block, target);
            }
            Err(err) => {
                analysis
                    .errors
                    .push(ErrorToken::new(0, text.len(), block).reason(err.message));
            }
        }
        analysis
    }

    /// A block was deleted from the surface.
    pub fn remove_block(&mut self, block: usize) {
        for gone in self.symbols.remove_block(block) {
            self.scheduler.unbind(&gone);
        }
        if let Some(target) = self.targets.remove(&block) {
            self.scheduler.unbind(&target);
        }
    }

    fn merge_symbols(&self, analysis: &Analysis) {
        let numeric_value = numeric_assignment(analysis);
        for tok in &analysis.tokens {
            match tok.kind {
                SemanticKind::VariableDecl => {
                    let mut patch = SymbolPatch::variable(&tok.text);
                    if let Some(n) = numeric_value {
                        patch = patch.with_value(SymbolValue::Number(n));
                    }
                    self.symbols.merge(patch);
                }
                SemanticKind::SoundLiteral => {
                    let name = tok
                        .text
                        .split('(')
                        .next()
                        .unwrap_or(&tok.text)
                        .trim()
                        .to_string();
                    let params = tok.params.clone().unwrap_or_default();
                    self.symbols
                        .merge(SymbolPatch::sound(&tok.id, SoundQuery { name, params }));
                }
                SemanticKind::FunctionName => {
                    self.symbols.merge(SymbolPatch::function(&tok.text));
                }
                _ => {}
            }
        }
    }

    /// The variable this block drives: the declared one, or the implicit
    /// per-block name for a bare statement. The `~` prefix cannot appear in
    /// an identifier, so implicit names never collide with user variables.
    fn target_variable(&self, block: usize, analysis: &Analysis) -> Option<String> {
        if let Some(decl) = analysis
            .tokens
            .iter()
            .find(|t| t.kind == SemanticKind::VariableDecl)
        {
            return Some(decl.text.clone());
        }
        let has_expression = analysis
            .tokens
            .iter()
            .any(|t| !matches!(t.kind, SemanticKind::Comment));
        has_expression.then(|| format!("~{block}"))
    }

    pub fn symbol(&self, identifier: &str) -> Option<SymbolRecord> {
        self.symbols.get(identifier)
    }

    pub fn play(&mut self) -> bool {
        self.scheduler.start()
    }

    pub fn pause(&mut self) {
        self.scheduler.pause();
    }

    pub fn stop(&mut self) {
        self.scheduler.stop();
    }

    pub fn is_playing(&self) -> bool {
        self.scheduler.is_running()
    }

    pub fn transport(&mut self, signal: TransportSignal) -> Option<Vec<StepEvent>> {
        self.scheduler.handle(signal)
    }
}

/// The RHS value when the statement assigns a plain number or frequency.
fn numeric_assignment(analysis: &Analysis) -> Option<f64> {
    let expr = analysis.expression_tokens();
    match expr.as_slice() {
        [n] if n.kind == SemanticKind::NumberLiteral => n.text.parse().ok(),
        [n, hz] if n.kind == SemanticKind::NumberLiteral && hz.kind == SemanticKind::HzUnit => {
            n.text.parse().ok()
        }
        _ => None,
    }
}

/// Every identifier a block's analysis mentions, including those inside
/// error spans, so a half-typed name keeps its symbol alive.
fn referenced_identifiers(analysis: &Analysis, text: &str) -> HashSet<String> {
    let mut refs = HashSet::new();
    for tok in &analysis.tokens {
        match tok.kind {
            SemanticKind::VariableDecl | SemanticKind::VariableRef | SemanticKind::FunctionName => {
                refs.insert(tok.text.clone());
            }
            SemanticKind::SoundLiteral => {
                refs.insert(tok.id.clone());
            }
            _ => {}
        }
    }
    for err in &analysis.errors {
        let end = (err.start + err.len).min(text.len());
        if let Some(span) = text.get(err.start..end) {
            for ident in lang::lexer::idents_in(span) {
                refs.insert(ident);
            }
        }
    }
    refs
}
