//! Process-wide evaluator state
//!
//! A [`Session`] bundles the immutable function table, the string
//! interner, the configured limits, the CPU budget and the aggregate
//! counters every evaluation context reports into.

use crate::context::EvalContext;
use crate::eval::Evaluator;
use crate::functions::FunctionTable;
use crate::interner::StringInterner;
use crate::world::World;
use mush_config::ServerConfig;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Aggregate counters may run to this multiple of the per-context limits
pub const AGGREGATE_FACTOR: usize = 5;

/// Evaluator limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvalLimits {
    pub function_invocation_limit: usize,
    pub function_recursion_limit: usize,
    pub call_limit: usize,
    pub max_named_qregs: usize,
    pub buffer_len: usize,
    pub safety_margin: usize,
    pub max_iters: usize,
    pub register_key_len: usize,
}

impl Default for EvalLimits {
    fn default() -> Self {
        Self::from(&ServerConfig::default())
    }
}

impl From<&ServerConfig> for EvalLimits {
    fn from(config: &ServerConfig) -> Self {
        Self {
            function_invocation_limit: config.function_invocation_limit,
            function_recursion_limit: config.function_recursion_limit,
            call_limit: config.call_limit,
            max_named_qregs: config.max_named_qregs,
            buffer_len: config.buffer_len,
            safety_margin: config.safety_margin,
            max_iters: config.max_iters,
            register_key_len: config.register_key_len,
        }
    }
}

/// Cooperative CPU budget
///
/// A watchdog trips the flag when a command has run too long; the
/// evaluator checks it on every call and unwinds.
#[derive(Debug, Clone, Default)]
pub struct CpuBudget {
    exhausted: Arc<AtomicBool>,
    warned: Arc<AtomicBool>,
}

impl CpuBudget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the budget used up
    pub fn trip(&self) {
        self.exhausted.store(true, Ordering::Release);
    }

    /// Start a fresh budget for the next command
    pub fn reset(&self) {
        self.exhausted.store(false, Ordering::Release);
        self.warned.store(false, Ordering::Release);
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted.load(Ordering::Acquire)
    }

    /// True for the first caller after the budget ran out
    pub(crate) fn take_warning(&self) -> bool {
        !self.warned.swap(true, Ordering::AcqRel)
    }
}

/// Shared evaluator state
#[derive(Debug)]
pub struct Session {
    functions: Arc<FunctionTable>,
    interner: Arc<StringInterner>,
    limits: EvalLimits,
    cpu: CpuBudget,
    invocations: AtomicUsize,
    recursions: AtomicUsize,
}

impl Session {
    pub fn new(functions: FunctionTable, limits: EvalLimits) -> Self {
        tracing::debug!("Session created with {} functions", functions.len());
        Self {
            functions: Arc::new(functions),
            interner: Arc::new(StringInterner::new()),
            limits,
            cpu: CpuBudget::new(),
            invocations: AtomicUsize::new(0),
            recursions: AtomicUsize::new(0),
        }
    }

    /// Session with the standard function library
    pub fn with_builtins(limits: EvalLimits) -> Self {
        Self::new(FunctionTable::with_builtins(), limits)
    }

    pub fn functions(&self) -> &Arc<FunctionTable> {
        &self.functions
    }

    pub fn interner(&self) -> &Arc<StringInterner> {
        &self.interner
    }

    pub fn limits(&self) -> &EvalLimits {
        &self.limits
    }

    pub fn cpu(&self) -> &CpuBudget {
        &self.cpu
    }

    /// A new, empty evaluation context
    pub fn new_context(&self) -> EvalContext {
        EvalContext::new(Arc::clone(&self.interner))
    }

    pub fn evaluator<'a>(&'a self, world: &'a dyn World) -> Evaluator<'a> {
        Evaluator::new(self, world)
    }

    /// Reset the per-command state: CPU budget and aggregate counters
    ///
    /// Interned strings no longer held by any context are released too.
    pub fn begin_command(&self) {
        self.cpu.reset();
        self.reset_aggregate_counters();
        self.interner.purge();
    }

    pub fn reset_aggregate_counters(&self) {
        self.invocations.store(0, Ordering::Relaxed);
        self.recursions.store(0, Ordering::Relaxed);
    }

    /// Function invocations across all contexts
    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::Relaxed)
    }

    /// Current function nesting across all contexts
    pub fn recursions(&self) -> usize {
        self.recursions.load(Ordering::Relaxed)
    }

    pub(crate) fn count_invocation(&self) {
        self.invocations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn enter_recursion(&self) {
        self.recursions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn leave_recursion(&self) {
        self.recursions.fetch_sub(1, Ordering::Relaxed);
    }

    /// Is another function call allowed for a context that has made `made`?
    pub(crate) fn invocation_allowed(&self, made: usize) -> bool {
        let limit = self.limits.function_invocation_limit;
        made < limit && self.invocations() < limit.saturating_mul(AGGREGATE_FACTOR)
    }

    /// May a context nested `depth` calls deep go one deeper?
    pub(crate) fn recursion_allowed(&self, depth: usize) -> bool {
        let limit = self.limits.function_recursion_limit;
        depth + 1 < limit && self.recursions() + 1 < limit.saturating_mul(AGGREGATE_FACTOR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limits_from_config() {
        let config = ServerConfig {
            call_limit: 7,
            ..ServerConfig::default()
        };
        let limits = EvalLimits::from(&config);
        assert_eq!(limits.call_limit, 7);
        assert_eq!(limits.buffer_len, 8192);
    }

    #[test]
    fn test_cpu_budget_warns_once() {
        let cpu = CpuBudget::new();
        let watchdog = cpu.clone();
        assert!(!cpu.is_exhausted());
        watchdog.trip();
        assert!(cpu.is_exhausted());
        assert!(cpu.take_warning());
        assert!(!cpu.take_warning());
        cpu.reset();
        assert!(!cpu.is_exhausted());
        assert!(cpu.take_warning());
    }

    #[test]
    fn test_aggregate_guards() {
        let limits = EvalLimits {
            function_invocation_limit: 2,
            function_recursion_limit: 3,
            ..EvalLimits::default()
        };
        let session = Session::new(FunctionTable::builder().build(), limits);
        assert!(session.invocation_allowed(1));
        assert!(!session.invocation_allowed(2));
        for _ in 0..10 {
            session.count_invocation();
        }
        assert!(!session.invocation_allowed(0));
        session.begin_command();
        assert!(session.invocation_allowed(0));

        assert!(session.recursion_allowed(1));
        assert!(!session.recursion_allowed(2));
    }

    #[test]
    fn test_begin_command_releases_unused_strings() {
        let session = Session::new(FunctionTable::builder().build(), EvalLimits::default());
        let baseline = session.interner().len();
        let held = session.interner().intern("HELD");
        session.interner().intern("SCRATCH");
        session.begin_command();
        assert_eq!(session.interner().len(), baseline + 1);
        assert!(session.interner().contains(&held));
    }
}
