//! Evaluation context
//!
//! One context accompanies a queued command and everything it evaluates:
//! the per-chain counters, debug state, the command text and the register
//! stack. Several queue entries may hold the same context
//! ([`SharedContext`]); it is torn down when the last holder lets go.

use crate::registers::{copy_stack, FrameHandle, RegisterFlags, RegisterFrame, RegisterStack};
use crate::interner::StringInterner;
use crate::session::Session;
use crate::trace::TraceNode;
use parking_lot::Mutex;
use std::sync::Arc;

/// A context held by several queue entries
pub type SharedContext = Arc<Mutex<EvalContext>>;

/// Debug tracing state of a chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DebugMode {
    /// Follow the executor's DEBUG flag
    #[default]
    Inherit,
    ForcedOn,
    ForcedOff,
}

/// How [`EvalContext::derive`] builds a context from an existing one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Derive {
    /// Hand out the same context again
    Share,
    /// Copy every register kind, reset the counters
    Clone,
    /// Start empty, optionally copying arguments, q-registers and command text
    Fresh {
        copy_env: bool,
        copy_qregs: bool,
        copy_cmds: bool,
    },
}

/// Per-chain evaluation state
#[derive(Debug)]
pub struct EvalContext {
    pub(crate) fun_invocations: usize,
    pub(crate) fun_recursions: usize,
    pub(crate) call_depth: usize,
    pub(crate) debugging: DebugMode,
    pub(crate) nest_depth: usize,
    pub(crate) trace: Vec<TraceNode>,
    /// Function whose final argument is being parsed, for the comma notice
    pub(crate) final_arg_func: Option<String>,
    cmd_raw: Option<String>,
    cmd_evaled: Option<String>,
    attrname: Option<String>,
    regs: RegisterStack,
}

impl EvalContext {
    pub fn new(interner: Arc<StringInterner>) -> Self {
        Self {
            fun_invocations: 0,
            fun_recursions: 0,
            call_depth: 0,
            debugging: DebugMode::Inherit,
            nest_depth: 0,
            trace: Vec::new(),
            final_arg_func: None,
            cmd_raw: None,
            cmd_evaled: None,
            attrname: None,
            regs: RegisterStack::new(interner),
        }
    }

    pub fn into_shared(self) -> SharedContext {
        Arc::new(Mutex::new(self))
    }

    /// Number of holders of a shared context
    pub fn holders(shared: &SharedContext) -> usize {
        Arc::strong_count(shared)
    }

    /// Build a context for a new queue entry from `old`
    ///
    /// # Arguments
    /// * `old` - context of the queuing command, if any
    /// * `mode` - sharing/copying policy
    /// * `extra` - registers passed along explicitly; they win over copied ones
    pub fn derive(
        session: &Session,
        old: Option<&SharedContext>,
        mode: Derive,
        extra: Option<&RegisterFrame>,
    ) -> SharedContext {
        let max_iters = session.limits().max_iters;
        let interner = session.interner();

        match (mode, old) {
            (Derive::Share, Some(old)) => {
                tracing::trace!("Sharing evaluation context ({} holders)", Arc::strong_count(old) + 1);
                Arc::clone(old)
            }
            (Derive::Share, None) => session.new_context().into_shared(),
            (Derive::Clone, old) => {
                let mut ctx = session.new_context();
                let guard = old.map(|o| o.lock());
                let chain = extra
                    .into_iter()
                    .chain(guard.iter().flat_map(|g| g.regs.chain()));
                copy_stack(ctx.regs.root_mut(), interner, chain, RegisterFlags::QUEUE, false, max_iters);
                drop(guard);
                ctx.into_shared()
            }
            (Derive::Fresh { copy_env, copy_qregs, copy_cmds }, old) => {
                let mut ctx = session.new_context();
                if let Some(old) = old {
                    let old = old.lock();
                    if copy_env {
                        copy_stack(ctx.regs.root_mut(), interner, old.regs.chain(), RegisterFlags::ARG, false, max_iters);
                    }
                    if copy_qregs {
                        copy_stack(ctx.regs.root_mut(), interner, old.regs.chain(), RegisterFlags::Q, false, max_iters);
                    }
                    if copy_cmds {
                        ctx.cmd_raw = old.cmd_raw.clone();
                        ctx.cmd_evaled = old.cmd_evaled.clone();
                    }
                }
                if let Some(extra) = extra {
                    copy_stack(ctx.regs.root_mut(), interner, [extra], RegisterFlags::QUEUE, true, max_iters);
                }
                ctx.into_shared()
            }
        }
    }

    pub fn fun_invocations(&self) -> usize {
        self.fun_invocations
    }

    pub fn fun_recursions(&self) -> usize {
        self.fun_recursions
    }

    pub fn call_depth(&self) -> usize {
        self.call_depth
    }

    pub fn debugging(&self) -> DebugMode {
        self.debugging
    }

    pub fn set_debugging(&mut self, mode: DebugMode) {
        self.debugging = mode;
    }

    pub fn nest_depth(&self) -> usize {
        self.nest_depth
    }

    /// Zero the limit counters, e.g. before reusing a context for a new command
    pub fn reset_counters(&mut self) {
        self.fun_invocations = 0;
        self.fun_recursions = 0;
        self.call_depth = 0;
    }

    /// Raw text of the command being run (`%c`)
    pub fn cmd_raw(&self) -> Option<&str> {
        self.cmd_raw.as_deref()
    }

    pub fn set_cmd_raw(&mut self, text: Option<String>) {
        self.cmd_raw = text;
    }

    /// Evaluated text of the command being run (`%u`)
    pub fn cmd_evaled(&self) -> Option<&str> {
        self.cmd_evaled.as_deref()
    }

    pub fn set_cmd_evaled(&mut self, text: Option<String>) {
        self.cmd_evaled = text;
    }

    /// `#N/ATTR` of the attribute being evaluated (`%=`)
    pub fn attrname(&self) -> Option<&str> {
        self.attrname.as_deref()
    }

    /// Replace the attribute name, returning the previous one
    pub fn set_attrname(&mut self, name: Option<String>) -> Option<String> {
        std::mem::replace(&mut self.attrname, name)
    }

    pub fn regs(&self) -> &RegisterStack {
        &self.regs
    }

    pub fn regs_mut(&mut self) -> &mut RegisterStack {
        &mut self.regs
    }

    /// Run `f` with a new register frame on top, then restore it
    pub fn scoped<R>(
        &mut self,
        flags: RegisterFlags,
        label: &'static str,
        f: impl FnOnce(&mut Self, FrameHandle) -> R,
    ) -> R {
        let handle = self.regs.localize(flags, label);
        self.scoped_frame(handle, f)
    }

    /// Like [`scoped`](Self::scoped) for a frame built by the caller
    pub fn scoped_with<R>(&mut self, frame: RegisterFrame, f: impl FnOnce(&mut Self, FrameHandle) -> R) -> R {
        let handle = self.regs.push_frame(frame);
        self.scoped_frame(handle, f)
    }

    fn scoped_frame<R>(&mut self, handle: FrameHandle, f: impl FnOnce(&mut Self, FrameHandle) -> R) -> R {
        let result = f(self, handle);
        if let Err(e) = self.regs.restore(handle) {
            tracing::error!("Register stack corrupted: {}", e);
        }
        result
    }
}

impl Drop for EvalContext {
    fn drop(&mut self) {
        tracing::trace!(
            invocations = self.fun_invocations,
            frames = self.regs.depth(),
            "Evaluation context torn down"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::EvalLimits;

    fn session() -> Session {
        Session::with_builtins(EvalLimits::default())
    }

    fn seeded(session: &Session) -> SharedContext {
        let mut ctx = session.new_context();
        ctx.set_cmd_raw(Some("think %0".into()));
        let regs = ctx.regs_mut();
        regs.setq("A", "qa", 100).unwrap();
        let h = regs.localize(RegisterFlags::ARG | RegisterFlags::ITER, "cmd");
        regs.set(h, RegisterFlags::ARG, "0", "arg0", true);
        regs.set(h, RegisterFlags::ITER, "T0", "item", true);
        ctx.fun_invocations = 17;
        ctx.into_shared()
    }

    #[test]
    fn test_share_bumps_holders() {
        let session = session();
        let old = seeded(&session);
        let shared = EvalContext::derive(&session, Some(&old), Derive::Share, None);
        assert!(Arc::ptr_eq(&old, &shared));
        assert_eq!(EvalContext::holders(&old), 2);
        drop(shared);
        assert_eq!(EvalContext::holders(&old), 1);
    }

    #[test]
    fn test_clone_copies_registers_and_resets_counters() {
        let session = session();
        let old = seeded(&session);
        let cloned = EvalContext::derive(&session, Some(&old), Derive::Clone, None);
        let ctx = cloned.lock();
        assert_eq!(ctx.fun_invocations(), 0);
        assert_eq!(ctx.regs().getq("a").unwrap().render(), "qa");
        assert_eq!(ctx.regs().env(0).unwrap().render(), "arg0");
        assert_eq!(ctx.regs().iter_text(RegisterFlags::ITER, 0).unwrap().render(), "item");
        assert!(ctx.cmd_raw().is_none());
    }

    #[test]
    fn test_fresh_copies_only_requested() {
        let session = session();
        let old = seeded(&session);
        let mode = Derive::Fresh {
            copy_env: false,
            copy_qregs: true,
            copy_cmds: true,
        };
        let mut extra = RegisterFrame::new(RegisterFlags::Q, "passed");
        extra.set_str(session.interner(), RegisterFlags::Q, "A", "override", true);
        let fresh = EvalContext::derive(&session, Some(&old), mode, Some(&extra));
        let ctx = fresh.lock();
        assert!(ctx.regs().env(0).is_none());
        assert_eq!(ctx.regs().getq("A").unwrap().render(), "override");
        assert_eq!(ctx.cmd_raw(), Some("think %0"));
    }

    #[test]
    fn test_scoped_restores_frame() {
        let session = session();
        let mut ctx = session.new_context();
        let depth = ctx.scoped(RegisterFlags::LOCALQ, "test", |ctx, h| {
            ctx.regs_mut().set(h, RegisterFlags::Q, "0", "inside", true);
            ctx.regs().depth()
        });
        assert_eq!(depth, 2);
        assert_eq!(ctx.regs().depth(), 1);
        assert!(ctx.regs().getq("0").is_none());
    }

    #[test]
    fn test_attrname_swap() {
        let session = session();
        let mut ctx = session.new_context();
        assert_eq!(ctx.set_attrname(Some("#1/FOO".into())), None);
        assert_eq!(ctx.set_attrname(None).as_deref(), Some("#1/FOO"));
    }
}
