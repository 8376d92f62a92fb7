//! Debug tracer
//!
//! When tracing is on, every evaluation step records its source text
//! (re-scanned without evaluating) before running. If the step changes
//! anything, the outstanding ancestors are printed as `#N! text :` lines
//! followed by `#N! source => result`. Steps that evaluate to their own
//! source are dropped silently.

use crate::context::{DebugMode, EvalContext};
use crate::eval::{Cursor, Evaluator};
use crate::flags::{EvalFlags, TermFlags};
use mush_core::{Dbref, Identities};

/// A step whose trace line has not been printed yet
#[derive(Debug, Clone)]
pub struct TraceNode {
    pub(crate) executor: Dbref,
    pub(crate) text: String,
}

/// The node opened by the current step
#[derive(Debug)]
pub(crate) struct ActiveTrace {
    text: String,
    source_at: usize,
}

impl Evaluator<'_> {
    /// Tracing is wanted and someone can receive the lines
    pub(crate) fn tracing_enabled(&self, ctx: &EvalContext, executor: Dbref) -> bool {
        let wanted = match ctx.debugging {
            DebugMode::ForcedOn => true,
            DebugMode::ForcedOff => false,
            DebugMode::Inherit => self.world().is_debugging(executor),
        };
        if !wanted {
            return false;
        }
        let world = self.world();
        world.is_connected(world.owner(executor)) || !world.debug_forward_list(executor).is_empty()
    }

    /// Open a trace node for the text at `cur`, if tracing applies
    pub(crate) fn trace_begin(
        &self,
        ctx: &mut EvalContext,
        cur: &Cursor<'_>,
        who: Identities,
        eflags: EvalFlags,
        tflags: TermFlags,
    ) -> Option<ActiveTrace> {
        if !self.tracing_enabled(ctx, who.executor) {
            return None;
        }
        let header = format!("{}!{}", who.executor, " ".repeat(ctx.nest_depth + 1));
        let mut source = self.new_sink();
        source.push_str(&header);
        let mut probe = cur.clone();
        if self
            .process(ctx, &mut source, &mut probe, who, EvalFlags::NOTHING, tflags)
            .is_halt()
        {
            return None;
        }
        let mut text = source.into_string();
        if eflags.contains(EvalFlags::COMPRESS_SPACES) {
            let kept = text.trim_end_matches(' ').len().max(header.len());
            text.truncate(kept);
        }

        ctx.trace.push(TraceNode {
            executor: who.executor,
            text: text.clone(),
        });
        ctx.nest_depth += 1;
        Some(ActiveTrace {
            text,
            source_at: header.len(),
        })
    }

    /// Close the node opened by [`trace_begin`](Self::trace_begin)
    pub(crate) fn trace_finish(&self, ctx: &mut EvalContext, active: ActiveTrace, result: &str, executor: Dbref) {
        ctx.nest_depth = ctx.nest_depth.saturating_sub(1);
        let source = active.text.get(active.source_at..).unwrap_or("");
        if source == result {
            ctx.trace.pop();
            return;
        }
        let pending = std::mem::take(&mut ctx.trace);
        let ancestors = pending.len().saturating_sub(1);
        for node in &pending[..ancestors] {
            self.emit_debug(node.executor, &format!("{} :", node.text));
        }
        self.emit_debug(executor, &format!("{} => {}", active.text, result));
    }

    /// Deliver a trace line to the owner and the forward list
    fn emit_debug(&self, executor: Dbref, line: &str) {
        let world = self.world();
        tracing::debug!(executor = %executor, "{}", line);
        let owner = world.owner(executor);
        if world.is_connected(owner) {
            world.notify(owner, line);
        }
        for target in world.debug_forward_list(executor) {
            world.notify(target, line);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::context::DebugMode;
    use crate::session::{EvalLimits, Session};
    use crate::world::{MemoryWorld, ObjectRecord};
    use mush_core::Dbref;

    const OWNER: Dbref = Dbref(1);
    const GADGET: Dbref = Dbref(2);

    fn world() -> MemoryWorld {
        let world = MemoryWorld::new();
        world.add_object(ObjectRecord::new(1, "Owner"));
        let mut gadget = ObjectRecord::new(2, "Gadget");
        gadget.owner = 1;
        world.add_object(gadget);
        world.set_flag(GADGET, "DEBUG", true);
        world
    }

    #[test]
    fn test_tracing_needs_a_listener() {
        let session = Session::with_builtins(EvalLimits::default());
        let world = world();
        let ev = session.evaluator(&world);
        let ctx = session.new_context();
        assert!(!ev.tracing_enabled(&ctx, GADGET));

        world.set_debug_forward(GADGET, &[Dbref(3)]);
        assert!(ev.tracing_enabled(&ctx, GADGET));

        world.set_debug_forward(GADGET, &[]);
        world.set_flag(OWNER, "CONNECTED", true);
        assert!(ev.tracing_enabled(&ctx, GADGET));
    }

    #[test]
    fn test_forced_off_wins() {
        let session = Session::with_builtins(EvalLimits::default());
        let world = world();
        world.set_flag(OWNER, "CONNECTED", true);
        let ev = session.evaluator(&world);
        let mut ctx = session.new_context();
        ctx.set_debugging(DebugMode::ForcedOff);
        assert!(!ev.tracing_enabled(&ctx, GADGET));
        ctx.set_debugging(DebugMode::ForcedOn);
        assert!(ev.tracing_enabled(&ctx, OWNER));
    }
}
