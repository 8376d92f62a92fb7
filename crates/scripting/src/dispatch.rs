//! Function dispatch
//!
//! Runs a resolved function once its arguments are in hand: deprecation
//! notice, permission and arity checks, counter bookkeeping, optional
//! register localization, then the native or attribute handler.

use crate::context::EvalContext;
use crate::eval::{Evaluator, Flow};
use crate::flags::EvalFlags;
use crate::functions::{FunctionCall, FunctionDescriptor, FunctionFlags, FunctionHandler};
use crate::registers::RegisterFlags;
use crate::sink::OutputSink;
use crate::tokens;
use mush_core::Identities;

impl Evaluator<'_> {
    /// Run `fun` with already-evaluated `args`
    ///
    /// Permission is checked after the arguments were produced, so their
    /// side effects (register assignments and the like) have happened even
    /// when the call itself is refused.
    pub fn invoke(
        &self,
        ctx: &mut EvalContext,
        out: &mut OutputSink,
        fun: &FunctionDescriptor,
        args: Vec<String>,
        who: Identities,
        eflags: EvalFlags,
    ) -> Flow {
        let world = self.world();
        let mut args = args;

        if fun.flags.contains(FunctionFlags::DEPRECATED) {
            tracing::warn!(executor = %who.executor, "Deprecated function {} called", fun.name);
            world.notify(
                world.owner(who.executor),
                &format!("Deprecated function {} being used on object {}.", fun.name, who.executor),
            );
        }
        if fun.flags.contains(FunctionFlags::DISABLED) {
            out.push_str(tokens::DISABLED);
            return Flow::Continue;
        }
        let permitted = fun.permission.map_or(true, |allowed| allowed(world, who.executor))
            && (!fun.flags.contains(FunctionFlags::USERFN_ONLY) || eflags.contains(EvalFlags::USERFN));
        if !permitted {
            tracing::debug!(executor = %who.executor, "Permission denied for {}", fun.name);
            out.push_str(tokens::PERMISSION_DENIED);
            return Flow::Continue;
        }

        if fun.min_args == 0 && args.len() == 1 && args[0].is_empty() {
            args.clear();
        }
        if !fun.accepts(args.len()) {
            out.push_str(&tokens::arity(&fun.name, fun.min_args, fun.arg_limit(), args.len()));
            return Flow::Continue;
        }

        if fun.flags.contains(FunctionFlags::LOG_ARGS) {
            tracing::info!(executor = %who.executor, "{}({})", fun.name, args.join(","));
        } else if fun.flags.contains(FunctionFlags::LOG_NAME) {
            tracing::info!(executor = %who.executor, "{}()", fun.name);
        }

        self.session().enter_recursion();
        ctx.fun_recursions += 1;
        let flow = if fun.flags.contains(FunctionFlags::LOCALIZE) {
            ctx.scoped(RegisterFlags::LOCALQ, "localize", |ctx, _| {
                self.run_handler(ctx, out, fun, &args, who, eflags)
            })
        } else {
            self.run_handler(ctx, out, fun, &args, who, eflags)
        };
        ctx.fun_recursions -= 1;
        self.session().leave_recursion();
        flow
    }

    fn run_handler(
        &self,
        ctx: &mut EvalContext,
        out: &mut OutputSink,
        fun: &FunctionDescriptor,
        args: &[String],
        who: Identities,
        eflags: EvalFlags,
    ) -> Flow {
        self.session().count_invocation();
        ctx.fun_invocations += 1;

        match &fun.handler {
            FunctionHandler::Native(handler) => {
                let call = FunctionCall {
                    name: &fun.name,
                    args,
                    who,
                    eflags: (eflags - EvalFlags::FUNCTION_MANDATORY) | EvalFlags::DEFAULT,
                };
                handler(self, ctx, &call, out)
            }
            FunctionHandler::Attribute { object, attribute } => {
                match self.world().get_attribute(*object, attribute) {
                    Some(attr) => self.call_ufun(
                        ctx,
                        out,
                        who,
                        *object,
                        &attr,
                        RegisterFlags::NEWATTR,
                        Some(args),
                        EvalFlags::UDEFAULT,
                    ),
                    None => {
                        tracing::error!(
                            "@function {} refers to missing attribute {}/{}",
                            fun.name,
                            object,
                            attribute
                        );
                        out.push_str(&tokens::missing_attribute(&fun.name, *object, attribute));
                        Flow::Continue
                    }
                }
            }
        }
    }
}
