//! Scanner-evaluator
//!
//! [`Evaluator::process`] walks softcode text once, copying plain runs
//! straight to the output and acting on the active characters:
//!
//! | char | meaning |
//! |------|---------|
//! | `%`  | substitution (`%0`, `%q<name>`, `%n`, ...) |
//! | `[`  | evaluate the enclosed text, functions mandatory |
//! | `(`  | call the function named by the output so far |
//! | `{`  | group; protects commas, braces optionally stripped |
//! | `\`  | take the next character literally |
//! | `$`  | regex capture reference |
//! | ` `  | blank, collapsed when compressing |
//!
//! Nested constructs recurse with a terminator set and leave the cursor
//! on the terminating character for the caller to consume.

use crate::context::{DebugMode, EvalContext};
use crate::flags::{EvalFlags, TermFlags};
use crate::registers::RegisterFlags;
use crate::session::{EvalLimits, Session};
use crate::sink::{markup_closer, strip_markup, OutputSink, ESC_CHAR, TAG_START};
use crate::tokens;
use crate::world::{AttrFlags, Attribute, World};
use mush_core::{Dbref, Identities};
use std::sync::Arc;

/// Whether evaluation may go on
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// A resource limit was hit; every enclosing call unwinds
    Halt,
}

impl Flow {
    pub fn is_halt(self) -> bool {
        self == Self::Halt
    }
}

/// Read position in the text being evaluated
#[derive(Debug, Clone)]
pub struct Cursor<'s> {
    text: &'s str,
    pos: usize,
}

fn is_active(c: char) -> bool {
    matches!(
        c,
        '%' | '{' | '[' | '(' | '\\' | ' ' | '}' | '>' | ']' | ')' | ',' | ';' | '=' | '$'
    ) || c == ESC_CHAR
        || c == TAG_START
}

impl<'s> Cursor<'s> {
    pub fn new(text: &'s str) -> Self {
        Self { text, pos: 0 }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Unconsumed input
    pub fn rest(&self) -> &'s str {
        &self.text[self.pos..]
    }

    pub fn at_end(&self) -> bool {
        self.pos >= self.text.len()
    }

    pub fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    /// Consume and return the next character
    pub fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    /// The character just consumed
    pub fn prev_char(&self) -> Option<char> {
        self.text[..self.pos].chars().next_back()
    }

    fn advance(&mut self, len: usize) {
        self.pos = (self.pos + len).min(self.text.len());
    }

    fn skip_spaces(&mut self) {
        while self.peek() == Some(' ') {
            self.pos += 1;
        }
    }

    /// Consume the run of characters that need no interpretation
    fn take_plain(&mut self) -> &'s str {
        let rest = self.rest();
        let len = rest.find(is_active).unwrap_or(rest.len());
        self.pos += len;
        &rest[..len]
    }
}

/// Result of a top-level evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub output: String,
    /// A resource limit stopped evaluation early
    pub halted: bool,
}

/// Evaluates softcode against a session and a world
#[derive(Clone, Copy)]
pub struct Evaluator<'a> {
    session: &'a Session,
    world: &'a dyn World,
}

impl<'a> Evaluator<'a> {
    pub fn new(session: &'a Session, world: &'a dyn World) -> Self {
        Self { session, world }
    }

    pub fn session(&self) -> &'a Session {
        self.session
    }

    pub fn world(&self) -> &'a dyn World {
        self.world
    }

    pub fn limits(&self) -> &'a EvalLimits {
        self.session.limits()
    }

    /// An empty sink of the configured output capacity
    pub fn new_sink(&self) -> OutputSink {
        OutputSink::new(self.limits().buffer_len.saturating_sub(1))
    }

    /// Evaluate a whole string
    pub fn evaluate(&self, ctx: &mut EvalContext, text: &str, who: Identities, eflags: EvalFlags) -> Evaluation {
        let mut out = self.new_sink();
        let flow = self.evaluate_into(ctx, &mut out, text, who, eflags);
        Evaluation {
            output: out.into_string(),
            halted: flow.is_halt(),
        }
    }

    /// Evaluate a whole string, appending to `out`
    pub fn evaluate_into(
        &self,
        ctx: &mut EvalContext,
        out: &mut OutputSink,
        text: &str,
        who: Identities,
        eflags: EvalFlags,
    ) -> Flow {
        let mut cur = Cursor::new(text);
        self.process(ctx, out, &mut cur, who, eflags, TermFlags::DEFAULT)
    }

    /// Evaluate from `cur` up to the first terminator in `tflags`
    ///
    /// # Arguments
    /// * `out` - receives the result; never grows past its capacity
    /// * `cur` - left on the terminating character, or at end of input
    /// * `who` - executor, caller and enactor for substitutions
    /// * `eflags` - what to interpret
    /// * `tflags` - where to stop
    ///
    /// # Returns
    /// [`Flow::Halt`] if a resource limit was hit
    pub fn process(
        &self,
        ctx: &mut EvalContext,
        out: &mut OutputSink,
        cur: &mut Cursor<'_>,
        who: Identities,
        eflags: EvalFlags,
        tflags: TermFlags,
    ) -> Flow {
        if cur.at_end() {
            return Flow::Continue;
        }
        if self.session.cpu().is_exhausted() {
            self.report_cpu_exhaustion(who, cur.rest());
            return Flow::Halt;
        }

        let mut eflags = eflags;
        if self.world.is_halted(who.executor) {
            eflags = EvalFlags::NOTHING;
        }
        if eflags.contains(EvalFlags::COMPRESS_SPACES) {
            cur.skip_spaces();
        }

        let saved_debugging = ctx.debugging;
        if who.caller != who.executor {
            ctx.debugging = DebugMode::Inherit;
        }

        let flow = if eflags != EvalFlags::NOTHING && out.remaining() < self.limits().safety_margin {
            tracing::trace!(remaining = out.remaining(), "Evaluating into extension buffer");
            let mut extension = self.new_sink();
            let flow = self.scan(ctx, &mut extension, cur, who, eflags, tflags);
            out.push_str(extension.as_str());
            flow
        } else {
            self.scan(ctx, out, cur, who, eflags, tflags)
        };

        ctx.debugging = saved_debugging;
        flow
    }

    fn scan(
        &self,
        ctx: &mut EvalContext,
        out: &mut OutputSink,
        cur: &mut Cursor<'_>,
        who: Identities,
        eflags: EvalFlags,
        tflags: TermFlags,
    ) -> Flow {
        let call_limit = self.limits().call_limit;
        let depth = ctx.call_depth;
        ctx.call_depth += 1;
        if depth > call_limit {
            // The depth counter stays raised: the chain is done for.
            if !out.ends_with(tokens::CALL_LIMIT) {
                out.push_str(tokens::CALL_LIMIT);
            }
            tracing::debug!(executor = %who.executor, depth, "Call limit exceeded");
            return Flow::Halt;
        }

        let mut eflags = eflags;
        if eflags.contains(EvalFlags::DEBUG) {
            ctx.debugging = DebugMode::ForcedOn;
        } else if eflags.contains(EvalFlags::NODEBUG) {
            ctx.debugging = DebugMode::ForcedOff;
        }
        let active = if eflags != EvalFlags::NOTHING {
            self.trace_begin(ctx, cur, who, eflags, tflags)
        } else {
            None
        };
        if cur.peek() != Some('{') {
            eflags.remove(EvalFlags::COMMAND_BRACES);
        }

        let start = out.len();
        let mut scan = Scan {
            ev: *self,
            cur: &mut *cur,
            who,
            eflags,
            tflags,
            start,
            had_space: false,
        };
        let flow = scan.run(ctx, out);
        let Scan { eflags, had_space, .. } = scan;

        if eflags != EvalFlags::NOTHING {
            if eflags.contains(EvalFlags::COMPRESS_SPACES)
                && had_space
                && cur.prev_char() == Some(' ')
                && out.len() > start
                && out.ends_with(" ")
            {
                out.pop_char();
            }
            if let Some(active) = active {
                self.trace_finish(ctx, active, out.tail(start), who.executor);
            }
        }

        if ctx.call_depth <= call_limit {
            ctx.call_depth -= 1;
        }
        flow
    }

    fn report_cpu_exhaustion(&self, who: Identities, code: &str) {
        if !self.session.cpu().take_warning() {
            return;
        }
        if self.world.is_valid(who.enactor) && !self.world.is_quiet(who.enactor) {
            self.world.notify(who.enactor, "CPU usage exceeded.");
        }
        tracing::warn!(
            executor = %who.executor,
            caller = %who.caller,
            enactor = %who.enactor,
            "CPU time limit exceeded evaluating: {}",
            code
        );
    }

    fn notify_unescaped_comma(&self, ctx: &EvalContext, who: Identities) {
        let name = ctx.final_arg_func.as_deref().unwrap_or("?");
        let place = ctx.attrname().map(|a| format!(" in {}", a)).unwrap_or_default();
        let message = format!(
            "Unescaped comma in final arg of {} by {}{}. This behavior is deprecated.",
            name, who.executor, place
        );
        tracing::debug!("{}", message);
        self.world.notify(self.world.owner(who.executor), &message);
    }

    /// Evaluate `attr` stored on `thing` as a nested call
    ///
    /// # Arguments
    /// * `frame` - flags of the frame wrapping the call (`NEWATTR` or `LOCALQ`,
    ///   optionally with `ARGPASS`)
    /// * `args` - bound as `%0`, `%1`, ... in their own frame; `None`
    ///   leaves the caller's arguments visible through `ARGPASS`
    #[allow(clippy::too_many_arguments)]
    pub fn call_ufun(
        &self,
        ctx: &mut EvalContext,
        out: &mut OutputSink,
        who: Identities,
        thing: Dbref,
        attr: &Attribute,
        frame: RegisterFlags,
        args: Option<&[String]>,
        eflags: EvalFlags,
    ) -> Flow {
        let mut eflags = eflags;
        if attr.flags.contains(AttrFlags::DEBUG) {
            eflags |= EvalFlags::DEBUG;
        } else if attr.flags.contains(AttrFlags::NODEBUG) {
            eflags |= EvalFlags::NODEBUG;
        }
        let inner = who.call_into(thing);
        let previous = ctx.set_attrname(Some(format!("{}/{}", thing, attr.name)));

        let flow = ctx.scoped(frame, "call_ufun", |ctx, _| match args {
            Some(args) => ctx.scoped(RegisterFlags::ARG, "ufun args", |ctx, handle| {
                for (i, arg) in args.iter().enumerate() {
                    ctx.regs_mut().set(handle, RegisterFlags::ARG, &i.to_string(), arg, true);
                }
                self.evaluate_into(ctx, out, &attr.text, inner, eflags)
            }),
            None => self.evaluate_into(ctx, out, &attr.text, inner, eflags),
        });

        ctx.set_attrname(previous);
        flow
    }
}

/// State of one `process` call while its loop runs
struct Scan<'a, 'c, 's> {
    ev: Evaluator<'a>,
    cur: &'c mut Cursor<'s>,
    who: Identities,
    eflags: EvalFlags,
    tflags: TermFlags,
    /// Output offset where this call started writing
    start: usize,
    had_space: bool,
}

impl Scan<'_, '_, '_> {
    fn run(&mut self, ctx: &mut EvalContext, out: &mut OutputSink) -> Flow {
        loop {
            let plain = self.cur.take_plain();
            out.push_str(plain);
            let Some(c) = self.cur.peek() else {
                return Flow::Continue;
            };
            if self.terminates(ctx, c) {
                return Flow::Continue;
            }
            let flow = match c {
                '$' => self.dollar(ctx, out),
                '%' => self.percent(ctx, out),
                '{' => self.brace(ctx, out),
                '[' => self.bracket(ctx, out),
                '(' => self.paren(ctx, out),
                ' ' => {
                    self.space(out);
                    Flow::Continue
                }
                '\\' => {
                    self.escape(out);
                    Flow::Continue
                }
                c if c == ESC_CHAR || c == TAG_START => {
                    self.copy_markup(out, c);
                    Flow::Continue
                }
                c => {
                    out.push_char(c);
                    self.cur.bump();
                    Flow::Continue
                }
            };
            if flow.is_halt() {
                return Flow::Halt;
            }
        }
    }

    fn terminates(&mut self, ctx: &EvalContext, c: char) -> bool {
        if self.tflags.stops_at(c) {
            return true;
        }
        if c == ',' && self.tflags.contains(TermFlags::NOT_COMMA) {
            self.ev.notify_unescaped_comma(ctx, self.who);
            self.tflags.remove(TermFlags::NOT_COMMA);
        }
        false
    }

    fn process(&mut self, ctx: &mut EvalContext, out: &mut OutputSink, eflags: EvalFlags, tflags: TermFlags) -> Flow {
        self.ev.process(ctx, out, &mut *self.cur, self.who, eflags, tflags)
    }

    /// Evaluate a `<...>` name into a scratch buffer, consuming the `>`
    fn bracketed_name(&mut self, ctx: &mut EvalContext) -> Option<String> {
        let mut name = self.ev.new_sink();
        if self
            .process(ctx, &mut name, self.eflags - EvalFlags::STRIP_BRACES, TermFlags::GT)
            .is_halt()
        {
            return None;
        }
        if self.cur.peek() == Some('>') {
            self.cur.bump();
        }
        Some(name.into_string())
    }

    fn copy_markup(&mut self, out: &mut OutputSink, open: char) {
        let rest = self.cur.rest();
        let len = markup_closer(open)
            .and_then(|close| rest[open.len_utf8()..].find(close).map(|i| i + open.len_utf8() + close.len_utf8()))
            .unwrap_or(rest.len());
        out.push_str(&rest[..len]);
        self.cur.advance(len);
    }

    fn space(&mut self, out: &mut OutputSink) {
        self.had_space = true;
        out.push_char(' ');
        self.cur.bump();
        let compress = self.eflags.contains(EvalFlags::COMPRESS_SPACES);
        while self.cur.peek() == Some(' ') {
            if !compress {
                out.push_char(' ');
            }
            self.cur.bump();
        }
    }

    fn escape(&mut self, out: &mut OutputSink) {
        if self.eflags.contains(EvalFlags::LITERAL) {
            out.push_char('\\');
            self.cur.bump();
            return;
        }
        if !self.eflags.contains(EvalFlags::EVALUATE) {
            out.push_char('\\');
        }
        self.cur.bump();
        if let Some(c) = self.cur.bump() {
            out.push_char(c);
        }
    }

    fn dollar(&mut self, ctx: &mut EvalContext, out: &mut OutputSink) -> Flow {
        self.cur.bump();
        let captures = self.eflags.contains(EvalFlags::DOLLAR | EvalFlags::EVALUATE)
            && ctx.regs().has_type(RegisterFlags::REGEXP);
        if !captures {
            out.push_char('$');
            if self.cur.peek() == Some('<') {
                return self.process(ctx, out, self.eflags - EvalFlags::STRIP_BRACES, TermFlags::GT);
            }
            return Flow::Continue;
        }

        match self.cur.peek() {
            Some(d) if d.is_ascii_digit() => {
                self.cur.bump();
                if let Some(value) = ctx.regs().capture(d.encode_utf8(&mut [0; 4])) {
                    out.push_str(&value.render());
                }
            }
            Some('<') => {
                self.cur.bump();
                let Some(name) = self.bracketed_name(ctx) else {
                    return Flow::Halt;
                };
                if let Some(value) = ctx.regs().capture(&name) {
                    out.push_str(&value.render());
                }
            }
            _ => {
                out.push_char('$');
            }
        }
        Flow::Continue
    }

    fn percent(&mut self, ctx: &mut EvalContext, out: &mut OutputSink) -> Flow {
        if self.eflags.contains(EvalFlags::LITERAL) {
            out.push_char('%');
            self.cur.bump();
            return Flow::Continue;
        }
        if !self.eflags.contains(EvalFlags::EVALUATE) || out.remaining() == 0 {
            return self.percent_verbatim(ctx, out);
        }

        self.cur.bump();
        let Some(selector) = self.cur.bump() else {
            return Flow::Continue;
        };
        let mark = out.len();
        let flow = self.substitute(ctx, out, selector);
        if selector.is_ascii_uppercase() {
            out.capitalize_from(mark);
        }
        flow
    }

    /// Copy a substitution unevaluated, keeping its argument characters
    fn percent_verbatim(&mut self, ctx: &mut EvalContext, out: &mut OutputSink) -> Flow {
        out.push_char('%');
        self.cur.bump();
        let Some(selector) = self.cur.bump() else {
            return Flow::Continue;
        };
        out.push_char(selector);
        match selector.to_ascii_lowercase() {
            'q' => match self.cur.bump() {
                Some('<') => {
                    out.push_char('<');
                    self.process(ctx, out, self.eflags - EvalFlags::STRIP_BRACES, TermFlags::GT)
                }
                Some(c) => {
                    out.push_char(c);
                    Flow::Continue
                }
                None => Flow::Continue,
            },
            'v' | 'w' | 'x' => {
                if let Some(c) = self.cur.bump() {
                    out.push_char(c);
                }
                Flow::Continue
            }
            _ => Flow::Continue,
        }
    }

    fn substitute(&mut self, ctx: &mut EvalContext, out: &mut OutputSink, selector: char) -> Flow {
        let world = self.ev.world();
        let who = self.who;
        match selector {
            '%' => {
                out.push_char('%');
            }
            ' ' => {
                out.push_str("% ");
            }
            '!' => {
                out.push_str(&who.executor.to_string());
            }
            '@' => {
                out.push_str(&who.caller.to_string());
            }
            '#' => {
                out.push_str(&who.enactor.to_string());
            }
            ':' => {
                if world.is_valid(who.enactor) {
                    out.push_str(&format!("{}:{}", who.enactor, world.creation_time(who.enactor)));
                } else {
                    out.push_str(tokens::NOT_VISIBLE);
                }
            }
            '?' => {
                out.push_str(&format!("{} {}", ctx.fun_invocations, ctx.fun_recursions));
            }
            '~' => push_or_invisible(out, world.accented_name(who.enactor)),
            '+' => {
                out.push_str(&ctx.regs().arg_count().to_string());
            }
            '=' => {
                if let Some(attr) = ctx.attrname() {
                    out.push_str(attr);
                }
            }
            '0'..='9' => {
                let index = selector as usize - '0' as usize;
                if let Some(value) = ctx.regs().env(index) {
                    out.push_str(&value.render());
                }
            }
            'A' | 'a' | 'O' | 'o' | 'P' | 'p' | 'S' | 's' => {
                if world.is_valid(who.enactor) {
                    let gender = world.gender(who.enactor);
                    out.push_str(match selector.to_ascii_lowercase() {
                        'a' => gender.absolute_possessive(),
                        'o' => gender.objective(),
                        'p' => gender.possessive(),
                        _ => gender.subjective(),
                    });
                } else {
                    out.push_str(tokens::NOT_VISIBLE);
                }
            }
            'B' | 'b' => {
                out.push_char(' ');
            }
            'R' | 'r' => {
                out.push_char('\n');
            }
            'T' | 't' => {
                out.push_char('\t');
            }
            'C' | 'c' => {
                if let Some(raw) = ctx.cmd_raw() {
                    out.push_str(raw);
                }
            }
            'U' | 'u' => {
                if let Some(evaled) = ctx.cmd_evaled() {
                    out.push_str(evaled);
                }
            }
            'e' => return self.attribute_substitution(ctx, out),
            'I' | 'i' => self.context_text(ctx, out, RegisterFlags::ITER),
            '$' => self.context_text(ctx, out, RegisterFlags::SWITCH),
            'L' | 'l' => {
                if world.is_valid(who.enactor) {
                    out.push_str(&world.location(who.enactor).to_string());
                } else {
                    out.push_str("#-1");
                }
            }
            'N' | 'n' => push_or_invisible(out, world.name(who.enactor)),
            'K' | 'k' => push_or_invisible(out, world.moniker(who.enactor)),
            'Q' | 'q' => {
                let name = match self.cur.bump() {
                    Some('<') => match self.bracketed_name(ctx) {
                        Some(name) => name,
                        None => return Flow::Halt,
                    },
                    Some(c) => c.to_string(),
                    None => return Flow::Continue,
                };
                if let Some(value) = ctx.regs().getq(&name) {
                    out.push_str(&value.render());
                }
            }
            'V' | 'v' | 'W' | 'w' | 'X' | 'x' => {
                if let Some(c) = self.cur.bump() {
                    let name = format!("{}{}", selector.to_ascii_uppercase(), c.to_ascii_uppercase());
                    if let Some(attr) = world.get_attribute(who.executor, &name) {
                        out.push_str(&attr.text);
                    }
                }
            }
            other => {
                out.push_char(other);
            }
        }
        Flow::Continue
    }

    /// `%e<attr>`: evaluate an attribute of the executor in private registers
    fn attribute_substitution(&mut self, ctx: &mut EvalContext, out: &mut OutputSink) -> Flow {
        if self.cur.peek() != Some('<') {
            return Flow::Continue;
        }
        self.cur.bump();
        let Some(name) = self.bracketed_name(ctx) else {
            return Flow::Halt;
        };
        let name = strip_markup(&name).to_ascii_uppercase();
        let executor = self.who.executor;
        match self.ev.world().get_attribute(executor, &name) {
            Some(attr) => self.ev.call_ufun(
                ctx,
                out,
                Identities::solo(executor),
                executor,
                &attr,
                RegisterFlags::LOCALQ,
                None,
                EvalFlags::DEFAULT,
            ),
            None => Flow::Continue,
        }
    }

    /// `%iN` / `%$N`, with `l` meaning the innermost level
    fn context_text(&mut self, ctx: &mut EvalContext, out: &mut OutputSink, kind: RegisterFlags) {
        let Some(c) = self.cur.bump() else {
            return;
        };
        let regs = ctx.regs();
        let level = regs.iter_level(kind);
        if level < 0 {
            out.push_str(tokens::OUT_OF_RANGE);
            return;
        }
        let wanted = match c {
            'l' | 'L' => level,
            d if d.is_ascii_digit() => d as i64 - '0' as i64,
            _ => {
                out.push_str(tokens::NOT_INTEGER);
                return;
            }
        };
        if wanted > level {
            out.push_str(tokens::OUT_OF_RANGE);
            return;
        }
        if let Some(value) = regs.iter_text(kind, wanted) {
            out.push_str(&value.render());
        }
    }

    fn brace(&mut self, ctx: &mut EvalContext, out: &mut OutputSink) -> Flow {
        if ctx.call_depth > self.ev.limits().call_limit {
            self.cur.bump();
            return Flow::Continue;
        }
        if self.eflags.contains(EvalFlags::LITERAL) {
            out.push_char('{');
            self.cur.bump();
            return Flow::Continue;
        }
        let strip = self
            .eflags
            .intersects(EvalFlags::STRIP_BRACES | EvalFlags::COMMAND_BRACES);
        if !strip {
            out.push_char('{');
        }
        self.cur.bump();
        let inner = if self.eflags.contains(EvalFlags::COMMAND_BRACES) {
            self.eflags - EvalFlags::COMMAND_BRACES
        } else {
            self.eflags - (EvalFlags::STRIP_BRACES | EvalFlags::FUNCTION_CHECK)
        };
        if self.process(ctx, out, inner, TermFlags::BRACE).is_halt() {
            return Flow::Halt;
        }
        if self.cur.peek() == Some('}') {
            if !strip {
                out.push_char('}');
            }
            self.cur.bump();
        }
        self.eflags.remove(EvalFlags::COMMAND_BRACES);
        Flow::Continue
    }

    fn bracket(&mut self, ctx: &mut EvalContext, out: &mut OutputSink) -> Flow {
        if ctx.call_depth > self.ev.limits().call_limit {
            self.cur.bump();
            return Flow::Continue;
        }
        if self.eflags.contains(EvalFlags::LITERAL) {
            out.push_char('[');
            self.cur.bump();
            return Flow::Continue;
        }
        let evaluating = self.eflags.contains(EvalFlags::EVALUATE);
        let inner = if evaluating {
            self.eflags | EvalFlags::FUNCTION_CHECK | EvalFlags::FUNCTION_MANDATORY
        } else {
            out.push_char('[');
            self.eflags - EvalFlags::STRIP_BRACES
        };
        self.cur.bump();
        if self.process(ctx, out, inner, TermFlags::BRACKET).is_halt() {
            return Flow::Halt;
        }
        if self.cur.peek() == Some(']') {
            if !evaluating {
                out.push_char(']');
            }
            self.cur.bump();
        }
        Flow::Continue
    }

    /// Copy `( ... )` through, evaluating the inside with `inner`
    fn copy_parens(&mut self, ctx: &mut EvalContext, out: &mut OutputSink, inner: EvalFlags) -> Flow {
        out.push_char('(');
        if self.cur.peek() == Some(' ') {
            out.push_char(' ');
            self.cur.bump();
        }
        if self.process(ctx, out, inner, TermFlags::PAREN).is_halt() {
            return Flow::Halt;
        }
        if self.cur.peek() == Some(')') {
            if self.eflags.contains(EvalFlags::COMPRESS_SPACES) && self.cur.prev_char() == Some(' ') {
                out.push_char(' ');
            }
            out.push_char(')');
            self.cur.bump();
        }
        Flow::Continue
    }

    /// Skip a function's arguments without evaluating them
    fn discard_args(&mut self, ctx: &mut EvalContext) -> Flow {
        let mut scratch = self.ev.new_sink();
        let flow = self.process(ctx, &mut scratch, EvalFlags::NOTHING, TermFlags::PAREN);
        if self.cur.peek() == Some(')') {
            self.cur.bump();
        }
        flow
    }

    fn paren(&mut self, ctx: &mut EvalContext, out: &mut OutputSink) -> Flow {
        let ev = self.ev;
        if ctx.call_depth > ev.limits().call_limit {
            self.cur.bump();
            return Flow::Continue;
        }
        self.cur.bump();
        if !self
            .eflags
            .contains(EvalFlags::EVALUATE | EvalFlags::FUNCTION_CHECK)
        {
            return self.copy_parens(ctx, out, self.eflags - EvalFlags::STRIP_BRACES);
        }

        self.eflags.remove(EvalFlags::FUNCTION_CHECK);
        let name = out.tail(self.start).to_ascii_uppercase();
        let builtin_only = self.eflags.contains(EvalFlags::BUILTIN_ONLY);
        self.eflags.remove(EvalFlags::BUILTIN_ONLY);

        let Some(fun) = ev.session().functions().lookup(&name, builtin_only).map(Arc::clone) else {
            if self.eflags.contains(EvalFlags::FUNCTION_MANDATORY) {
                out.truncate(self.start);
                out.push_str(&tokens::function_not_found(&name));
                return self.discard_args(ctx);
            }
            return self.copy_parens(ctx, out, self.eflags);
        };
        out.truncate(self.start);

        if !ev.session().invocation_allowed(ctx.fun_invocations) {
            if !out.ends_with(tokens::INVOCATION_LIMIT) {
                out.push_str(tokens::INVOCATION_LIMIT);
            }
            tracing::debug!(executor = %self.who.executor, "Function invocation limit hit calling {}", name);
            let _ = self.discard_args(ctx);
            return Flow::Halt;
        }
        if !ev.session().recursion_allowed(ctx.fun_recursions) {
            out.push_str(tokens::RECURSION_LIMIT);
            tracing::debug!(executor = %self.who.executor, "Function recursion limit hit calling {}", name);
            return self.discard_args(ctx);
        }

        let Some(args) = self.parse_args(ctx, out, &fun) else {
            return Flow::Halt;
        };
        ev.invoke(ctx, out, &fun, args, self.who, self.eflags)
    }

    /// Split and evaluate the arguments of a call, consuming the `)`
    ///
    /// On a halt the partial argument is flushed to `out` so the error
    /// token that caused it stays visible.
    fn parse_args(
        &mut self,
        ctx: &mut EvalContext,
        out: &mut OutputSink,
        fun: &crate::functions::FunctionDescriptor,
    ) -> Option<Vec<String>> {
        use crate::functions::{ArgMode, FunctionFlags};

        let mut aflags = (self.eflags - EvalFlags::FUNCTION_MANDATORY) | EvalFlags::INTERPRETING;
        match fun.arg_mode {
            ArgMode::Evaluated => {}
            ArgMode::NoParse => aflags -= EvalFlags::INTERPRETING,
            ArgMode::Literal => {
                aflags -= EvalFlags::INTERPRETING;
                aflags |= EvalFlags::LITERAL;
            }
        }

        let mut args = Vec::new();
        loop {
            let final_arg = fun.absorbs_commas()
                && fun.arg_limit().map_or(false, |max| args.len() + 1 >= max);
            let tflags = match (final_arg, fun.arg_mode) {
                (false, _) => TermFlags::COMMA | TermFlags::PAREN,
                (true, ArgMode::Literal) => TermFlags::PAREN,
                (true, _) => TermFlags::PAREN | TermFlags::NOT_COMMA,
            };
            let saved = final_arg.then(|| ctx.final_arg_func.replace(fun.name.clone()));

            let mut arg = self.ev.new_sink();
            let flow = self.process(ctx, &mut arg, aflags, tflags);
            if let Some(previous) = saved {
                ctx.final_arg_func = previous;
            }
            if flow.is_halt() {
                out.push_str(arg.as_str());
                return None;
            }

            args.push(if fun.flags.contains(FunctionFlags::STRIP_MARKUP) {
                strip_markup(arg.as_str())
            } else {
                arg.into_string()
            });
            if self.cur.bump() != Some(',') {
                break;
            }
        }
        Some(args)
    }
}

fn push_or_invisible(out: &mut OutputSink, value: Option<String>) {
    match value {
        Some(value) => out.push_str(&value),
        None => out.push_str(tokens::NOT_VISIBLE),
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_plain_runs() {
        let mut cur = Cursor::new("hello world[x]");
        assert_eq!(cur.take_plain(), "hello");
        assert_eq!(cur.peek(), Some(' '));
        cur.bump();
        assert_eq!(cur.take_plain(), "world");
        assert_eq!(cur.bump(), Some('['));
        assert_eq!(cur.prev_char(), Some('['));
        assert_eq!(cur.rest(), "x]");
    }

    #[test]
    fn test_cursor_multibyte() {
        let mut cur = Cursor::new("é(");
        assert_eq!(cur.take_plain(), "é");
        assert_eq!(cur.bump(), Some('('));
        assert!(cur.at_end());
        assert_eq!(cur.bump(), None);
    }

    #[test]
    fn test_active_set() {
        for c in "%{[(\\ }>]),;=$".chars() {
            assert!(is_active(c), "{:?}", c);
        }
        assert!(is_active(ESC_CHAR));
        assert!(!is_active('a'));
        assert!(!is_active('<'));
    }
}
