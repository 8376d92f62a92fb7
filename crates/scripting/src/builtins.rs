//! Built-in softcode functions
//!
//! The standard library registered into every [`FunctionTable`]
//! built with [`FunctionTable::with_builtins`]:
//!
//! - math: `add sub mul div mod abs rand`
//! - strings: `strlen lcstr ucstr cat lit s`
//! - registers: `setq setr r localize`
//! - user functions: `u ulocal`
//! - iteration and branching: `iter itext inum ilev switch stext slev`
//! - regular expressions: `regmatch regedit regeditall`
//! - debugging: `trace`
//!
//! [`FunctionTable`]: crate::functions::FunctionTable
//! [`FunctionTable::with_builtins`]: crate::functions::FunctionTable::with_builtins

use crate::context::EvalContext;
use crate::error::ScriptError;
use crate::eval::{Evaluator, Flow};
use crate::flags::EvalFlags;
use crate::functions::{ArgMode, FunctionCall, FunctionDescriptor, FunctionTableBuilder, NativeFn};
use crate::registers::{valid_key, Captures, RegisterFlags, RegisterFrame};
use crate::sink::{strip_markup, OutputSink};
use crate::tokens;
use mush_core::Dbref;
use rand::Rng;
use regex::Regex;

const UNLIMITED: i32 = FunctionDescriptor::UNLIMITED;

/// Register the whole library
pub fn register_all(builder: &mut FunctionTableBuilder) {
    register_math_functions(builder);
    register_string_functions(builder);
    register_register_functions(builder);
    register_ufun_functions(builder);
    register_context_functions(builder);
    register_regexp_functions(builder);
}

fn add(builder: &mut FunctionTableBuilder, descriptor: FunctionDescriptor) {
    if let Err(e) = builder.register(descriptor) {
        tracing::error!("Built-in function table: {}", e);
    }
}

fn native(name: &str, min: usize, max: i32, handler: NativeFn) -> FunctionDescriptor {
    FunctionDescriptor::native(name, min, max, handler)
}

/// Register math functions
fn register_math_functions(builder: &mut FunctionTableBuilder) {
    add(builder, native("add", 2, UNLIMITED, builtin_add));
    add(builder, native("sub", 2, 2, builtin_sub));
    add(builder, native("mul", 2, UNLIMITED, builtin_mul));
    add(builder, native("div", 2, 2, builtin_div));
    add(builder, native("mod", 2, 2, builtin_mod));
    add(builder, native("abs", 1, 1, builtin_abs));
    add(builder, native("rand", 1, 2, builtin_rand));
}

/// Register string functions
fn register_string_functions(builder: &mut FunctionTableBuilder) {
    add(builder, native("strlen", 1, -1, builtin_strlen));
    add(builder, native("lcstr", 1, -1, builtin_lcstr));
    add(builder, native("ucstr", 1, -1, builtin_ucstr));
    add(builder, native("cat", 0, UNLIMITED, builtin_cat));
    add(builder, native("lit", 1, -1, builtin_lit).with_mode(ArgMode::Literal));
    add(builder, native("s", 1, -1, builtin_s));
}

/// Register q-register functions
fn register_register_functions(builder: &mut FunctionTableBuilder) {
    add(builder, native("setq", 2, UNLIMITED, builtin_setq));
    add(builder, native("setr", 2, UNLIMITED, builtin_setr));
    add(builder, native("r", 1, 1, builtin_r));
    add(builder, native("localize", 1, -1, builtin_localize).with_mode(ArgMode::NoParse));
}

/// Register user-function calls
fn register_ufun_functions(builder: &mut FunctionTableBuilder) {
    add(builder, native("u", 1, 33, builtin_u));
    add(builder, native("ulocal", 1, 33, builtin_ulocal));
}

/// Register iteration, switch and debugging functions
fn register_context_functions(builder: &mut FunctionTableBuilder) {
    add(builder, native("iter", 2, 4, builtin_iter).with_mode(ArgMode::NoParse));
    add(builder, native("itext", 1, 1, builtin_itext));
    add(builder, native("inum", 1, 1, builtin_inum));
    add(builder, native("ilev", 0, 0, builtin_ilev));
    add(builder, native("switch", 3, UNLIMITED, builtin_switch).with_mode(ArgMode::NoParse));
    add(builder, native("stext", 1, 1, builtin_stext));
    add(builder, native("slev", 0, 0, builtin_slev));
    add(builder, native("trace", 1, -1, builtin_trace).with_mode(ArgMode::NoParse));
}

/// Register regular expression functions
fn register_regexp_functions(builder: &mut FunctionTableBuilder) {
    add(builder, native("regmatch", 2, 3, builtin_regmatch));
    add(builder, native("regedit", 3, UNLIMITED, builtin_regedit).with_mode(ArgMode::NoParse));
    add(builder, native("regeditall", 3, UNLIMITED, builtin_regeditall).with_mode(ArgMode::NoParse));
}

// ========== Helpers ==========

/// Evaluate a raw argument of a no-parse function
fn evaluated(ev: &Evaluator<'_>, ctx: &mut EvalContext, call: &FunctionCall<'_>, text: &str) -> Option<String> {
    let mut sink = ev.new_sink();
    if ev.evaluate_into(ctx, &mut sink, text, call.who, call.eflags).is_halt() {
        return None;
    }
    Some(sink.into_string())
}

/// Empty text counts as zero
fn parse_number(s: &str) -> Option<f64> {
    let s = s.trim();
    if s.is_empty() {
        return Some(0.0);
    }
    s.parse::<f64>().ok().filter(|n| n.is_finite())
}

fn parse_integer(s: &str) -> Option<i64> {
    let s = s.trim();
    if s.is_empty() {
        return Some(0);
    }
    s.parse().ok()
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        return format!("{}", n as i64);
    }
    let text = format!("{:.6}", n);
    text.trim_end_matches('0').trim_end_matches('.').to_string()
}

fn numbers(args: &[String]) -> Option<Vec<f64>> {
    args.iter().map(|a| parse_number(a)).collect()
}

/// Case-insensitive glob match with `*`, `?` and `\` escapes
pub fn wild_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.to_lowercase().chars().collect();
    let t: Vec<char> = text.to_lowercase().chars().collect();
    let (mut pi, mut ti) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while ti < t.len() {
        let step = match p.get(pi) {
            Some('*') => {
                backtrack = Some((pi, ti));
                pi += 1;
                continue;
            }
            Some('\\') if p.get(pi + 1) == Some(&t[ti]) => 2,
            Some('?') => 1,
            Some(&c) if c == t[ti] && c != '\\' => 1,
            _ => 0,
        };
        if step > 0 {
            pi += step;
            ti += 1;
        } else if let Some((star, matched)) = backtrack {
            pi = star + 1;
            ti = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }
    p[pi..].iter().all(|&c| c == '*')
}

/// Resolve `me`, `here` or `#N`
fn resolve_object(ev: &Evaluator<'_>, executor: Dbref, name: &str) -> Option<Dbref> {
    let world = ev.world();
    let obj = match name.trim().to_ascii_lowercase().as_str() {
        "me" => executor,
        "here" => world.location(executor),
        other => Dbref::parse(other)?,
    };
    world.is_valid(obj).then_some(obj)
}

// ========== Math ==========

fn builtin_add(_: &Evaluator<'_>, _: &mut EvalContext, call: &FunctionCall<'_>, out: &mut OutputSink) -> Flow {
    match numbers(call.args) {
        Some(values) => out.push_str(&format_number(values.iter().sum())),
        None => out.push_str(tokens::NOT_NUMBERS),
    };
    Flow::Continue
}

fn builtin_sub(_: &Evaluator<'_>, _: &mut EvalContext, call: &FunctionCall<'_>, out: &mut OutputSink) -> Flow {
    match (parse_number(call.arg(0)), parse_number(call.arg(1))) {
        (Some(a), Some(b)) => out.push_str(&format_number(a - b)),
        _ => out.push_str(tokens::NOT_NUMBERS),
    };
    Flow::Continue
}

fn builtin_mul(_: &Evaluator<'_>, _: &mut EvalContext, call: &FunctionCall<'_>, out: &mut OutputSink) -> Flow {
    match numbers(call.args) {
        Some(values) => out.push_str(&format_number(values.iter().product())),
        None => out.push_str(tokens::NOT_NUMBERS),
    };
    Flow::Continue
}

fn integer_pair(call: &FunctionCall<'_>, out: &mut OutputSink) -> Option<(i64, i64)> {
    let (Some(a), Some(b)) = (parse_integer(call.arg(0)), parse_integer(call.arg(1))) else {
        out.push_str(tokens::NOT_INTEGERS);
        return None;
    };
    if b == 0 {
        out.push_str(tokens::DIVIDE_BY_ZERO);
        return None;
    }
    Some((a, b))
}

fn builtin_div(_: &Evaluator<'_>, _: &mut EvalContext, call: &FunctionCall<'_>, out: &mut OutputSink) -> Flow {
    if let Some((a, b)) = integer_pair(call, out) {
        out.push_str(&a.wrapping_div(b).to_string());
    }
    Flow::Continue
}

/// Remainder taking the sign of the divisor
fn builtin_mod(_: &Evaluator<'_>, _: &mut EvalContext, call: &FunctionCall<'_>, out: &mut OutputSink) -> Flow {
    if let Some((a, b)) = integer_pair(call, out) {
        let r = a.wrapping_rem(b);
        let r = if r != 0 && (r < 0) != (b < 0) { r + b } else { r };
        out.push_str(&r.to_string());
    }
    Flow::Continue
}

fn builtin_abs(_: &Evaluator<'_>, _: &mut EvalContext, call: &FunctionCall<'_>, out: &mut OutputSink) -> Flow {
    match parse_number(call.arg(0)) {
        Some(n) => out.push_str(&format_number(n.abs())),
        None => out.push_str(tokens::NOT_NUMBERS),
    };
    Flow::Continue
}

/// `rand(n)` is 0..n-1, `rand(lo, hi)` is inclusive
fn builtin_rand(_: &Evaluator<'_>, _: &mut EvalContext, call: &FunctionCall<'_>, out: &mut OutputSink) -> Flow {
    let range = if call.args.len() == 1 {
        parse_integer(call.arg(0)).map(|n| (0, n.saturating_sub(1)))
    } else {
        parse_integer(call.arg(0)).zip(parse_integer(call.arg(1)))
    };
    match range {
        None => out.push_str(tokens::NOT_INTEGERS),
        Some((lo, hi)) if lo > hi => out.push_str(tokens::OUT_OF_RANGE),
        Some((lo, hi)) => out.push_str(&rand::thread_rng().gen_range(lo..=hi).to_string()),
    };
    Flow::Continue
}

// ========== Strings ==========

fn builtin_strlen(_: &Evaluator<'_>, _: &mut EvalContext, call: &FunctionCall<'_>, out: &mut OutputSink) -> Flow {
    out.push_str(&strip_markup(call.arg(0)).chars().count().to_string());
    Flow::Continue
}

fn builtin_lcstr(_: &Evaluator<'_>, _: &mut EvalContext, call: &FunctionCall<'_>, out: &mut OutputSink) -> Flow {
    out.push_str(&call.arg(0).to_lowercase());
    Flow::Continue
}

fn builtin_ucstr(_: &Evaluator<'_>, _: &mut EvalContext, call: &FunctionCall<'_>, out: &mut OutputSink) -> Flow {
    out.push_str(&call.arg(0).to_uppercase());
    Flow::Continue
}

fn builtin_cat(_: &Evaluator<'_>, _: &mut EvalContext, call: &FunctionCall<'_>, out: &mut OutputSink) -> Flow {
    out.push_str(&call.args.join(" "));
    Flow::Continue
}

fn builtin_lit(_: &Evaluator<'_>, _: &mut EvalContext, call: &FunctionCall<'_>, out: &mut OutputSink) -> Flow {
    out.push_str(call.arg(0));
    Flow::Continue
}

/// Evaluate the (already evaluated) argument once more
fn builtin_s(ev: &Evaluator<'_>, ctx: &mut EvalContext, call: &FunctionCall<'_>, out: &mut OutputSink) -> Flow {
    ev.evaluate_into(ctx, out, call.arg(0), call.who, call.eflags)
}

// ========== Registers ==========

fn set_registers(ev: &Evaluator<'_>, ctx: &mut EvalContext, call: &FunctionCall<'_>, out: &mut OutputSink) -> bool {
    if call.args.len() % 2 != 0 {
        out.push_str(&format!(
            "#-1 FUNCTION ({}) EXPECTS AN EVEN NUMBER OF ARGUMENTS",
            call.name
        ));
        return false;
    }
    let limits = ev.limits();
    for pair in call.args.chunks_exact(2) {
        let Ok(key) = valid_key(&pair[0], limits.register_key_len) else {
            out.push_str(tokens::INVALID_REGISTER);
            return false;
        };
        if let Err(e) = ctx.regs_mut().setq(&key, &pair[1], limits.max_named_qregs) {
            tracing::debug!(executor = %call.who.executor, "{}", e);
            out.push_str(tokens::TOO_MANY_REGISTERS);
            return false;
        }
    }
    true
}

fn builtin_setq(ev: &Evaluator<'_>, ctx: &mut EvalContext, call: &FunctionCall<'_>, out: &mut OutputSink) -> Flow {
    set_registers(ev, ctx, call, out);
    Flow::Continue
}

/// Like setq(), returning the first value
fn builtin_setr(ev: &Evaluator<'_>, ctx: &mut EvalContext, call: &FunctionCall<'_>, out: &mut OutputSink) -> Flow {
    if set_registers(ev, ctx, call, out) {
        out.push_str(call.arg(1));
    }
    Flow::Continue
}

fn builtin_r(_: &Evaluator<'_>, ctx: &mut EvalContext, call: &FunctionCall<'_>, out: &mut OutputSink) -> Flow {
    if let Some(value) = ctx.regs().getq(call.arg(0).trim()) {
        out.push_str(&value.render());
    }
    Flow::Continue
}

fn builtin_localize(ev: &Evaluator<'_>, ctx: &mut EvalContext, call: &FunctionCall<'_>, out: &mut OutputSink) -> Flow {
    ctx.scoped(RegisterFlags::LOCALQ, "localize", |ctx, _| {
        ev.evaluate_into(ctx, out, call.arg(0), call.who, call.eflags)
    })
}

// ========== User functions ==========

fn call_user(ev: &Evaluator<'_>, ctx: &mut EvalContext, call: &FunctionCall<'_>, out: &mut OutputSink, frame: RegisterFlags) -> Flow {
    let executor = call.who.executor;
    let target = call.arg(0);
    let (object, attr_name) = match target.split_once('/') {
        Some((object, attr)) => (resolve_object(ev, executor, object), attr),
        None => (Some(executor), target),
    };
    let Some(object) = object else {
        out.push_str(tokens::NOT_VISIBLE);
        return Flow::Continue;
    };
    let Some(attr) = ev.world().get_attribute(object, attr_name.trim()) else {
        return Flow::Continue;
    };
    if !ev.world().can_evaluate(executor, object, &attr) {
        out.push_str(tokens::PERMISSION_DENIED);
        return Flow::Continue;
    }
    ev.call_ufun(ctx, out, call.who, object, &attr, frame, Some(&call.args[1..]), EvalFlags::DEFAULT)
}

fn builtin_u(ev: &Evaluator<'_>, ctx: &mut EvalContext, call: &FunctionCall<'_>, out: &mut OutputSink) -> Flow {
    call_user(ev, ctx, call, out, RegisterFlags::NEWATTR)
}

/// u() with private q-registers
fn builtin_ulocal(ev: &Evaluator<'_>, ctx: &mut EvalContext, call: &FunctionCall<'_>, out: &mut OutputSink) -> Flow {
    call_user(ev, ctx, call, out, RegisterFlags::LOCALQ)
}

// ========== Iteration, switch, trace ==========

fn builtin_iter(ev: &Evaluator<'_>, ctx: &mut EvalContext, call: &FunctionCall<'_>, out: &mut OutputSink) -> Flow {
    let Some(list) = evaluated(ev, ctx, call, call.arg(0)) else {
        return Flow::Halt;
    };
    let delim = match call.args.get(2) {
        Some(text) => match evaluated(ev, ctx, call, text) {
            Some(d) => d.chars().next().unwrap_or(' '),
            None => return Flow::Halt,
        },
        None => ' ',
    };
    let osep = match call.args.get(3) {
        Some(text) => match evaluated(ev, ctx, call, text) {
            Some(sep) => sep,
            None => return Flow::Halt,
        },
        None => " ".to_string(),
    };
    let items: Vec<&str> = if delim == ' ' {
        list.split_whitespace().collect()
    } else {
        list.split(delim).collect()
    };
    if list.trim().is_empty() {
        return Flow::Continue;
    }

    let body = call.arg(1);
    ctx.scoped(RegisterFlags::ITER, "iter", |ctx, handle| {
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                out.push_str(&osep);
            }
            ctx.regs_mut().set(handle, RegisterFlags::ITER, "T0", item, true);
            ctx.regs_mut().set_int(handle, RegisterFlags::ITER, "N0", i as i64 + 1, true);
            if ev.evaluate_into(ctx, out, body, call.who, call.eflags).is_halt() {
                return Flow::Halt;
            }
        }
        Flow::Continue
    })
}

/// Shared by itext() and stext()
fn context_text(ctx: &EvalContext, call: &FunctionCall<'_>, out: &mut OutputSink, kind: RegisterFlags) {
    let Some(wanted) = parse_integer(call.arg(0)) else {
        out.push_str(tokens::NOT_INTEGER);
        return;
    };
    let level = ctx.regs().iter_level(kind);
    if wanted < 0 || wanted > level {
        out.push_str(tokens::OUT_OF_RANGE);
        return;
    }
    if let Some(value) = ctx.regs().iter_text(kind, wanted) {
        out.push_str(&value.render());
    }
}

fn builtin_itext(_: &Evaluator<'_>, ctx: &mut EvalContext, call: &FunctionCall<'_>, out: &mut OutputSink) -> Flow {
    context_text(ctx, call, out, RegisterFlags::ITER);
    Flow::Continue
}

fn builtin_inum(_: &Evaluator<'_>, ctx: &mut EvalContext, call: &FunctionCall<'_>, out: &mut OutputSink) -> Flow {
    let Some(wanted) = parse_integer(call.arg(0)) else {
        out.push_str(tokens::NOT_INTEGER);
        return Flow::Continue;
    };
    let level = ctx.regs().iter_level(RegisterFlags::ITER);
    if wanted < 0 || wanted > level {
        out.push_str(tokens::OUT_OF_RANGE);
        return Flow::Continue;
    }
    if let Some(n) = ctx.regs().iter_number(RegisterFlags::ITER, wanted) {
        out.push_str(&n.to_string());
    }
    Flow::Continue
}

fn builtin_ilev(_: &Evaluator<'_>, ctx: &mut EvalContext, _: &FunctionCall<'_>, out: &mut OutputSink) -> Flow {
    out.push_str(&ctx.regs().iter_level(RegisterFlags::ITER).to_string());
    Flow::Continue
}

fn run_switch_branch(
    ev: &Evaluator<'_>,
    ctx: &mut EvalContext,
    call: &FunctionCall<'_>,
    out: &mut OutputSink,
    subject: &str,
    body: &str,
) -> Flow {
    ctx.scoped(RegisterFlags::SWITCH, "switch", |ctx, handle| {
        ctx.regs_mut().set(handle, RegisterFlags::SWITCH, "T0", subject, true);
        ev.evaluate_into(ctx, out, body, call.who, call.eflags)
    })
}

/// First matching wildcard pattern wins; an odd trailing argument is the default
fn builtin_switch(ev: &Evaluator<'_>, ctx: &mut EvalContext, call: &FunctionCall<'_>, out: &mut OutputSink) -> Flow {
    let Some(subject) = evaluated(ev, ctx, call, call.arg(0)) else {
        return Flow::Halt;
    };
    let mut cases = call.args[1..].chunks_exact(2);
    for case in cases.by_ref() {
        let Some(pattern) = evaluated(ev, ctx, call, &case[0]) else {
            return Flow::Halt;
        };
        if wild_match(&pattern, &subject) {
            return run_switch_branch(ev, ctx, call, out, &subject, &case[1]);
        }
    }
    match cases.remainder() {
        [default] => run_switch_branch(ev, ctx, call, out, &subject, default),
        _ => Flow::Continue,
    }
}

fn builtin_stext(_: &Evaluator<'_>, ctx: &mut EvalContext, call: &FunctionCall<'_>, out: &mut OutputSink) -> Flow {
    context_text(ctx, call, out, RegisterFlags::SWITCH);
    Flow::Continue
}

fn builtin_slev(_: &Evaluator<'_>, ctx: &mut EvalContext, _: &FunctionCall<'_>, out: &mut OutputSink) -> Flow {
    out.push_str(&ctx.regs().iter_level(RegisterFlags::SWITCH).to_string());
    Flow::Continue
}

/// Evaluate the argument with debug tracing forced on
fn builtin_trace(ev: &Evaluator<'_>, ctx: &mut EvalContext, call: &FunctionCall<'_>, out: &mut OutputSink) -> Flow {
    let previous = ctx.debugging();
    let flow = ev.evaluate_into(ctx, out, call.arg(0), call.who, call.eflags | EvalFlags::DEBUG);
    ctx.set_debugging(previous);
    flow
}

// ========== Regular expressions ==========

fn compile(pattern: &str, out: &mut OutputSink) -> Option<Regex> {
    match Regex::new(pattern).map_err(ScriptError::from) {
        Ok(re) => Some(re),
        Err(e) => {
            tracing::debug!("Rejected pattern {:?}: {}", pattern, e);
            out.push_str(tokens::BAD_REGEXP);
            None
        }
    }
}

/// `regmatch(string, regexp[, registers])`
///
/// Registers are listed as `name` (capture by position) or
/// `group:name`; `-1` skips a position.
fn builtin_regmatch(ev: &Evaluator<'_>, ctx: &mut EvalContext, call: &FunctionCall<'_>, out: &mut OutputSink) -> Flow {
    let Some(re) = compile(call.arg(1), out) else {
        return Flow::Continue;
    };
    let Some(caps) = re.captures(call.arg(0)) else {
        out.push_str("0");
        return Flow::Continue;
    };

    let limits = ev.limits();
    for (i, entry) in call.arg(2).split_whitespace().enumerate() {
        let (group, register) = match entry.split_once(':') {
            Some((group, register)) => (group.to_string(), register),
            None => (i.to_string(), entry),
        };
        if register == "-1" {
            continue;
        }
        let value = match group.parse::<usize>() {
            Ok(n) => caps.get(n),
            Err(_) => caps.name(&group),
        }
        .map_or("", |m| m.as_str());
        let Ok(key) = valid_key(register, limits.register_key_len) else {
            out.push_str(tokens::INVALID_REGISTER);
            return Flow::Continue;
        };
        if ctx.regs_mut().setq(&key, value, limits.max_named_qregs).is_err() {
            out.push_str(tokens::TOO_MANY_REGISTERS);
            return Flow::Continue;
        }
    }
    out.push_str("1");
    Flow::Continue
}

/// Replace matches with the replacement evaluated against each match's captures
fn regedit(ev: &Evaluator<'_>, ctx: &mut EvalContext, call: &FunctionCall<'_>, out: &mut OutputSink, all: bool) -> Flow {
    let Some(mut subject) = evaluated(ev, ctx, call, call.arg(0)) else {
        return Flow::Halt;
    };
    let interner = ev.session().interner();

    for pair in call.args[1..].chunks(2) {
        let Some(pattern) = evaluated(ev, ctx, call, &pair[0]) else {
            return Flow::Halt;
        };
        let Some(re) = compile(&pattern, out) else {
            return Flow::Continue;
        };
        let replacement = pair.get(1).map_or("", String::as_str);

        let mut edited = String::with_capacity(subject.len());
        let mut last = 0;
        for caps in re.captures_iter(&subject) {
            let Some(whole) = caps.get(0) else { continue };
            edited.push_str(&subject[last..whole.start()]);
            let mut frame = RegisterFrame::new(RegisterFlags::REGEXP, "regedit");
            frame.set_captures(interner, &Captures::from_match(&re, &caps));
            let mut piece = ev.new_sink();
            let flow = ctx.scoped_with(frame, |ctx, _| {
                ev.evaluate_into(ctx, &mut piece, replacement, call.who, call.eflags)
            });
            edited.push_str(piece.as_str());
            last = whole.end();
            if flow.is_halt() {
                out.push_str(&edited);
                return Flow::Halt;
            }
            if !all {
                break;
            }
        }
        edited.push_str(&subject[last..]);
        subject = edited;
    }
    out.push_str(&subject);
    Flow::Continue
}

fn builtin_regedit(ev: &Evaluator<'_>, ctx: &mut EvalContext, call: &FunctionCall<'_>, out: &mut OutputSink) -> Flow {
    regedit(ev, ctx, call, out, false)
}

fn builtin_regeditall(ev: &Evaluator<'_>, ctx: &mut EvalContext, call: &FunctionCall<'_>, out: &mut OutputSink) -> Flow {
    regedit(ev, ctx, call, out, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(3.0), "3");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(2.5), "2.5");
        assert_eq!(format_number(1.0 / 3.0), "0.333333");
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number(""), Some(0.0));
        assert_eq!(parse_number(" 4 "), Some(4.0));
        assert_eq!(parse_number("x"), None);
        assert_eq!(parse_number("inf"), None);
    }

    #[test]
    fn test_wild_match() {
        assert!(wild_match("*", ""));
        assert!(wild_match("a*", "apple"));
        assert!(wild_match("A?PLE", "apple"));
        assert!(wild_match("*le", "apple"));
        assert!(wild_match("a*p*e", "apple"));
        assert!(!wild_match("b*", "apple"));
        assert!(!wild_match("a?", "apple"));
        assert!(wild_match("\\*", "*"));
        assert!(!wild_match("\\*", "x"));
    }
}
