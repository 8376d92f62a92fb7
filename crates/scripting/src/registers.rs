//! Register stack
//!
//! Softcode keeps five kinds of named values: q-registers (`%q0`,
//! `%q<name>`), regex captures (`$1`), iteration and switch context
//! (`%i0`, `%$0`) and positional arguments (`%0`). They live in frames
//! stacked innermost-last. Each frame says which kinds it carries and
//! where lookups of a given kind must stop:
//!
//! - `NEWATTR` ends every lookup except q-registers (a new attribute
//!   body cannot see its caller's arguments or loop context)
//! - `QSTOP` ends q-register lookups (`localize()`, `ulocal()`)
//! - `ARGPASS` lets argument lookups continue past a `NEWATTR` frame
//! - `LET` frames only take q-register writes for names they already hold
//!
//! The bottom frame is created with the stack and never removed.

use crate::error::{Result, ScriptError};
use crate::interner::{Interned, StringInterner};
use bitflags::bitflags;
use std::borrow::Cow;
use std::sync::Arc;

bitflags! {
    /// Frame kinds and boundary markers
    #[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
    pub struct RegisterFlags: u32 {
        const Q = 1 << 0;
        const REGEXP = 1 << 1;
        const SWITCH = 1 << 2;
        const ITER = 1 << 3;
        const ARG = 1 << 4;

        const NEWATTR = 1 << 8;
        const QSTOP = 1 << 9;
        const LET = 1 << 10;
        const ARGPASS = 1 << 11;

        const TYPES = Self::Q.bits()
            | Self::REGEXP.bits()
            | Self::SWITCH.bits()
            | Self::ITER.bits()
            | Self::ARG.bits();
        /// Private q-registers for `localize()` and friends
        const LOCALQ = Self::Q.bits() | Self::QSTOP.bits();
        /// Root frame of a queue entry
        const QUEUE = Self::TYPES.bits();
        /// Fully sealed frame: nothing outside is visible
        const ISOLATE = Self::QUEUE.bits() | Self::QSTOP.bits() | Self::NEWATTR.bits();
    }
}

/// A stored register value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegValue {
    Str(Interned),
    Int(i64),
}

impl RegValue {
    pub fn render(&self) -> Cow<'_, str> {
        match self {
            Self::Str(s) => Cow::Borrowed(&**s),
            Self::Int(n) => Cow::Owned(n.to_string()),
        }
    }

    /// Integer view; text yields its leading integer or 0
    pub fn as_int(&self) -> i64 {
        match self {
            Self::Int(n) => *n,
            Self::Str(s) => {
                let s = s.trim_start();
                let end = s
                    .char_indices()
                    .find(|&(i, c)| !(c.is_ascii_digit() || (i == 0 && (c == '-' || c == '+'))))
                    .map_or(s.len(), |(i, _)| i);
                s[..end].parse().unwrap_or(0)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct RegEntry {
    pub name: Interned,
    pub kind: RegisterFlags,
    pub value: RegValue,
}

/// Is `name` a named register rather than one of `0`-`9`/`A`-`Z`?
pub fn is_named_register(name: &str) -> bool {
    let mut chars = name.chars();
    !matches!((chars.next(), chars.next()), (Some(c), None) if c.is_ascii_alphanumeric())
}

fn is_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || "_-.#'`?!@$&*+/|~^".contains(c)
}

/// Canonical form of a register name
pub fn normalize_key(name: &str) -> String {
    if name == "-" {
        return "?".into();
    }
    name.chars()
        .map(|c| {
            if is_key_char(c) {
                c.to_ascii_uppercase()
            } else {
                '?'
            }
        })
        .collect()
}

/// Validate and upper-case a register name
pub fn valid_key(name: &str, max_len: usize) -> Result<String> {
    if name.is_empty() || name.len() > max_len || name == "-" || !name.chars().all(is_key_char) {
        return Err(ScriptError::InvalidRegisterName(name.into()));
    }
    Ok(name.to_ascii_uppercase())
}

/// Capture groups of one regex match, ready to load into a frame
#[derive(Debug, Clone, Default)]
pub struct Captures {
    pub numbered: Vec<Option<String>>,
    pub named: Vec<(String, String)>,
}

impl Captures {
    pub fn from_match(re: &regex::Regex, caps: &regex::Captures<'_>) -> Self {
        let numbered = caps
            .iter()
            .map(|group| group.map(|m| m.as_str().to_string()))
            .collect();
        let named = re
            .capture_names()
            .flatten()
            .filter_map(|name| caps.name(name).map(|m| (name.to_string(), m.as_str().to_string())))
            .collect();
        Self { numbered, named }
    }
}

/// One frame of the register stack
#[derive(Debug, Clone)]
pub struct RegisterFrame {
    flags: RegisterFlags,
    label: &'static str,
    entries: Vec<RegEntry>,
    qcount: usize,
}

impl RegisterFrame {
    pub fn new(flags: RegisterFlags, label: &'static str) -> Self {
        Self {
            flags,
            label,
            entries: Vec::new(),
            qcount: 0,
        }
    }

    pub fn flags(&self) -> RegisterFlags {
        self.flags
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Number of stored values
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    /// Number of named q-registers stored here
    pub fn qcount(&self) -> usize {
        self.qcount
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries, oldest first
    pub fn entries(&self) -> impl DoubleEndedIterator<Item = &RegEntry> {
        self.entries.iter()
    }

    /// Find an entry whose kind overlaps `kind`
    pub fn find(&self, kind: RegisterFlags, name: &str) -> Option<&RegEntry> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.kind.intersects(kind) && &*e.name == name)
    }

    pub fn lookup(&self, kind: RegisterFlags, name: &str) -> Option<&RegValue> {
        self.find(kind, &name.to_ascii_uppercase()).map(|e| &e.value)
    }

    /// Store a value; an existing entry is replaced only if `overwrite`
    pub fn set_value(&mut self, kind: RegisterFlags, name: Interned, value: RegValue, overwrite: bool) {
        let kind = kind & RegisterFlags::TYPES;
        if let Some(entry) = self
            .entries
            .iter_mut()
            .rev()
            .find(|e| e.kind.intersects(kind) && e.name == name)
        {
            if overwrite {
                entry.value = value;
            }
            return;
        }
        if kind.contains(RegisterFlags::Q) && is_named_register(&name) {
            self.qcount += 1;
        }
        self.entries.push(RegEntry { name, kind, value });
    }

    pub fn set_str(&mut self, interner: &StringInterner, kind: RegisterFlags, name: &str, value: &str, overwrite: bool) {
        let name = interner.intern(&name.to_ascii_uppercase());
        self.set_value(kind, name, RegValue::Str(interner.intern(value)), overwrite);
    }

    pub fn set_int(&mut self, interner: &StringInterner, kind: RegisterFlags, name: &str, value: i64, overwrite: bool) {
        let name = interner.intern(&name.to_ascii_uppercase());
        self.set_value(kind, name, RegValue::Int(value), overwrite);
    }

    /// Load regex captures as entries `0`, `1`, ... plus any named groups
    pub fn set_captures(&mut self, interner: &StringInterner, captures: &Captures) {
        for (i, group) in captures.numbered.iter().enumerate() {
            if let Some(text) = group {
                self.set_str(interner, RegisterFlags::REGEXP, &i.to_string(), text, true);
            }
        }
        for (name, text) in &captures.named {
            self.set_str(interner, RegisterFlags::REGEXP, name, text, true);
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.qcount = 0;
    }

    /// Remove all entries of the given kinds
    pub fn clear_type(&mut self, kind: RegisterFlags) {
        self.entries.retain(|e| !e.kind.intersects(kind));
        self.qcount = self
            .entries
            .iter()
            .filter(|e| e.kind.contains(RegisterFlags::Q) && is_named_register(&e.name))
            .count();
    }

    /// Copy this frame's q-registers into `dst`, overwriting
    pub fn qcopy_into(&self, dst: &mut RegisterFrame) {
        for entry in self.entries.iter().filter(|e| e.kind.contains(RegisterFlags::Q)) {
            dst.set_value(RegisterFlags::Q, Arc::clone(&entry.name), entry.value.clone(), true);
        }
    }
}

/// Copy registers from a frame chain (innermost first) into `dst`
///
/// Iteration and switch entries are renumbered so the copied levels sit
/// above each other rather than colliding; levels at or past `max_iters`
/// are dropped. Arguments are only taken up to the first frame that
/// carries them, and `overwrite` applies to that first frame only.
pub fn copy_stack<'a>(
    dst: &mut RegisterFrame,
    interner: &StringInterner,
    chain: impl IntoIterator<Item = &'a RegisterFrame>,
    types: RegisterFlags,
    overwrite: bool,
    max_iters: usize,
) {
    let mut chain = chain.into_iter().peekable();
    let mut types = types & RegisterFlags::TYPES;
    let mut overwrite = overwrite;

    if overwrite && types.contains(RegisterFlags::ARG) {
        if let Some(first) = chain.peek() {
            if first.flags.contains(RegisterFlags::ARG) {
                dst.clear_type(RegisterFlags::ARG);
            }
        }
    }

    let (mut smax, mut imax) = (0usize, 0usize);
    for frame in chain {
        let (mut scount, mut icount) = (smax, imax);
        for entry in frame.entries.iter().rev() {
            if !entry.kind.intersects(types) {
                continue;
            }
            if entry.kind.intersects(RegisterFlags::SWITCH | RegisterFlags::ITER) {
                let is_switch = entry.kind.contains(RegisterFlags::SWITCH);
                let mut chars = entry.name.chars();
                let Some(prefix) = chars.next() else { continue };
                let Ok(level) = chars.as_str().parse::<usize>() else { continue };
                let shifted = level + if is_switch { smax } else { imax };
                if prefix == 'T' {
                    let counter = if is_switch { &mut scount } else { &mut icount };
                    *counter = (*counter).max(shifted + 1);
                }
                if shifted < max_iters {
                    let name = interner.intern(&format!("{}{}", prefix, shifted));
                    dst.set_value(entry.kind, name, entry.value.clone(), true);
                }
            } else {
                dst.set_value(entry.kind, Arc::clone(&entry.name), entry.value.clone(), overwrite);
            }
        }
        smax = scount;
        imax = icount;
        if frame.flags.contains(RegisterFlags::ARG) {
            types.remove(RegisterFlags::ARG);
        }
        overwrite = false;
    }
}

/// Position of a pushed frame; restore in reverse order of localizing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "a localized frame must be restored"]
pub struct FrameHandle(usize);

/// The frame stack owned by one evaluation context
#[derive(Debug)]
pub struct RegisterStack {
    frames: Vec<RegisterFrame>,
    interner: Arc<StringInterner>,
}

impl RegisterStack {
    pub fn new(interner: Arc<StringInterner>) -> Self {
        Self {
            frames: vec![RegisterFrame::new(RegisterFlags::QUEUE, "root")],
            interner,
        }
    }

    pub fn interner(&self) -> &Arc<StringInterner> {
        &self.interner
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Frames from innermost to outermost
    pub fn chain(&self) -> impl Iterator<Item = &RegisterFrame> {
        self.frames.iter().rev()
    }

    pub fn root_mut(&mut self) -> &mut RegisterFrame {
        &mut self.frames[0]
    }

    /// Push an empty frame
    pub fn localize(&mut self, flags: RegisterFlags, label: &'static str) -> FrameHandle {
        self.push_frame(RegisterFrame::new(flags, label))
    }

    /// Push a frame built elsewhere
    pub fn push_frame(&mut self, frame: RegisterFrame) -> FrameHandle {
        tracing::trace!(label = frame.label, depth = self.frames.len(), "Localizing register frame");
        self.frames.push(frame);
        FrameHandle(self.frames.len() - 1)
    }

    /// Pop the frame `handle` refers to, which must be on top
    pub fn restore(&mut self, handle: FrameHandle) -> Result<RegisterFrame> {
        let top = self.frames.len() - 1;
        if handle.0 == 0 {
            return Err(ScriptError::RootFrame);
        }
        if handle.0 != top {
            return Err(ScriptError::FrameOrder {
                expected: top,
                found: handle.0,
            });
        }
        self.frames.pop().ok_or(ScriptError::RootFrame)
    }

    pub fn frame(&self, handle: FrameHandle) -> Option<&RegisterFrame> {
        self.frames.get(handle.0)
    }

    pub fn frame_mut(&mut self, handle: FrameHandle) -> Option<&mut RegisterFrame> {
        self.frames.get_mut(handle.0)
    }

    /// Store a string value in the frame `handle` refers to
    pub fn set(&mut self, handle: FrameHandle, kind: RegisterFlags, name: &str, value: &str, overwrite: bool) {
        let interner = Arc::clone(&self.interner);
        if let Some(frame) = self.frames.get_mut(handle.0) {
            frame.set_str(&interner, kind, name, value, overwrite);
        }
    }

    pub fn set_int(&mut self, handle: FrameHandle, kind: RegisterFlags, name: &str, value: i64, overwrite: bool) {
        let interner = Arc::clone(&self.interner);
        if let Some(frame) = self.frames.get_mut(handle.0) {
            frame.set_int(&interner, kind, name, value, overwrite);
        }
    }

    /// Generic typed lookup, honouring each kind's boundaries
    ///
    /// Iteration and switch values are addressed as `T<level>` / `N<level>`.
    pub fn get(&self, kind: RegisterFlags, name: &str) -> Option<Cow<'_, str>> {
        let key = name.to_ascii_uppercase();
        if kind.contains(RegisterFlags::Q) {
            return self.getq(&key).map(RegValue::render);
        }
        if kind.contains(RegisterFlags::REGEXP) {
            return self.capture(&key).map(RegValue::render);
        }
        if kind.contains(RegisterFlags::ARG) {
            let index = key.parse().ok()?;
            return self.env(index).map(RegValue::render);
        }
        let kind = kind & (RegisterFlags::ITER | RegisterFlags::SWITCH);
        let mut chars = key.chars();
        let prefix = chars.next()?;
        let level = chars.as_str().parse().ok()?;
        match prefix {
            'T' => self.iter_text(kind, level).map(RegValue::render),
            'N' => self
                .iter_number(kind, level)
                .map(|n| Cow::Owned(n.to_string())),
            _ => None,
        }
    }

    /// Q-register lookup; stops at `QSTOP`
    pub fn getq(&self, name: &str) -> Option<&RegValue> {
        let key = name.to_ascii_uppercase();
        for frame in self.chain() {
            if frame.flags.contains(RegisterFlags::Q) {
                if let Some(entry) = frame.find(RegisterFlags::Q, &key) {
                    return Some(&entry.value);
                }
            }
            if frame.flags.contains(RegisterFlags::QSTOP) {
                break;
            }
        }
        None
    }

    /// Assign a q-register in the nearest writable frame
    pub fn setq(&mut self, name: &str, value: &str, max_named: usize) -> Result<()> {
        let key = name.to_ascii_uppercase();
        let used = self
            .chain()
            .find(|f| f.flags & (RegisterFlags::Q | RegisterFlags::LET) == RegisterFlags::Q)
            .map_or(0, RegisterFrame::qcount);
        if used >= max_named && is_named_register(&key) && self.getq(&key).is_none() {
            return Err(ScriptError::TooManyRegisters { limit: max_named });
        }

        let target = self
            .frames
            .iter()
            .rposition(|f| {
                f.flags.contains(RegisterFlags::Q)
                    && (!f.flags.contains(RegisterFlags::LET) || f.find(RegisterFlags::Q, &key).is_some())
            })
            .unwrap_or(0);
        let interner = Arc::clone(&self.interner);
        self.frames[target].set_str(&interner, RegisterFlags::Q, &key, value, true);
        Ok(())
    }

    /// Positional argument `%N`
    ///
    /// The first frame carrying arguments answers, even when it lacks the
    /// index. `NEWATTR` without `ARGPASS` hides outer arguments.
    pub fn env(&self, index: usize) -> Option<&RegValue> {
        let key = index.to_string();
        for frame in self.chain() {
            if frame.flags.contains(RegisterFlags::ARG) {
                return frame.find(RegisterFlags::ARG, &key).map(|e| &e.value);
            }
            if frame.flags.contains(RegisterFlags::NEWATTR) && !frame.flags.contains(RegisterFlags::ARGPASS) {
                break;
            }
        }
        None
    }

    /// Number of positional arguments (`%+`)
    pub fn arg_count(&self) -> usize {
        for frame in self.chain() {
            if frame.flags.contains(RegisterFlags::ARG) {
                return frame
                    .entries
                    .iter()
                    .filter(|e| e.kind.contains(RegisterFlags::ARG))
                    .filter_map(|e| e.name.parse::<usize>().ok())
                    .map(|n| n + 1)
                    .max()
                    .unwrap_or(0);
            }
            if frame.flags.contains(RegisterFlags::NEWATTR) && !frame.flags.contains(RegisterFlags::ARGPASS) {
                break;
            }
        }
        0
    }

    /// Regex capture; only the innermost capture frame is consulted
    pub fn capture(&self, name: &str) -> Option<&RegValue> {
        let key = name.to_ascii_uppercase();
        for frame in self.chain() {
            if frame.flags.contains(RegisterFlags::REGEXP) {
                return frame.find(RegisterFlags::REGEXP, &key).map(|e| &e.value);
            }
            if frame.flags.contains(RegisterFlags::NEWATTR) {
                break;
            }
        }
        None
    }

    /// Iteration/switch text at `level`, retrying one level up on a miss
    pub fn iter_text(&self, kind: RegisterFlags, level: i64) -> Option<&RegValue> {
        self.iter_lookup(kind, 'T', level)
    }

    /// Iteration/switch position at `level`
    pub fn iter_number(&self, kind: RegisterFlags, level: i64) -> Option<i64> {
        self.iter_lookup(kind, 'N', level).map(RegValue::as_int)
    }

    fn iter_lookup(&self, kind: RegisterFlags, prefix: char, level: i64) -> Option<&RegValue> {
        let mut level = level;
        for frame in self.chain() {
            if level < 0 {
                break;
            }
            if frame.flags.intersects(kind) {
                let key = format!("{}{}", prefix, level);
                if let Some(entry) = frame.find(kind, &key) {
                    return Some(&entry.value);
                }
                level -= 1;
            }
            if frame.flags.contains(RegisterFlags::NEWATTR) {
                break;
            }
        }
        None
    }

    /// Current nesting depth of iteration or switch context, -1 when none
    pub fn iter_level(&self, kind: RegisterFlags) -> i64 {
        let mut level = -1;
        for frame in self.chain() {
            if frame.flags.intersects(kind) {
                level += frame
                    .entries
                    .iter()
                    .filter(|e| e.kind.intersects(kind) && e.name.starts_with('T'))
                    .count() as i64;
            }
            if frame.flags.contains(RegisterFlags::NEWATTR) {
                break;
            }
        }
        level
    }

    /// Is any value of `kind` reachable?
    pub fn has_type(&self, kind: RegisterFlags) -> bool {
        let breaker = if kind.contains(RegisterFlags::Q) {
            RegisterFlags::QSTOP
        } else {
            RegisterFlags::NEWATTR
        };
        for frame in self.chain() {
            if frame.flags.intersects(kind) && frame.entries.iter().any(|e| e.kind.intersects(kind)) {
                return true;
            }
            if frame.flags.intersects(breaker) {
                if kind.contains(RegisterFlags::ARG) && frame.flags.contains(RegisterFlags::ARGPASS) {
                    continue;
                }
                return false;
            }
        }
        false
    }

    /// Every frame and value, innermost first, for debugging
    pub fn dump(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for (depth, frame) in self.frames.iter().enumerate().rev() {
            lines.push(format!(
                "frame {} '{}' {:?} ({} values)",
                depth,
                frame.label,
                frame.flags,
                frame.count()
            ));
            for entry in frame.entries.iter().rev() {
                lines.push(format!("  {:?} {} = {}", entry.kind, entry.name, entry.value.render()));
            }
        }
        lines
    }
}

impl Drop for RegisterStack {
    fn drop(&mut self) {
        if self.frames.len() > 1 {
            tracing::debug!(
                depth = self.frames.len(),
                "Register stack dropped with frames still localized"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stack() -> RegisterStack {
        RegisterStack::new(Arc::new(StringInterner::new()))
    }

    #[test]
    fn test_setq_getq_case_insensitive() {
        let mut regs = stack();
        regs.setq("a", "apple", 100).unwrap();
        assert_eq!(regs.getq("A").unwrap().render(), "apple");
        regs.setq("Total", "5", 100).unwrap();
        assert_eq!(regs.get(RegisterFlags::Q, "total").unwrap(), "5");
    }

    #[test]
    fn test_localize_hides_and_restores() {
        let mut regs = stack();
        regs.setq("0", "outer", 100).unwrap();
        let h = regs.localize(RegisterFlags::LOCALQ, "localize");
        assert!(regs.getq("0").is_none());
        regs.setq("0", "inner", 100).unwrap();
        assert_eq!(regs.getq("0").unwrap().render(), "inner");
        regs.restore(h).unwrap();
        assert_eq!(regs.getq("0").unwrap().render(), "outer");
    }

    #[test]
    fn test_plain_q_frame_reads_through() {
        let mut regs = stack();
        regs.setq("x", "outer", 100).unwrap();
        let h = regs.localize(RegisterFlags::Q, "scratch");
        assert_eq!(regs.getq("x").unwrap().render(), "outer");
        regs.restore(h).unwrap();
    }

    #[test]
    fn test_restore_out_of_order_fails() {
        let mut regs = stack();
        let first = regs.localize(RegisterFlags::Q, "a");
        let second = regs.localize(RegisterFlags::Q, "b");
        assert!(matches!(
            regs.restore(first),
            Err(ScriptError::FrameOrder { expected: 2, found: 1 })
        ));
        regs.restore(second).unwrap();
        regs.restore(first).unwrap();
        assert_eq!(regs.depth(), 1);
    }

    #[test]
    fn test_let_frame_only_takes_existing_names() {
        let mut regs = stack();
        let h = regs.localize(RegisterFlags::Q | RegisterFlags::LET, "let");
        regs.set(h, RegisterFlags::Q, "mine", "1", true);
        regs.setq("mine", "2", 100).unwrap();
        regs.setq("other", "3", 100).unwrap();
        let frame = regs.frame(h).unwrap();
        assert_eq!(frame.lookup(RegisterFlags::Q, "mine").unwrap().render(), "2");
        assert!(frame.lookup(RegisterFlags::Q, "other").is_none());
        regs.restore(h).unwrap();
        assert_eq!(regs.getq("other").unwrap().render(), "3");
        assert!(regs.getq("mine").is_none());
    }

    #[test]
    fn test_named_register_capacity() {
        let mut regs = stack();
        regs.setq("one", "1", 2).unwrap();
        regs.setq("two", "2", 2).unwrap();
        assert!(matches!(
            regs.setq("three", "3", 2),
            Err(ScriptError::TooManyRegisters { limit: 2 })
        ));
        // existing names and single-character registers are still fine
        regs.setq("one", "uno", 2).unwrap();
        regs.setq("z", "zed", 2).unwrap();
    }

    #[test]
    fn test_args_stop_at_newattr() {
        let mut regs = stack();
        let outer = regs.localize(RegisterFlags::ARG, "outer");
        regs.set(outer, RegisterFlags::ARG, "0", "zero", true);
        regs.set(outer, RegisterFlags::ARG, "2", "two", true);
        assert_eq!(regs.env(0).unwrap().render(), "zero");
        assert_eq!(regs.arg_count(), 3);

        let sealed = regs.localize(RegisterFlags::NEWATTR, "ufun");
        assert!(regs.env(0).is_none());
        assert_eq!(regs.arg_count(), 0);
        regs.restore(sealed).unwrap();

        let pass = regs.localize(RegisterFlags::NEWATTR | RegisterFlags::ARGPASS, "pass");
        assert_eq!(regs.env(2).unwrap().render(), "two");
        assert!(regs.has_type(RegisterFlags::ARG));
        regs.restore(pass).unwrap();
        regs.restore(outer).unwrap();
    }

    #[test]
    fn test_first_arg_frame_answers_even_on_miss() {
        let mut regs = stack();
        let outer = regs.localize(RegisterFlags::ARG, "outer");
        regs.set(outer, RegisterFlags::ARG, "1", "outer-one", true);
        let inner = regs.localize(RegisterFlags::ARG, "inner");
        regs.set(inner, RegisterFlags::ARG, "0", "inner-zero", true);
        assert!(regs.env(1).is_none());
        regs.restore(inner).unwrap();
        regs.restore(outer).unwrap();
    }

    #[test]
    fn test_iteration_levels_retry_upwards() {
        let mut regs = stack();
        let outer = regs.localize(RegisterFlags::ITER, "iter");
        regs.set(outer, RegisterFlags::ITER, "T0", "a", true);
        regs.set_int(outer, RegisterFlags::ITER, "N0", 1, true);
        let inner = regs.localize(RegisterFlags::ITER, "iter");
        regs.set(inner, RegisterFlags::ITER, "T0", "x", true);
        regs.set_int(inner, RegisterFlags::ITER, "N0", 3, true);

        assert_eq!(regs.iter_level(RegisterFlags::ITER), 1);
        assert_eq!(regs.iter_text(RegisterFlags::ITER, 0).unwrap().render(), "x");
        // level 1 misses in the inner frame and is retried one frame out
        assert_eq!(regs.iter_text(RegisterFlags::ITER, 1).unwrap().render(), "a");
        assert_eq!(regs.iter_number(RegisterFlags::ITER, 1), Some(1));
        assert_eq!(regs.get(RegisterFlags::ITER, "n0").unwrap(), "3");
        assert!(regs.iter_text(RegisterFlags::ITER, 2).is_none());
        assert_eq!(regs.iter_level(RegisterFlags::SWITCH), -1);
        regs.restore(inner).unwrap();
        regs.restore(outer).unwrap();
    }

    #[test]
    fn test_captures_only_innermost_frame() {
        let interner = Arc::new(StringInterner::new());
        let mut regs = RegisterStack::new(Arc::clone(&interner));
        let re = regex::Regex::new(r"(?P<word>\w+)-(\d+)").unwrap();
        let caps = re.captures("abc-42").unwrap();
        let mut frame = RegisterFrame::new(RegisterFlags::REGEXP, "regexp");
        frame.set_captures(&interner, &Captures::from_match(&re, &caps));
        let outer = regs.push_frame(frame);
        assert_eq!(regs.capture("2").unwrap().render(), "42");
        assert_eq!(regs.capture("word").unwrap().render(), "abc");

        let inner = regs.localize(RegisterFlags::REGEXP, "regexp");
        assert!(regs.capture("2").is_none());
        regs.restore(inner).unwrap();
        regs.restore(outer).unwrap();
    }

    #[test]
    fn test_has_type_breakers() {
        let mut regs = stack();
        regs.setq("0", "x", 100).unwrap();
        assert!(regs.has_type(RegisterFlags::Q));
        let h = regs.localize(RegisterFlags::LOCALQ, "local");
        assert!(!regs.has_type(RegisterFlags::Q));
        assert!(!regs.has_type(RegisterFlags::REGEXP));
        regs.restore(h).unwrap();
    }

    #[test]
    fn test_copy_stack_renumbers_iterations() {
        let interner = StringInterner::new();
        let mut inner = RegisterFrame::new(RegisterFlags::ITER | RegisterFlags::ARG, "inner");
        inner.set_str(&interner, RegisterFlags::ITER, "T0", "in", true);
        inner.set_str(&interner, RegisterFlags::ARG, "0", "inner-arg", true);
        let mut outer = RegisterFrame::new(RegisterFlags::ITER | RegisterFlags::ARG | RegisterFlags::Q, "outer");
        outer.set_str(&interner, RegisterFlags::ITER, "T0", "out", true);
        outer.set_str(&interner, RegisterFlags::ARG, "1", "outer-arg", true);
        outer.set_str(&interner, RegisterFlags::Q, "A", "qa", true);

        let mut dst = RegisterFrame::new(RegisterFlags::QUEUE, "copy");
        copy_stack(&mut dst, &interner, [&inner, &outer], RegisterFlags::QUEUE, false, 100);

        assert_eq!(dst.lookup(RegisterFlags::ITER, "T0").unwrap().render(), "in");
        assert_eq!(dst.lookup(RegisterFlags::ITER, "T1").unwrap().render(), "out");
        assert_eq!(dst.lookup(RegisterFlags::Q, "a").unwrap().render(), "qa");
        assert!(dst.lookup(RegisterFlags::ARG, "0").is_some());
        // arguments stop at the first frame that carries them
        assert!(dst.lookup(RegisterFlags::ARG, "1").is_none());
    }

    #[test]
    fn test_copy_stack_overwrite_first_frame_only() {
        let interner = StringInterner::new();
        let mut src = RegisterFrame::new(RegisterFlags::Q, "src");
        src.set_str(&interner, RegisterFlags::Q, "A", "new", true);
        let mut older = RegisterFrame::new(RegisterFlags::Q, "older");
        older.set_str(&interner, RegisterFlags::Q, "B", "older", true);

        let mut dst = RegisterFrame::new(RegisterFlags::QUEUE, "dst");
        dst.set_str(&interner, RegisterFlags::Q, "A", "old", true);
        dst.set_str(&interner, RegisterFlags::Q, "B", "keep", true);
        copy_stack(&mut dst, &interner, [&src, &older], RegisterFlags::Q, true, 100);
        assert_eq!(dst.lookup(RegisterFlags::Q, "A").unwrap().render(), "new");
        assert_eq!(dst.lookup(RegisterFlags::Q, "B").unwrap().render(), "keep");
    }

    #[test]
    fn test_key_validation() {
        assert_eq!(valid_key("total", 64).unwrap(), "TOTAL");
        assert!(valid_key("", 64).is_err());
        assert!(valid_key("has space", 64).is_err());
        assert!(valid_key("toolong", 3).is_err());
        assert_eq!(normalize_key("a b"), "A?B");
        assert_eq!(normalize_key("-"), "?");
        assert!(!is_named_register("q"));
        assert!(is_named_register("qq"));
    }

    #[test]
    fn test_clear_type_recounts() {
        let interner = StringInterner::new();
        let mut frame = RegisterFrame::new(RegisterFlags::QUEUE, "f");
        frame.set_str(&interner, RegisterFlags::Q, "NAMED", "1", true);
        frame.set_str(&interner, RegisterFlags::ARG, "0", "a", true);
        assert_eq!(frame.qcount(), 1);
        frame.clear_type(RegisterFlags::Q);
        assert_eq!(frame.qcount(), 0);
        assert_eq!(frame.count(), 1);
        frame.clear();
        assert!(frame.is_empty());
    }

    #[test]
    fn test_qcopy_into() {
        let interner = StringInterner::new();
        let mut src = RegisterFrame::new(RegisterFlags::QUEUE, "src");
        src.set_str(&interner, RegisterFlags::Q, "0", "zero", true);
        src.set_str(&interner, RegisterFlags::ARG, "0", "arg", true);
        let mut dst = RegisterFrame::new(RegisterFlags::Q, "dst");
        src.qcopy_into(&mut dst);
        assert_eq!(dst.count(), 1);
        assert_eq!(dst.lookup(RegisterFlags::Q, "0").unwrap().render(), "zero");
    }

    #[test]
    fn test_int_values() {
        assert_eq!(RegValue::Str(Arc::from(" 42abc")).as_int(), 42);
        assert_eq!(RegValue::Str(Arc::from("-7")).as_int(), -7);
        assert_eq!(RegValue::Str(Arc::from("x")).as_int(), 0);
        assert_eq!(RegValue::Int(9).render(), "9");
    }
}
