//! Function table
//!
//! Every softcode function is described by a [`FunctionDescriptor`]:
//! arity, how its arguments are parsed, flags, an optional permission
//! predicate and the handler. Natively implemented functions and
//! attribute-backed user functions live in separate maps so a lookup can
//! be restricted to the native set.

use crate::context::EvalContext;
use crate::error::{Result, ScriptError};
use crate::eval::{Evaluator, Flow};
use crate::flags::EvalFlags;
use crate::sink::OutputSink;
use crate::world::Permission;
use bitflags::bitflags;
use mush_core::{Dbref, Identities};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

bitflags! {
    /// Per-function behaviour flags
    #[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
    pub struct FunctionFlags: u32 {
        /// Run in private q-registers
        const LOCALIZE = 1 << 0;
        /// Strip colour and markup from every argument
        const STRIP_MARKUP = 1 << 1;
        /// Notify the owner on every use
        const DEPRECATED = 1 << 2;
        /// Refuse to run
        const DISABLED = 1 << 3;
        /// Only callable from inside user-defined functions
        const USERFN_ONLY = 1 << 4;
        /// Log arguments at info level on every call
        const LOG_ARGS = 1 << 5;
        /// Log the name at info level on every call
        const LOG_NAME = 1 << 6;
    }
}

/// How arguments are produced before the handler runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArgMode {
    /// Fully evaluated
    #[default]
    Evaluated,
    /// Passed raw; the handler evaluates what it needs
    NoParse,
    /// Passed raw, with escapes and braces kept verbatim
    Literal,
}

/// A function call as seen by a native handler
#[derive(Debug)]
pub struct FunctionCall<'a> {
    /// Upper-cased name the function was called by
    pub name: &'a str,
    pub args: &'a [String],
    pub who: Identities,
    /// Flags the handler should use for any evaluation of its own
    pub eflags: EvalFlags,
}

impl FunctionCall<'_> {
    /// Argument `i`, or the empty string
    pub fn arg(&self, i: usize) -> &str {
        self.args.get(i).map_or("", String::as_str)
    }
}

/// Native handler
pub type NativeFn = fn(&Evaluator<'_>, &mut EvalContext, &FunctionCall<'_>, &mut OutputSink) -> Flow;

#[derive(Clone)]
pub enum FunctionHandler {
    Native(NativeFn),
    /// Evaluate `attribute` on `object` with the arguments as `%0`...
    Attribute { object: Dbref, attribute: String },
}

impl fmt::Debug for FunctionHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Native(_) => f.write_str("Native"),
            Self::Attribute { object, attribute } => write!(f, "Attribute({}/{})", object, attribute),
        }
    }
}

/// Everything the dispatcher needs to know about one function
#[derive(Clone)]
pub struct FunctionDescriptor {
    pub name: String,
    pub min_args: usize,
    /// Negative: at most `-max_args` arguments, and the last one absorbs
    /// any further commas
    pub max_args: i32,
    pub arg_mode: ArgMode,
    pub flags: FunctionFlags,
    pub permission: Option<Permission>,
    pub handler: FunctionHandler,
}

impl fmt::Debug for FunctionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionDescriptor")
            .field("name", &self.name)
            .field("min_args", &self.min_args)
            .field("max_args", &self.max_args)
            .field("arg_mode", &self.arg_mode)
            .field("flags", &self.flags)
            .field("restricted", &self.permission.is_some())
            .field("handler", &self.handler)
            .finish()
    }
}

impl FunctionDescriptor {
    /// No upper bound on argument count
    pub const UNLIMITED: i32 = i32::MAX;

    pub fn native(name: &str, min_args: usize, max_args: i32, handler: NativeFn) -> Self {
        Self {
            name: name.to_ascii_uppercase(),
            min_args,
            max_args,
            arg_mode: ArgMode::Evaluated,
            flags: FunctionFlags::empty(),
            permission: None,
            handler: FunctionHandler::Native(handler),
        }
    }

    /// A user-defined function backed by an attribute
    pub fn attribute(name: &str, object: Dbref, attribute: &str, min_args: usize, max_args: i32) -> Self {
        Self {
            name: name.to_ascii_uppercase(),
            min_args,
            max_args,
            arg_mode: ArgMode::Evaluated,
            flags: FunctionFlags::empty(),
            permission: None,
            handler: FunctionHandler::Attribute {
                object,
                attribute: attribute.to_ascii_uppercase(),
            },
        }
    }

    pub fn with_mode(mut self, mode: ArgMode) -> Self {
        self.arg_mode = mode;
        self
    }

    pub fn with_flags(mut self, flags: FunctionFlags) -> Self {
        self.flags |= flags;
        self
    }

    pub fn with_permission(mut self, permission: Permission) -> Self {
        self.permission = Some(permission);
        self
    }

    /// Upper bound on arguments, `None` when unlimited
    pub fn arg_limit(&self) -> Option<usize> {
        match self.max_args.unsigned_abs() {
            n if n == Self::UNLIMITED as u32 => None,
            n => Some(n as usize),
        }
    }

    /// Does the final argument swallow extra commas?
    pub fn absorbs_commas(&self) -> bool {
        self.max_args < 0
    }

    pub fn accepts(&self, count: usize) -> bool {
        count >= self.min_args && self.arg_limit().map_or(true, |max| count <= max)
    }
}

/// Immutable name -> descriptor table
#[derive(Debug, Default)]
pub struct FunctionTable {
    builtins: HashMap<String, Arc<FunctionDescriptor>>,
    user: HashMap<String, Arc<FunctionDescriptor>>,
}

impl FunctionTable {
    pub fn builder() -> FunctionTableBuilder {
        FunctionTableBuilder::default()
    }

    /// The standard function library and nothing else
    pub fn with_builtins() -> Self {
        let mut builder = Self::builder();
        crate::builtins::register_all(&mut builder);
        builder.build()
    }

    /// Resolve `name`; user definitions shadow natives unless `builtin_only`
    pub fn lookup(&self, name: &str, builtin_only: bool) -> Option<&Arc<FunctionDescriptor>> {
        let name = name.to_ascii_uppercase();
        if builtin_only {
            return self.builtins.get(&name);
        }
        self.user.get(&name).or_else(|| self.builtins.get(&name))
    }

    pub fn len(&self) -> usize {
        self.builtins.len() + self.user.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .builtins
            .keys()
            .chain(self.user.keys())
            .map(String::as_str)
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }
}

/// Collects descriptors before the table is frozen
#[derive(Debug, Default)]
pub struct FunctionTableBuilder {
    builtins: HashMap<String, Arc<FunctionDescriptor>>,
    user: HashMap<String, Arc<FunctionDescriptor>>,
}

impl FunctionTableBuilder {
    /// Register a descriptor; attribute handlers go to the user map
    pub fn register(&mut self, descriptor: FunctionDescriptor) -> Result<&mut Self> {
        let map = match descriptor.handler {
            FunctionHandler::Native(_) => &mut self.builtins,
            FunctionHandler::Attribute { .. } => &mut self.user,
        };
        if map.contains_key(&descriptor.name) {
            return Err(ScriptError::DuplicateFunction(descriptor.name));
        }
        tracing::trace!("Registered function {}", descriptor.name);
        map.insert(descriptor.name.clone(), Arc::new(descriptor));
        Ok(self)
    }

    pub fn build(self) -> FunctionTable {
        FunctionTable {
            builtins: self.builtins,
            user: self.user,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_: &Evaluator<'_>, _: &mut EvalContext, _: &FunctionCall<'_>, _: &mut OutputSink) -> Flow {
        Flow::Continue
    }

    #[test]
    fn test_arity_bounds() {
        let f = FunctionDescriptor::native("f", 1, 2, noop);
        assert!(!f.accepts(0));
        assert!(f.accepts(2));
        assert!(!f.accepts(3));
        let g = FunctionDescriptor::native("g", 1, -1, noop);
        assert!(g.absorbs_commas());
        assert_eq!(g.arg_limit(), Some(1));
        let h = FunctionDescriptor::native("h", 0, FunctionDescriptor::UNLIMITED, noop);
        assert!(h.accepts(500));
        assert_eq!(h.arg_limit(), None);
    }

    #[test]
    fn test_user_functions_shadow_builtins() {
        let mut builder = FunctionTable::builder();
        builder
            .register(FunctionDescriptor::native("greet", 0, 1, noop))
            .unwrap()
            .register(FunctionDescriptor::attribute("greet", Dbref(3), "fn_greet", 0, 1))
            .unwrap();
        let table = builder.build();
        let found = table.lookup("GREET", false).unwrap();
        assert!(matches!(found.handler, FunctionHandler::Attribute { .. }));
        let native = table.lookup("greet", true).unwrap();
        assert!(matches!(native.handler, FunctionHandler::Native(_)));
        assert_eq!(table.names(), vec!["GREET"]);
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut builder = FunctionTable::builder();
        builder.register(FunctionDescriptor::native("x", 0, 0, noop)).unwrap();
        let err = builder
            .register(FunctionDescriptor::native("X", 0, 0, noop))
            .unwrap_err();
        assert!(matches!(err, ScriptError::DuplicateFunction(name) if name == "X"));
    }

    #[test]
    fn test_builtin_library_present() {
        let table = FunctionTable::with_builtins();
        for name in ["ADD", "SETQ", "U", "ITER", "SWITCH", "REGEDIT", "LIT"] {
            assert!(table.lookup(name, true).is_some(), "missing {}", name);
        }
        assert!(table.lookup("nonesuch", false).is_none());
    }
}
