//! # MUSH Softcode Evaluator
//!
//! This crate evaluates MUSH softcode: the `%`-substitution and
//! `[function()]` expression language stored in object attributes.
//!
//! ## Features
//! - Single-pass scanner-evaluator with bounded output buffers
//! - Function table with native and attribute-backed (`@function`) handlers
//! - Layered register stack (q-registers, arguments, iteration, regex captures)
//! - Per-context and aggregate resource limits with a CPU budget
//! - Debug tracer with `#N! source => result` output
//!
//! ## Usage
//!
//! ```ignore
//! let session = Session::with_builtins(EvalLimits::default());
//! let world = MemoryWorld::new();
//! let mut ctx = session.new_context();
//! let result = session
//!     .evaluator(&world)
//!     .evaluate(&mut ctx, "[add(1,2)]", Identities::solo(player), EvalFlags::DEFAULT);
//! assert_eq!(result.output, "3");
//! ```

pub mod builtins;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod eval;
pub mod flags;
pub mod functions;
pub mod interner;
pub mod registers;
pub mod session;
pub mod sink;
pub mod tokens;
pub mod trace;
pub mod world;

pub use context::{DebugMode, Derive, EvalContext, SharedContext};
pub use error::{Result, ScriptError};
pub use eval::{Cursor, Evaluation, Evaluator, Flow};
pub use flags::{EvalFlags, TermFlags};
pub use functions::{
    ArgMode, FunctionCall, FunctionDescriptor, FunctionFlags, FunctionHandler, FunctionTable,
    FunctionTableBuilder, NativeFn,
};
pub use interner::{Interned, StringInterner};
pub use registers::{FrameHandle, RegValue, RegisterFlags, RegisterFrame, RegisterStack};
pub use session::{CpuBudget, EvalLimits, Session};
pub use sink::OutputSink;
pub use world::{AttrFlags, Attribute, MemoryWorld, ObjectRecord, Permission, World};
