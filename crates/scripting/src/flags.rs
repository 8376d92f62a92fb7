//! Evaluation-mode and terminator flag sets
//!
//! Every recursive call into the evaluator carries one of each: the
//! evaluation flags decide *what* gets interpreted, the terminator flags
//! decide *where* the call stops consuming input.

use bitflags::bitflags;

bitflags! {
    /// What the evaluator interprets during one call.
    #[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
    pub struct EvalFlags: u32 {
        /// Perform substitutions and function calls at all.
        const EVALUATE = 1 << 0;
        /// Treat `name(` as a function call.
        const FUNCTION_CHECK = 1 << 1;
        /// An unresolved `name(` is an error rather than plain text.
        const FUNCTION_MANDATORY = 1 << 2;
        /// Drop the braces of `{...}` groups from the output.
        const STRIP_BRACES = 1 << 3;
        /// Drop exactly one leading `{...}` pair (command arguments).
        const COMMAND_BRACES = 1 << 4;
        /// Collapse runs of blanks, strip leading and one trailing blank.
        const COMPRESS_SPACES = 1 << 5;
        /// Copy `%`, `\`, `{` and `[` verbatim (lit()).
        const LITERAL = 1 << 6;
        /// Interpret `$N` / `$<name>` regex capture references.
        const DOLLAR = 1 << 7;
        /// Force debug tracing on for this chain.
        const DEBUG = 1 << 8;
        /// Force debug tracing off for this chain.
        const NODEBUG = 1 << 9;
        /// Resolve only natively implemented functions (outermost call only).
        const BUILTIN_ONLY = 1 << 10;
        /// Evaluating the body of a user-defined function.
        const USERFN = 1 << 11;

        const DEFAULT = Self::COMPRESS_SPACES.bits()
            | Self::STRIP_BRACES.bits()
            | Self::DOLLAR.bits()
            | Self::EVALUATE.bits()
            | Self::FUNCTION_CHECK.bits();
        const UDEFAULT = Self::DEFAULT.bits() | Self::USERFN.bits();
    }
}

impl EvalFlags {
    /// Copy everything verbatim.
    pub const NOTHING: Self = Self::empty();

    /// The flags stripped from arguments that must not be evaluated.
    pub(crate) const INTERPRETING: Self = Self::COMPRESS_SPACES
        .union(Self::EVALUATE)
        .union(Self::FUNCTION_CHECK);
}

bitflags! {
    /// Characters that end the current call, leaving the cursor on them.
    #[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
    pub struct TermFlags: u32 {
        const COMMA = 1 << 0;
        const PAREN = 1 << 1;
        const BRACKET = 1 << 2;
        const BRACE = 1 << 3;
        const SEMI = 1 << 4;
        const EQUALS = 1 << 5;
        const SPACE = 1 << 6;
        const GT = 1 << 7;
        /// Final argument of a comma-absorbing function: a comma is text,
        /// but the first one triggers a deprecation notice.
        const NOT_COMMA = 1 << 8;
    }
}

impl TermFlags {
    /// Run to end of input.
    pub const DEFAULT: Self = Self::empty();

    /// Does `c` end a call that was started with these flags?
    pub fn stops_at(self, c: char) -> bool {
        match c {
            '}' => self.contains(Self::BRACE),
            ']' => self.contains(Self::BRACKET),
            ')' => self.contains(Self::PAREN),
            ',' => self.contains(Self::COMMA),
            ';' => self.contains(Self::SEMI),
            '=' => self.contains(Self::EQUALS),
            ' ' => self.contains(Self::SPACE),
            '>' => self.contains(Self::GT),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_includes_evaluation() {
        assert!(EvalFlags::DEFAULT.contains(EvalFlags::EVALUATE | EvalFlags::FUNCTION_CHECK));
        assert!(!EvalFlags::DEFAULT.contains(EvalFlags::USERFN));
        assert!(EvalFlags::UDEFAULT.contains(EvalFlags::USERFN));
        assert!(EvalFlags::NOTHING.is_empty());
    }

    #[test]
    fn test_terminators() {
        let args = TermFlags::COMMA | TermFlags::PAREN;
        assert!(args.stops_at(','));
        assert!(args.stops_at(')'));
        assert!(!args.stops_at(']'));
        assert!(!TermFlags::DEFAULT.stops_at('}'));
        assert!(!TermFlags::NOT_COMMA.stops_at(','));
    }
}
