//! Error tokens written into softcode output
//!
//! These strings are part of the observable language: scripts compare
//! against them, so the exact text matters.

pub const CALL_LIMIT: &str = "#-1 CALL LIMIT EXCEEDED";
pub const INVOCATION_LIMIT: &str = "#-1 FUNCTION INVOCATION LIMIT EXCEEDED";
pub const RECURSION_LIMIT: &str = "#-1 FUNCTION RECURSION LIMIT EXCEEDED";
pub const PERMISSION_DENIED: &str = "#-1 PERMISSION DENIED";
pub const DISABLED: &str = "#-1 FUNCTION DISABLED";
pub const NOT_VISIBLE: &str = "#-1 NO SUCH OBJECT VISIBLE";
pub const NOT_INTEGER: &str = "#-1 ARGUMENT MUST BE INTEGER";
pub const OUT_OF_RANGE: &str = "#-1 ARGUMENT OUT OF RANGE";
pub const TOO_MANY_REGISTERS: &str = "#-1 TOO MANY REGISTERS";
pub const INVALID_REGISTER: &str = "#-1 REGISTER NAME INVALID";
pub const NOT_NUMBERS: &str = "#-1 ARGUMENTS MUST BE NUMBERS";
pub const NOT_INTEGERS: &str = "#-1 ARGUMENTS MUST BE INTEGERS";
pub const DIVIDE_BY_ZERO: &str = "#-1 DIVISION BY ZERO";
pub const BAD_REGEXP: &str = "#-1 REGEXP ERROR";

/// `#-1 FUNCTION (NAME) NOT FOUND`
pub fn function_not_found(name: &str) -> String {
    format!("#-1 FUNCTION ({}) NOT FOUND", name)
}

/// `#-1 @FUNCTION (NAME) MISSING ATTRIBUTE (#N/ATTR)`
pub fn missing_attribute(name: &str, object: mush_core::Dbref, attribute: &str) -> String {
    format!(
        "#-1 @FUNCTION ({}) MISSING ATTRIBUTE ({}/{})",
        name, object, attribute
    )
}

/// Arity mismatch message, phrased after the accepted range
pub fn arity(name: &str, min: usize, max: Option<usize>, got: usize) -> String {
    let expects = match max {
        Some(max) if max == min => format!("{}", min),
        Some(max) if max == min + 1 => format!("{} OR {}", min, max),
        Some(max) => format!("BETWEEN {} AND {}", min, max),
        None => format!("AT LEAST {}", min),
    };
    format!(
        "#-1 FUNCTION ({}) EXPECTS {} ARGUMENTS BUT GOT {}",
        name, expects, got
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arity_wording() {
        assert_eq!(
            arity("ABS", 1, Some(1), 2),
            "#-1 FUNCTION (ABS) EXPECTS 1 ARGUMENTS BUT GOT 2"
        );
        assert_eq!(
            arity("RAND", 1, Some(2), 0),
            "#-1 FUNCTION (RAND) EXPECTS 1 OR 2 ARGUMENTS BUT GOT 0"
        );
        assert_eq!(
            arity("ITER", 2, Some(4), 5),
            "#-1 FUNCTION (ITER) EXPECTS BETWEEN 2 AND 4 ARGUMENTS BUT GOT 5"
        );
        assert_eq!(
            arity("ADD", 2, None, 1),
            "#-1 FUNCTION (ADD) EXPECTS AT LEAST 2 ARGUMENTS BUT GOT 1"
        );
    }

    #[test]
    fn test_not_found() {
        assert_eq!(function_not_found("FOO"), "#-1 FUNCTION (FOO) NOT FOUND");
    }
}
