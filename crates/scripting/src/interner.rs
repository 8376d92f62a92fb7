//! Shared string pool for register names and values
//!
//! Register traffic is dominated by a handful of short names (`0`-`9`,
//! `A`-`Z`, iteration keys) and repeated values. Interning hands out
//! `Arc<str>` so copying a register between frames never copies text.

use dashmap::DashSet;
use std::sync::Arc;

/// An interned string
pub type Interned = Arc<str>;

/// Concurrent string interner
#[derive(Debug)]
pub struct StringInterner {
    strings: DashSet<Interned>,
}

impl StringInterner {
    /// Create an interner with the single-character register names pre-loaded
    pub fn new() -> Self {
        let interner = Self {
            strings: DashSet::new(),
        };
        for c in ('0'..='9').chain('A'..='Z') {
            interner.intern(c.encode_utf8(&mut [0; 4]));
        }
        interner
    }

    /// Return the shared copy of `s`, adding it if needed
    pub fn intern(&self, s: &str) -> Interned {
        if let Some(existing) = self.strings.get(s) {
            return Arc::clone(existing.key());
        }
        let fresh: Interned = Arc::from(s);
        if !self.strings.insert(Arc::clone(&fresh)) {
            // Lost a race with another inserter; hand out the winner
            if let Some(existing) = self.strings.get(s) {
                return Arc::clone(existing.key());
            }
        }
        fresh
    }

    pub fn contains(&self, s: &str) -> bool {
        self.strings.contains(s)
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    /// Drop strings nobody references any more
    ///
    /// # Returns
    /// Number of strings released
    pub fn purge(&self) -> usize {
        let before = self.strings.len();
        self.strings
            .retain(|s| Arc::strong_count(s) > 1 || is_permanent(s));
        let released = before.saturating_sub(self.strings.len());
        if released > 0 {
            tracing::trace!("Interner released {} strings", released);
        }
        released
    }
}

impl Default for StringInterner {
    fn default() -> Self {
        Self::new()
    }
}

fn is_permanent(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(
        (chars.next(), chars.next()),
        (Some(c), None) if c.is_ascii_digit() || c.is_ascii_uppercase()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_shares_storage() {
        let interner = StringInterner::new();
        let a = interner.intern("HELLO");
        let b = interner.intern("HELLO");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_single_letters_preloaded() {
        let interner = StringInterner::new();
        assert_eq!(interner.len(), 36);
        assert!(interner.contains("Q"));
        assert!(interner.contains("7"));
        assert!(!interner.contains("q"));
    }

    #[test]
    fn test_purge_releases_unused() {
        let interner = StringInterner::new();
        let kept = interner.intern("KEPT");
        interner.intern("DROPPED");
        assert_eq!(interner.purge(), 1);
        assert!(interner.contains(&kept));
        assert!(!interner.contains("DROPPED"));
        assert!(interner.contains("A"));
    }
}
