//! Core type definitions

use serde::{Deserialize, Serialize};
use std::fmt;

/// Database reference to an in-world object (32-bit signed)
///
/// Negative values are sentinels, never real objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Dbref(pub i32);

impl Dbref {
    /// No object at all
    pub const NOTHING: Dbref = Dbref(-1);
    /// A match that resolved to more than one object
    pub const AMBIGUOUS: Dbref = Dbref(-2);
    /// The object's home location
    pub const HOME: Dbref = Dbref(-3);

    pub const fn new(id: i32) -> Self {
        Self(id)
    }

    pub fn get(&self) -> i32 {
        self.0
    }

    /// Does this refer to an object rather than a sentinel?
    pub const fn is_object(self) -> bool {
        self.0 >= 0
    }

    /// Parse the `#123` form used throughout softcode
    pub fn parse(s: &str) -> Option<Self> {
        let digits = s.trim().strip_prefix('#')?;
        digits.parse().ok().map(Self)
    }
}

impl From<i32> for Dbref {
    fn from(id: i32) -> Self {
        Self(id)
    }
}

impl fmt::Display for Dbref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The three identities threaded through every evaluation
///
/// - `executor`: the object whose code is running (`%!`)
/// - `caller`: the object that made the current nested call (`%@`)
/// - `enactor`: the object that started the whole chain (`%#`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identities {
    pub executor: Dbref,
    pub caller: Dbref,
    pub enactor: Dbref,
}

impl Identities {
    pub const fn new(executor: Dbref, caller: Dbref, enactor: Dbref) -> Self {
        Self {
            executor,
            caller,
            enactor,
        }
    }

    /// An object acting on its own behalf
    pub const fn solo(who: Dbref) -> Self {
        Self::new(who, who, who)
    }

    /// Identities for code stored on `thing`, invoked by the current executor
    pub const fn call_into(self, thing: Dbref) -> Self {
        Self::new(thing, self.executor, self.enactor)
    }
}

/// Grammatical gender of an object, used for pronoun substitutions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    #[default]
    Neuter,
    Female,
    Male,
    Plural,
}

impl Gender {
    pub fn from_str_loose(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().chars().next() {
            Some('f' | 'w') => Self::Female,
            Some('m') => Self::Male,
            Some('p') => Self::Plural,
            _ => Self::Neuter,
        }
    }

    /// Subjective pronoun (`%s`)
    pub fn subjective(self) -> &'static str {
        match self {
            Self::Neuter => "it",
            Self::Female => "she",
            Self::Male => "he",
            Self::Plural => "they",
        }
    }

    /// Objective pronoun (`%o`)
    pub fn objective(self) -> &'static str {
        match self {
            Self::Neuter => "it",
            Self::Female => "her",
            Self::Male => "him",
            Self::Plural => "them",
        }
    }

    /// Possessive pronoun (`%p`)
    pub fn possessive(self) -> &'static str {
        match self {
            Self::Neuter => "its",
            Self::Female => "her",
            Self::Male => "his",
            Self::Plural => "their",
        }
    }

    /// Absolute possessive pronoun (`%a`)
    pub fn absolute_possessive(self) -> &'static str {
        match self {
            Self::Neuter => "its",
            Self::Female => "hers",
            Self::Male => "his",
            Self::Plural => "theirs",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dbref_display_and_parse() {
        assert_eq!(Dbref::new(42).to_string(), "#42");
        assert_eq!(Dbref::parse("#42"), Some(Dbref::new(42)));
        assert_eq!(Dbref::parse(" #-1 "), Some(Dbref::NOTHING));
        assert_eq!(Dbref::parse("42"), None);
        assert!(!Dbref::NOTHING.is_object());
    }

    #[test]
    fn test_call_into_shifts_identities() {
        let who = Identities::new(Dbref(1), Dbref(2), Dbref(3));
        let inner = who.call_into(Dbref(9));
        assert_eq!(inner, Identities::new(Dbref(9), Dbref(1), Dbref(3)));
    }

    #[test]
    fn test_gender_roundtrip_through_json() {
        let gender: Gender = serde_json::from_str("\"female\"").unwrap();
        assert_eq!(gender, Gender::Female);
        assert_eq!(Gender::from_str_loose("Male"), Gender::Male);
        assert_eq!(Gender::Plural.absolute_possessive(), "theirs");
    }
}
