//! Module dedicated to message flags.
//!
//! A flag is a boolean attribute attached to a message. The concept
//! is the same across servers, but the spelling may vary (`\Seen`
//! versus `seen`), so parsing is kept permissive: anything unknown
//! becomes a custom flag.

use std::{
    collections::BTreeSet,
    fmt,
    ops::{Deref, DerefMut},
};

use serde::{Deserialize, Serialize};

/// The message flag.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Flag {
    /// Flag used when the message has been opened.
    Seen,

    /// Flag used when the message has been answered.
    Answered,

    /// Flag used as a bookmark, the exact meaning is up to the user.
    Flagged,

    /// Flag used when the message is marked for deletion.
    Deleted,

    /// Flag used when the message is an unfinished draft.
    Draft,

    /// Flag used for all other cases.
    Custom(String),
}

impl Flag {
    /// Creates a custom flag.
    pub fn custom(flag: impl ToString) -> Self {
        Self::Custom(flag.to_string())
    }
}

/// Parse a flag from a string. If the string does not match any of
/// the existing variants, it is considered as custom.
impl From<&str> for Flag {
    fn from(s: &str) -> Self {
        match s.trim().trim_start_matches('\\') {
            seen if seen.eq_ignore_ascii_case("seen") => Flag::Seen,
            answered if answered.eq_ignore_ascii_case("answered") => Flag::Answered,
            flagged if flagged.eq_ignore_ascii_case("flagged") => Flag::Flagged,
            deleted if deleted.eq_ignore_ascii_case("deleted") => Flag::Deleted,
            draft if draft.eq_ignore_ascii_case("draft") => Flag::Draft,
            flag => Flag::Custom(flag.into()),
        }
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flag = match self {
            Flag::Seen => "seen",
            Flag::Answered => "answered",
            Flag::Flagged => "flagged",
            Flag::Deleted => "deleted",
            Flag::Draft => "draft",
            Flag::Custom(flag) => flag.as_str(),
        };
        write!(f, "{flag}")
    }
}

/// The set of flags attached to a message.
///
/// Uses a [`BTreeSet`] to prevent duplicates and to keep comparisons
/// order-independent.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct Flags(BTreeSet<Flag>);

impl Flags {
    /// Return `true` if the set contains the Seen flag, which drives
    /// the read-state of a message.
    pub fn is_seen(&self) -> bool {
        self.0.contains(&Flag::Seen)
    }
}

impl fmt::Display for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, flag) in self.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{flag}")?;
        }
        Ok(())
    }
}

impl Deref for Flags {
    type Target = BTreeSet<Flag>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Flags {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl From<Flag> for Flags {
    fn from(flag: Flag) -> Self {
        Flags(BTreeSet::from_iter(Some(flag)))
    }
}

impl From<&str> for Flags {
    fn from(s: &str) -> Self {
        s.split_whitespace().map(Flag::from).collect()
    }
}

impl FromIterator<Flag> for Flags {
    fn from_iter<T: IntoIterator<Item = Flag>>(iter: T) -> Self {
        Flags(BTreeSet::from_iter(iter))
    }
}

impl IntoIterator for Flags {
    type Item = Flag;
    type IntoIter = std::collections::btree_set::IntoIter<Flag>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_known_flags_case_insensitive() {
        assert_eq!(Flag::from("Seen"), Flag::Seen);
        assert_eq!(Flag::from("\\Seen"), Flag::Seen);
        assert_eq!(Flag::from("ANSWERED"), Flag::Answered);
        assert_eq!(Flag::from("junk"), Flag::custom("junk"));
    }

    #[test]
    fn flags_set_is_order_independent() {
        let a = Flags::from("seen flagged");
        let b = Flags::from("flagged seen");
        assert_eq!(a, b);
        assert!(a.is_seen());
        assert!(!Flags::from("flagged").is_seen());
    }
}
