//! Hierarchical, slash-separated identifiers.
//!
//! An [`Identifier`] is the key used throughout the runtime for agents,
//! tickers and subscription edges. Two identifiers built from the same
//! sequence of parts always compare equal — composition is pure string
//! concatenation, nothing hashes or randomises the result.

use std::fmt;

/// A stable, hierarchical identifier of the form `part/part/part`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct Identifier(String);

impl Identifier {
    /// Build an identifier by joining `parts` with `/`.
    ///
    /// ```
    /// use cells::Identifier;
    /// let id = Identifier::new(["cells", "env", "cell", "counter"]);
    /// assert_eq!(id.as_str(), "cells/env/cell/counter");
    /// ```
    pub fn new<I, P>(parts: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: fmt::Display,
    {
        let joined = parts
            .into_iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join("/");
        Self(joined)
    }

    /// Build an identifier by appending `part` to this one.
    pub fn child<P: fmt::Display>(&self, part: P) -> Self {
        Self(format!("{}/{}", self.0, part))
    }

    /// Borrow the underlying string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identifier {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Identifier {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_parts_produce_same_identifier() {
        let a = Identifier::new(["cells", "env", "cell", "counter"]);
        let b = Identifier::new(vec!["cells".to_string(), "env".to_string(), "cell".to_string(), "counter".to_string()]);
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "cells/env/cell/counter");
    }

    #[test]
    fn child_appends_a_segment() {
        let root = Identifier::from("cells/env");
        let leaf = root.child("cell").child(3);
        assert_eq!(leaf.as_str(), "cells/env/cell/3");
    }

    proptest::proptest! {
        #[test]
        fn identity_is_pure_string_join(a in "[a-z]{1,8}", b in "[a-z]{1,8}", c in "[a-z]{1,8}") {
            let id1 = Identifier::new([a.clone(), b.clone(), c.clone()]);
            let id2 = Identifier::new([a, b, c]);
            prop_assert_eq!(id1, id2);
        }
    }
}
