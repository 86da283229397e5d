//! Routing keys and binding patterns for a topic exchange.
//!
//! A routing key is a dot-separated sequence of tokens such as
//! `trainings.exgroup.create`. A binding pattern is a routing key template in
//! which a token may be `*` (exactly one token) and the final token may be `#`
//! (one or more tokens). Matching is case-sensitive.
//!
//! The bus performs the coarse match (`trainings.exgroup.#`); the dispatcher
//! resolves the single operation token that follows the domain prefix via
//! [`RoutingKey::operation_after`].

use std::fmt;

use serde::{Deserialize, Serialize};

/// Token separator for routing keys and binding patterns.
pub const SEPARATOR: char = '.';

/// Wildcard matching exactly one token.
pub const STAR: &str = "*";

/// Wildcard matching one or more trailing tokens.
pub const HASH: &str = "#";

/// Errors from parsing routing keys and binding patterns.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoutingError {
    #[error("routing key is empty")]
    Empty,
    #[error("empty token at position {position} in {input:?}")]
    EmptyToken { input: String, position: usize },
    #[error("wildcard token {token:?} is not allowed in a concrete routing key {input:?}")]
    WildcardInKey { input: String, token: String },
    #[error("{token:?} is not a single routing key token")]
    InvalidToken { token: String },
    #[error("'#' must be the last token of binding pattern {input:?}")]
    HashNotLast { input: String },
}

// ---------------------------------------------------------------------------
// RoutingKey
// ---------------------------------------------------------------------------

/// A concrete, immutable routing key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoutingKey(String);

impl RoutingKey {
    /// Parses a concrete routing key.
    ///
    /// # Errors
    ///
    /// Returns [`RoutingError`] when the key is empty, contains an empty token,
    /// or contains a wildcard token.
    pub fn parse(input: &str) -> Result<Self, RoutingError> {
        validate_tokens(input)?;
        if let Some(token) = input.split(SEPARATOR).find(|t| *t == STAR || *t == HASH) {
            return Err(RoutingError::WildcardInKey {
                input: input.to_string(),
                token: token.to_string(),
            });
        }
        Ok(Self(input.to_string()))
    }

    /// The key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Iterates over the key's tokens in order.
    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.0.split(SEPARATOR)
    }

    /// Number of tokens in the key.
    #[must_use]
    pub fn token_count(&self) -> usize {
        self.tokens().count()
    }

    /// Returns a new key with `token` appended.
    ///
    /// # Errors
    ///
    /// Returns [`RoutingError::InvalidToken`] if `token` is empty, contains a
    /// separator, or is a wildcard.
    pub fn child(&self, token: &str) -> Result<Self, RoutingError> {
        if token.is_empty() || token.contains(SEPARATOR) || token == STAR || token == HASH {
            return Err(RoutingError::InvalidToken {
                token: token.to_string(),
            });
        }
        Ok(Self(format!("{}{SEPARATOR}{token}", self.0)))
    }

    /// Returns the single operation token following `prefix`.
    ///
    /// `trainings.exgroup.create` yields `Some("create")` for the prefix
    /// `trainings.exgroup`. Returns `None` when the key does not start with the
    /// prefix or when more than one token follows it.
    #[must_use]
    pub fn operation_after(&self, prefix: &RoutingKey) -> Option<&str> {
        let rest = self.0.strip_prefix(prefix.as_str())?;
        let operation = rest.strip_prefix(SEPARATOR)?;
        if operation.is_empty() || operation.contains(SEPARATOR) {
            None
        } else {
            Some(operation)
        }
    }
}

impl fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for RoutingKey {
    type Error = RoutingError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RoutingKey> for String {
    fn from(key: RoutingKey) -> Self {
        key.0
    }
}

impl std::str::FromStr for RoutingKey {
    type Err = RoutingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// ---------------------------------------------------------------------------
// BindingPattern
// ---------------------------------------------------------------------------

/// One token of a binding pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    /// Matches the identical token.
    Literal(String),
    /// `*`: matches exactly one token.
    One,
    /// `#`: matches one or more tokens. Only valid in final position.
    OneOrMore,
}

/// A routing key template used to bind a queue to an exchange.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BindingPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl BindingPattern {
    /// Parses a binding pattern.
    ///
    /// # Errors
    ///
    /// Returns [`RoutingError`] when the pattern is empty, contains an empty
    /// token, or uses `#` anywhere but the final token.
    pub fn parse(input: &str) -> Result<Self, RoutingError> {
        validate_tokens(input)?;
        let tokens: Vec<&str> = input.split(SEPARATOR).collect();
        let last = tokens.len() - 1;
        let mut segments = Vec::with_capacity(tokens.len());
        for (i, token) in tokens.into_iter().enumerate() {
            let segment = match token {
                HASH if i == last => Segment::OneOrMore,
                HASH => {
                    return Err(RoutingError::HashNotLast {
                        input: input.to_string(),
                    })
                }
                STAR => Segment::One,
                literal => Segment::Literal(literal.to_string()),
            };
            segments.push(segment);
        }
        Ok(Self {
            raw: input.to_string(),
            segments,
        })
    }

    /// Builds `<prefix>.#`, the pattern covering every key below `prefix`.
    #[must_use]
    pub fn subtree(prefix: &RoutingKey) -> Self {
        let mut segments: Vec<Segment> = prefix
            .tokens()
            .map(|t| Segment::Literal(t.to_string()))
            .collect();
        segments.push(Segment::OneOrMore);
        Self {
            raw: format!("{prefix}{SEPARATOR}{HASH}"),
            segments,
        }
    }

    /// The pattern as written.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Parsed segments in order.
    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Whether `key` is accepted by this pattern.
    #[must_use]
    pub fn matches(&self, key: &RoutingKey) -> bool {
        let mut tokens = key.tokens();
        for segment in &self.segments {
            match segment {
                Segment::Literal(expected) => match tokens.next() {
                    Some(token) if token == expected => {}
                    _ => return false,
                },
                Segment::One => {
                    if tokens.next().is_none() {
                        return false;
                    }
                }
                // `#` is always last: at least one remaining token is enough.
                Segment::OneOrMore => return tokens.next().is_some(),
            }
        }
        tokens.next().is_none()
    }
}

impl fmt::Display for BindingPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl std::str::FromStr for BindingPattern {
    type Err = RoutingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn validate_tokens(input: &str) -> Result<(), RoutingError> {
    if input.is_empty() {
        return Err(RoutingError::Empty);
    }
    if let Some(position) = input.split(SEPARATOR).position(str::is_empty) {
        return Err(RoutingError::EmptyToken {
            input: input.to_string(),
            position,
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn key(s: &str) -> RoutingKey {
        RoutingKey::parse(s).unwrap()
    }

    fn pattern(s: &str) -> BindingPattern {
        BindingPattern::parse(s).unwrap()
    }

    #[test]
    fn parse_rejects_malformed_keys() {
        assert_eq!(RoutingKey::parse(""), Err(RoutingError::Empty));
        assert!(matches!(
            RoutingKey::parse("trainings..create"),
            Err(RoutingError::EmptyToken { position: 1, .. })
        ));
        assert!(matches!(
            RoutingKey::parse(".trainings"),
            Err(RoutingError::EmptyToken { position: 0, .. })
        ));
        assert!(matches!(
            RoutingKey::parse("trainings.exgroup."),
            Err(RoutingError::EmptyToken { position: 2, .. })
        ));
        assert!(matches!(
            RoutingKey::parse("trainings.#"),
            Err(RoutingError::WildcardInKey { .. })
        ));
    }

    #[test]
    fn hash_must_be_last() {
        assert!(matches!(
            BindingPattern::parse("trainings.#.create"),
            Err(RoutingError::HashNotLast { .. })
        ));
        assert!(BindingPattern::parse("trainings.*.create").is_ok());
    }

    #[test]
    fn hash_matches_one_or_more_tokens() {
        let p = pattern("trainings.exgroup.#");
        assert!(p.matches(&key("trainings.exgroup.create")));
        assert!(p.matches(&key("trainings.exgroup.create.extra")));
        assert!(!p.matches(&key("trainings.exgroup")));
        assert!(!p.matches(&key("trainings.training.start")));
    }

    #[test]
    fn star_matches_exactly_one_token() {
        let p = pattern("trainings.*.create");
        assert!(p.matches(&key("trainings.exgroup.create")));
        assert!(p.matches(&key("trainings.training.create")));
        assert!(!p.matches(&key("trainings.create")));
        assert!(!p.matches(&key("trainings.a.b.create")));
    }

    #[test]
    fn literal_pattern_requires_exact_key() {
        let p = pattern("tgbot.exgroup.create");
        assert!(p.matches(&key("tgbot.exgroup.create")));
        assert!(!p.matches(&key("tgbot.exgroup.create.x")));
        assert!(!p.matches(&key("tgbot.exgroup")));
    }

    #[test]
    fn matching_is_case_sensitive() {
        let p = pattern("trainings.exgroup.#");
        assert!(!p.matches(&key("Trainings.exgroup.create")));
        assert!(pattern("trainings.exgroup.findByUser")
            .matches(&key("trainings.exgroup.findByUser")));
        assert!(!pattern("trainings.exgroup.findbyuser")
            .matches(&key("trainings.exgroup.findByUser")));
    }

    #[test]
    fn subtree_renders_and_matches() {
        let prefix = key("trainings.exgroup");
        let p = BindingPattern::subtree(&prefix);
        assert_eq!(p.as_str(), "trainings.exgroup.#");
        assert_eq!(p, pattern("trainings.exgroup.#"));
        assert!(p.matches(&key("trainings.exgroup.delete")));
    }

    #[test]
    fn operation_after_extracts_single_suffix() {
        let prefix = key("trainings.exgroup");
        assert_eq!(
            key("trainings.exgroup.findByUser").operation_after(&prefix),
            Some("findByUser")
        );
        assert_eq!(key("trainings.exgroup.a.b").operation_after(&prefix), None);
        assert_eq!(key("trainings.exgroup").operation_after(&prefix), None);
        assert_eq!(key("trainings.exgroupx.a").operation_after(&prefix), None);
        assert_eq!(key("trainings.training.get").operation_after(&prefix), None);
    }

    #[test]
    fn child_appends_one_token() {
        let outbound = key("tgbot.exgroup");
        assert_eq!(outbound.child("create").unwrap().as_str(), "tgbot.exgroup.create");
        assert!(outbound.child("").is_err());
        assert!(outbound.child("a.b").is_err());
        assert!(outbound.child("#").is_err());
    }

    #[test]
    fn routing_key_serde_validates() {
        let parsed: RoutingKey = serde_json::from_str("\"tgbot.training.get\"").unwrap();
        assert_eq!(parsed.token_count(), 3);
        assert!(serde_json::from_str::<RoutingKey>("\"tgbot..get\"").is_err());
    }

    fn token() -> impl Strategy<Value = String> {
        "[a-zA-Z][a-zA-Z0-9_]{0,8}"
    }

    proptest! {
        #[test]
        fn subtree_matches_every_child(
            prefix in prop::collection::vec(token(), 1..4),
            op in token(),
        ) {
            let prefix = key(&prefix.join("."));
            let child = prefix.child(&op).unwrap();
            prop_assert!(BindingPattern::subtree(&prefix).matches(&child));
            prop_assert_eq!(child.operation_after(&prefix), Some(op.as_str()));
        }

        #[test]
        fn subtree_never_matches_its_own_prefix(
            prefix in prop::collection::vec(token(), 1..4),
        ) {
            let prefix = key(&prefix.join("."));
            prop_assert!(!BindingPattern::subtree(&prefix).matches(&prefix));
        }

        #[test]
        fn literal_pattern_matches_only_itself(
            a in prop::collection::vec(token(), 1..4),
            b in prop::collection::vec(token(), 1..4),
        ) {
            let ka = key(&a.join("."));
            let kb = key(&b.join("."));
            prop_assert_eq!(pattern(ka.as_str()).matches(&kb), ka == kb);
        }
    }
}
