//! Topic patterns: what a subscription matches against.
//!
//! A pattern is either a topic string with optional wildcards or a regular
//! expression evaluated directly against the topic string.
//!
//! Wildcards occupy whole segments: `+` matches exactly one non-empty
//! segment, `#` matches one or more trailing segments and may only appear as
//! the final segment.

use std::fmt;

use regex::Regex;

use crate::error::ConfigurationError;
use crate::topic::DELIMITER;

const SINGLE: &str = "+";
const MULTI: &str = "#";

/// One parsed segment of a wildcard pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Single,
    Multi,
}

/// A compiled subscription pattern.
#[derive(Debug, Clone)]
pub enum TopicPattern {
    /// No wildcards: plain string equality.
    Exact(String),
    /// At least one wildcard segment.
    Wildcard { raw: String, segments: Vec<Segment> },
    /// A structured matcher.
    Regex(Regex),
}

impl TopicPattern {
    /// Parse a wildcard pattern.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::InvalidPattern`] when `#` is not the
    /// final segment or a wildcard shares a segment with other characters.
    pub fn parse(pattern: &str) -> Result<Self, ConfigurationError> {
        let raw: Vec<&str> = pattern.split(DELIMITER).collect();
        let mut segments = Vec::with_capacity(raw.len());
        for (index, segment) in raw.iter().enumerate() {
            let parsed = match *segment {
                SINGLE => Segment::Single,
                MULTI if index + 1 == raw.len() => Segment::Multi,
                MULTI => {
                    return Err(invalid(pattern, "'#' is only allowed as the last segment"));
                }
                other if other.contains(SINGLE) || other.contains(MULTI) => {
                    return Err(invalid(pattern, "wildcards must occupy a whole segment"));
                }
                other => Segment::Literal(other.to_string()),
            };
            segments.push(parsed);
        }
        if segments.iter().all(|s| matches!(s, Segment::Literal(_))) {
            return Ok(Self::Exact(pattern.to_string()));
        }
        Ok(Self::Wildcard {
            raw: pattern.to_string(),
            segments,
        })
    }

    /// Compile a regular-expression matcher.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::InvalidPattern`] if the expression does
    /// not compile.
    pub fn regex(expression: &str) -> Result<Self, ConfigurationError> {
        Regex::new(expression)
            .map(Self::Regex)
            .map_err(|_| invalid(expression, "regular expression does not compile"))
    }

    /// Whether `topic` matches this pattern.
    #[must_use]
    pub fn matches(&self, topic: &str) -> bool {
        match self {
            Self::Exact(pattern) => pattern == topic,
            Self::Regex(regex) => regex.is_match(topic),
            Self::Wildcard { segments, .. } => {
                let mut parts = topic.split(DELIMITER);
                for segment in segments {
                    match segment {
                        Segment::Multi => return parts.next().is_some(),
                        Segment::Single => match parts.next() {
                            Some(part) if !part.is_empty() => {}
                            _ => return false,
                        },
                        Segment::Literal(literal) => {
                            if parts.next() != Some(literal.as_str()) {
                                return false;
                            }
                        }
                    }
                }
                parts.next().is_none()
            }
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Exact(raw) | Self::Wildcard { raw, .. } => raw,
            Self::Regex(regex) => regex.as_str(),
        }
    }
}

impl fmt::Display for TopicPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Regex(regex) => write!(f, "/{}/", regex.as_str()),
            other => f.write_str(other.as_str()),
        }
    }
}

fn invalid(pattern: &str, reason: &'static str) -> ConfigurationError {
    ConfigurationError::InvalidPattern {
        pattern: pattern.to_string(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(p: &str) -> TopicPattern {
        TopicPattern::parse(p).unwrap()
    }

    #[test]
    fn should_match_exact_topic_only() {
        let p = pattern("a/b/c");
        assert!(matches!(p, TopicPattern::Exact(_)));
        assert!(p.matches("a/b/c"));
        assert!(!p.matches("a/b"));
        assert!(!p.matches("a/b/c/d"));
    }

    #[test]
    fn should_match_single_level_wildcard_for_exactly_one_segment() {
        let p = pattern("a/+/c");
        assert!(p.matches("a/b/c"));
        assert!(p.matches("a/x/c"));
        assert!(!p.matches("a/b/b/c"));
        assert!(!p.matches("a//c"));
        assert!(!p.matches("a/c"));
    }

    #[test]
    fn should_match_multi_level_wildcard_for_one_or_more_trailing_segments() {
        let p = pattern("a/#");
        assert!(p.matches("a/b"));
        assert!(p.matches("a/b/c"));
        assert!(!p.matches("a"));
        assert!(!p.matches("z/a"));
    }

    #[test]
    fn should_match_everything_with_lone_hash() {
        let p = pattern("#");
        assert!(p.matches("a"));
        assert!(p.matches("a/b/c"));
    }

    #[test]
    fn should_combine_wildcards() {
        let p = pattern("+/status/#");
        assert!(p.matches("hm/status/lamp/level"));
        assert!(!p.matches("hm/set/lamp"));
    }

    #[test]
    fn should_reject_hash_before_last_segment() {
        let err = TopicPattern::parse("a/#/c").unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidPattern { .. }));
    }

    #[test]
    fn should_reject_wildcard_inside_segment() {
        assert!(TopicPattern::parse("a/b+/c").is_err());
        assert!(TopicPattern::parse("a/#b").is_err());
    }

    #[test]
    fn should_match_regex_against_topic_string() {
        let p = TopicPattern::regex("^hm/status/.*temperature$").unwrap();
        assert!(p.matches("hm/status/kitchen/temperature"));
        assert!(!p.matches("hm/status/kitchen/humidity"));
    }

    #[test]
    fn should_reject_invalid_regex() {
        assert!(TopicPattern::regex("(unclosed").is_err());
    }

    #[test]
    fn should_display_pattern_source() {
        assert_eq!(pattern("a/+/c").to_string(), "a/+/c");
        assert_eq!(TopicPattern::regex("^x$").unwrap().to_string(), "/^x$/");
    }
}
