//! Dot-segmented topic patterns with AMQP-style wildcards.
//!
//! - `*` matches exactly one segment
//! - `#` matches zero or more segments
//! - literal segments compare case-insensitively (Unicode lowercase mapping,
//!   so `Ärger` matches `ärger`)
//!
//! Both pattern and key are split on `.`; segments are trimmed and empty
//! segments dropped, so `"a..b"` and `" a . b "` both read as `a.b`.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    /// Stored lowercased.
    Literal(String),
    Star,
    Hash,
}

/// A pattern parsed once and matched many times.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl TopicPattern {
    pub fn new(pattern: &str) -> Self {
        let mut segments: Vec<Segment> = Vec::new();
        for part in split_key(pattern) {
            let segment = match part {
                "*" => Segment::Star,
                "#" => Segment::Hash,
                literal => Segment::Literal(fold(literal).collect()),
            };
            // `#.#` is equivalent to `#`
            if segment == Segment::Hash && segments.last() == Some(&Segment::Hash) {
                continue;
            }
            segments.push(segment);
        }
        Self {
            raw: pattern.to_string(),
            segments,
        }
    }

    /// Pattern text as given.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// True when the pattern has no segments (blank or only dots).
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn matches(&self, key: &str) -> bool {
        match_from(&self.segments, split_key(key))
    }

    /// Match against a key that was already split with [`split_key`].
    pub fn matches_segments(&self, key: &[&str]) -> bool {
        match_from(&self.segments, key.iter().copied())
    }
}

impl fmt::Display for TopicPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Split a routing key into trimmed, non-empty segments.
pub fn split_key(key: &str) -> impl Iterator<Item = &str> + Clone {
    key.split('.').map(str::trim).filter(|s| !s.is_empty())
}

fn fold(segment: &str) -> impl Iterator<Item = char> + '_ {
    segment.chars().flat_map(char::to_lowercase)
}

/// One-shot match of `pattern` against `key`.
pub fn is_match(pattern: &str, key: &str) -> bool {
    TopicPattern::new(pattern).matches(key)
}

fn match_from<'a, I>(pattern: &[Segment], mut key: I) -> bool
where
    I: Iterator<Item = &'a str> + Clone,
{
    let Some((head, rest)) = pattern.split_first() else {
        return key.next().is_none();
    };

    match head {
        Segment::Hash => {
            if rest.is_empty() {
                return true;
            }
            loop {
                if match_from(rest, key.clone()) {
                    return true;
                }
                if key.next().is_none() {
                    return false;
                }
            }
        }
        Segment::Star => key.next().is_some() && match_from(rest, key),
        Segment::Literal(literal) => match key.next() {
            Some(first) => literal.chars().eq(fold(first)) && match_from(rest, key),
            None => false,
        },
    }
}
