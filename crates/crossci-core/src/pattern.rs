//! Branch and path filter patterns.
//!
//! Patterns are compiled once into anchored regular expressions:
//!
//! - `*` matches zero or more characters, excluding `/`
//! - `**` matches zero or more of any character (`**/` may also match nothing)
//! - `?` matches zero or one of the preceding character
//! - `+` matches one or more of the preceding character
//! - `[...]` matches one character of the set, ranges such as `0-9` allowed
//! - `\` escapes the next character, which must not be a letter or digit
//! - a leading `!` negates the pattern
//!
//! Every other character, `.` included, is literal. So `[0-9]+.[0-9]+`
//! matches `1.4` and `0.61` but not `master`.
//!
//! Path patterns without any wildcard also match everything below them:
//! `mesonbuild` matches `mesonbuild/build.py`.

use crate::{Error, Result};
use regex::Regex;
use std::iter::Peekable;
use std::str::Chars;

/// What a pattern is matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternKind {
    Branch,
    Path,
}

/// A single compiled filter pattern.
#[derive(Debug, Clone)]
pub struct FilterPattern {
    source: String,
    negated: bool,
    regex: Regex,
}

impl FilterPattern {
    pub fn parse(source: &str, kind: PatternKind) -> Result<Self> {
        let (negated, body) = match source.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, source),
        };
        if body.is_empty() {
            return Err(invalid(source, "pattern is empty"));
        }

        let expr = translate(source, body, kind)?;
        let regex = Regex::new(&expr).map_err(|e| invalid(source, &e.to_string()))?;

        Ok(Self {
            source: source.to_string(),
            negated,
            regex,
        })
    }

    /// The pattern as written, including any `!` prefix.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn is_negated(&self) -> bool {
        self.negated
    }

    /// Whether the pattern body matches, ignoring negation.
    pub fn matches(&self, candidate: &str) -> bool {
        self.regex.is_match(candidate)
    }
}

/// An ordered list of patterns where the last matching pattern wins.
#[derive(Debug, Clone, Default)]
pub struct PatternList {
    patterns: Vec<FilterPattern>,
}

impl PatternList {
    pub fn compile(sources: &[String], kind: PatternKind) -> Result<Self> {
        let patterns = sources
            .iter()
            .map(|s| FilterPattern::parse(s, kind))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// Evaluate the list against a candidate.
    ///
    /// A matching positive pattern includes the candidate, a matching `!`
    /// pattern excludes it again. Nothing matching means not included.
    pub fn includes(&self, candidate: &str) -> bool {
        self.patterns.iter().fold(false, |included, pattern| {
            if pattern.matches(candidate) {
                !pattern.is_negated()
            } else {
                included
            }
        })
    }

    /// True when every pattern is a negation, so nothing can ever be included.
    pub fn only_negations(&self) -> bool {
        !self.patterns.is_empty() && self.patterns.iter().all(FilterPattern::is_negated)
    }

    pub fn sources(&self) -> impl Iterator<Item = &str> {
        self.patterns.iter().map(FilterPattern::source)
    }
}

fn translate(source: &str, body: &str, kind: PatternKind) -> Result<String> {
    let mut out = String::from("^");
    let mut chars = body.chars().peekable();
    // Whether the last emitted token may take a `?` or `+` quantifier.
    let mut quantifiable = false;
    let mut literal = true;

    while let Some(c) = chars.next() {
        match c {
            '*' => {
                literal = false;
                quantifiable = false;
                if chars.next_if_eq(&'*').is_some() {
                    if chars.next_if_eq(&'/').is_some() {
                        out.push_str("(?:.*/)?");
                    } else {
                        out.push_str(".*");
                    }
                } else {
                    out.push_str("[^/]*");
                }
            }
            '?' | '+' => {
                if !quantifiable {
                    return Err(invalid(
                        source,
                        &format!("'{c}' must follow a character or a class"),
                    ));
                }
                literal = false;
                quantifiable = false;
                out.push(c);
            }
            '[' => {
                literal = false;
                quantifiable = true;
                out.push_str(&translate_class(source, &mut chars)?);
            }
            '\\' => {
                let escaped = chars
                    .next()
                    .ok_or_else(|| invalid(source, "trailing escape character"))?;
                if escaped.is_ascii_alphanumeric() {
                    return Err(invalid(
                        source,
                        "letters and digits cannot be escaped, use a class such as [0-9]",
                    ));
                }
                quantifiable = true;
                out.push_str(&escape_char(escaped));
            }
            other => {
                quantifiable = true;
                out.push_str(&escape_char(other));
            }
        }
    }

    if kind == PatternKind::Path && literal {
        while out.len() > 1 && out.ends_with('/') {
            out.pop();
        }
        out.push_str("(?:/.*)?");
    }
    out.push('$');
    Ok(out)
}

fn translate_class(source: &str, chars: &mut Peekable<Chars<'_>>) -> Result<String> {
    let mut class = String::from("[");
    if chars.next_if(|c| *c == '!' || *c == '^').is_some() {
        class.push('^');
    }

    let mut empty = true;
    loop {
        let c = chars
            .next()
            .ok_or_else(|| invalid(source, "unterminated character class"))?;
        match c {
            ']' if empty => return Err(invalid(source, "empty character class")),
            ']' => break,
            '-' if !empty && chars.peek().is_some_and(|next| *next != ']') => class.push('-'),
            c if c.is_alphanumeric() => class.push(c),
            c => class.push_str(&escape_char(c)),
        }
        empty = false;
    }

    class.push(']');
    Ok(class)
}

fn escape_char(c: char) -> String {
    regex::escape(&c.to_string())
}

fn invalid(pattern: &str, reason: &str) -> Error {
    Error::InvalidPattern {
        pattern: pattern.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn branch(p: &str) -> FilterPattern {
        FilterPattern::parse(p, PatternKind::Branch).unwrap()
    }

    fn path(p: &str) -> FilterPattern {
        FilterPattern::parse(p, PatternKind::Path).unwrap()
    }

    fn list(sources: &[&str], kind: PatternKind) -> PatternList {
        let owned: Vec<String> = sources.iter().map(|s| s.to_string()).collect();
        PatternList::compile(&owned, kind).unwrap()
    }

    #[test]
    fn test_exact_branch() {
        let p = branch("master");
        assert!(p.matches("master"));
        assert!(!p.matches("master2"));
        assert!(!p.matches("old-master"));
        assert!(!p.matches("master/fix"));
    }

    #[test]
    fn test_numeric_release_branch() {
        for source in ["[0-9]+.[0-9]+", r"[0-9]+\.[0-9]+"] {
            let p = branch(source);
            assert!(p.matches("1.4"), "{source}");
            assert!(p.matches("0.61"), "{source}");
            assert!(p.matches("10.100"), "{source}");
            assert!(!p.matches("1.4.2"), "{source}");
            assert!(!p.matches("1x4"), "{source}");
            assert!(!p.matches(".4"), "{source}");
            assert!(!p.matches("master"), "{source}");
        }
    }

    #[test]
    fn test_single_star_stops_at_slash() {
        let p = branch("feature/*");
        assert!(p.matches("feature/foo"));
        assert!(!p.matches("feature/foo/bar"));
        assert!(p.matches("feature/"));
    }

    #[test]
    fn test_double_star_crosses_slashes() {
        let p = branch("release/**");
        assert!(p.matches("release/v1/hotfix"));
        assert!(!p.matches("releases/v1"));

        let p = path("**/*.py");
        assert!(p.matches("setup.py"));
        assert!(p.matches("mesonbuild/backend/ninjabackend.py"));
        assert!(!p.matches("mesonbuild/README.md"));
    }

    #[test]
    fn test_question_mark_is_optional_previous_char() {
        let p = branch("v1?");
        assert!(p.matches("v"));
        assert!(p.matches("v1"));
        assert!(!p.matches("v11"));
    }

    #[test]
    fn test_literal_path_matches_as_prefix() {
        let p = path("mesonbuild");
        assert!(p.matches("mesonbuild"));
        assert!(p.matches("mesonbuild/interpreter/interpreter.py"));
        assert!(!p.matches("mesonbuildx/foo.py"));

        let p = path("test cases/");
        assert!(p.matches("test cases/common/1 trivial/meson.build"));
    }

    #[test]
    fn test_literal_branch_is_not_a_prefix() {
        assert!(!branch("main").matches("main/sub"));
    }

    #[test]
    fn test_class_with_negation_and_escapes() {
        let p = branch("v[!a-z]");
        assert!(p.matches("v1"));
        assert!(!p.matches("vx"));

        let p = path("docs/[_.]*");
        assert!(p.matches("docs/_index"));
        assert!(p.matches("docs/.hidden"));
        assert!(!p.matches("docs/readme"));
    }

    #[test]
    fn test_escaped_wildcard_is_literal() {
        let p = branch(r"weird\*name");
        assert!(p.matches("weird*name"));
        assert!(!p.matches("weirdXname"));
    }

    #[test]
    fn test_invalid_patterns() {
        for source in ["", "!", "+abc", "**?", "[0-9", "[]", "trailing\\"] {
            let err = FilterPattern::parse(source, PatternKind::Branch).unwrap_err();
            assert!(
                matches!(err, Error::InvalidPattern { .. }),
                "{source}: {err}"
            );
        }
    }

    #[test]
    fn test_escaped_letter_is_rejected() {
        for source in [r"\d+\.\d+", r"v\1", r"release/\w*"] {
            let err = FilterPattern::parse(source, PatternKind::Branch).unwrap_err();
            match err {
                Error::InvalidPattern { pattern, reason } => {
                    assert_eq!(pattern, source);
                    assert!(reason.contains("[0-9]"), "{reason}");
                }
                other => panic!("{source}: {other}"),
            }
        }
        assert!(branch(r"[0-9]+\.[0-9]+").matches("1.4"));
    }

    #[test]
    fn test_last_match_wins() {
        let l = list(&["releases/**", "!releases/**-alpha"], PatternKind::Branch);
        assert!(l.includes("releases/10"));
        assert!(!l.includes("releases/10-alpha"));
        assert!(!l.includes("main"));

        let l = list(&["!releases/**-alpha", "releases/**"], PatternKind::Branch);
        assert!(l.includes("releases/10-alpha"));
    }

    #[test]
    fn test_only_negations() {
        assert!(list(&["!docs/**"], PatternKind::Path).only_negations());
        assert!(!list(&["docs/**", "!docs/x"], PatternKind::Path).only_negations());
        assert!(!PatternList::default().only_negations());
    }
}
