//! Version range expressions.
//!
//! Grammar: alternatives separated by `||`; inside an alternative,
//! comparators separated by whitespace or commas, all of which must hold.
//! Comparators are `=`, `==`, `!=`, `!`, `>`, `>=`, `<`, `<=`. A bare
//! version is an exact match, and an operator may be separated from its
//! version by spaces (`>= 1.2.0`). `x` wildcards (`1.2.x`, `>=3.x`) expand
//! to the range they cover.
//!
//! Versions are compared by semver precedence alone, so pre-releases are
//! ordered like any other version: `>=1.0.0` admits `2.0.0-beta1`. The `~`
//! and `^` forms are handed to [`semver::VersionReq`] and keep its
//! pre-release rules.

use std::cmp::Ordering;

use semver::{Version, VersionReq};

use crate::error::MirrorError;

#[derive(Debug, Clone)]
pub struct VersionConstraint {
    raw: String,
    alternatives: Vec<Vec<Comparator>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl Op {
    /// Longest prefixes first so `>=` wins over `>`.
    const PREFIXES: [(&'static str, Op); 8] = [
        (">=", Op::Ge),
        ("<=", Op::Le),
        ("!=", Op::Ne),
        ("==", Op::Eq),
        (">", Op::Gt),
        ("<", Op::Lt),
        ("=", Op::Eq),
        ("!", Op::Ne),
    ];

    fn split(token: &str) -> (Op, &str) {
        Self::PREFIXES
            .iter()
            .find_map(|(prefix, op)| token.strip_prefix(*prefix).map(|rest| (*op, rest)))
            .unwrap_or((Op::Eq, token))
    }

    fn holds(self, ordering: Ordering) -> bool {
        match self {
            Op::Eq => ordering == Ordering::Equal,
            Op::Ne => ordering != Ordering::Equal,
            Op::Gt => ordering == Ordering::Greater,
            Op::Ge => ordering != Ordering::Less,
            Op::Lt => ordering == Ordering::Less,
            Op::Le => ordering != Ordering::Greater,
        }
    }
}

#[derive(Debug, Clone)]
enum Comparator {
    Any,
    Cmp(Op, Version),
    /// `lo <= v < hi`, or its complement when `inside` is false.
    Span {
        lo: Version,
        hi: Version,
        inside: bool,
    },
    Req(VersionReq),
}

impl Comparator {
    fn parse(token: &str) -> Result<Self, String> {
        if token.starts_with(['~', '^']) {
            return VersionReq::parse(token)
                .map(Comparator::Req)
                .map_err(|e| format!("'{token}': {e}"));
        }

        let (op, rest) = Op::split(token);
        let rest = rest.trim();
        if rest.is_empty() {
            return Err(format!("'{token}': missing version"));
        }

        if is_wildcard(rest) {
            return match op {
                Op::Eq | Op::Ge | Op::Le => Ok(Comparator::Any),
                _ => Err(format!("'{token}': operator cannot apply to a bare wildcard")),
            };
        }

        let parts: Vec<&str> = rest.split('.').collect();
        if parts.len() < 3 || parts.iter().any(|p| is_wildcard(p)) {
            return wildcard_span(op, &parts)
                .ok_or_else(|| format!("'{token}': bad wildcard version"));
        }

        Version::parse(rest)
            .map(|v| Comparator::Cmp(op, v))
            .map_err(|e| format!("'{token}': {e}"))
    }

    fn matches(&self, version: &Version) -> bool {
        match self {
            Comparator::Any => true,
            Comparator::Cmp(op, bound) => op.holds(version.cmp_precedence(bound)),
            Comparator::Span { lo, hi, inside } => {
                let within = version.cmp_precedence(lo) != Ordering::Less
                    && version.cmp_precedence(hi) == Ordering::Less;
                within == *inside
            }
            Comparator::Req(req) => req.matches(version),
        }
    }
}

fn is_wildcard(part: &str) -> bool {
    matches!(part, "x" | "X" | "*")
}

/// Expand `1.x`, `1.2.x` or a short `1.2` into the comparator `op` implies.
///
/// Only trailing components may be wildcards; `1.x.3` is rejected.
fn wildcard_span(op: Op, parts: &[&str]) -> Option<Comparator> {
    if parts.len() > 3 {
        return None;
    }
    let major: u64 = parts.first()?.parse().ok()?;
    let minor = match parts.get(1) {
        None => None,
        Some(p) if is_wildcard(p) => None,
        Some(p) => Some(p.parse::<u64>().ok()?),
    };
    if parts.get(2).is_some_and(|p| !is_wildcard(p)) {
        return None;
    }

    let (lo, hi) = match minor {
        None => (Version::new(major, 0, 0), Version::new(major.checked_add(1)?, 0, 0)),
        Some(minor) => (
            Version::new(major, minor, 0),
            Version::new(major, minor.checked_add(1)?, 0),
        ),
    };

    Some(match op {
        Op::Eq => Comparator::Span { lo, hi, inside: true },
        Op::Ne => Comparator::Span { lo, hi, inside: false },
        Op::Gt => Comparator::Cmp(Op::Ge, hi),
        Op::Ge => Comparator::Cmp(Op::Ge, lo),
        Op::Lt => Comparator::Cmp(Op::Lt, lo),
        Op::Le => Comparator::Cmp(Op::Lt, hi),
    })
}

impl VersionConstraint {
    /// Matches every version.
    pub fn any() -> Self {
        Self {
            raw: "*".to_string(),
            alternatives: vec![vec![Comparator::Any]],
        }
    }

    pub fn parse(raw: &str) -> Result<Self, MirrorError> {
        let fail = |reason: String| MirrorError::ConstraintParse {
            constraint: raw.to_string(),
            reason,
        };

        if raw.trim().is_empty() {
            return Err(fail("empty expression".to_string()));
        }

        let mut alternatives = Vec::new();
        for part in raw.split("||") {
            let tokens = tokenize(part);
            if tokens.is_empty() {
                return Err(fail("empty alternative".to_string()));
            }
            let comparators = tokens
                .iter()
                .map(|token| Comparator::parse(token))
                .collect::<Result<Vec<_>, _>>()
                .map_err(&fail)?;
            alternatives.push(comparators);
        }

        Ok(Self {
            raw: raw.to_string(),
            alternatives,
        })
    }

    pub fn matches(&self, version: &Version) -> bool {
        self.alternatives
            .iter()
            .any(|alt| alt.iter().all(|c| c.matches(version)))
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl std::fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Split one alternative into comparator tokens, gluing a lone operator to
/// the version that follows it.
fn tokenize(part: &str) -> Vec<String> {
    let mut tokens: Vec<String> = Vec::new();
    let mut pending_op: Option<String> = None;

    for word in part
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|w| !w.is_empty())
    {
        if word.chars().all(|c| matches!(c, '<' | '>' | '=' | '!' | '~' | '^')) {
            let op = pending_op.take().unwrap_or_default() + word;
            pending_op = Some(op);
            continue;
        }
        match pending_op.take() {
            Some(op) => tokens.push(format!("{op}{word}")),
            None => tokens.push(word.to_string()),
        }
    }

    if let Some(op) = pending_op {
        tokens.push(op);
    }
    tokens
}
