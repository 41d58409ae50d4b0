//! Request classification.
//!
//! A [`RuleTable`] is an ordered list of [`RouteRule`]s evaluated top to
//! bottom; the first rule whose method and path pattern match decides. A
//! request that matches no rule requires authentication.

use http::Method;
use regex::Regex;
use std::fmt;
use std::str::FromStr;

/// Allow-list of this gateway when none is configured.
pub const DEFAULT_PUBLIC_ROUTES: &[&str] = &["/", "/*.css", "/*.js", "/favicon.ico", "GET /books/**"];

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RuleEvaluationError {
    #[error("path pattern `{0}` must start with '/'")]
    MissingLeadingSlash(String),
    #[error("path pattern `{0}` uses '**' inside a segment")]
    EmbeddedDoubleWildcard(String),
    #[error("path pattern `{0}` has an unbalanced '{{' or '}}'")]
    UnbalancedVariable(String),
    #[error("unknown HTTP method `{0}` in route rule")]
    InvalidMethod(String),
    #[error("route rule `{0}` is empty or has trailing tokens")]
    Malformed(String),
    #[error("path pattern `{pattern}` does not compile: {reason}")]
    Compile { pattern: String, reason: String },
}

/// Whether `path` can be classified as sent.
///
/// Dot segments (plain or percent-encoded), encoded separators, backslashes
/// and encoded `%` are refused: rules match the raw path, while the backend
/// may see a normalised one.
pub fn is_canonical_path(path: &str) -> bool {
    let lowered = path.to_ascii_lowercase();
    if lowered.contains('\\')
        || ["%2f", "%5c", "%25", "%00"]
            .iter()
            .any(|encoded| lowered.contains(encoded))
    {
        return false;
    }
    lowered
        .split('/')
        .map(|segment| segment.replace("%2e", "."))
        .all(|segment| segment != "." && segment != "..")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Public,
    Authenticated,
}

/// Ant-style path pattern: `*` matches within one segment, `**` matches any
/// number of segments, `{name}` matches one non-empty segment.
#[derive(Clone)]
pub struct PathPattern {
    raw: String,
    regex: Regex,
}

impl fmt::Debug for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PathPattern").field(&self.raw).finish()
    }
}

impl PathPattern {
    pub fn parse(pattern: &str) -> Result<Self, RuleEvaluationError> {
        if !pattern.starts_with('/') {
            return Err(RuleEvaluationError::MissingLeadingSlash(pattern.to_string()));
        }

        let mut expression = String::from("^");
        if pattern == "/" {
            expression.push('/');
        }
        for segment in pattern[1..].split('/').filter(|_| pattern != "/") {
            if segment == "**" {
                expression.push_str("(?:/.*)?");
                continue;
            }
            if segment.contains("**") {
                return Err(RuleEvaluationError::EmbeddedDoubleWildcard(pattern.to_string()));
            }
            expression.push('/');
            expression.push_str(&segment_expression(pattern, segment)?);
        }
        expression.push('$');

        let regex = Regex::new(&expression).map_err(|err| RuleEvaluationError::Compile {
            pattern: pattern.to_string(),
            reason: err.to_string(),
        })?;

        Ok(Self {
            raw: pattern.to_string(),
            regex,
        })
    }

    pub fn matches(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

fn segment_expression(pattern: &str, segment: &str) -> Result<String, RuleEvaluationError> {
    let mut expression = String::new();
    let mut chars = segment.chars();
    while let Some(c) = chars.next() {
        match c {
            '*' => expression.push_str("[^/]*"),
            '?' => expression.push_str("[^/]"),
            '{' => {
                let mut closed = false;
                for inner in chars.by_ref() {
                    if inner == '}' {
                        closed = true;
                        break;
                    }
                    if inner == '{' || inner == '/' {
                        break;
                    }
                }
                if !closed {
                    return Err(RuleEvaluationError::UnbalancedVariable(pattern.to_string()));
                }
                expression.push_str("[^/]+");
            }
            '}' => return Err(RuleEvaluationError::UnbalancedVariable(pattern.to_string())),
            other => expression.push_str(&regex::escape(&other.to_string())),
        }
    }
    Ok(expression)
}

#[derive(Debug, Clone)]
pub struct RouteRule {
    method: Option<Method>,
    pattern: PathPattern,
    decision: Decision,
}

impl RouteRule {
    pub fn new(method: Option<Method>, pattern: PathPattern, decision: Decision) -> Self {
        Self {
            method,
            pattern,
            decision,
        }
    }

    pub fn public(pattern: &str) -> Result<Self, RuleEvaluationError> {
        Ok(Self::new(None, PathPattern::parse(pattern)?, Decision::Public))
    }

    pub fn public_for(method: Method, pattern: &str) -> Result<Self, RuleEvaluationError> {
        Ok(Self::new(Some(method), PathPattern::parse(pattern)?, Decision::Public))
    }

    pub fn matches(&self, method: &Method, path: &str) -> bool {
        self.method.as_ref().map_or(true, |m| m == method) && self.pattern.matches(path)
    }

    pub fn decision(&self) -> Decision {
        self.decision
    }
}

/// Parses an allow-list entry of the form `[METHOD ]pattern`.
impl FromStr for RouteRule {
    type Err = RuleEvaluationError;

    fn from_str(entry: &str) -> Result<Self, Self::Err> {
        let mut tokens = entry.split_whitespace();
        let rule = match (tokens.next(), tokens.next(), tokens.next()) {
            (Some(pattern), None, None) => Self::public(pattern)?,
            (Some(method), Some(pattern), None) => {
                let method = Method::from_str(&method.to_ascii_uppercase())
                    .map_err(|_| RuleEvaluationError::InvalidMethod(method.to_string()))?;
                Self::public_for(method, pattern)?
            }
            _ => return Err(RuleEvaluationError::Malformed(entry.to_string())),
        };
        Ok(rule)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RuleTable {
    rules: Vec<RouteRule>,
}

impl RuleTable {
    pub fn new(rules: Vec<RouteRule>) -> Self {
        Self { rules }
    }

    pub fn from_entries<S: AsRef<str>>(entries: &[S]) -> Result<Self, RuleEvaluationError> {
        let rules = entries
            .iter()
            .map(|entry| entry.as_ref().parse())
            .collect::<Result<Vec<RouteRule>, _>>()?;
        Ok(Self::new(rules))
    }

    pub fn with_defaults() -> Result<Self, RuleEvaluationError> {
        Self::from_entries(DEFAULT_PUBLIC_ROUTES)
    }

    /// Returns a table whose rules are evaluated before the current ones.
    pub fn preceded_by(mut self, mut rules: Vec<RouteRule>) -> Self {
        rules.append(&mut self.rules);
        Self { rules }
    }

    pub fn evaluate(&self, method: &Method, path: &str) -> Decision {
        self.rules
            .iter()
            .find(|rule| rule.matches(method, path))
            .map(RouteRule::decision)
            // fail closed
            .unwrap_or(Decision::Authenticated)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
