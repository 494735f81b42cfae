//! Allow/deny policy lists.
//!
//! Both lists carry unconditional semantics: any member match decides the
//! outcome, so each list is checked as a set. The blocklist is consulted
//! first, which makes a command present in both lists blocked.
//!
//! # Pattern language
//! - `re:<regex>` searches anywhere in the command
//! - a pattern containing `*` or `?` is a glob over the whole command
//! - anything else is a prefix that must end on a token boundary, so `rm`
//!   matches `rm a.txt` but not `rmdir a`

use regex::Regex;

use crate::error::ConfigError;

/// Outcome of checking a command against the policy lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyMatch {
    /// Matched a blocklist pattern (carried for the denial reason).
    Blocked(String),
    /// Matched an allowlist pattern and no blocklist pattern.
    Allowed(String),
    Unmatched,
}

#[derive(Debug)]
enum Matcher {
    Prefix(String),
    Pattern(Regex),
}

#[derive(Debug)]
struct Rule {
    source: String,
    matcher: Matcher,
}

impl Rule {
    fn compile(source: &str) -> Result<Self, ConfigError> {
        let trimmed = source.trim();
        let invalid = |reason: String| ConfigError::InvalidPattern {
            pattern: source.to_string(),
            reason,
        };

        if trimmed.is_empty() {
            return Err(invalid("empty pattern".to_string()));
        }

        let matcher = if let Some(re) = trimmed.strip_prefix("re:") {
            Matcher::Pattern(Regex::new(re).map_err(|e| invalid(e.to_string()))?)
        } else if trimmed.contains('*') || trimmed.contains('?') {
            Matcher::Pattern(Regex::new(&glob_to_regex(trimmed)).map_err(|e| invalid(e.to_string()))?)
        } else {
            Matcher::Prefix(trimmed.to_string())
        };

        Ok(Self {
            source: trimmed.to_string(),
            matcher,
        })
    }

    fn matches(&self, cmd: &str) -> bool {
        match &self.matcher {
            Matcher::Prefix(prefix) => match cmd.strip_prefix(prefix.as_str()) {
                Some(rest) => rest.is_empty() || rest.starts_with(char::is_whitespace),
                None => false,
            },
            Matcher::Pattern(re) => re.is_match(cmd),
        }
    }
}

/// Translate a command glob into an anchored regex.
fn glob_to_regex(glob: &str) -> String {
    let mut out = String::with_capacity(glob.len() * 2 + 8);
    out.push_str("(?s)^");
    for ch in glob.chars() {
        match ch {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    out
}

/// Compiled allowlist and blocklist. Immutable once built.
#[derive(Debug, Default)]
pub struct PolicyList {
    blocklist: Vec<Rule>,
    allowlist: Vec<Rule>,
}

impl PolicyList {
    pub fn new<B, A>(blocklist: B, allowlist: A) -> Result<Self, ConfigError>
    where
        B: IntoIterator,
        B::Item: AsRef<str>,
        A: IntoIterator,
        A::Item: AsRef<str>,
    {
        let blocklist = blocklist
            .into_iter()
            .map(|p| Rule::compile(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        let allowlist = allowlist
            .into_iter()
            .map(|p| Rule::compile(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            blocklist,
            allowlist,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.blocklist.is_empty() && self.allowlist.is_empty()
    }

    /// Check a command against the lists. Blocklist wins.
    pub fn evaluate(&self, cmd: &str) -> PolicyMatch {
        let trimmed = cmd.trim();

        if let Some(rule) = self.blocklist.iter().find(|r| r.matches(trimmed)) {
            return PolicyMatch::Blocked(rule.source.clone());
        }

        if let Some(rule) = self.allowlist.iter().find(|r| r.matches(trimmed)) {
            return PolicyMatch::Allowed(rule.source.clone());
        }

        PolicyMatch::Unmatched
    }
}
