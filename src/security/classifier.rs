//! Rule-table risk classification.
//!
//! An ordered list of `(pattern, tier)` rules is evaluated top to bottom and
//! the first match wins. Specific destructive patterns are pinned to RED
//! ahead of the broader YELLOW mutation rules, which in turn sit ahead of the
//! GREEN read-only rules. Commands matching nothing fall back to a configured
//! default tier.
//!
//! A small catastrophic set sits in front of every table. It cannot be
//! removed by configuration, and a match is denied outright instead of being
//! sent for review.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

use super::RiskTier;

/// Always-denied patterns, checked before any other rule.
const CATASTROPHIC_RULES: &[(&str, &str)] = &[
    (r":\(\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;", "Fork bomb"),
    (r"\bmkfs(\.\w+)?\b", "Filesystem formatting"),
    (r"\bdd\s+(.*\s)?(if|of)=", "Low-level disk writing"),
    (r">\s*/dev/(sd[a-z]|hd[a-z]|nvme|disk)", "Raw device writing"),
];

/// Built-in rules, in evaluation order.
const BUILTIN_RULES: &[(&str, RiskTier, &str)] = &[
    // Destructive or privileged
    (
        r"\brm\s+(.*\s)?(-[a-zA-Z]*[rRf][a-zA-Z]*|--recursive|--force)(\s|$)",
        RiskTier::Red,
        "Recursive/forced deletion",
    ),
    (r"\bchmod\b", RiskTier::Red, "Permission modification"),
    (r"\bchown\b", RiskTier::Red, "Ownership modification"),
    (r"\b(sudo|doas)\b", RiskTier::Red, "Privilege escalation"),
    (r"(^|[;&|]\s*)su(\s|$)", RiskTier::Red, "User switch"),
    (r"\bgit\s+push\b.*(\s--force\b|\s-f\b)", RiskTier::Red, "Force push"),
    (r"\bsystemctl\s+(stop|disable|mask)\b", RiskTier::Red, "Service modification"),
    (r"\b(shutdown|reboot|halt|poweroff)\b", RiskTier::Red, "Shutdown/reboot"),
    (r"\binit\s+[06]\b", RiskTier::Red, "Runlevel change"),
    // Mutating but recoverable
    (r"\brm\s", RiskTier::Yellow, "File deletion"),
    (r"\b(mv|cp|mkdir|rmdir|touch|ln)\s", RiskTier::Yellow, "Filesystem mutation"),
    (r"\s-delete\b", RiskTier::Yellow, "Find with deletion"),
    (r">", RiskTier::Yellow, "Output redirection"),
    (r"\b(curl|wget)\b", RiskTier::Yellow, "Network request"),
    (r"^(ssh|scp|sftp|rsync)(\s|$)", RiskTier::Yellow, "Remote connection"),
    (
        r"\bgit\s+(push|commit|reset|checkout|rebase|merge|clean)\b",
        RiskTier::Yellow,
        "Git mutation",
    ),
    (r"\bnpm\s+(i|install|publish)\b", RiskTier::Yellow, "Package installation/publishing"),
    (r"\bpip3?\s+install\b", RiskTier::Yellow, "Package installation"),
    (r"\bcargo\s+install\b", RiskTier::Yellow, "Package installation"),
    (r"\b(kill|killall|pkill)\b", RiskTier::Yellow, "Process termination"),
    // Read-only
    (
        r"^(ls|dir|pwd|echo|cat|type|head|tail|wc|grep|find|which|whoami|date|uname)(\s|$)",
        RiskTier::Green,
        "Read-only utility",
    ),
    (r"^git\s+(status|log|diff|show)(\s|$)", RiskTier::Green, "Git read-only"),
];

/// A user-supplied classification rule.
///
/// Custom patterns are case-insensitive and are evaluated before the
/// built-in table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskRule {
    pub pattern: String,
    pub tier: RiskTier,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug)]
struct CompiledRule {
    pattern: Regex,
    tier: RiskTier,
    description: String,
}

/// Deterministic, total command classifier.
#[derive(Debug)]
pub struct RiskClassifier {
    catastrophic: Vec<CompiledRule>,
    rules: Vec<CompiledRule>,
    default_tier: RiskTier,
}

impl RiskClassifier {
    /// Classifier with the built-in table and the given fallback tier.
    pub fn new(default_tier: RiskTier) -> Result<Self, ConfigError> {
        Self::with_rules(default_tier, &[], true)
    }

    /// Classifier with custom rules ahead of (optionally) the built-in table.
    ///
    /// The catastrophic set is compiled in either way.
    pub fn with_rules(
        default_tier: RiskTier,
        custom: &[RiskRule],
        include_builtin: bool,
    ) -> Result<Self, ConfigError> {
        let mut rules = Vec::with_capacity(custom.len() + BUILTIN_RULES.len());

        for rule in custom {
            rules.push(CompiledRule {
                pattern: compile(&format!("(?i){}", rule.pattern), &rule.pattern)?,
                tier: rule.tier,
                description: rule
                    .description
                    .clone()
                    .unwrap_or_else(|| "Custom rule".to_string()),
            });
        }

        if include_builtin {
            for (pattern, tier, description) in BUILTIN_RULES {
                rules.push(CompiledRule {
                    pattern: compile(pattern, pattern)?,
                    tier: *tier,
                    description: (*description).to_string(),
                });
            }
        }

        let catastrophic = CATASTROPHIC_RULES
            .iter()
            .map(|(pattern, description)| {
                Ok(CompiledRule {
                    pattern: compile(pattern, pattern)?,
                    tier: RiskTier::Red,
                    description: (*description).to_string(),
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Ok(Self {
            catastrophic,
            rules,
            default_tier,
        })
    }

    /// Name of the catastrophic pattern `command` matches, if any.
    ///
    /// Such commands are denied without gatekeeper review.
    pub fn catastrophic(&self, command: &str) -> Option<&str> {
        let trimmed = command.trim();
        self.catastrophic
            .iter()
            .find(|rule| rule.pattern.is_match(trimmed))
            .map(|rule| rule.description.as_str())
    }

    /// Classify a command into a risk tier.
    pub fn classify(&self, command: &str) -> RiskTier {
        self.describe(command).0
    }

    /// Classify a command and report which rule decided it.
    ///
    /// The description is `None` when the default tier applied.
    pub fn describe(&self, command: &str) -> (RiskTier, Option<&str>) {
        let trimmed = command.trim();
        self.catastrophic
            .iter()
            .chain(&self.rules)
            .find(|rule| rule.pattern.is_match(trimmed))
            .map(|rule| (rule.tier, Some(rule.description.as_str())))
            .unwrap_or((self.default_tier, None))
    }
}

fn compile(source: &str, shown: &str) -> Result<Regex, ConfigError> {
    Regex::new(source).map_err(|e| ConfigError::InvalidPattern {
        pattern: shown.to_string(),
        reason: e.to_string(),
    })
}
