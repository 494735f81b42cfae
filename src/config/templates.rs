//! Built-in security templates.
//!
//! A template is a named pair of allow/block lists in the policy rule
//! language (see [`crate::security::policy`]).

use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecurityTemplate {
    pub name: &'static str,
    pub description: &'static str,
    pub allowlist: &'static [&'static str],
    pub blocklist: &'static [&'static str],
}

const FORK_BOMB: &str = ":(){ :|:& };:";
const PIPE_TO_SHELL: &str = r"re:\b(curl|wget)\b.*\|\s*(ba|z)?sh\b";

pub const TEMPLATES: &[SecurityTemplate] = &[
    SecurityTemplate {
        name: "development",
        description: "Permissive template for local development",
        allowlist: &[
            "ls", "pwd", "echo", "cat", "grep", "find",
            "git status", "git log", "git diff",
            "npm install", "npm run", "python", "node",
        ],
        blocklist: &["rm -rf /", "dd", "mkfs", "format", FORK_BOMB, PIPE_TO_SHELL],
    },
    SecurityTemplate {
        name: "production",
        description: "Strict security for production environments",
        allowlist: &["ls", "pwd", "echo", "cat", "git pull", "git status"],
        blocklist: &[
            "rm", "mv", "dd", "mkfs", "format",
            "sudo", "su",
            PIPE_TO_SHELL, FORK_BOMB,
        ],
    },
    SecurityTemplate {
        name: "paranoid",
        description: "Maximum security, the gatekeeper reviews everything",
        allowlist: &[],
        blocklist: &[
            "rm", "mv", "dd", "mkfs", "format",
            "sudo", "su", "chmod", "chown",
            "curl", "wget",
            FORK_BOMB,
            "*>*", "*|*",
        ],
    },
    SecurityTemplate {
        name: "ci_cd",
        description: "Balanced template for CI/CD pipelines",
        allowlist: &[
            "ls", "pwd", "echo", "cat", "grep",
            "git", "npm", "yarn", "pnpm",
            "docker build", "docker push",
            "kubectl apply", "helm install",
        ],
        blocklist: &["rm -rf /", "dd", "mkfs", "format", FORK_BOMB, PIPE_TO_SHELL],
    },
];

/// Look up a template by name (case-insensitive).
pub fn get_template(name: &str) -> Result<&'static SecurityTemplate, ConfigError> {
    let wanted = name.trim().to_ascii_lowercase();
    TEMPLATES
        .iter()
        .find(|t| t.name == wanted)
        .ok_or_else(|| ConfigError::UnknownTemplate {
            name: name.to_string(),
            available: list_templates().join(", "),
        })
}

pub fn list_templates() -> Vec<&'static str> {
    TEMPLATES.iter().map(|t| t.name).collect()
}
