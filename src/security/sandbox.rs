//! Syntactic sandbox checks.
//!
//! The sandbox is a correctness backstop that runs independently of the risk
//! tier. It rejects commands that chain or substitute sub-commands, commands
//! that exceed byte bounds, and commands that reference paths outside the
//! configured working root.
//!
//! Path checks are lexical, so anything the shell would rewrite before the
//! command sees it (variable expansion, brace expansion, dot-globs) is
//! rejected while chaining is disabled.

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Sandbox settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Permit `;`, `|`, `&&`, redirects and substitutions.
    pub allow_chaining: bool,
    pub max_command_bytes: usize,
    pub max_argument_bytes: usize,
    /// Directory relative paths resolve against. Always allowed.
    pub working_root: PathBuf,
    /// Extra directories commands may reference.
    pub allowed_paths: Vec<PathBuf>,
    /// Directories commands may never reference, even inside an allowed one.
    pub blocked_paths: Vec<PathBuf>,
    /// Run allowlisted commands through the sandbox too.
    pub sandbox_allowlisted: bool,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            allow_chaining: false,
            max_command_bytes: 8192,
            max_argument_bytes: 4096,
            working_root: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            allowed_paths: Vec::new(),
            blocked_paths: Vec::new(),
            sandbox_allowlisted: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SandboxVerdict {
    Ok,
    Rejected(String),
}

impl SandboxVerdict {
    pub fn is_ok(&self) -> bool {
        matches!(self, SandboxVerdict::Ok)
    }
}

/// Validates commands against the sandbox rules. Pure after construction.
#[derive(Debug)]
pub struct SandboxValidator {
    allow_chaining: bool,
    max_command_bytes: usize,
    max_argument_bytes: usize,
    working_root: PathBuf,
    allowed_roots: Vec<PathBuf>,
    blocked_roots: Vec<PathBuf>,
    home: Option<PathBuf>,
    check_allowlisted: bool,
}

impl SandboxValidator {
    /// Relative roots resolve against the process working directory.
    pub fn new(config: &SandboxConfig) -> Self {
        let working_root = absolute(&config.working_root);
        let mut allowed_roots = vec![working_root.clone()];
        allowed_roots.extend(config.allowed_paths.iter().map(|p| resolve(&working_root, p)));
        let blocked_roots = config
            .blocked_paths
            .iter()
            .map(|p| resolve(&working_root, p))
            .collect();

        Self {
            allow_chaining: config.allow_chaining,
            max_command_bytes: config.max_command_bytes,
            max_argument_bytes: config.max_argument_bytes,
            working_root,
            allowed_roots,
            blocked_roots,
            home: std::env::var_os("HOME").map(PathBuf::from),
            check_allowlisted: config.sandbox_allowlisted,
        }
    }

    /// Whether allowlisted commands must also pass the sandbox.
    pub fn checks_allowlisted(&self) -> bool {
        self.check_allowlisted
    }

    pub fn validate(&self, cmd: &str) -> SandboxVerdict {
        let trimmed = cmd.trim();

        if trimmed.is_empty() {
            return SandboxVerdict::Rejected("Empty command".to_string());
        }

        if trimmed.contains('\0') {
            return SandboxVerdict::Rejected("Command contains a NUL byte".to_string());
        }

        if trimmed.len() > self.max_command_bytes {
            return SandboxVerdict::Rejected(format!(
                "Command is {} bytes, limit is {}",
                trimmed.len(),
                self.max_command_bytes
            ));
        }

        if !self.allow_chaining {
            if let Some(token) = find_shell_composition(trimmed) {
                return SandboxVerdict::Rejected(format!(
                    "Command contains shell operator '{}'",
                    token
                ));
            }
            if let Some(token) = find_shell_expansion(trimmed) {
                return SandboxVerdict::Rejected(format!(
                    "Command contains shell expansion '{}'",
                    token
                ));
            }
        }

        for arg in trimmed.split_whitespace() {
            if arg.len() > self.max_argument_bytes {
                return SandboxVerdict::Rejected(format!(
                    "Argument is {} bytes, limit is {}",
                    arg.len(),
                    self.max_argument_bytes
                ));
            }
        }

        for raw in extract_paths(trimmed) {
            let resolved = self.resolve_token(&raw);

            if let Some(blocked) = self.blocked_roots.iter().find(|b| resolved.starts_with(b)) {
                return SandboxVerdict::Rejected(format!(
                    "Path '{}' is in blocked directory '{}'",
                    raw,
                    blocked.display()
                ));
            }

            let allowed = self
                .allowed_roots
                .iter()
                .any(|root| root.has_root() && resolved.starts_with(root));
            if !allowed {
                return SandboxVerdict::Rejected(format!(
                    "Path '{}' is outside allowed directories",
                    raw
                ));
            }
        }

        SandboxVerdict::Ok
    }

    fn resolve_token(&self, raw: &str) -> PathBuf {
        if let Some(rest) = raw.strip_prefix('~') {
            if let Some(home) = &self.home {
                return resolve(home, Path::new(rest.trim_start_matches('/')));
            }
            // Unknown home: resolve to something no root contains.
            return PathBuf::from("/~");
        }
        resolve(&self.working_root, Path::new(raw))
    }
}

/// Return the first chaining, substitution or redirect operator in `cmd`.
fn find_shell_composition(cmd: &str) -> Option<&'static str> {
    const OPERATORS: &[&str] = &["$(", "`", "&&", "||", ";", "|", ">", "<", "&", "\n", "\r"];
    OPERATORS.iter().copied().find(|op| cmd.contains(op))
}

/// Return the first token the shell would expand into a different path.
///
/// Covers `$NAME`, `${...}`, positional and special parameters, brace
/// expansion and globs on a leading-dot component (`.?` matches `..`).
fn find_shell_expansion(cmd: &str) -> Option<String> {
    let bytes = cmd.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        if b != b'$' {
            continue;
        }
        let Some(&next) = bytes.get(i + 1) else {
            continue;
        };
        if next == b'{' || next == b'_' || next.is_ascii_alphanumeric() || b"@*#?!$-".contains(&next) {
            return Some(cmd[i..].split_whitespace().next().unwrap_or("$").to_string());
        }
    }

    cmd.split_whitespace()
        .find(|tok| {
            (tok.contains('{') && tok.contains(','))
                || tok.contains("{.")
                || tok.split('/').any(|part| {
                    part.starts_with('.') && part.contains(['*', '?', '['])
                })
        })
        .map(str::to_string)
}

/// Pull path candidates out of a command line.
///
/// Every argument after the program name is a candidate; bare names resolve
/// under the working root. The program name counts only when it carries a
/// directory. Flags and URLs are skipped, and `--flag=value` contributes its
/// value.
fn extract_paths(cmd: &str) -> Vec<String> {
    cmd.split_whitespace()
        .enumerate()
        .map(|(i, tok)| (i, tok.trim_matches(|c| c == '\'' || c == '"')))
        .map(|(i, tok)| (i, tok.trim_end_matches([',', ';'])))
        .filter(|(_, tok)| !tok.contains("://"))
        .map(|(i, tok)| match tok.split_once('=') {
            Some((_, value)) if tok.starts_with('-') || !value.is_empty() => (i, value),
            _ => (i, tok),
        })
        .map(|(i, tok)| (i, tok.trim_matches(|c| c == '\'' || c == '"')))
        .filter(|(i, tok)| {
            !tok.is_empty()
                && !tok.starts_with('-')
                && (*i > 0 || tok.contains('/') || tok.starts_with('~'))
        })
        .map(|(_, tok)| tok.to_string())
        .collect()
}

/// Anchor a configured path at the process working directory.
///
/// When that directory is unknown the result stays relative, and relative
/// roots admit nothing.
fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return normalize(path);
    }
    match std::env::current_dir() {
        Ok(cwd) => resolve(&cwd, path),
        Err(e) => {
            warn!(
                "Cannot resolve sandbox root '{}': {}; path arguments will be rejected",
                path.display(),
                e
            );
            normalize(path)
        }
    }
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        normalize(path)
    } else {
        normalize(&base.join(path))
    }
}

/// Lexical normalization: folds `.` and `..` without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(p) => out.push(p.as_os_str()),
            Component::RootDir => out.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(part) => out.push(part),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> SandboxValidator {
        SandboxValidator::new(&SandboxConfig {
            working_root: PathBuf::from("/work/project"),
            allowed_paths: vec![PathBuf::from("/tmp/scratch")],
            blocked_paths: vec![PathBuf::from("/work/project/secrets")],
            ..SandboxConfig::default()
        })
    }

    fn rejected(v: SandboxVerdict) -> String {
        match v {
            SandboxVerdict::Rejected(reason) => reason,
            SandboxVerdict::Ok => panic!("expected rejection"),
        }
    }

    #[test]
    fn test_plain_commands_pass() {
        let v = validator();
        assert!(v.validate("ls -la").is_ok());
        assert!(v.validate("rm safe_delete.txt").is_ok());
        assert!(v.validate("cat ./src/main.rs").is_ok());
        assert!(v.validate("cp notes.txt /tmp/scratch/notes.txt").is_ok());
        assert!(v.validate("curl https://example.com/a/b").is_ok());
    }

    #[test]
    fn test_empty_command_rejected() {
        assert!(!validator().validate("   ").is_ok());
    }

    #[test]
    fn test_shell_composition_rejected() {
        let v = validator();
        for cmd in [
            "ls | grep test",
            "ls; pwd",
            "ls && pwd",
            "ls || pwd",
            "echo test > file.txt",
            "cat < input.txt",
            "echo $(pwd)",
            "echo `date`",
            "sleep 100 &",
            "ls\nrm x",
        ] {
            assert!(!v.validate(cmd).is_ok(), "should reject {:?}", cmd);
        }
        assert!(rejected(v.validate("ls | wc")).contains("'|'"));
    }

    #[test]
    fn test_chaining_allowed_when_configured() {
        let v = SandboxValidator::new(&SandboxConfig {
            allow_chaining: true,
            working_root: PathBuf::from("/work"),
            ..SandboxConfig::default()
        });
        assert!(v.validate("ls | wc -l").is_ok());
    }

    #[test]
    fn test_byte_bounds() {
        let v = SandboxValidator::new(&SandboxConfig {
            max_command_bytes: 32,
            max_argument_bytes: 8,
            working_root: PathBuf::from("/work"),
            ..SandboxConfig::default()
        });
        assert!(rejected(v.validate(&"x".repeat(40))).contains("limit is 32"));
        assert!(rejected(v.validate("echo abcdefghijk")).contains("limit is 8"));
        assert!(v.validate("echo abc").is_ok());
    }

    #[test]
    fn test_path_traversal_rejected() {
        let v = validator();
        assert!(rejected(v.validate("cat ../../etc/passwd")).contains("outside allowed"));
        assert!(!v.validate("cat /etc/passwd").is_ok());
        assert!(!v.validate("ls ..").is_ok());
        assert!(!v.validate("cat src/../../other/file").is_ok());
        assert!(!v.validate("cp x --target-directory=/etc").is_ok());
        // Traversal that stays inside the root is fine.
        assert!(v.validate("cat src/../README.md").is_ok());
    }

    #[test]
    fn test_blocked_path_inside_root() {
        let v = validator();
        let reason = rejected(v.validate("cat secrets/key.pem"));
        assert!(reason.contains("blocked directory"));
    }

    #[test]
    fn test_shell_expansion_rejected() {
        let v = validator();
        for cmd in [
            "cat $HOME/.aws/credentials",
            "cat ${HOME}/.aws/credentials",
            "ls $1",
            "cat $_",
            "cat .?/.?/etc/passwd",
            "cat src/.*/x",
            "cat {..,src}/passwd",
        ] {
            let reason = rejected(v.validate(cmd));
            assert!(reason.contains("shell expansion"), "{:?}: {}", cmd, reason);
        }
        // A lone dollar sign expands to nothing.
        assert!(v.validate("echo costs 5$").is_ok());
        assert!(v.validate("find . -name x -exec ls {} +").is_ok());
    }

    #[test]
    fn test_relative_working_root_is_anchored() {
        let v = SandboxValidator::new(&SandboxConfig {
            working_root: PathBuf::from("."),
            ..SandboxConfig::default()
        });
        assert!(v.working_root.is_absolute());
        assert!(rejected(v.validate("cat /etc/passwd")).contains("outside allowed"));
        assert!(!v.validate("cat ../../etc/shadow").is_ok());
        assert!(v.validate("cat Cargo.toml").is_ok());
    }

    #[test]
    fn test_relative_root_admits_nothing() {
        let v = SandboxValidator {
            allow_chaining: false,
            max_command_bytes: 64,
            max_argument_bytes: 64,
            working_root: PathBuf::new(),
            allowed_roots: vec![PathBuf::new()],
            blocked_roots: Vec::new(),
            home: None,
            check_allowlisted: true,
        };
        assert!(!v.validate("cat /etc/passwd").is_ok());
        assert!(!v.validate("cat notes.txt").is_ok());
        assert!(v.validate("ls").is_ok());
    }

    #[test]
    fn test_bare_name_in_blocked_directory() {
        let v = validator();
        assert!(rejected(v.validate("ls secrets")).contains("blocked directory"));
        assert!(!v.validate("cat secrets").is_ok());
        assert!(!v.validate("cp --target-directory=secrets notes.txt").is_ok());
        assert!(v.validate("ls secrets_not").is_ok());
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(Path::new("/a/b/../c/./d")), PathBuf::from("/a/c/d"));
        assert_eq!(normalize(Path::new("/../..")), PathBuf::from("/"));
    }
}
