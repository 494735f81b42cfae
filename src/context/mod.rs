//! Context forwarded to the gatekeeper.
//!
//! The pipeline treats the context as an opaque key-value bag: it is built
//! here from the process environment, merged with whatever the caller
//! supplies, and handed to the evaluator and the audit trail unmodified.

mod env;

use std::collections::BTreeMap;

pub use env::Environment;

/// Opaque key-value context passed through to the evaluator.
pub type GatekeeperContext = BTreeMap<String, String>;

/// Detect the host OS in a friendly form ("Linux", "macOS", "Windows").
pub fn detect_os() -> String {
    match std::env::consts::OS {
        "linux" => "Linux".to_string(),
        "macos" => "macOS".to_string(),
        "windows" => "Windows".to_string(),
        other => other.to_string(),
    }
}

/// Build the default context for this process.
///
/// Caller-supplied entries in `overrides` replace the captured ones.
pub fn capture(
    os_info: &str,
    environment: &str,
    overrides: &GatekeeperContext,
) -> GatekeeperContext {
    let env = Environment::capture();
    let mut ctx = GatekeeperContext::new();

    ctx.insert("os".to_string(), os_info.to_string());
    ctx.insert("environment".to_string(), environment.to_string());
    if let Ok(cwd) = std::env::current_dir() {
        ctx.insert("cwd".to_string(), cwd.to_string_lossy().into_owned());
    }
    if let Some(user) = env.user() {
        ctx.insert("user".to_string(), user.to_string());
    }
    if let Some(shell) = env.get("SHELL") {
        ctx.insert("shell".to_string(), shell.to_string());
    }

    for (key, value) in overrides {
        ctx.insert(key.clone(), value.clone());
    }
    ctx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_includes_os_and_environment() {
        let ctx = capture("Linux", "production", &GatekeeperContext::new());
        assert_eq!(ctx.get("os").map(String::as_str), Some("Linux"));
        assert_eq!(ctx.get("environment").map(String::as_str), Some("production"));
    }

    #[test]
    fn test_overrides_win() {
        let mut overrides = GatekeeperContext::new();
        overrides.insert("os".to_string(), "Windows".to_string());
        overrides.insert("ticket".to_string(), "OPS-12".to_string());

        let ctx = capture("Linux", "production", &overrides);
        assert_eq!(ctx["os"], "Windows");
        assert_eq!(ctx["ticket"], "OPS-12");
    }

    #[test]
    fn test_detect_os_is_not_empty() {
        assert!(!detect_os().is_empty());
    }
}
