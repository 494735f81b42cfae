//! Environment variable capture.
//!
//! Only a small set of identity variables is kept. Secrets such as API keys
//! must never reach the evaluator prompt or the audit trail.

const KEPT_VARS: &[&str] = &["USER", "USERNAME", "LOGNAME", "SHELL", "HOME", "LANG"];

#[derive(Clone, Debug, Default)]
pub struct Environment {
    pub vars: Vec<(String, String)>,
}

impl Environment {
    pub fn capture() -> Self {
        let vars = std::env::vars()
            .filter(|(k, _)| KEPT_VARS.contains(&k.as_str()))
            .collect();
        Self { vars }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Login name, trying the Unix and Windows conventions.
    pub fn user(&self) -> Option<&str> {
        self.get("USER")
            .or_else(|| self.get("USERNAME"))
            .or_else(|| self.get("LOGNAME"))
    }
}
