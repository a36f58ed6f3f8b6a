use std::fmt;
use std::time::Duration;

use serde::Deserialize;

use snippets::config::EnvironmentConfig;

/// `[execute]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ExecuteConfig {
    /// When false the state machine stops at `LintPass`.
    pub enabled: bool,
    pub interpreter: String,
    pub timeout_secs: u64,
    /// Fed to the child's stdin, one per line, for snippets that call `input()`.
    pub stdin_responses: Vec<String>,
    /// Captured stdout and stderr are cut to this many bytes.
    pub max_output: usize,
}

impl Default for ExecuteConfig {
    fn default() -> Self {
        ExecuteConfig {
            enabled: true,
            interpreter: "python3".to_string(),
            timeout_secs: 30,
            stdin_responses: vec!["test input".to_string(), "quit".to_string()],
            max_output: 500,
        }
    }
}

impl ExecuteConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub(crate) fn stdin_text(&self) -> String {
        let mut text = String::new();
        for response in &self.stdin_responses {
            text.push_str(response);
            text.push('\n');
        }
        text
    }
}

/// Credential values for a run, keyed by the variable names in
/// [`EnvironmentConfig`].
#[derive(Clone, Default)]
pub struct Credentials {
    pub primary: Option<String>,
    pub elevated: Option<String>,
    pub base_url: Option<String>,
}

impl Credentials {
    /// Read the configured variables from the process environment. Empty
    /// values count as unset.
    pub fn from_env(env: &EnvironmentConfig) -> Self {
        let read = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        Credentials {
            primary: read(&env.primary_var),
            elevated: read(&env.elevated_var),
            base_url: read(&env.base_url_var),
        }
    }

    pub fn with_primary(mut self, value: impl Into<String>) -> Self {
        self.primary = Some(value.into());
        self
    }

    pub fn with_elevated(mut self, value: impl Into<String>) -> Self {
        self.elevated = Some(value.into());
        self
    }

    pub fn with_base_url(mut self, value: impl Into<String>) -> Self {
        self.base_url = Some(value.into());
        self
    }

    /// Variables to set (`Some`) or remove (`None`) in the child process.
    pub(crate) fn child_env(&self, env: &EnvironmentConfig) -> Vec<(String, Option<String>)> {
        vec![
            (env.primary_var.clone(), self.primary.clone()),
            (env.elevated_var.clone(), self.elevated.clone()),
            (env.base_url_var.clone(), self.base_url.clone()),
        ]
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shown = |v: &Option<String>| if v.is_some() { "<set>" } else { "<unset>" };
        f.debug_struct("Credentials")
            .field("primary", &shown(&self.primary))
            .field("elevated", &shown(&self.elevated))
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stdin_is_one_response_per_line() {
        assert_eq!(ExecuteConfig::default().stdin_text(), "test input\nquit\n");
    }

    #[test]
    fn partial_execute_section() {
        let execute: ExecuteConfig = serde_json::from_str(r#"{"timeout_secs": 5}"#).unwrap();
        assert_eq!(execute.timeout(), Duration::from_secs(5));
        assert_eq!(execute.interpreter, "python3");
        assert!(execute.enabled);
    }

    #[test]
    fn debug_hides_secrets() {
        let creds = Credentials::default().with_primary("sk-secret");
        let shown = format!("{:?}", creds);
        assert!(!shown.contains("sk-secret"));
        assert!(shown.contains("<set>"));
    }
}
