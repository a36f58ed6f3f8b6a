//! Configuration sections consumed by the extraction pipeline.
//!
//! Every section deserializes from `docsnip.toml` and falls back to its
//! defaults field by field, so an empty file is a valid configuration.

use serde::Deserialize;

use crate::classify::DEFAULT_MARKER;
use crate::synth::SynthMode;

/// Which files are documents and where generated modules go.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CorpusConfig {
    /// File extensions (without dot) treated as documents.
    pub extensions: Vec<String>,
    /// Fence language tags treated as the target language.
    pub languages: Vec<String>,
    /// Output directory for generated modules, relative to the corpus root.
    pub output_dir: String,
    /// Directory names never descended into.
    pub exclude_dirs: Vec<String>,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        CorpusConfig {
            extensions: vec!["md".into(), "mdx".into()],
            languages: vec!["python".into(), "py".into(), "python3".into()],
            output_dir: "generated".into(),
            exclude_dirs: vec!["node_modules".into(), "target".into()],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClassifyConfig {
    /// Regex matched against a whole trimmed line.
    pub marker: String,
}

impl Default for ClassifyConfig {
    fn default() -> Self {
        ClassifyConfig {
            marker: DEFAULT_MARKER.to_string(),
        }
    }
}

/// Names of the environment variables the generated code reads.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EnvironmentConfig {
    pub primary_var: String,
    pub elevated_var: String,
    pub base_url_var: String,
    /// Base URL used when `base_url_var` is unset.
    pub sandbox_base_url: String,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        EnvironmentConfig {
            primary_var: "DOCS_SANDBOX_API_TOKEN".into(),
            elevated_var: "DOCS_PRODUCTION_API_TOKEN".into(),
            base_url_var: "DOCS_API_BASE_URL".into(),
            sandbox_base_url: "https://sandbox.api.example.com".into(),
        }
    }
}

/// A documented placeholder literal swapped for an environment lookup.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Placeholder {
    pub literal: String,
    /// Module-level symbol the literal is replaced with.
    pub symbol: String,
    /// Environment variable the symbol reads, falling back to the literal.
    pub env: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    /// Production host replaced with the configurable base URL.
    pub production_host: String,
    /// Placeholder credential tokens written in the docs.
    pub placeholder_tokens: Vec<String>,
    /// Regexes for literal example credentials.
    pub credential_patterns: Vec<String>,
    /// Environment variable names older docs read the key from.
    pub legacy_env_names: Vec<String>,
    /// Variable names that conventionally hold the key (`API_KEY = "..."`).
    pub key_variables: Vec<String>,
    /// Documents whose fragments need the elevated credential.
    pub elevated_documents: Vec<String>,
    /// URL path fragments that identify the elevated API surface.
    pub elevated_paths: Vec<String>,
    pub placeholders: Vec<Placeholder>,
}

impl Default for TransformConfig {
    fn default() -> Self {
        TransformConfig {
            production_host: "https://api.example.com".into(),
            placeholder_tokens: vec!["YOUR_API_KEY".into(), "YOUR_EDEN_AI_API_KEY".into()],
            credential_patterns: vec![r"\bsk-[A-Za-z0-9_-]{3,}".into()],
            legacy_env_names: vec!["API_KEY".into(), "EDEN_AI_API_KEY".into()],
            key_variables: vec!["API_KEY".into()],
            elevated_documents: Vec::new(),
            elevated_paths: Vec::new(),
            placeholders: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SynthConfig {
    pub mode: SynthMode,
    /// Modules imported automatically when a fragment uses them unbound.
    pub auto_imports: Vec<String>,
}

impl Default for SynthConfig {
    fn default() -> Self {
        SynthConfig {
            mode: SynthMode::Page,
            auto_imports: ["os", "json", "time", "base64", "requests"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}
