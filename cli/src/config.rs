use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use snippets::config::{
    ClassifyConfig, CorpusConfig, EnvironmentConfig, SynthConfig, TransformConfig,
};
use snippets::{Classifier, CorpusError, Pipeline, ScanOptions, Synthesizer};
use validator::ExecuteConfig;

/// File looked up at the corpus root when `--config` is not given.
pub const CONFIG_FILE: &str = "docsnip.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid configuration in {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error(transparent)]
    Corpus(#[from] CorpusError),
}

/// `docsnip.toml`. Every section and field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub corpus: CorpusConfig,
    pub classify: ClassifyConfig,
    pub environment: EnvironmentConfig,
    pub transform: TransformConfig,
    pub synth: SynthConfig,
    pub execute: ExecuteConfig,
}

impl Config {
    /// Load `explicit`, or `root/docsnip.toml` when it exists, or defaults.
    /// A missing explicit file is an error; a missing implicit one is not.
    pub fn load(explicit: Option<&Path>, root: &Path) -> Result<Config, ConfigError> {
        let path = match explicit {
            Some(p) => p.to_path_buf(),
            None => {
                let candidate = root.join(CONFIG_FILE);
                if !candidate.is_file() {
                    return Ok(Config::default());
                }
                candidate
            }
        };
        let text = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "loaded configuration");
        Config::parse(&text).map_err(|source| ConfigError::Parse { path, source })
    }

    pub fn parse(text: &str) -> Result<Config, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn scan_options(&self) -> Result<ScanOptions, ConfigError> {
        let classifier = Classifier::new(&self.classify.marker)?;
        Ok(ScanOptions::new(&self.corpus.languages, classifier))
    }

    pub fn synthesizer(&self) -> Result<Synthesizer, ConfigError> {
        let pipeline = Pipeline::new(&self.transform, &self.environment)?;
        Ok(Synthesizer::new(&self.synth, pipeline))
    }
}
