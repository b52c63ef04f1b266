use std::collections::HashSet;
use std::path::Path;

use frame_bus::{EncoderOptions, EncoderPreference, FrameRate};
use serde::{Deserialize, Serialize};

// ============================================================================
// Configuration Types
// ============================================================================

/// One tee output: an encoder and the sink measuring it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchConfig {
    // reporting name, unique within a pipe
    pub name: String,
    #[serde(default)]
    pub encoder: EncoderOptions,
}

impl BranchConfig {
    pub fn new(name: impl Into<String>, encoder: EncoderOptions) -> Self {
        Self {
            name: name.into(),
            encoder,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipeConfig {
    // None = the rate the media declares, else 30000/1001
    pub framerate: Option<FrameRate>,
    pub branches: Vec<BranchConfig>,
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            framerate: None,
            branches: default_branches(),
        }
    }
}

/// A software and a hardware branch.
pub fn default_branches() -> Vec<BranchConfig> {
    vec![
        BranchConfig::new(
            "software",
            EncoderOptions::default().with_preference(EncoderPreference::PreferSoftware),
        ),
        BranchConfig::new(
            "hardware",
            EncoderOptions::default().with_preference(EncoderPreference::PreferHardware),
        ),
    ]
}

impl PipeConfig {
    pub fn builder() -> PipeConfigBuilder {
        PipeConfigBuilder::default()
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("read {}: {}", path.display(), e))?;
        let config: PipeConfig = serde_json::from_str(&text)
            .map_err(|e| anyhow::anyhow!("parse {}: {}", path.display(), e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn frame_rate(&self) -> FrameRate {
        self.framerate.unwrap_or_default()
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.branches.is_empty() {
            anyhow::bail!("at least one branch is required");
        }
        let mut seen = HashSet::new();
        for branch in &self.branches {
            if branch.name.is_empty() {
                anyhow::bail!("branch name must not be empty");
            }
            if !seen.insert(branch.name.as_str()) {
                anyhow::bail!("duplicate branch name: {}", branch.name);
            }
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct PipeConfigBuilder {
    framerate: Option<FrameRate>,
    branches: Vec<BranchConfig>,
}

impl PipeConfigBuilder {
    /// Stamp frames at this rate instead of the one the media declares.
    pub fn framerate(mut self, rate: FrameRate) -> Self {
        self.framerate = Some(rate);
        self
    }

    pub fn add_branch(mut self, name: impl Into<String>, encoder: EncoderOptions) -> Self {
        self.branches.push(BranchConfig::new(name, encoder));
        self
    }

    /// Add a branch that only states an encoder preference
    pub fn add_preference_branch(
        self,
        name: impl Into<String>,
        preference: EncoderPreference,
    ) -> Self {
        self.add_branch(name, EncoderOptions::default().with_preference(preference))
    }

    /// Without any branch added the two default branches are used.
    pub fn build(self) -> PipeConfig {
        PipeConfig {
            framerate: self.framerate,
            branches: if self.branches.is_empty() {
                default_branches()
            } else {
                self.branches
            },
        }
    }
}
