//! Worker roster loading
//!
//! A roster is a TOML file listing workers and their capabilities. Each
//! worker is bound to a [`SimulatedExecutor`] that replies from the roster
//! instead of calling a real model.
//!
//! ```toml
//! [[workers]]
//! id = "reviewer-1"
//! name = "Careful Reviewer"
//! max_concurrent = 2
//! reply = "approve [confidence: 0.8]"
//! latency_ms = 150
//!
//! [[workers.capabilities]]
//! name = "code_review"
//! proficiency = 0.9
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use roundtable::executor::{SharedExecutor, WorkerExecutor};
use roundtable::{WorkerCapability, WorkerProfile};

fn default_max_concurrent() -> u32 {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerSpec {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: u32,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub capabilities: Vec<WorkerCapability>,
    /// Reply text; `{content}` is replaced with the task content
    #[serde(default)]
    pub reply: Option<String>,
    #[serde(default)]
    pub latency_ms: u64,
    /// Always fail instead of replying
    #[serde(default)]
    pub fail: bool,
}

impl WorkerSpec {
    pub fn profile(&self) -> WorkerProfile {
        let name = self.name.clone().unwrap_or_else(|| self.id.clone());
        let mut profile = WorkerProfile::new(self.id.clone(), name)
            .with_role(self.role.clone())
            .with_description(self.description.clone())
            .with_max_concurrent(self.max_concurrent);
        for tag in &self.tags {
            profile = profile.with_tag(tag.clone());
        }
        for capability in &self.capabilities {
            profile = profile.with_capability(capability.clone());
        }
        profile
    }

    pub fn executor(&self) -> SharedExecutor {
        Arc::new(SimulatedExecutor {
            reply: self
                .reply
                .clone()
                .unwrap_or_else(|| format!("ack from {}", self.id)),
            latency: Duration::from_millis(self.latency_ms),
            fail: self.fail,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Roster {
    #[serde(default)]
    pub workers: Vec<WorkerSpec>,
}

impl Roster {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).context("Failed to parse roster")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read roster {}", path.display()))?;
        Self::from_toml_str(&raw)
    }

    pub fn ids(&self) -> Vec<String> {
        self.workers.iter().map(|w| w.id.clone()).collect()
    }
}

/// Executor that answers from the roster after an optional delay
pub struct SimulatedExecutor {
    reply: String,
    latency: Duration,
    fail: bool,
}

#[async_trait]
impl WorkerExecutor for SimulatedExecutor {
    async fn execute(&self, content: &str) -> anyhow::Result<String> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.fail {
            anyhow::bail!("simulated worker failure");
        }
        debug!(latency_ms = self.latency.as_millis() as u64, "Simulated reply");
        Ok(self.reply.replace("{content}", content))
    }
}
