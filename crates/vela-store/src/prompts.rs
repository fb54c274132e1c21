//! In-memory prompt library.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tracing::info;

use vela_core::{PromptLibrary, Result};

/// Name of the pack left behind by a reset.
pub const DEFAULT_PACK: &str = "Default";

/// Prompt packs keyed by name. Prompt text itself is opaque here.
#[derive(Debug)]
pub struct MemoryPromptLibrary {
    packs: Mutex<BTreeMap<String, Vec<String>>>,
}

impl Default for MemoryPromptLibrary {
    fn default() -> Self {
        let mut packs = BTreeMap::new();
        packs.insert(DEFAULT_PACK.to_string(), Vec::new());
        Self {
            packs: Mutex::new(packs),
        }
    }
}

impl MemoryPromptLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `prompt` to `pack`, creating the pack if needed.
    pub fn add_prompt(&self, pack: &str, prompt: impl Into<String>) {
        self.packs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(pack.to_string())
            .or_default()
            .push(prompt.into());
    }

    pub fn pack_names(&self) -> Vec<String> {
        self.packs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub fn prompts(&self, pack: &str) -> Vec<String> {
        self.packs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(pack)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl PromptLibrary for MemoryPromptLibrary {
    async fn reset_to_default(&self) -> Result<()> {
        let mut packs = self.packs.lock().unwrap_or_else(PoisonError::into_inner);
        let removed = packs.len();
        packs.clear();
        packs.insert(DEFAULT_PACK.to_string(), Vec::new());
        info!(removed, "Prompt library reset to default pack");
        Ok(())
    }
}
