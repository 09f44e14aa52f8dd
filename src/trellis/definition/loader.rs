// SPDX-License-Identifier: MIT

//! Definition loader - YAML file loading and parsing

use super::types::GraphDefinition;
use crate::adk::error::TrellisError;
use std::fs;
use std::path::Path;

/// Loads graph definitions from YAML files
pub struct DefinitionLoader;

impl DefinitionLoader {
    pub fn new() -> Self {
        Self
    }

    /// Load a definition from a YAML file
    pub fn load<P: AsRef<Path>>(&self, path: P) -> Result<GraphDefinition, TrellisError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            TrellisError::config(format!("cannot read definition {}: {}", path.display(), e))
        })?;
        let def = Self::parse_yaml(&content)?;
        log::debug!(
            "Loaded definition '{}' from {} ({} nodes)",
            def.name,
            path.display(),
            def.nodes.len()
        );
        Ok(def)
    }

    /// Parse a definition from a YAML string
    pub fn parse_yaml(content: &str) -> Result<GraphDefinition, TrellisError> {
        let def: GraphDefinition = serde_yaml::from_str(content)?;
        Ok(def)
    }
}

impl Default for DefinitionLoader {
    fn default() -> Self {
        Self::new()
    }
}
