// SPDX-License-Identifier: Apache-2.0
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::{Tool, ToolCall, ToolOutput};

#[derive(Debug, Clone)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// A named bundle of tools resolved as `include_groups ∪ include_tools −
/// exclude_tools`, where each group name in `include_groups` expands to the
/// tools tagged with it.
#[derive(Debug, Clone, Default)]
pub struct Profile {
    pub include_groups: Vec<String>,
    pub include_tools: Vec<String>,
    pub exclude_tools: Vec<String>,
}

/// Central registry holding all available tools, their group tags, and named
/// profiles resolved against those tags.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    profiles: HashMap<String, Profile>,
}

// SAFETY: ToolRegistry is Sync because its maps hold only Arc<dyn Tool>
// (Tool: Send + Sync) and owned Strings, and no method mutates shared state
// through &self after construction — registration happens before the
// registry is shared across tasks.
unsafe impl Sync for ToolRegistry {}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: HashMap::new(), profiles: HashMap::new() }
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    pub fn define_profile(&mut self, name: impl Into<String>, profile: Profile) {
        self.profiles.insert(name.into(), profile);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    fn tools_tagged(&self, group: &str) -> impl Iterator<Item = &str> {
        self.tools.values().filter(move |t| t.tags().contains(&group)).map(|t| t.name())
    }

    /// Resolve a profile by name to the set of tool names it grants.
    pub fn resolve_profile(&self, name: &str) -> HashSet<String> {
        let Some(profile) = self.profiles.get(name) else { return HashSet::new() };
        let mut names: HashSet<String> = profile.include_groups.iter().flat_map(|g| self.tools_tagged(g)).map(String::from).collect();
        names.extend(profile.include_tools.iter().cloned());
        for excluded in &profile.exclude_tools {
            names.remove(excluded);
        }
        names
    }

    pub fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self
            .tools
            .values()
            .map(|t| ToolSchema { name: t.name().to_string(), description: t.description().to_string(), parameters: t.parameters_schema() })
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// Schemas restricted to the tool names a profile grants.
    pub fn schemas_for_profile(&self, name: &str) -> Vec<ToolSchema> {
        let allowed = self.resolve_profile(name);
        let mut schemas: Vec<ToolSchema> = self
            .tools
            .values()
            .filter(|t| allowed.contains(t.name()))
            .map(|t| ToolSchema { name: t.name().to_string(), description: t.description().to_string(), parameters: t.parameters_schema() })
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    pub async fn execute(&self, call: &ToolCall) -> ToolOutput {
        match self.tools.get(&call.name) {
            Some(tool) => tool.execute(call).await,
            None => ToolOutput::err(&call.id, format!("unknown tool: {}", call.name)),
        }
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
