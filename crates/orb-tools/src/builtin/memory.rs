// SPDX-License-Identifier: Apache-2.0
use tokio::sync::Mutex;

use async_trait::async_trait;
use orb_memory::{rank, Memory, MemoryStream, MemoryType, RankerWeights};
use serde_json::{json, Value};

use crate::tool::{OutputCategory, Tool, ToolCall, ToolOutput};

fn memory_type_from_str(s: &str) -> MemoryType {
    match s {
        "reflection" => MemoryType::Reflection,
        "plan" => MemoryType::Plan,
        "fact" => MemoryType::Fact,
        "preference" => MemoryType::Preference,
        "spatial" => MemoryType::Spatial,
        "safety" => MemoryType::Safety,
        _ => MemoryType::Observation,
    }
}

fn memory_type_str(t: MemoryType) -> &'static str {
    match t {
        MemoryType::Observation => "observation",
        MemoryType::Reflection => "reflection",
        MemoryType::Plan => "plan",
        MemoryType::Fact => "fact",
        MemoryType::Preference => "preference",
        MemoryType::Spatial => "spatial",
        MemoryType::Safety => "safety",
    }
}

/// Writes a new memory. `{description, importance?, memory_type?, tags?}`.
pub struct MemoryWriteTool {
    stream: std::sync::Arc<Mutex<MemoryStream>>,
}

impl MemoryWriteTool {
    pub fn new(stream: std::sync::Arc<Mutex<MemoryStream>>) -> Self {
        Self { stream }
    }
}

#[async_trait]
impl Tool for MemoryWriteTool {
    fn name(&self) -> &str {
        "memory_write"
    }

    fn description(&self) -> &str {
        "Write important information to long-term memory: user preferences, key facts, \
         task outcomes, spatial information, and anything else worth keeping across sessions."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "description": { "type": "string", "description": "What to remember" },
                "importance": { "type": "number", "description": "1-10, 10 = most important", "minimum": 1, "maximum": 10, "default": 5 },
                "memory_type": {
                    "type": "string",
                    "enum": ["observation", "reflection", "plan", "fact", "preference", "spatial", "safety"],
                    "default": "observation"
                },
                "tags": { "type": "array", "items": { "type": "string" }, "default": [] }
            },
            "required": ["description"]
        })
    }

    fn tags(&self) -> &[&str] {
        &["memory"]
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let description = match call.args.get("description").and_then(|v| v.as_str()) {
            Some(d) if !d.is_empty() => d.to_string(),
            _ => return ToolOutput::err(&call.id, "'description' is required"),
        };
        let importance = call.args.get("importance").and_then(|v| v.as_f64()).unwrap_or(5.0) as f32;
        let memory_type = call.args.get("memory_type").and_then(|v| v.as_str()).map(memory_type_from_str).unwrap_or(MemoryType::Observation);
        let tags: Vec<String> = call
            .args
            .get("tags")
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|t| t.as_str().map(String::from)).collect())
            .unwrap_or_default();

        let memory = Memory::new(description.clone(), memory_type, importance, tags);
        let memory_id = self.stream.lock().await.create(memory);

        ToolOutput::ok(
            &call.id,
            json!({
                "status": "success",
                "memory_id": memory_id,
                "description": description.chars().take(100).collect::<String>(),
                "memory_type": memory_type_str(memory_type),
                "importance": importance,
            })
            .to_string(),
        )
    }
}

/// Searches memories with the five-signal ranker. `{query, top_k?, memory_type?}`.
pub struct MemorySearchTool {
    stream: std::sync::Arc<Mutex<MemoryStream>>,
    weights: RankerWeights,
}

impl MemorySearchTool {
    pub fn new(stream: std::sync::Arc<Mutex<MemoryStream>>, weights: RankerWeights) -> Self {
        Self { stream, weights }
    }
}

#[async_trait]
impl Tool for MemorySearchTool {
    fn name(&self) -> &str {
        "memory_search"
    }

    fn description(&self) -> &str {
        "Search long-term memory, ranked by semantic relevance, recency, importance, \
         access frequency, and context affinity. Returns the most relevant memories."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" },
                "top_k": { "type": "integer", "default": 5, "minimum": 1, "maximum": 20 },
                "memory_type": {
                    "type": "string",
                    "enum": ["observation", "reflection", "plan", "fact", "preference", "spatial", "safety"]
                }
            },
            "required": ["query"]
        })
    }

    fn tags(&self) -> &[&str] {
        &["memory"]
    }

    fn output_category(&self) -> OutputCategory {
        OutputCategory::MatchList
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let query = call.args.get("query").and_then(|v| v.as_str()).unwrap_or("").to_string();
        let top_k = call.args.get("top_k").and_then(|v| v.as_u64()).unwrap_or(5) as usize;
        let type_filter = call.args.get("memory_type").and_then(|v| v.as_str()).map(memory_type_from_str);

        let mut stream = self.stream.lock().await;
        let candidates: Vec<Memory> = match type_filter {
            Some(t) => stream.filter_by_type(t).into_iter().cloned().collect(),
            None => stream.get_all().to_vec(),
        };

        if candidates.is_empty() {
            return ToolOutput::ok(&call.id, json!({ "results": [], "total": 0, "query": query }).to_string());
        }

        let recently_activated_owned: Vec<Memory> = stream.recently_activated().into_iter().cloned().collect();
        let recently_activated: Vec<&Memory> = recently_activated_owned.iter().collect();
        let ranked = rank(&candidates, None, &recently_activated, self.weights, top_k);

        for r in &ranked {
            let _ = stream.retrieve(&r.memory.memory_id);
        }

        let results: Vec<Value> = ranked
            .iter()
            .map(|r| {
                json!({
                    "memory_id": r.memory.memory_id,
                    "description": r.memory.description,
                    "memory_type": memory_type_str(r.memory.memory_type),
                    "importance": r.memory.importance,
                    "score": (r.final_score * 10_000.0).round() / 10_000.0,
                    "signals": {
                        "recency": r.signals.recency,
                        "importance": r.signals.importance,
                        "relevance": r.signals.relevance,
                        "frequency": r.signals.frequency,
                        "context_affinity": r.signals.context_affinity,
                    }
                })
            })
            .collect();

        ToolOutput::ok(&call.id, json!({ "results": results, "total": results.len(), "query": query }).to_string())
    }
}

/// Returns full memory details by id. `{memory_id}`.
pub struct MemoryGetTool {
    stream: std::sync::Arc<Mutex<MemoryStream>>,
}

impl MemoryGetTool {
    pub fn new(stream: std::sync::Arc<Mutex<MemoryStream>>) -> Self {
        Self { stream }
    }
}

#[async_trait]
impl Tool for MemoryGetTool {
    fn name(&self) -> &str {
        "memory_get"
    }

    fn description(&self) -> &str {
        "Retrieve full details for a memory by id."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "memory_id": { "type": "string" } },
            "required": ["memory_id"]
        })
    }

    fn tags(&self) -> &[&str] {
        &["memory"]
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let memory_id = match call.args.get("memory_id").and_then(|v| v.as_str()) {
            Some(id) => id.to_string(),
            None => return ToolOutput::err(&call.id, "'memory_id' is required"),
        };

        let mut stream = self.stream.lock().await;
        match stream.retrieve(&memory_id) {
            Ok(mem) => ToolOutput::ok(
                &call.id,
                json!({
                    "memory_id": mem.memory_id,
                    "description": mem.description,
                    "memory_type": memory_type_str(mem.memory_type),
                    "importance": mem.importance,
                    "access_count": mem.access_count,
                    "memory_strength": (mem.memory_strength * 100.0).round() / 100.0,
                    "created_at": mem.created_at.to_rfc3339(),
                    "last_accessed_at": mem.last_accessed_at.to_rfc3339(),
                    "tags": mem.tags,
                })
                .to_string(),
            ),
            Err(e) => ToolOutput::err(&call.id, e.to_string()),
        }
    }
}
