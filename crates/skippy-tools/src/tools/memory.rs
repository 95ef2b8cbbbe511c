//! `memory` tool — the model's interface to the persistent store.
//!
//! Required-parameter validation happens here, per operation, so the model
//! gets a precise message instead of a database error.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use skippy_memory::{MemoryStore, Scope};

use crate::{args, Tool, ToolResult};

pub struct MemoryTool {
    store: Arc<MemoryStore>,
}

impl MemoryTool {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct MemoryArgs {
    op: Option<String>,
    key: Option<String>,
    value: Option<serde_json::Value>,
    category: Option<String>,
    tags: Option<Vec<String>>,
    channel: Option<String>,
    query: Option<String>,
    fields: Option<Vec<String>>,
    name: Option<String>,
    description: Option<String>,
    instructions: Option<String>,
    owner: Option<String>,
    update: Option<serde_json::Value>,
    data: Option<serde_json::Value>,
}

macro_rules! require {
    ($opt:expr, $name:literal) => {
        match $opt {
            Some(v) => v,
            None => {
                return ToolResult::error(concat!("missing required parameter: ", $name))
            }
        }
    };
}

#[async_trait]
impl Tool for MemoryTool {
    fn name(&self) -> &str {
        "memory"
    }

    async fn run(&self, input: serde_json::Value) -> ToolResult {
        let a: MemoryArgs = match args::parse(&input) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };
        let Some(op) = a.op.as_deref() else {
            return ToolResult::error("missing required parameter: op");
        };

        match op {
            // --- global scope ---
            "set_global" => {
                let key = require!(a.key.as_deref(), "key");
                let value = require!(a.value.as_ref(), "value");
                let tags = a.tags.unwrap_or_default();
                into_result(
                    self.store
                        .set(&Scope::Global, key, value, a.category.as_deref(), &tags),
                )
            }
            "get_global" => {
                let key = require!(a.key.as_deref(), "key");
                record_result(self.store.get(&Scope::Global, key))
            }
            "delete_global" => {
                let key = require!(a.key.as_deref(), "key");
                into_result(self.store.delete(&Scope::Global, key))
            }
            "list_global" => list_result(self.store.list(&Scope::Global, a.category.as_deref())),

            // --- channel scope ---
            "set_channel" => {
                let channel = require!(a.channel.as_deref(), "channel");
                let key = require!(a.key.as_deref(), "key");
                let value = require!(a.value.as_ref(), "value");
                let tags = a.tags.unwrap_or_default();
                into_result(self.store.set(
                    &Scope::channel(channel),
                    key,
                    value,
                    a.category.as_deref(),
                    &tags,
                ))
            }
            "get_channel" => {
                let channel = require!(a.channel.as_deref(), "channel");
                let key = require!(a.key.as_deref(), "key");
                record_result(self.store.get(&Scope::channel(channel), key))
            }
            "delete_channel" => {
                let channel = require!(a.channel.as_deref(), "channel");
                let key = require!(a.key.as_deref(), "key");
                into_result(self.store.delete(&Scope::channel(channel), key))
            }
            "list_channel" => {
                let channel = require!(a.channel.as_deref(), "channel");
                list_result(
                    self.store
                        .list(&Scope::channel(channel), a.category.as_deref()),
                )
            }
            "purge_channel" => {
                let channel = require!(a.channel.as_deref(), "channel");
                match self.store.purge_channel(channel) {
                    Ok(n) => ToolResult::success(serde_json::json!({ "removed": n })),
                    Err(e) => ToolResult::error(e.to_string()),
                }
            }

            // --- search ---
            "search" => {
                let query = require!(a.query.as_deref(), "query");
                list_result(self.store.search(query, a.fields.as_deref()))
            }
            "search_skills" => {
                let query = require!(a.query.as_deref(), "query");
                match self.store.search_skills(query) {
                    Ok(skills) => {
                        ToolResult::success(serde_json::json!({ "skills": skills }))
                    }
                    Err(e) => ToolResult::error(e.to_string()),
                }
            }

            // --- skills ---
            "create_skill" => {
                let name = require!(a.name.as_deref(), "name");
                let description = a.description.as_deref().unwrap_or("");
                let instructions = a.instructions.as_deref().unwrap_or("");
                let owner = a.owner.as_deref().unwrap_or("global");
                skill_result(
                    self.store
                        .create_skill(name, description, instructions, owner),
                )
            }
            "get_skill" => {
                let name = require!(a.name.as_deref(), "name");
                skill_result(self.store.get_skill(name))
            }
            "update_skill" => {
                let name = require!(a.name.as_deref(), "name").to_string();
                // The patch may arrive under `update`, `data`, or as direct
                // description/instructions fields beside the op.
                let mut patch = a
                    .update
                    .or(a.data)
                    .or(a.value)
                    .unwrap_or(serde_json::json!({}));
                if !patch.is_object() && !patch.is_null() {
                    return ToolResult::error("update must be a JSON object");
                }
                if patch.is_null() {
                    patch = serde_json::json!({});
                }
                if let Some(d) = a.description {
                    patch["description"] = serde_json::json!(d);
                }
                if let Some(i) = a.instructions {
                    patch["instructions"] = serde_json::json!(i);
                }
                skill_result(self.store.update_skill(&name, patch))
            }
            "delete_skill" => {
                let name = require!(a.name.as_deref(), "name");
                into_result(self.store.delete_skill(name))
            }
            "list_skills" => {
                let owner = a.owner.as_deref().unwrap_or("global");
                match self.store.list_skills(owner) {
                    Ok(skills) => {
                        ToolResult::success(serde_json::json!({ "skills": skills }))
                    }
                    Err(e) => ToolResult::error(e.to_string()),
                }
            }

            // --- maintenance ---
            "list_categories" => match self.store.list_categories() {
                Ok(cats) => ToolResult::success(serde_json::json!({ "categories": cats })),
                Err(e) => ToolResult::error(e.to_string()),
            },
            "export" => match self.store.export_all() {
                Ok(dump) => ToolResult::success(dump),
                Err(e) => ToolResult::error(e.to_string()),
            },
            "import" => {
                let data = require!(a.data.as_ref(), "data");
                match self.store.import_all(data) {
                    Ok(n) => ToolResult::success(serde_json::json!({ "imported": n })),
                    Err(e) => ToolResult::error(e.to_string()),
                }
            }

            other => ToolResult::error(format!("unknown memory op: '{other}'")),
        }
    }

    fn context(&self) -> String {
        r#"Operations (all return {success, ...} and fail with a clear error):
Global:  {op: "set_global", key, value, category?, tags?} / get_global {key} /
         delete_global {key} / list_global {category?}
Channel: {op: "set_channel", channel, key, value, category?, tags?} / get_channel /
         delete_channel / list_channel {channel, category?} / purge_channel {channel}
Search:  {op: "search", query, fields?} over key/value/tags;
         {op: "search_skills", query}
Skills:  {op: "create_skill", name, description?, instructions?, owner?} /
         get_skill {name} / delete_skill {name} / list_skills {owner?} /
         {op: "update_skill", name, update: {...}} — nested objects merge,
         null deletes a field, {skill_data: null} clears all data;
         description/instructions are top-level, never merged into skill_data.
Misc:    list_categories / export / import {data}
Tags are short strings without commas. Values may be any JSON."#
            .to_string()
    }
}

fn into_result<E: std::fmt::Display>(r: Result<(), E>) -> ToolResult {
    match r {
        Ok(()) => ToolResult::success(serde_json::json!({})),
        Err(e) => ToolResult::error(e.to_string()),
    }
}

fn record_result<E: std::fmt::Display>(
    r: Result<skippy_memory::MemoryRecord, E>,
) -> ToolResult {
    match r {
        Ok(rec) => ToolResult::success(serde_json::json!({ "memory": rec })),
        Err(e) => ToolResult::error(e.to_string()),
    }
}

fn list_result<E: std::fmt::Display>(
    r: Result<Vec<skippy_memory::MemoryRecord>, E>,
) -> ToolResult {
    match r {
        Ok(records) => ToolResult::success(serde_json::json!({ "memories": records })),
        Err(e) => ToolResult::error(e.to_string()),
    }
}

fn skill_result<E: std::fmt::Display>(r: Result<skippy_memory::SkillRecord, E>) -> ToolResult {
    match r {
        Ok(skill) => ToolResult::success(serde_json::json!({ "skill": skill })),
        Err(e) => ToolResult::error(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool() -> MemoryTool {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        skippy_memory::db::init_db(&conn).unwrap();
        MemoryTool::new(Arc::new(MemoryStore::new(conn)))
    }

    #[tokio::test]
    async fn set_and_get_through_the_tool() {
        let t = tool();
        let r = t
            .run(serde_json::json!({"op": "set_global", "key": "k", "value": {"a": 1}}))
            .await;
        assert!(r.success, "{:?}", r.error);
        let r = t
            .run(serde_json::json!({"op": "get_global", "key": "k"}))
            .await;
        assert_eq!(r.output["memory"]["value"], serde_json::json!({"a": 1}));
    }

    #[tokio::test]
    async fn missing_required_parameter_is_named() {
        let t = tool();
        let r = t.run(serde_json::json!({"op": "set_global", "key": "k"})).await;
        assert!(r.is_failure());
        assert!(r.error.unwrap().contains("value"));
    }

    #[tokio::test]
    async fn get_of_absent_key_is_a_failure_result() {
        let t = tool();
        let r = t
            .run(serde_json::json!({"op": "get_global", "key": "ghost"}))
            .await;
        assert!(r.is_failure());
        assert!(r.error.unwrap().contains("ghost"));
    }

    #[tokio::test]
    async fn op_envelope_shape_reaches_the_store() {
        let t = tool();
        let normalized =
            crate::args::normalize(serde_json::json!(["set_global", {"key": "k", "value": 7}]));
        let r = t.run(normalized).await;
        assert!(r.success, "{:?}", r.error);
    }
}
