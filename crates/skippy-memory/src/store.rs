use std::sync::Mutex;

use rusqlite::Connection;
use tracing::debug;

use crate::error::{MemoryError, Result};
use crate::merge::deep_merge;
use crate::types::*;

const MEMORY_SEARCH_FIELDS: &[&str] = &["key", "value", "tags"];
const SKILL_SEARCH_FIELDS: &[&str] = &["name", "description", "instructions", "skill_data"];

/// Thread-safe store over the shared memory database.
/// All operations are short transactions on a `Mutex<Connection>`.
pub struct MemoryStore {
    db: Mutex<Connection>,
}

impl MemoryStore {
    pub fn new(conn: Connection) -> Self {
        Self { db: Mutex::new(conn) }
    }

    pub fn open(path: &std::path::Path) -> Result<Self> {
        Ok(Self::new(crate::db::open(path)?))
    }

    // --- memories ----------------------------------------------------------

    /// Upsert a memory. `key` is unique within its scope.
    pub fn set(
        &self,
        scope: &Scope,
        key: &str,
        value: &serde_json::Value,
        category: Option<&str>,
        tags: &[String],
    ) -> Result<()> {
        let db = self.db.lock().unwrap();
        let now = chrono::Utc::now().to_rfc3339();
        let value_json = serde_json::to_string(value)?;
        let category = category.unwrap_or("general");
        let tags_joined = tags.join(",");

        db.execute(
            "INSERT INTO memories (scope, key, value, category, tags, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
             ON CONFLICT(scope, key) DO UPDATE SET
                value = excluded.value,
                category = excluded.category,
                tags = excluded.tags,
                updated_at = excluded.updated_at",
            rusqlite::params![scope.as_key(), key, value_json, category, tags_joined, now],
        )?;
        debug!(scope = %scope, key, "memory set");
        Ok(())
    }

    pub fn get(&self, scope: &Scope, key: &str) -> Result<MemoryRecord> {
        let db = self.db.lock().unwrap();
        db.query_row(
            "SELECT scope, key, value, category, tags, created_at, updated_at
             FROM memories WHERE scope = ?1 AND key = ?2",
            rusqlite::params![scope.as_key(), key],
            row_to_memory,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => MemoryError::NotFound {
                scope: scope.as_key(),
                key: key.to_string(),
            },
            other => other.into(),
        })
    }

    pub fn delete(&self, scope: &Scope, key: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "DELETE FROM memories WHERE scope = ?1 AND key = ?2",
            rusqlite::params![scope.as_key(), key],
        )?;
        if n == 0 {
            return Err(MemoryError::NotFound {
                scope: scope.as_key(),
                key: key.to_string(),
            });
        }
        Ok(())
    }

    /// All memories in a scope, optionally narrowed to one category.
    pub fn list(&self, scope: &Scope, category: Option<&str>) -> Result<Vec<MemoryRecord>> {
        let db = self.db.lock().unwrap();
        let mut out = Vec::new();
        match category {
            Some(cat) => {
                let mut stmt = db.prepare(
                    "SELECT scope, key, value, category, tags, created_at, updated_at
                     FROM memories WHERE scope = ?1 AND category = ?2 ORDER BY key",
                )?;
                let rows = stmt.query_map(rusqlite::params![scope.as_key(), cat], row_to_memory)?;
                for r in rows {
                    out.push(r?);
                }
            }
            None => {
                let mut stmt = db.prepare(
                    "SELECT scope, key, value, category, tags, created_at, updated_at
                     FROM memories WHERE scope = ?1 ORDER BY category, key",
                )?;
                let rows = stmt.query_map(rusqlite::params![scope.as_key()], row_to_memory)?;
                for r in rows {
                    out.push(r?);
                }
            }
        }
        Ok(out)
    }

    pub fn list_categories(&self) -> Result<Vec<String>> {
        let db = self.db.lock().unwrap();
        let mut stmt =
            db.prepare("SELECT DISTINCT category FROM memories ORDER BY category")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    /// Sanitized names of every channel scope that has ever been written.
    pub fn known_channels(&self) -> Result<Vec<String>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT DISTINCT scope FROM memories WHERE scope LIKE 'channel:%' ORDER BY scope",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for r in rows {
            let scope: String = r?;
            if let Some(name) = scope.strip_prefix("channel:") {
                out.push(name.to_string());
            }
        }
        Ok(out)
    }

    /// Drop every record of a channel scope. The only way a channel scope
    /// ceases to exist.
    pub fn purge_channel(&self, channel: &str) -> Result<usize> {
        let db = self.db.lock().unwrap();
        let scope = Scope::channel(channel);
        let n = db.execute(
            "DELETE FROM memories WHERE scope = ?1",
            rusqlite::params![scope.as_key()],
        )?;
        debug!(scope = %scope, removed = n, "channel purged");
        Ok(n)
    }

    // --- search ------------------------------------------------------------

    /// Tokenized cross-scope search over memories.
    ///
    /// The query is lowercased, `_` becomes space, then split on whitespace.
    /// Each (field, token) pair contributes
    /// `LOWER(REPLACE(field,'_',' ')) LIKE %token%`, all OR-joined.
    pub fn search(&self, query: &str, fields: Option<&[String]>) -> Result<Vec<MemoryRecord>> {
        let tokens = tokenize(query);
        if tokens.is_empty() {
            return Err(MemoryError::QueryEmpty);
        }
        let fields = validate_fields(fields, MEMORY_SEARCH_FIELDS);

        let (clause, params) = like_clause(&fields, &tokens);
        let sql = format!(
            "SELECT scope, key, value, category, tags, created_at, updated_at
             FROM memories WHERE {clause} ORDER BY scope, key"
        );

        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&sql)?;
        let rows = stmt.query_map(
            rusqlite::params_from_iter(params.iter()),
            row_to_memory,
        )?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    /// Same tokenized matching over the skills table.
    pub fn search_skills(&self, query: &str) -> Result<Vec<SkillRecord>> {
        let tokens = tokenize(query);
        if tokens.is_empty() {
            return Err(MemoryError::QueryEmpty);
        }
        let fields: Vec<String> = SKILL_SEARCH_FIELDS.iter().map(|s| s.to_string()).collect();
        let (clause, params) = like_clause(&fields, &tokens);
        let sql = format!(
            "SELECT name, description, instructions, owner, skill_data, training_progress,
                    created_at, updated_at
             FROM skills WHERE {clause} ORDER BY name"
        );

        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(params.iter()), row_to_skill)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    // --- skills ------------------------------------------------------------

    pub fn create_skill(
        &self,
        name: &str,
        description: &str,
        instructions: &str,
        owner: &str,
    ) -> Result<SkillRecord> {
        let db = self.db.lock().unwrap();
        let now = chrono::Utc::now().to_rfc3339();
        let inserted = db.execute(
            "INSERT OR IGNORE INTO skills
             (name, description, instructions, owner, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            rusqlite::params![name, description, instructions, owner, now],
        )?;
        if inserted == 0 {
            return Err(MemoryError::SkillExists(name.to_string()));
        }
        drop(db);
        self.get_skill(name)
    }

    pub fn get_skill(&self, name: &str) -> Result<SkillRecord> {
        let db = self.db.lock().unwrap();
        db.query_row(
            "SELECT name, description, instructions, owner, skill_data, training_progress,
                    created_at, updated_at
             FROM skills WHERE name = ?1",
            rusqlite::params![name],
            row_to_skill,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => MemoryError::SkillNotFound(name.to_string()),
            other => other.into(),
        })
    }

    /// Deep-merge update. Accepts three input shapes:
    /// direct fields, `{skill_data: <obj>}`, and `{skill_data: null}` (clear).
    /// `description`, `instructions`, and `training_progress` are top-level
    /// fields and never land inside `skill_data`; any other unrecognized
    /// field is treated as skill data.
    pub fn update_skill(&self, name: &str, patch: serde_json::Value) -> Result<SkillRecord> {
        let mut skill = self.get_skill(name)?;

        let serde_json::Value::Object(patch_map) = patch else {
            return self.persist_skill(&skill).map(|_| skill);
        };

        let mut data_patch = serde_json::Map::new();
        for (key, value) in patch_map {
            match key.as_str() {
                "description" => {
                    if let Some(s) = value.as_str() {
                        skill.description = s.to_string();
                    }
                }
                "instructions" => {
                    if let Some(s) = value.as_str() {
                        skill.instructions = s.to_string();
                    }
                }
                "training_progress" => {
                    deep_merge(&mut skill.training_progress, value);
                }
                "skill_data" => match crate::merge::MergeOp::for_container(value) {
                    // The clear-container sentinel: reset, leave the rest alone.
                    crate::merge::MergeOp::ClearContainer => {
                        skill.skill_data = serde_json::json!({});
                    }
                    crate::merge::MergeOp::Set(other) => {
                        deep_merge(&mut skill.skill_data, other)
                    }
                    crate::merge::MergeOp::Delete => {}
                },
                "name" | "owner" => {} // immutable through update
                _ => {
                    data_patch.insert(key, value);
                }
            }
        }
        if !data_patch.is_empty() {
            deep_merge(&mut skill.skill_data, serde_json::Value::Object(data_patch));
        }

        self.persist_skill(&skill)?;
        self.get_skill(name)
    }

    fn persist_skill(&self, skill: &SkillRecord) -> Result<()> {
        let db = self.db.lock().unwrap();
        let now = chrono::Utc::now().to_rfc3339();
        db.execute(
            "UPDATE skills SET description = ?1, instructions = ?2, skill_data = ?3,
                    training_progress = ?4, updated_at = ?5
             WHERE name = ?6",
            rusqlite::params![
                skill.description,
                skill.instructions,
                serde_json::to_string(&skill.skill_data)?,
                serde_json::to_string(&skill.training_progress)?,
                now,
                skill.name,
            ],
        )?;
        Ok(())
    }

    pub fn delete_skill(&self, name: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        let n = db.execute("DELETE FROM skills WHERE name = ?1", rusqlite::params![name])?;
        if n == 0 {
            return Err(MemoryError::SkillNotFound(name.to_string()));
        }
        Ok(())
    }

    /// Skills visible to `user`: global ones plus their own.
    pub fn list_skills(&self, user: &str) -> Result<Vec<SkillRecord>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT name, description, instructions, owner, skill_data, training_progress,
                    created_at, updated_at
             FROM skills WHERE owner = 'global' OR owner = ?1 ORDER BY name",
        )?;
        let rows = stmt.query_map(rusqlite::params![user], row_to_skill)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    // --- auto-injection helpers --------------------------------------------

    /// Global memories grouped per requested category, in the given category
    /// order, each group ordered by key.
    pub fn context_memories(
        &self,
        categories: &[String],
    ) -> Result<Vec<(String, Vec<ContextMemory>)>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT key, value FROM memories
             WHERE scope = 'global' AND category = ?1 ORDER BY key",
        )?;
        let mut out = Vec::new();
        for category in categories {
            let rows = stmt.query_map(rusqlite::params![category], |row| {
                let value: String = row.get(1)?;
                Ok((row.get::<_, String>(0)?, value))
            })?;
            let mut items = Vec::new();
            for r in rows {
                let (key, value) = r?;
                items.push(ContextMemory {
                    key,
                    value: serde_json::from_str(&value)
                        .unwrap_or(serde_json::Value::String(value)),
                });
            }
            if !items.is_empty() {
                out.push((category.clone(), items));
            }
        }
        Ok(out)
    }

    /// The injectable fields of every skill visible to `user`.
    pub fn context_skills(&self, user: &str) -> Result<Vec<ContextSkill>> {
        Ok(self
            .list_skills(user)?
            .into_iter()
            .map(|s| ContextSkill {
                name: s.name,
                description: s.description,
                instructions: s.instructions,
                owner: s.owner,
            })
            .collect())
    }

    // --- export / import ---------------------------------------------------

    pub fn export_all(&self) -> Result<serde_json::Value> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT scope, key, value, category, tags, created_at, updated_at
             FROM memories ORDER BY scope, key",
        )?;
        let rows = stmt.query_map([], row_to_memory)?;
        let mut memories = Vec::new();
        for r in rows {
            memories.push(r?);
        }
        Ok(serde_json::json!({ "memories": memories }))
    }

    pub fn import_all(&self, data: &serde_json::Value) -> Result<usize> {
        let records: Vec<MemoryRecord> = serde_json::from_value(
            data.get("memories")
                .cloned()
                .unwrap_or(serde_json::Value::Array(vec![])),
        )?;
        let mut count = 0;
        for rec in &records {
            let scope = Scope::parse(&rec.scope);
            self.set(&scope, &rec.key, &rec.value, Some(&rec.category), &rec.tags)?;
            count += 1;
        }
        Ok(count)
    }
}

/// Lowercase, `_` → space, split on whitespace.
fn tokenize(query: &str) -> Vec<String> {
    query
        .to_lowercase()
        .replace('_', " ")
        .split_whitespace()
        .map(|t| t.to_string())
        .collect()
}

fn validate_fields(requested: Option<&[String]>, allowed: &[&str]) -> Vec<String> {
    match requested {
        Some(fields) => {
            let valid: Vec<String> = fields
                .iter()
                .filter(|f| allowed.contains(&f.as_str()))
                .cloned()
                .collect();
            if valid.is_empty() {
                allowed.iter().map(|s| s.to_string()).collect()
            } else {
                valid
            }
        }
        None => allowed.iter().map(|s| s.to_string()).collect(),
    }
}

/// Build the OR-joined LIKE clause and its `%token%` parameters.
/// Field names come from a fixed whitelist, never from input.
fn like_clause(fields: &[String], tokens: &[String]) -> (String, Vec<String>) {
    let mut clauses = Vec::new();
    let mut params = Vec::new();
    let mut n = 1;
    for field in fields {
        for token in tokens {
            clauses.push(format!("LOWER(REPLACE({field}, '_', ' ')) LIKE ?{n}"));
            params.push(format!("%{token}%"));
            n += 1;
        }
    }
    (clauses.join(" OR "), params)
}

fn row_to_memory(row: &rusqlite::Row<'_>) -> rusqlite::Result<MemoryRecord> {
    let value: String = row.get(2)?;
    let tags: String = row.get(4)?;
    Ok(MemoryRecord {
        scope: row.get(0)?,
        key: row.get(1)?,
        value: serde_json::from_str(&value).unwrap_or(serde_json::Value::String(value)),
        category: row.get(3)?,
        tags: if tags.is_empty() {
            Vec::new()
        } else {
            tags.split(',').map(|t| t.to_string()).collect()
        },
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn row_to_skill(row: &rusqlite::Row<'_>) -> rusqlite::Result<SkillRecord> {
    let data: String = row.get(4)?;
    let progress: String = row.get(5)?;
    Ok(SkillRecord {
        name: row.get(0)?,
        description: row.get(1)?,
        instructions: row.get(2)?,
        owner: row.get(3)?,
        skill_data: serde_json::from_str(&data).unwrap_or(serde_json::json!({})),
        training_progress: serde_json::from_str(&progress).unwrap_or(serde_json::json!({})),
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> MemoryStore {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_db(&conn).unwrap();
        MemoryStore::new(conn)
    }

    #[test]
    fn set_then_get_round_trips_the_value() {
        let s = store();
        let value = json!({"nested": {"n": 3}, "list": [1, 2]});
        s.set(&Scope::Global, "prefs", &value, None, &[]).unwrap();
        let rec = s.get(&Scope::Global, "prefs").unwrap();
        assert_eq!(rec.value, value);
        assert_eq!(rec.category, "general");
    }

    #[test]
    fn set_upserts_within_scope() {
        let s = store();
        s.set(&Scope::Global, "k", &json!(1), None, &[]).unwrap();
        s.set(&Scope::Global, "k", &json!(2), Some("notes"), &[]).unwrap();
        let rec = s.get(&Scope::Global, "k").unwrap();
        assert_eq!(rec.value, json!(2));
        assert_eq!(rec.category, "notes");
        assert_eq!(s.list(&Scope::Global, None).unwrap().len(), 1);
    }

    #[test]
    fn channel_scopes_are_isolated() {
        let s = store();
        s.set(&Scope::channel("Dev Chat"), "k", &json!("a"), None, &[])
            .unwrap();
        s.set(&Scope::Global, "k", &json!("b"), None, &[]).unwrap();
        assert_eq!(
            s.get(&Scope::channel("Dev Chat"), "k").unwrap().value,
            json!("a")
        );
        assert_eq!(s.known_channels().unwrap(), vec!["dev_chat"]);
        assert_eq!(s.purge_channel("Dev Chat").unwrap(), 1);
        assert!(s.get(&Scope::channel("Dev Chat"), "k").is_err());
        // Global untouched by the purge.
        assert_eq!(s.get(&Scope::Global, "k").unwrap().value, json!("b"));
    }

    #[test]
    fn tokenized_search_matches_all_spellings() {
        let s = store();
        s.set(
            &Scope::Global,
            "base_name",
            &json!("mega furnace"),
            None,
            &[],
        )
        .unwrap();
        for q in ["mega", "furnace", "mega_furnace", "FURNACE mega"] {
            let hits = s.search(q, None).unwrap();
            assert_eq!(hits.len(), 1, "query {q:?} should match");
        }
        assert!(matches!(
            s.search("  ", None),
            Err(MemoryError::QueryEmpty)
        ));
    }

    #[test]
    fn search_honors_field_selection() {
        let s = store();
        s.set(&Scope::Global, "alpha", &json!("beta"), None, &[])
            .unwrap();
        let key_only = vec!["key".to_string()];
        assert_eq!(s.search("beta", Some(&key_only)).unwrap().len(), 0);
        assert_eq!(s.search("alpha", Some(&key_only)).unwrap().len(), 1);
    }

    #[test]
    fn skill_merge_sequence() {
        let s = store();
        s.create_skill("smelting", "desc", "instr", "global").unwrap();
        s.update_skill("smelting", json!({"skill_data": {"a": {"b": 1}}}))
            .unwrap();
        s.update_skill("smelting", json!({"skill_data": {"a": {"c": 2}}}))
            .unwrap();
        let skill = s.get_skill("smelting").unwrap();
        assert_eq!(skill.skill_data, json!({"a": {"b": 1, "c": 2}}));

        s.update_skill("smelting", json!({"skill_data": {"a": {"b": null}}}))
            .unwrap();
        let skill = s.get_skill("smelting").unwrap();
        assert_eq!(skill.skill_data, json!({"a": {"c": 2}}));
    }

    #[test]
    fn skill_data_null_clears_but_preserves_text_fields() {
        let s = store();
        s.create_skill("mining", "d", "i", "global").unwrap();
        s.update_skill("mining", json!({"skill_data": {"x": 1}}))
            .unwrap();
        let skill = s.update_skill("mining", json!({"skill_data": null})).unwrap();
        assert_eq!(skill.skill_data, json!({}));
        assert_eq!(skill.description, "d");
        assert_eq!(skill.instructions, "i");
    }

    #[test]
    fn direct_fields_shape_lands_in_skill_data() {
        let s = store();
        s.create_skill("farming", "d", "i", "global").unwrap();
        let skill = s
            .update_skill(
                "farming",
                json!({"crops": ["wheat"], "instructions": "new instructions"}),
            )
            .unwrap();
        assert_eq!(skill.skill_data, json!({"crops": ["wheat"]}));
        assert_eq!(skill.instructions, "new instructions");
    }

    #[test]
    fn skill_visibility_by_owner() {
        let s = store();
        s.create_skill("shared", "d", "", "global").unwrap();
        s.create_skill("mine", "d", "", "alice").unwrap();
        let visible = s.list_skills("bob").unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].name, "shared");
        assert_eq!(s.list_skills("alice").unwrap().len(), 2);
    }

    #[test]
    fn context_memories_follow_category_order() {
        let s = store();
        s.set(&Scope::Global, "b", &json!(2), Some("beta"), &[]).unwrap();
        s.set(&Scope::Global, "a", &json!(1), Some("alpha"), &[]).unwrap();
        let cats = vec!["beta".to_string(), "alpha".to_string()];
        let ctx = s.context_memories(&cats).unwrap();
        assert_eq!(ctx[0].0, "beta");
        assert_eq!(ctx[1].0, "alpha");
    }

    #[test]
    fn export_import_round_trip() {
        let s = store();
        s.set(&Scope::Global, "k1", &json!({"a": 1}), Some("c1"), &["t1".into()])
            .unwrap();
        s.set(&Scope::channel("dev"), "k2", &json!("v"), None, &[])
            .unwrap();
        let dump = s.export_all().unwrap();

        let s2 = store();
        assert_eq!(s2.import_all(&dump).unwrap(), 2);
        assert_eq!(s2.export_all().unwrap()["memories"].as_array().unwrap().len(), 2);
        assert_eq!(s2.get(&Scope::Global, "k1").unwrap().value, json!({"a": 1}));
    }
}
