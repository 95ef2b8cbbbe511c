//! Persistent context items: files and images attached to every prompt.
//!
//! Backed by `~/.Skippy/context.json`. Files are read fresh on each prompt;
//! images are loaded once per prompt and passed as base64.

use std::path::PathBuf;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextItemKind {
    File,
    Image,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextItem {
    #[serde(rename = "type")]
    pub kind: ContextItemKind,
    pub path: String,
    pub added_at: String,
    pub added_by: String,
}

pub struct PersistentContext {
    store_path: PathBuf,
    items: RwLock<Vec<ContextItem>>,
}

impl PersistentContext {
    /// Load from `store_path`; a missing file is an empty list.
    pub fn load(store_path: PathBuf) -> Self {
        let items = match std::fs::read_to_string(&store_path) {
            Ok(body) => serde_json::from_str(&body).unwrap_or_else(|e| {
                warn!(path = %store_path.display(), error = %e, "unreadable context store");
                Vec::new()
            }),
            Err(_) => Vec::new(),
        };
        Self {
            store_path,
            items: RwLock::new(items),
        }
    }

    pub fn add(&self, kind: ContextItemKind, path: &str, added_by: &str) -> std::io::Result<()> {
        let item = ContextItem {
            kind,
            path: path.to_string(),
            added_at: chrono::Utc::now().to_rfc3339(),
            added_by: added_by.to_string(),
        };
        let mut items = self.items.write().unwrap();
        items.push(item);
        self.persist(&items)
    }

    /// Remove by 1-based index, as shown by `context list`.
    pub fn remove(&self, index: usize) -> std::io::Result<Option<ContextItem>> {
        let mut items = self.items.write().unwrap();
        if index == 0 || index > items.len() {
            return Ok(None);
        }
        let removed = items.remove(index - 1);
        self.persist(&items)?;
        Ok(Some(removed))
    }

    pub fn clear(&self) -> std::io::Result<usize> {
        let mut items = self.items.write().unwrap();
        let n = items.len();
        items.clear();
        self.persist(&items)?;
        Ok(n)
    }

    pub fn list(&self) -> Vec<ContextItem> {
        self.items.read().unwrap().clone()
    }

    pub fn files(&self) -> Vec<ContextItem> {
        self.list()
            .into_iter()
            .filter(|i| i.kind == ContextItemKind::File)
            .collect()
    }

    pub fn image_paths(&self) -> Vec<String> {
        self.list()
            .into_iter()
            .filter(|i| i.kind == ContextItemKind::Image)
            .map(|i| i.path)
            .collect()
    }

    fn persist(&self, items: &[ContextItem]) -> std::io::Result<()> {
        let body = serde_json::to_string_pretty(items).unwrap_or_else(|_| "[]".to_string());
        std::fs::write(&self.store_path, body)
    }
}
