use serde::{Deserialize, Serialize};

/// Visibility realm of a memory record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    Global,
    /// Holds the sanitized channel name. Sanitization is irreversible;
    /// the sanitized form is the identity of the channel scope.
    Channel(String),
}

impl Scope {
    pub fn channel(name: &str) -> Self {
        Scope::Channel(sanitize_channel(name))
    }

    /// The scope column value: `global` or `channel:<sanitized>`.
    pub fn as_key(&self) -> String {
        match self {
            Scope::Global => "global".to_string(),
            Scope::Channel(name) => format!("channel:{name}"),
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.strip_prefix("channel:") {
            Some(name) => Scope::Channel(name.to_string()),
            None => Scope::Global,
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.as_key())
    }
}

/// Lowercase, keep alphanumerics, map everything else to underscore.
pub fn sanitize_channel(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub scope: String,
    pub key: String,
    /// Opaque structured blob: object, array, string, or number.
    pub value: serde_json::Value,
    pub category: String,
    pub tags: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillRecord {
    pub name: String,
    pub description: String,
    pub instructions: String,
    /// `global` or a user identifier. Visible when global or owned.
    pub owner: String,
    pub skill_data: serde_json::Value,
    pub training_progress: serde_json::Value,
    pub created_at: String,
    pub updated_at: String,
}

/// A `key: value` pair rendered into the prompt's memory section.
#[derive(Debug, Clone, Serialize)]
pub struct ContextMemory {
    pub key: String,
    pub value: serde_json::Value,
}

/// The always-injectable part of a skill.
#[derive(Debug, Clone, Serialize)]
pub struct ContextSkill {
    pub name: String,
    pub description: String,
    pub instructions: String,
    pub owner: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_everything_but_alphanumerics() {
        assert_eq!(sanitize_channel("My Channel-1!"), "my_channel_1_");
        assert_eq!(sanitize_channel("general"), "general");
    }

    #[test]
    fn scope_key_round_trip() {
        let s = Scope::channel("Dev Chat");
        assert_eq!(s.as_key(), "channel:dev_chat");
        assert_eq!(Scope::parse("channel:dev_chat"), s);
        assert_eq!(Scope::parse("global"), Scope::Global);
    }
}
