//! Long-term memory entities.
//!
//! A memory is a single fact about a user (a condition, a medication, a
//! person) with optional typed relationships and free-form metadata.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{new_id, IdPrefix};

/// Typed link from a memory to another named entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    #[serde(rename = "type", default)]
    pub relationship_type: String,

    #[serde(rename = "relatedEntity", alias = "related_entity", alias = "target", default)]
    pub related_entity: String,
}

impl Relationship {
    pub fn new(relationship_type: impl Into<String>, related_entity: impl Into<String>) -> Self {
        Self {
            relationship_type: relationship_type.into(),
            related_entity: related_entity.into(),
        }
    }

    /// `"<type> <relatedEntity>"`, or None when either side is empty.
    pub fn summary(&self) -> Option<String> {
        if self.relationship_type.is_empty() || self.related_entity.is_empty() {
            return None;
        }
        Some(format!("{} {}", self.relationship_type, self.related_entity))
    }
}

/// A fact remembered about one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryEntity {
    pub id: String,

    #[serde(alias = "owner_id", alias = "userId", alias = "user_id")]
    pub owner_id: String,

    #[serde(alias = "entity_type")]
    pub entity_type: String,

    #[serde(alias = "entity_name")]
    pub entity_name: String,

    #[serde(default)]
    pub relationships: Vec<Relationship>,

    /// Known keys: description, severity, status
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,

    #[serde(default, alias = "conversation_id", skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,

    #[serde(alias = "created_at")]
    pub created_at: DateTime<Utc>,

    #[serde(alias = "updated_at")]
    pub updated_at: DateTime<Utc>,
}

impl MemoryEntity {
    pub fn new(
        owner_id: impl Into<String>,
        entity_type: impl Into<String>,
        entity_name: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(IdPrefix::Memory),
            owner_id: owner_id.into(),
            entity_type: entity_type.into(),
            entity_name: entity_name.into(),
            relationships: Vec::new(),
            metadata: BTreeMap::new(),
            embedding: None,
            conversation_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_relationship(mut self, relationship: Relationship) -> Self {
        self.relationships.push(relationship);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    /// Render a metadata value as text.
    ///
    /// Strings are returned verbatim, other JSON values in their compact
    /// form. Missing keys and explicit nulls yield None.
    pub fn metadata_text(&self, key: &str) -> Option<String> {
        match self.metadata.get(key)? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}
