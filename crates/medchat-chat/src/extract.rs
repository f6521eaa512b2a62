//! Entity extraction from conversation text.
//!
//! Asks the chat model for a JSON array of patient facts (people,
//! conditions, medications, symptoms). Extraction is best-effort: a failed
//! call or an unparseable reply yields no entities and a warning.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use medchat_types::{MemoryEntity, NormalizedMessage, Relationship, Role};

use crate::model::{ChatModel, ChatRequest};

/// Extraction always runs on this model, whatever the chat default is
pub const EXTRACTION_MODEL: &str = "sonar-pro";

const EXTRACTION_SYSTEM_PROMPT: &str =
    "You are a medical entity extraction system. Extract structured medical information.";

/// One entity as returned by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedEntity {
    #[serde(alias = "entity_type")]
    pub entity_type: String,

    #[serde(alias = "entity_name")]
    pub entity_name: String,

    #[serde(default)]
    pub relationships: Vec<Relationship>,

    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl ExtractedEntity {
    /// A new memory for `owner_id` carrying this entity's fields.
    pub fn into_memory(self, owner_id: &str, conversation_id: Option<&str>) -> MemoryEntity {
        let mut memory = MemoryEntity::new(owner_id, self.entity_type, self.entity_name);
        memory.relationships = self.relationships;
        memory.metadata = self.metadata;
        memory.conversation_id = conversation_id.map(str::to_string);
        memory
    }
}

pub struct EntityExtractor {
    model: Arc<dyn ChatModel>,
}

impl EntityExtractor {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }

    fn build_prompt(conversation_text: &str) -> String {
        format!(
            r#"Analyze the following medical conversation and extract important entities.

Extract:
1. People (name, relationship to user)
2. Medical conditions (diagnosis, symptoms)
3. Medications (name, purpose)
4. Important medical facts

Return ONLY a JSON array:
[
  {{
    "entityType": "person|condition|medication|symptom",
    "entityName": "name of entity",
    "relationships": [{{"type": "relationship_type", "relatedEntity": "related_entity"}}],
    "metadata": {{"key": "value"}}
  }}
]

Conversation:
{conversation_text}

Return only the JSON array, no other text."#
        )
    }

    /// Extract entities; never fails.
    pub async fn extract(&self, conversation_text: &str) -> Vec<ExtractedEntity> {
        if conversation_text.trim().is_empty() {
            return Vec::new();
        }

        let request = ChatRequest::new(
            EXTRACTION_MODEL.to_string(),
            vec![
                NormalizedMessage::new(Role::System, EXTRACTION_SYSTEM_PROMPT),
                NormalizedMessage::new(Role::User, Self::build_prompt(conversation_text)),
            ],
        );

        let response = match self.model.complete(&request).await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "Entity extraction call failed");
                return Vec::new();
            }
        };

        match parse_entities(&response.content) {
            Ok(entities) => {
                debug!(count = entities.len(), "Extracted entities");
                entities
            }
            Err(e) => {
                warn!(error = %e, "Entity extraction reply was not a JSON array");
                Vec::new()
            }
        }
    }
}

fn parse_entities(reply: &str) -> Result<Vec<ExtractedEntity>, serde_json::Error> {
    let json = extract_json_array(reply);
    let entities: Vec<ExtractedEntity> = serde_json::from_str(&json)?;
    Ok(entities
        .into_iter()
        .filter(|e| !e.entity_name.trim().is_empty())
        .collect())
}

/// Extract a JSON array from text (handles markdown code blocks).
fn extract_json_array(text: &str) -> String {
    // Check for markdown code block
    if let Some(start) = text.find("```json") {
        if let Some(end) = text[start + 7..].find("```") {
            return text[start + 7..start + 7 + end].trim().to_string();
        }
    }

    // Check for plain code block
    if let Some(start) = text.find("```") {
        if let Some(end) = text[start + 3..].find("```") {
            return text[start + 3..start + 3 + end].trim().to_string();
        }
    }

    // Find first [ and last ]
    if let (Some(start), Some(end)) = (text.find('['), text.rfind(']')) {
        if start < end {
            return text[start..=end].to_string();
        }
    }

    text.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChatError;
    use crate::mock::MockChatModel;
    use crate::model::ChatResponse;

    const REPLY: &str = r#"[
      {"entityType": "medication", "entityName": "Lisinopril",
       "relationships": [{"type": "treats", "target": "hypertension"}],
       "metadata": {"description": "10mg daily"}},
      {"entityType": "person", "entityName": "Maria",
       "relationships": [{"type": "mother_of", "relatedEntity": "user"}]}
    ]"#;

    #[test]
    fn test_extract_json_array_plain() {
        assert_eq!(extract_json_array("[1, 2]"), "[1, 2]");
    }

    #[test]
    fn test_extract_json_array_code_block() {
        let text = "Here you go:\n```json\n[{\"a\": 1}]\n```";
        assert_eq!(extract_json_array(text), "[{\"a\": 1}]");
    }

    #[test]
    fn test_extract_json_array_with_prose() {
        let text = "Sure! [{\"a\": 1}] Hope that helps.";
        assert_eq!(extract_json_array(text), "[{\"a\": 1}]");
    }

    #[tokio::test]
    async fn test_extract_parses_entities() {
        let model = Arc::new(MockChatModel::with_reply(ChatResponse::text(format!(
            "Extracted:\n{}",
            REPLY
        ))));
        let extractor = EntityExtractor::new(model.clone());

        let entities = extractor.extract("I take lisinopril for my blood pressure").await;
        assert_eq!(entities.len(), 2);
        assert_eq!(entities[0].entity_name, "Lisinopril");
        assert_eq!(entities[0].relationships[0].related_entity, "hypertension");

        let memory = entities[0].clone().into_memory("user_1", Some("conv_1"));
        assert_eq!(memory.owner_id, "user_1");
        assert_eq!(memory.metadata_text("description").as_deref(), Some("10mg daily"));

        let request = &model.requests()[0];
        assert_eq!(request.model, "sonar-pro");
        assert_eq!(request.messages[0].content, EXTRACTION_SYSTEM_PROMPT);
        assert!(request.messages[1].content.contains("blood pressure"));
    }

    #[tokio::test]
    async fn test_extract_failure_is_empty() {
        let failing = EntityExtractor::new(Arc::new(MockChatModel::failing_with(
            ChatError::ModelCallFailed(String::new()),
        )));
        assert!(failing.extract("some text").await.is_empty());

        let garbage = EntityExtractor::new(Arc::new(MockChatModel::with_reply(
            ChatResponse::text("I could not find any entities."),
        )));
        assert!(garbage.extract("some text").await.is_empty());
    }
}
