//! Catalog of supported chat models.

use serde::Serialize;

/// Model used when neither the request nor the user's preferences name one.
pub const DEFAULT_MODEL: &str = "sonar-pro";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelCategory {
    Search,
    Reasoning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChatModelInfo {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub category: ModelCategory,
    pub recommended: bool,
}

const MODELS: &[ChatModelInfo] = &[
    ChatModelInfo {
        id: "sonar",
        name: "Sonar",
        description: "Fast & Cost-effective",
        category: ModelCategory::Search,
        recommended: false,
    },
    ChatModelInfo {
        id: "sonar-pro",
        name: "Sonar Pro",
        description: "Recommended for Medical Use",
        category: ModelCategory::Search,
        recommended: true,
    },
    ChatModelInfo {
        id: "sonar-reasoning",
        name: "Sonar Reasoning",
        description: "Advanced Analysis",
        category: ModelCategory::Reasoning,
        recommended: false,
    },
    ChatModelInfo {
        id: "sonar-reasoning-pro",
        name: "Sonar Reasoning Pro",
        description: "Expert Level",
        category: ModelCategory::Reasoning,
        recommended: false,
    },
];

pub fn available_models() -> &'static [ChatModelInfo] {
    MODELS
}

pub fn find_model(id: &str) -> Option<&'static ChatModelInfo> {
    MODELS.iter().find(|m| m.id == id)
}

pub fn is_supported(id: &str) -> bool {
    find_model(id).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_model_is_recommended() {
        let model = find_model(DEFAULT_MODEL).unwrap();
        assert!(model.recommended);
        assert_eq!(available_models().iter().filter(|m| m.recommended).count(), 1);
    }

    #[test]
    fn test_unknown_model() {
        assert!(!is_supported("gpt-4"));
        assert!(is_supported("sonar-reasoning-pro"));
    }

    #[test]
    fn test_serializes_category_lowercase() {
        let json = serde_json::to_string(find_model("sonar").unwrap()).unwrap();
        assert!(json.contains(r#""category":"search""#));
    }
}
