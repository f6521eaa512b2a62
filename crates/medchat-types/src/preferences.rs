//! User personalization profile.
//!
//! Every field is optional. Alternate key spellings (snake_case and
//! camelCase) are reconciled here at deserialization so business logic
//! only ever sees one canonical name per attribute.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgeGroup {
    Young,
    #[serde(alias = "middle_aged")]
    MiddleAged,
    Old,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStyle {
    Simple,
    Professional,
    Detailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LanguageComplexity {
    Simple,
    Moderate,
    Technical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseLength {
    Brief,
    Concise,
    Comprehensive,
    /// Also absorbs unrecognized values
    #[serde(other)]
    Default,
}

/// Personalization preferences read by the prompt composer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPreferenceProfile {
    #[serde(default, alias = "age_group", skip_serializing_if = "Option::is_none")]
    pub age_group: Option<AgeGroup>,

    #[serde(default, alias = "response_style", skip_serializing_if = "Option::is_none")]
    pub response_style: Option<ResponseStyle>,

    #[serde(default, alias = "language_complexity", skip_serializing_if = "Option::is_none")]
    pub language_complexity: Option<LanguageComplexity>,

    #[serde(default, alias = "include_medical_terms", skip_serializing_if = "Option::is_none")]
    pub include_medical_terms: Option<bool>,

    #[serde(default, alias = "response_length", skip_serializing_if = "Option::is_none")]
    pub response_length: Option<ResponseLength>,

    #[serde(default, alias = "preferred_model", skip_serializing_if = "Option::is_none")]
    pub preferred_model: Option<String>,
}

impl UserPreferenceProfile {
    /// Values written when a profile is first stored for a user.
    pub fn stored_defaults() -> Self {
        Self {
            age_group: Some(AgeGroup::MiddleAged),
            response_style: Some(ResponseStyle::Professional),
            language_complexity: Some(LanguageComplexity::Moderate),
            include_medical_terms: Some(true),
            response_length: Some(ResponseLength::Concise),
            preferred_model: Some("sonar-pro".to_string()),
        }
    }

    /// Overwrite fields that are set in `update`; unset fields are kept.
    pub fn merge(&mut self, update: &UserPreferenceProfile) {
        if update.age_group.is_some() {
            self.age_group = update.age_group;
        }
        if update.response_style.is_some() {
            self.response_style = update.response_style;
        }
        if update.language_complexity.is_some() {
            self.language_complexity = update.language_complexity;
        }
        if update.include_medical_terms.is_some() {
            self.include_medical_terms = update.include_medical_terms;
        }
        if update.response_length.is_some() {
            self.response_length = update.response_length;
        }
        if update.preferred_model.is_some() {
            self.preferred_model = update.preferred_model.clone();
        }
    }
}

/// Free-text profile used by the casual prompt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, alias = "address", skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
}

impl UserProfile {
    pub fn merge(&mut self, update: &UserProfile) {
        if update.name.is_some() {
            self.name = update.name.clone();
        }
        if update.location.is_some() {
            self.location = update.location.clone();
        }
        if update.bio.is_some() {
            self.bio = update.bio.clone();
        }
    }
}
