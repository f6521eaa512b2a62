//! System prompt personalization.
//!
//! `PromptComposer` is a deterministic string builder: the classification
//! picks one of two templates, and each preference field that is set adds
//! its fixed instruction fragment. Unset fields add nothing.

use medchat_types::{
    AgeGroup, LanguageComplexity, ResponseLength, ResponseStyle, UserPreferenceProfile,
    UserProfile,
};

use crate::classifier::QueryKind;

const CASUAL_BASE: &str = "You are a friendly medical AI assistant having a casual conversation. ";
const DOMAIN_BASE: &str = "You are a trusted medical AI assistant. ";

const CASUAL_CLOSING: &str = "\n\n**IMPORTANT**: This is CASUAL conversation - NOT medical consultation.\n\
- DO NOT search the web or provide citations\n\
- Just chat naturally and warmly";

const DOMAIN_GUIDELINES: &str = "\n\nGuidelines:\n\
- Always cite reliable medical sources\n\
- AVOID social media, forums (Reddit, Quora)\n\
- Use clear, understandable language\n\
- Remind users to consult healthcare professionals\n\
- Format important points in **bold**";

/// Builds the system prompt for one request.
#[derive(Debug, Clone, Copy, Default)]
pub struct PromptComposer;

impl PromptComposer {
    pub fn new() -> Self {
        Self
    }

    pub fn compose(
        &self,
        kind: QueryKind,
        preferences: Option<&UserPreferenceProfile>,
        profile: Option<&UserProfile>,
    ) -> String {
        let default_prefs = UserPreferenceProfile::default();
        let default_profile = UserProfile::default();
        let prefs = preferences.unwrap_or(&default_prefs);
        let profile = profile.unwrap_or(&default_profile);

        match kind {
            QueryKind::Casual => casual_prompt(prefs, profile),
            QueryKind::Domain => domain_prompt(prefs, profile),
        }
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

fn casual_prompt(prefs: &UserPreferenceProfile, profile: &UserProfile) -> String {
    let mut prompt = String::from(CASUAL_BASE);

    if let Some(name) = present(&profile.name) {
        prompt.push_str(&format!("You are chatting with {}. ", name));
    }
    if let Some(location) = present(&profile.location) {
        prompt.push_str(&format!("They are from {}. ", location));
    }
    if let Some(bio) = present(&profile.bio) {
        prompt.push_str(&format!("About them: {}. ", bio));
    }

    match prefs.age_group {
        Some(AgeGroup::Young) => prompt.push_str(
            "\n**TONE**: You're chatting with someone YOUNG (18-35). Be super casual, modern, and relatable. ",
        ),
        Some(AgeGroup::Old) => prompt.push_str(
            "\n**TONE**: You're chatting with a SENIOR (60+). Be very patient, respectful, and warm. ",
        ),
        _ => {}
    }

    match prefs.response_length {
        Some(ResponseLength::Brief) => prompt.push_str(
            "\n\n**LENGTH**: Keep responses EXTREMELY brief - MAXIMUM 1-2 SHORT sentences. ",
        ),
        Some(ResponseLength::Comprehensive) => prompt
            .push_str("\n\n**LENGTH**: Provide DETAILED responses. AT LEAST 4-5 sentences. "),
        _ => {}
    }

    prompt.push_str(CASUAL_CLOSING);
    prompt
}

fn domain_prompt(prefs: &UserPreferenceProfile, profile: &UserProfile) -> String {
    let mut prompt = String::from(DOMAIN_BASE);

    if let Some(name) = present(&profile.name) {
        prompt.push_str(&format!("You are assisting {}. ", name));
    }

    match prefs.age_group {
        Some(AgeGroup::Young) => prompt.push_str(
            "\n\n**IMPORTANT**: User is YOUNG (18-35). Use modern, casual, relatable language. ",
        ),
        Some(AgeGroup::MiddleAged) => prompt.push_str(
            "\n\n**IMPORTANT**: User is MIDDLE-AGED (36-60). Professional yet warm tone. ",
        ),
        Some(AgeGroup::Old) => prompt.push_str(
            "\n\n**IMPORTANT**: User is SENIOR (60+). Be EXTRA patient. Use VERY simple language. ",
        ),
        None => {}
    }

    match prefs.response_style {
        Some(ResponseStyle::Simple) => prompt.push_str(
            "\n\n**CRITICAL**: Keep responses EXTREMELY simple. Use only everyday words. ",
        ),
        Some(ResponseStyle::Detailed) => prompt
            .push_str("\n\n**CRITICAL**: Provide VERY detailed, comprehensive explanations. "),
        _ => {}
    }

    match prefs.language_complexity {
        Some(LanguageComplexity::Simple) => prompt
            .push_str("\n\n**MANDATORY**: Avoid ALL medical jargon. Use ONLY simple words. "),
        Some(LanguageComplexity::Technical) => prompt.push_str(
            "\n\n**MANDATORY**: Use proper medical terminology and technical language. ",
        ),
        _ => {}
    }

    if prefs.include_medical_terms == Some(false) {
        prompt.push_str("\nAvoid formal medical terms unless necessary. ");
    }

    // Absent length gets the same instruction as the explicit default
    match prefs.response_length {
        Some(ResponseLength::Brief) => {
            prompt.push_str("\n\n**LENGTH**: EXTREMELY brief - maximum 1-2 SHORT paragraphs. ")
        }
        Some(ResponseLength::Concise) => {
            prompt.push_str("\n\n**LENGTH**: Concise - 2-3 paragraphs maximum. ")
        }
        Some(ResponseLength::Comprehensive) => prompt.push_str(
            "\n\n**LENGTH**: COMPREHENSIVE responses with full details. Multiple paragraphs. ",
        ),
        Some(ResponseLength::Default) | None => {
            prompt.push_str("\n\n**LENGTH**: Keep responses CONCISE (2-4 paragraphs maximum). ")
        }
    }

    prompt.push_str(DOMAIN_GUIDELINES);
    prompt
}
