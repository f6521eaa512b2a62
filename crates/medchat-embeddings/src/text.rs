//! Text templates fed to the embedding provider.
//!
//! Both templates are pure functions of their input. Changing them changes
//! every stored vector, so stored embeddings must be backfilled afterwards.

use medchat_types::{ChatMessage, MemoryEntity, SearchResult};

/// Number of search-result snippets folded into a message embedding.
pub const MAX_CONTEXT_SNIPPETS: usize = 3;

/// Metadata keys appended to memory text, in order.
const MEMORY_METADATA_FIELDS: &[(&str, &str)] = &[
    ("description", "Description"),
    ("severity", "Severity"),
    ("status", "Status"),
];

/// Builds the embedding input text for domain entities.
pub struct DomainTextBuilder;

impl DomainTextBuilder {
    /// `content`, then `. Context: <snippets>` from the first three search
    /// results that carry a snippet.
    pub fn message_text(content: &str, search_results: &[SearchResult]) -> String {
        let snippets: Vec<&str> = search_results
            .iter()
            .take(MAX_CONTEXT_SNIPPETS)
            .filter_map(SearchResult::snippet_text)
            .collect();

        if snippets.is_empty() {
            return content.to_string();
        }

        format!("{}. Context: {}", content, snippets.join(" "))
    }

    pub fn for_message(message: &ChatMessage) -> String {
        Self::message_text(&message.content, &message.search_results)
    }

    /// `<type>: <name>`, then relationships, description, severity and
    /// status, joined with `". "`.
    pub fn memory_text(memory: &MemoryEntity) -> String {
        let mut parts = vec![format!("{}: {}", memory.entity_type, memory.entity_name)];

        let relationships: Vec<String> = memory
            .relationships
            .iter()
            .filter_map(|r| r.summary())
            .collect();
        if !relationships.is_empty() {
            parts.push(format!("Relationships: {}", relationships.join(", ")));
        }

        for (key, label) in MEMORY_METADATA_FIELDS {
            if let Some(value) = memory.metadata_text(key) {
                parts.push(format!("{}: {}", label, value));
            }
        }

        parts.join(". ")
    }
}
