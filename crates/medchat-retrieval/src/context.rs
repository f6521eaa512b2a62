//! Memory context assembly.
//!
//! Turns similarity matches into the "Relevant Patient History" block
//! appended to the system prompt. Matches below the threshold are dropped,
//! order is preserved, and the block is bounded by entry count and size.

use medchat_types::MemoryEntity;

use crate::gateway::SimilarityMatch;

/// Default minimum similarity for a memory to be included.
pub const DEFAULT_CONTEXT_THRESHOLD: f32 = 0.7;

const CONTEXT_HEADER: &str = "\n\nRelevant Patient History (from previous conversations):\n";
const CONTEXT_FOOTER: &str = "\n\nUse this context when relevant to the current question.";

/// Filters and formats memory matches into a prompt fragment.
#[derive(Debug, Clone)]
pub struct ContextAssembler {
    threshold: f32,
    max_entries: usize,
    max_chars: usize,
}

impl Default for ContextAssembler {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_CONTEXT_THRESHOLD,
            max_entries: 5,
            max_chars: 4000,
        }
    }
}

impl ContextAssembler {
    pub fn new(threshold: f32, max_entries: usize, max_chars: usize) -> Self {
        Self {
            threshold,
            max_entries,
            max_chars,
        }
    }

    /// Matches that qualify, in descending similarity order.
    pub fn select<'a>(
        &self,
        matches: &'a [SimilarityMatch<MemoryEntity>],
    ) -> Vec<&'a SimilarityMatch<MemoryEntity>> {
        let mut kept: Vec<&SimilarityMatch<MemoryEntity>> = matches
            .iter()
            .filter(|m| m.similarity >= self.threshold)
            .collect();
        kept.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        kept.truncate(self.max_entries);
        kept
    }

    /// Render the context block, or an empty string when nothing qualifies.
    pub fn assemble(&self, matches: &[SimilarityMatch<MemoryEntity>]) -> String {
        let mut lines: Vec<String> = Vec::new();
        let mut used = 0;

        for m in self.select(matches) {
            let line = format_line(&m.entity);
            let cost = line.chars().count() + usize::from(!lines.is_empty());
            if used + cost > self.max_chars {
                break;
            }
            used += cost;
            lines.push(line);
        }

        if lines.is_empty() {
            return String::new();
        }

        format!("{}{}{}", CONTEXT_HEADER, lines.join("\n"), CONTEXT_FOOTER)
    }
}

/// `- name (type) | rel a, rel b - description`
fn format_line(memory: &MemoryEntity) -> String {
    let mut line = format!("- {} ({})", memory.entity_name, memory.entity_type);

    let relationships: Vec<String> = memory
        .relationships
        .iter()
        .filter_map(|r| r.summary())
        .collect();
    if !relationships.is_empty() {
        line.push_str(" | ");
        line.push_str(&relationships.join(", "));
    }

    if let Some(description) = memory.metadata_text("description") {
        line.push_str(" - ");
        line.push_str(&description);
    }

    line
}
