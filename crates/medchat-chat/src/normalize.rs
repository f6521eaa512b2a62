//! Role normalization for model input.
//!
//! The chat endpoint requires a leading system turn followed by strictly
//! alternating user/assistant turns. Adjacent turns sharing a role are
//! merged with a newline rather than dropped.

use medchat_types::{ChatMessage, NormalizedMessage, Role};

/// Merge adjacent entries that share a non-system role.
///
/// Idempotent: a merged sequence passes through unchanged.
pub fn merge_adjacent(messages: Vec<NormalizedMessage>) -> Vec<NormalizedMessage> {
    let mut merged: Vec<NormalizedMessage> = Vec::with_capacity(messages.len());

    for msg in messages {
        match merged.last_mut() {
            Some(last) if last.role == msg.role && msg.role != Role::System => {
                last.content.push('\n');
                last.content.push_str(&msg.content);
            }
            _ => merged.push(msg),
        }
    }

    merged
}

/// Build the message sequence for one model call.
///
/// System turns in `history` are discarded; the only system turn in the
/// result is `system_prompt`, at index 0.
pub fn build_request(
    history: &[NormalizedMessage],
    new_user_text: &str,
    system_prompt: &str,
) -> Vec<NormalizedMessage> {
    let mut turns = merge_adjacent(
        history
            .iter()
            .filter(|m| m.role != Role::System)
            .cloned()
            .collect(),
    );

    match turns.last_mut() {
        Some(last) if last.role == Role::User => {
            last.content.push('\n');
            last.content.push_str(new_user_text);
        }
        _ => turns.push(NormalizedMessage::new(Role::User, new_user_text)),
    }

    let mut sequence = Vec::with_capacity(turns.len() + 1);
    sequence.push(NormalizedMessage::new(Role::System, system_prompt));
    sequence.extend(turns);

    merge_adjacent(sequence)
}

/// The last `max_messages` stored turns as model input, oldest first.
pub fn build_session_context(
    messages: &[ChatMessage],
    max_messages: usize,
) -> Vec<NormalizedMessage> {
    let start = messages.len().saturating_sub(max_messages);
    messages[start..].iter().map(NormalizedMessage::from).collect()
}

/// True when the sequence starts with the only system turn and no two
/// adjacent turns share a role.
pub fn is_normalized(messages: &[NormalizedMessage]) -> bool {
    let leading_system = messages.first().map_or(false, |m| m.role == Role::System);
    let single_system = messages.iter().filter(|m| m.role == Role::System).count() == 1;
    let alternating = messages.windows(2).all(|w| w[0].role != w[1].role);
    leading_system && single_system && alternating
}
