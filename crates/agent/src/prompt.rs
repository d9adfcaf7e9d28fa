//! Prompt construction.
//!
//! Every query becomes exactly three messages: the fixed instructions, a
//! context message (entities, recalled memories, optional extra context) and
//! the raw user query. Pure and deterministic.

use nexus_core::memory::MemoryItem;
use nexus_core::message::Message;

/// Most memories ever placed in a prompt.
pub const MAX_PROMPT_MEMORIES: usize = 5;

/// Instructions sent as the first message of every prompt.
pub const SYSTEM_PROMPT: &str = r#"You are Nexus AI, an intelligent assistant for Home Assistant.

Your capabilities:
1. Control smart home devices through Home Assistant
2. Remember user preferences and important information
3. Suggest automations based on patterns
4. Answer questions about the home state

To execute an action on Home Assistant, write a directive in exactly this form:
[ACTION:domain.service:{"key":"value"}]
Example: [ACTION:light.turn_on:{"entity_id":"light.living_room","brightness":255}]
The data must be a JSON object on a single line. Use one directive per action,
in the order the actions should run.

Guidelines:
- Be helpful, concise, and friendly
- Prioritize user preferences and safety
- Only include action directives when the user clearly wants something done"#;

/// Build the message sequence for one query.
///
/// Only the first [`MAX_PROMPT_MEMORIES`] memories are used; callers pass
/// them best first. `extra` is appended to the context message as JSON.
pub fn build(
    query: &str,
    context_text: &str,
    memories: &[MemoryItem],
    extra: Option<&serde_json::Map<String, serde_json::Value>>,
) -> Vec<Message> {
    vec![
        Message::system(SYSTEM_PROMPT),
        Message::system(context_message(context_text, memories, extra)),
        Message::user(query),
    ]
}

fn context_message(
    context_text: &str,
    memories: &[MemoryItem],
    extra: Option<&serde_json::Map<String, serde_json::Value>>,
) -> String {
    let mut content = format!("Relevant Home Assistant entities:\n{context_text}");

    if !memories.is_empty() {
        content.push_str("\n\nRelevant memories:");
        for memory in memories.iter().take(MAX_PROMPT_MEMORIES) {
            content.push_str("\n- ");
            content.push_str(&memory.value);
        }
    }

    if let Some(extra) = extra.filter(|e| !e.is_empty()) {
        let json = serde_json::Value::Object(extra.clone());
        content.push_str(&format!("\n\nAdditional context: {json}"));
    }

    content
}

#[cfg(test)]
mod tests {
    use super::*;
    use nexus_core::message::Role;

    fn memories(n: usize) -> Vec<MemoryItem> {
        (0..n)
            .map(|i| MemoryItem::new(format!("k{i}"), format!("memory {i}"), false))
            .collect()
    }

    #[test]
    fn three_messages_in_fixed_roles() {
        let messages = build("turn on the lights", "- Lamp (light.lamp): off", &[], None);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[0].content, SYSTEM_PROMPT);
        assert_eq!(messages[1].role, Role::System);
        assert_eq!(
            messages[1].content,
            "Relevant Home Assistant entities:\n- Lamp (light.lamp): off"
        );
        assert_eq!(messages[2].role, Role::User);
        assert_eq!(messages[2].content, "turn on the lights");
    }

    #[test]
    fn instructions_state_the_directive_grammar() {
        assert!(SYSTEM_PROMPT.contains("[ACTION:domain.service:{"));
        let example = SYSTEM_PROMPT
            .lines()
            .find(|l| l.starts_with("Example: "))
            .unwrap()
            .trim_start_matches("Example: ");
        assert_eq!(crate::directive::extract(example).len(), 1);
    }

    #[test]
    fn at_most_five_memories() {
        let messages = build("q", "ctx", &memories(8), None);
        let context = &messages[1].content;
        assert!(context.contains("- memory 0"));
        assert!(context.contains("- memory 4"));
        assert!(!context.contains("memory 5"));
    }

    #[test]
    fn extra_serialized_into_context() {
        let mut extra = serde_json::Map::new();
        extra.insert("location".into(), "Lisbon".into());
        extra.insert("time".into(), "07:30".into());

        let messages = build("q", "ctx", &memories(1), Some(&extra));
        assert!(messages[1].content.ends_with(
            "\n\nRelevant memories:\n- memory 0\n\nAdditional context: {\"location\":\"Lisbon\",\"time\":\"07:30\"}"
        ));

        let empty = serde_json::Map::new();
        let messages = build("q", "ctx", &[], Some(&empty));
        assert!(!messages[1].content.contains("Additional context"));
    }

    #[test]
    fn deterministic() {
        let mems = memories(3);
        assert_eq!(build("q", "ctx", &mems, None), build("q", "ctx", &mems, None));
    }
}
