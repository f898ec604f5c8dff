//! The ordered conversational memory passed to the LLM each iteration.
//!
//! Invariant (§3, §8.2): entries are append-only; the first entry is
//! `system`, the second is `user` carrying task + plan. Nothing in this
//! module enforces that ordering beyond `MessageLog::seed` being the only
//! way to populate the first two entries — callers that skip `seed` and
//! call `push` directly are responsible for it, same as the teacher's
//! conversation model leaves turn ordering to its caller.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One piece of a (possibly multimodal) log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text(String),
    Image { data: Vec<u8>, media_type: String },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text(text.into())
    }

    pub fn is_image(&self) -> bool {
        matches!(self, ContentPart::Image { .. })
    }
}

/// A single entry in the message log. Content is a list of parts so a
/// `user` entry may mix text and an attached screenshot; text-only entries
/// are simply a one-element list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub role: Role,
    pub content: Vec<ContentPart>,
}

impl LogEntry {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: vec![ContentPart::text(text)],
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentPart::text(text)],
        }
    }

    pub fn user_with_image(text: impl Into<String>, data: Vec<u8>, media_type: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![
                ContentPart::text(text),
                ContentPart::Image {
                    data,
                    media_type: media_type.into(),
                },
            ],
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: vec![ContentPart::text(text)],
        }
    }

    pub fn tool(text: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: vec![ContentPart::text(text)],
        }
    }

    /// Text-only projection, used by the Validator's bounded history view
    /// and by truncation — image parts collapse to a placeholder.
    pub fn as_text(&self) -> String {
        self.content
            .iter()
            .map(|part| match part {
                ContentPart::Text(text) => text.clone(),
                ContentPart::Image { .. } => "[screenshot clipped for brevity]".to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Replace any image parts with the clipped-screenshot placeholder and
    /// rewrite `<EXTERNAL-CONTENT ...>…</EXTERNAL-CONTENT>` blocks down to
    /// open/close tags plus a placeholder, per the truncation rule for
    /// prior snapshot entries (§4.G step 3, §9).
    pub fn clip_for_brevity(&mut self) {
        for part in &mut self.content {
            match part {
                ContentPart::Image { .. } => {
                    *part = ContentPart::text("[screenshot clipped for brevity]");
                }
                ContentPart::Text(text) => {
                    if let Some(clipped) = clip_external_content(text) {
                        *text = clipped;
                    }
                }
            }
        }
    }
}

fn clip_external_content(text: &str) -> Option<String> {
    let open_start = text.find("<EXTERNAL-CONTENT")?;
    let open_end = text[open_start..].find('>').map(|i| open_start + i + 1)?;
    let close_tag = "</EXTERNAL-CONTENT>";
    let close_start = text[open_end..].find(close_tag).map(|i| open_end + i)?;
    let close_end = close_start + close_tag.len();

    let open_tag = &text[open_start..open_end];
    let mut out = String::with_capacity(text.len());
    out.push_str(&text[..open_start]);
    out.push_str(open_tag);
    out.push_str("[clipped for brevity]");
    out.push_str(close_tag);
    out.push_str(&text[close_end..]);
    Some(out)
}

/// The ordered, append-only conversational memory for one task execution.
#[derive(Debug, Clone, Default)]
pub struct MessageLog {
    entries: Vec<LogEntry>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Establish the two mandatory opening entries: `system` policy prompt,
    /// then `user` task+plan prompt.
    pub fn seed(system_prompt: impl Into<String>, task_and_plan_prompt: impl Into<String>) -> Self {
        Self {
            entries: vec![
                LogEntry::system(system_prompt),
                LogEntry::user(task_and_plan_prompt),
            ],
        }
    }

    pub fn push(&mut self, entry: LogEntry) {
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Clip every prior entry's image/external-content parts to their
    /// placeholders, ahead of appending a fresh snapshot (§4.G step 3).
    pub fn clip_prior_external_content(&mut self) {
        for entry in &mut self.entries {
            entry.clip_for_brevity();
        }
    }

    /// Text-only view of the most recent `limit` entries, for the
    /// Validator's bounded conversation history (§4.F: last 30 entries).
    pub fn tail_as_text(&self, limit: usize) -> Vec<(Role, String)> {
        let start = self.entries.len().saturating_sub(limit);
        self.entries[start..]
            .iter()
            .map(|entry| (entry.role, entry.as_text()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_establishes_system_then_user() {
        let log = MessageLog::seed("policy", "task+plan");
        assert_eq!(log.len(), 2);
        assert_eq!(log.entries()[0].role, Role::System);
        assert_eq!(log.entries()[1].role, Role::User);
    }

    #[test]
    fn clip_for_brevity_replaces_image_with_placeholder() {
        let mut entry = LogEntry::user_with_image("look", vec![1, 2, 3], "image/jpeg");
        entry.clip_for_brevity();
        assert!(entry.as_text().contains("[screenshot clipped for brevity]"));
        assert!(!entry.content.iter().any(ContentPart::is_image));
    }

    #[test]
    fn clip_for_brevity_collapses_external_content_block() {
        let mut entry = LogEntry::user(
            "before <EXTERNAL-CONTENT source=\"page\">huge dump of text</EXTERNAL-CONTENT> after",
        );
        entry.clip_for_brevity();
        let text = entry.as_text();
        assert!(text.contains("[clipped for brevity]"));
        assert!(!text.contains("huge dump of text"));
        assert!(text.starts_with("before "));
        assert!(text.ends_with(" after"));
    }

    #[test]
    fn tail_as_text_respects_limit() {
        let mut log = MessageLog::seed("policy", "task+plan");
        for i in 0..5 {
            log.push(LogEntry::assistant(format!("turn {i}")));
        }
        let tail = log.tail_as_text(2);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[1].1, "turn 4");
    }
}
