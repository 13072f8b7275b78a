//! Renders stored memories into a bounded prompt context block

use super::item::MemoryItem;

/// Default character budget for the rendered context.
pub const DEFAULT_CONTEXT_CHAR_BUDGET: usize = 2_000;

/// Heading the prompt builder places above a non-empty context block.
pub const MEMORY_SECTION_HEADING: &str = "Here's what I remember about this user:";

/// Formats memories for prompt injection within a fixed character budget.
///
/// Items are ordered by importance (highest first), then by most recent
/// timestamp. Each item becomes one `- [category] content` line. Rendering
/// stops at the first line that would overflow the budget; lines are never
/// cut mid-item.
#[derive(Debug, Clone)]
pub struct ContextRenderer {
    char_budget: usize,
}

impl ContextRenderer {
    /// Create a renderer with a character budget
    pub fn new(char_budget: usize) -> Self {
        Self { char_budget }
    }

    /// The character budget
    pub fn char_budget(&self) -> usize {
        self.char_budget
    }

    /// Render memories; an empty result means "no memory context".
    pub fn render(&self, memories: &[MemoryItem]) -> String {
        let mut ranked: Vec<&MemoryItem> = memories.iter().collect();
        ranked.sort_by(|a, b| {
            b.importance
                .cmp(&a.importance)
                .then_with(|| b.timestamp.cmp(&a.timestamp))
                .then_with(|| a.id.cmp(&b.id))
        });

        let mut out = String::new();
        let mut used = 0usize;
        for item in ranked {
            let line = format!("- [{}] {}", item.category, item.content);
            let separator = usize::from(!out.is_empty());
            let cost = separator + line.chars().count();
            if used + cost > self.char_budget {
                break;
            }
            if separator == 1 {
                out.push('\n');
            }
            out.push_str(&line);
            used += cost;
        }
        out
    }
}

impl Default for ContextRenderer {
    fn default() -> Self {
        Self::new(DEFAULT_CONTEXT_CHAR_BUDGET)
    }
}

/// Wrap a rendered context block for the system prompt.
///
/// Returns `None` for the empty sentinel so the caller omits the section.
pub fn memory_prompt_section(context: &str) -> Option<String> {
    if context.is_empty() {
        None
    } else {
        Some(format!("{MEMORY_SECTION_HEADING}\n{context}\n"))
    }
}
