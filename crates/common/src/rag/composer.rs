//! Context composer - packs ranked results into a bounded context window
//!
//! Blocks are taken in rank order until the next one would exceed the character budget.
//! A block is either included whole or not at all, and nothing after the first rejected
//! block is considered.

use super::citation::format_citation;
use super::truncate_chars;
use crate::db::PaperResult;

/// Prefix of each block's heading line
pub const HEADING_MARKER: &str = "### ";

/// Abstract characters kept per block
pub const ABSTRACT_CHARS: usize = 800;

/// Separator placed between blocks
const BLOCK_SEPARATOR: &str = "\n";

/// Render one result as a context block: heading, abstract excerpt, blank line.
pub fn context_block(record: &PaperResult) -> String {
    let excerpt = truncate_chars(record.abstract_text.as_deref().unwrap_or_default(), ABSTRACT_CHARS);
    format!("{}{}\n{}\n\n", HEADING_MARKER, format_citation(record), excerpt)
}

/// Build the context window for `records` within `max_chars` characters.
pub fn compose_context(records: &[PaperResult], max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut total = 0;

    for record in records {
        let block = context_block(record);

        let separator = if parts.is_empty() { 0 } else { BLOCK_SEPARATOR.len() };
        let cost = block.chars().count() + separator;

        if total + cost > max_chars {
            break;
        }

        total += cost;
        parts.push(block);
    }

    tracing::debug!(
        blocks = parts.len(),
        candidates = records.len(),
        chars = total,
        max_chars,
        "Context composed"
    );

    parts.join(BLOCK_SEPARATOR)
}
