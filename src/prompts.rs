//! Instruction text sent to the model ahead of the article HTML.
//!
//! Callers can override the default via
//! [`crate::config::ModelConfig::instruction`]; the constant here is used
//! only when no override is provided.

/// Default instruction for converting article HTML to Markdown.
///
/// Sent as the first part of the request, with the HTML as the second part.
pub const DEFAULT_INSTRUCTION: &str = "Convert the given HTML content into a well-structured and well-defined Markdown format. Do not include any additional explanation or commentary. Return only the Markdown string.";

/// Join instruction and payload into a single prompt for providers that take
/// one user message instead of separate content parts.
///
/// The HTML is appended unmodified after a blank line.
pub fn single_message_prompt(instruction: &str, html: &str) -> String {
    format!("{instruction}\n\n{html}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_instruction_asks_for_markdown_only() {
        assert!(DEFAULT_INSTRUCTION.contains("Markdown"));
        assert!(DEFAULT_INSTRUCTION.contains("Return only the Markdown string."));
    }

    #[test]
    fn single_message_prompt_keeps_html_verbatim() {
        let html = "  <h1>Title</h1>\n<p>Hello</p>  ";
        let prompt = single_message_prompt(DEFAULT_INSTRUCTION, html);
        assert!(prompt.starts_with(DEFAULT_INSTRUCTION));
        assert!(prompt.ends_with(html));
    }
}
