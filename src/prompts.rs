//! Prompts for the vision OCR engine.
//!
//! Kept in one place so unit tests can inspect them without a live model,
//! and so changing what the model is asked to do never touches the retry
//! logic in [`crate::ocr`].

/// System prompt for transcribing a rasterised page.
///
/// The model is asked for plain lines, not Markdown: the OCR result lands in
/// the same document as natively extracted text and must look like it.
pub const OCR_SYSTEM_PROMPT: &str = r#"You are a precise OCR engine. Transcribe every piece of text visible in the page image.

Follow these rules precisely:

1. TEXT PRESERVATION
   - Transcribe ALL text exactly as printed, including numbers, units and punctuation
   - Keep the original language; do not translate
   - Do not correct spelling or grammar

2. READING ORDER
   - Output text in the order a human would read the page
   - Read multi-column layouts column by column
   - Output one printed line per output line

3. TABLES
   - Output each table row on its own line
   - Separate cells with " | "

4. WHAT TO IGNORE
   - Images, logos and decorative elements without text
   - Do not describe pictures

5. OUTPUT FORMAT
   - Output ONLY the transcribed text
   - No Markdown, no code fences, no commentary
   - If the page has no text, output nothing"#;

/// Strip the fences some models add despite being told not to.
pub fn strip_fences(response: &str) -> &str {
    let trimmed = response.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(i) => &rest[i + 1..],
        None => return trimmed,
    };
    body.strip_suffix("```").unwrap_or(body).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_forbids_markdown() {
        assert!(OCR_SYSTEM_PROMPT.contains("No Markdown"));
        assert!(OCR_SYSTEM_PROMPT.contains("do not translate"));
    }

    #[test]
    fn strip_fences_removes_outer_fence() {
        assert_eq!(strip_fences("```text\nline 1\nline 2\n```"), "line 1\nline 2");
        assert_eq!(strip_fences("```\nonly\n```"), "only");
    }

    #[test]
    fn strip_fences_passthrough() {
        assert_eq!(strip_fences("  plain text \n"), "plain text");
        assert_eq!(strip_fences("```"), "```");
    }
}
