//! Pulling JSON documents out of free-form model output
//!
//! Models asked for JSON often wrap it in a markdown code block or surround
//! it with prose. These helpers recover the JSON portion.

/// Extract the JSON portion of a model response
///
/// Tries, in order: a ```json fenced block, a plain fenced block containing
/// an object, and the outermost `{ ... }` span. Falls back to the trimmed
/// input, leaving the parse error to the caller.
pub fn extract_json(response_text: &str) -> String {
    let text = response_text.trim();

    if let Some(start) = text.find("```json") {
        let body_start = start + "```json".len();
        if let Some(len) = text[body_start..].find("```") {
            let body = text[body_start..body_start + len].trim();
            if !body.is_empty() {
                return body.to_string();
            }
        }
    }

    if let Some(start) = text.find("```") {
        let body_start = start + 3;
        if let Some(len) = text[body_start..].find("```") {
            // Skip an optional language tag on the opening fence line
            let block = &text[body_start..body_start + len];
            let body = match block.find('\n') {
                Some(newline) if !block[..newline].trim_start().starts_with('{') => {
                    &block[newline + 1..]
                }
                _ => block,
            }
            .trim();
            if body.starts_with('{') && body.ends_with('}') {
                return body.to_string();
            }
        }
    }

    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if start < end {
            return text[start..=end].to_string();
        }
    }

    text.to_string()
}
