/// Truncate `text` to at most `max_chars` characters, appending an ellipsis
/// marker when anything was cut. Operates on character boundaries so
/// multi-byte transcript content never splits mid-codepoint.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars).collect();
    format!("{kept}…")
}
