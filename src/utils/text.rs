//! Text helpers.

/// True when the text has at least one non-whitespace character.
pub fn has_content(text: &str) -> bool {
    text.chars().any(|c| !c.is_whitespace())
}

/// First `max_chars` characters with newlines flattened, ellipsised when cut.
pub fn preview(text: &str, max_chars: usize) -> String {
    let flat: String = text
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");

    if flat.chars().count() <= max_chars {
        return flat;
    }

    let cut: String = flat.chars().take(max_chars).collect();
    format!("{}...", cut.trim_end())
}
