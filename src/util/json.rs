/// Strips a surrounding markdown code fence (```` ```json ... ``` ````) that
/// language models like to wrap JSON and SVG in.
pub(crate) fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    body.strip_suffix("```").unwrap_or(body).trim()
}

/// Extracts the outermost `<svg ...>...</svg>` element from a response body.
pub(crate) fn extract_svg(text: &str) -> Option<&str> {
    let start = text.find("<svg")?;
    let end = text.rfind("</svg>")?;
    if end < start {
        return None;
    }
    Some(&text[start..end + "</svg>".len()])
}
