//===============
// Filename Handling
//===============

/// Name used when the client sends none, or nothing usable is left.
pub const FALLBACK_FILENAME: &str = "unnamed-file";

/// Longest stored filename, in bytes (common filesystem limit)
pub const MAX_FILENAME_BYTES: usize = 255;

/// Reduce a client supplied filename to something safe to store and echo.
///
/// Keeps the last path component only (browsers on Windows may send
/// `C:\fakepath\name`), drops control characters (header injection),
/// and caps the length on a char boundary.
pub fn sanitize_filename(raw: &str) -> String {
    let base = raw
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or_default();

    let cleaned: String = base.chars().filter(|c| !c.is_control()).collect();
    let trimmed = cleaned.trim();

    if trimmed.is_empty() || trimmed == "." || trimmed == ".." {
        return FALLBACK_FILENAME.to_string();
    }

    truncate_on_char_boundary(trimmed, MAX_FILENAME_BYTES).to_string()
}

fn truncate_on_char_boundary(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
