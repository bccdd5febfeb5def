//! Filename sanitization for the output directory.

/// Linux NAME_MAX, in bytes.
const NAME_MAX: usize = 255;

/// Makes `name` safe to create inside the output directory.
///
/// Separators, NUL, control characters and whitespace become `_` (runs
/// collapse to one); leading and trailing dots, spaces and underscores are
/// trimmed; the result is cut to 255 bytes on a char boundary. May return an
/// empty string.
pub fn sanitize_filename(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        let bad = matches!(c, '/' | '\\' | '\0') || c.is_control() || c.is_whitespace();
        if !bad {
            out.push(c);
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }

    let trimmed = out.trim_matches(|c| c == '.' || c == '_');
    let mut end = trimmed.len().min(NAME_MAX);
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    trimmed[..end].to_string()
}
