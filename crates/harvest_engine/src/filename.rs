/// File name for a record id, or `None` when the id cannot safely name a file.
///
/// Record files are named by their id verbatim so that the archive can be
/// looked up by id; ids that would escape the directory, collide with a
/// reserved device name or carry control characters are refused rather than
/// rewritten.
pub fn record_filename(id: &str) -> Option<String> {
    let trimmed = id.trim();
    if trimmed.is_empty() || trimmed != id || trimmed.len() > 128 {
        return None;
    }
    if id == "." || id == ".." || id.starts_with('.') {
        return None;
    }
    if id.chars().any(is_forbidden) || is_reserved_windows_name(id) {
        return None;
    }
    Some(id.to_string())
}

fn is_forbidden(c: char) -> bool {
    matches!(c,
        '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '\0'..='\u{1F}'
    )
}

fn is_reserved_windows_name(name: &str) -> bool {
    const RESERVED: &[&str] = &[
        "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
        "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
    ];
    let stem = name.split('.').next().unwrap_or(name);
    RESERVED.iter().any(|r| r.eq_ignore_ascii_case(stem))
}
