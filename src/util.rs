/// Hard-truncate a string to `max` characters on a char boundary,
/// trimming any trailing whitespace left at the cut.
pub fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let cut: String = s.chars().take(max).collect();
    cut.trim_end().to_string()
}

/// Truncate for log output, appending "…" when shortened.
pub fn preview(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max).collect();
        format!("{cut}…")
    }
}

/// Lowercase and collapse internal whitespace runs to single spaces.
/// Used to match lore titles regardless of casing and spacing.
pub fn normalize_title(s: &str) -> String {
    s.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}
