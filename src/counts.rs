/// Converts full-width digits, plus signs and ideographic spaces to ASCII.
pub fn normalize_digits(input: &str) -> String {
    input
        .chars()
        .map(|c| match c {
            '０'..='９' => char::from_u32(c as u32 - '０' as u32 + '0' as u32).unwrap_or(c),
            '＋' => '+',
            '\u{3000}' => ' ',
            _ => c,
        })
        .collect()
}

/// Parses a meal count such as `"12"` or `"35+1"`. Unreadable input counts as 0.
pub fn parse_count(token: &str) -> u32 {
    let normalized = normalize_digits(token);
    let trimmed = normalized.trim();
    if trimmed.contains('+') {
        return trimmed
            .split('+')
            .map(str::trim)
            .filter(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()))
            .filter_map(|part| part.parse::<u32>().ok())
            .fold(0, u32::saturating_add);
    }
    trimmed.parse::<u32>().unwrap_or(0)
}

/// Splits a stacked table cell into `(student, teacher)` counts.
///
/// The top line is the student count and the line below it the teacher count;
/// a single line is all students.
pub fn parse_cell_counts(cell: Option<&str>) -> (u32, u32) {
    let Some(text) = cell else {
        return (0, 0);
    };
    let lines: Vec<&str> = text
        .split('\n')
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    match lines.as_slice() {
        [] => (0, 0),
        [only] => (parse_count(only), 0),
        [top, bottom, ..] => (parse_count(top), parse_count(bottom)),
    }
}

pub fn is_digits(text: &str) -> bool {
    !text.is_empty() && text.chars().all(|c| c.is_ascii_digit())
}
