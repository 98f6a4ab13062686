use crate::taxonomy::TaxonomyTable;

/// Find the classification code for a free-text occupation title.
///
/// Matching is deliberately loose: a row matches when every whitespace token
/// of `title` appears as a case-insensitive substring of the row label, no
/// word boundaries required. That leniency absorbs minor title variance in
/// the source spreadsheet. First matching row in table order wins.
pub fn find_code(title: &str, table: &TaxonomyTable) -> Option<String> {
    let tokens: Vec<String> = title
        .split_whitespace()
        .map(|w| w.to_lowercase())
        .collect();
    if tokens.is_empty() {
        return None;
    }

    table
        .rows()
        .iter()
        .find(|row| {
            let haystack = row.label.to_lowercase();
            tokens.iter().all(|t| haystack.contains(t.as_str()))
        })
        .map(|row| row.code())
}

/// A code is valid when it has at least four characters, starts with a
/// letter, and everything after the first character is a digit.
pub fn is_valid(code: &str) -> bool {
    if code.chars().count() < 4 {
        return false;
    }
    let mut chars = code.chars();
    chars.next().is_some_and(|c| c.is_alphabetic()) && chars.all(|c| c.is_ascii_digit())
}
