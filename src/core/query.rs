//! Query tokenization.
//!
//! A query's first ASCII-whitespace-run-separated token is the command name;
//! the remainder keeps its interior whitespace verbatim.

/// Split a query into its command token and argument tail.
///
/// The tail starts after the whitespace run following the command; it is
/// empty when the query is a bare command.
pub fn split_command(query: &str) -> (&str, &str) {
    let query = query.trim_matches(|c: char| c.is_ascii_whitespace());
    match query.find(|c: char| c.is_ascii_whitespace()) {
        Some(i) => {
            let tail = query[i..].trim_start_matches(|c: char| c.is_ascii_whitespace());
            (&query[..i], tail)
        }
        None => (query, ""),
    }
}

/// First token of a query string.
pub fn command(query: &str) -> &str {
    split_command(query).0
}
