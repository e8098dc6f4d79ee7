//! SQL helpers.

/// Escapes SQL LIKE wildcards (`%`, `_`) and the escape character itself.
///
/// Use with `ESCAPE '\'` in the query.
#[must_use]
pub fn escape_like_wildcards(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '%' | '_' | '\\' => {
                result.push('\\');
                result.push(c);
            },
            _ => result.push(c),
        }
    }
    result
}

/// LIKE pattern matching every key that starts with `prefix`.
#[must_use]
pub fn prefix_pattern(prefix: Option<&str>) -> String {
    prefix.map_or_else(
        || "%".to_string(),
        |p| format!("{}%", escape_like_wildcards(p)),
    )
}
