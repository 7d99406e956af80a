//! Read-only query gate, applied before any source connection is opened.

use crate::error::ValidationError;

const READ_ONLY_KEYWORD: &str = "select";

/// Accept only a single statement that begins with `SELECT`
/// (case-insensitive, after trimming).
pub fn ensure_read_only(query: &str) -> Result<(), ValidationError> {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyQuery);
    }

    let rest = match trimmed.get(..READ_ONLY_KEYWORD.len()) {
        Some(head) if head.eq_ignore_ascii_case(READ_ONLY_KEYWORD) => {
            &trimmed[READ_ONLY_KEYWORD.len()..]
        }
        _ => return Err(ValidationError::NotReadOnly),
    };
    // "selection" is an identifier, not the keyword
    if rest
        .chars()
        .next()
        .is_some_and(|c| c.is_alphanumeric() || c == '_')
    {
        return Err(ValidationError::NotReadOnly);
    }

    if has_statement_separator(trimmed) {
        return Err(ValidationError::MultipleStatements);
    }
    Ok(())
}

/// True for names that can be spliced into DDL without quoting:
/// ASCII letter or underscore first, then letters, digits or underscores.
pub fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    name.len() <= 63 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// True when a `;` outside quotes is followed by anything but whitespace.
/// A single trailing semicolon is allowed.
fn has_statement_separator(sql: &str) -> bool {
    let mut in_single = false;
    let mut in_double = false;
    for (i, c) in sql.char_indices() {
        match c {
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            ';' if !in_single && !in_double => {
                if !sql[i + 1..].trim().is_empty() {
                    return true;
                }
            }
            _ => {}
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_passes() {
        assert!(ensure_read_only("SELECT 1 AS x").is_ok());
    }

    #[test]
    fn select_is_case_insensitive_and_trimmed() {
        assert!(ensure_read_only("   select * from accounts\n").is_ok());
        assert!(ensure_read_only("\tSeLeCt id FROM t").is_ok());
    }

    #[test]
    fn trailing_semicolon_passes() {
        assert!(ensure_read_only("SELECT 1;  ").is_ok());
    }

    #[test]
    fn semicolon_inside_literal_passes() {
        assert!(ensure_read_only("SELECT 'a;b' AS s").is_ok());
    }

    #[test]
    fn delete_is_rejected() {
        assert_eq!(
            ensure_read_only("DELETE FROM accounts"),
            Err(ValidationError::NotReadOnly)
        );
    }

    #[test]
    fn update_and_ddl_are_rejected() {
        assert!(ensure_read_only("UPDATE accounts SET balance = 0").is_err());
        assert!(ensure_read_only("drop table accounts").is_err());
    }

    #[test]
    fn keyword_prefix_is_not_enough() {
        assert_eq!(
            ensure_read_only("selection_job()"),
            Err(ValidationError::NotReadOnly)
        );
    }

    #[test]
    fn empty_query_is_rejected() {
        assert_eq!(ensure_read_only("   "), Err(ValidationError::EmptyQuery));
    }

    #[test]
    fn plain_identifiers() {
        assert!(is_plain_identifier("query_results"));
        assert!(is_plain_identifier("_staging2"));
        assert!(!is_plain_identifier("2fast"));
        assert!(!is_plain_identifier("results; drop"));
        assert!(!is_plain_identifier(""));
    }

    #[test]
    fn stacked_statement_is_rejected() {
        assert_eq!(
            ensure_read_only("SELECT 1; DELETE FROM accounts"),
            Err(ValidationError::MultipleStatements)
        );
    }
}
