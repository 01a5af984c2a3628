//! Identifier validation and quoting.
//!
//! Table and column names are validated before any SQL text is assembled, so
//! a hostile dynamic table name can never reach the statement builder.

use crate::error::{QueryError, QueryResult};

/// Maximum accepted identifier length.
pub const MAX_IDENTIFIER_LENGTH: usize = 128;

/// Returns true if `identifier` is a safe table/column name: starts with a
/// letter or underscore, continues with letters, digits or underscores, and
/// is at most 128 characters.
pub fn is_valid_identifier(identifier: &str) -> bool {
    if identifier.is_empty() || identifier.len() > MAX_IDENTIFIER_LENGTH {
        return false;
    }
    let mut chars = identifier.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_')
}

/// Validates an identifier, failing with [`QueryError::InvalidIdentifier`].
pub fn validate_identifier(identifier: &str) -> QueryResult<()> {
    if is_valid_identifier(identifier) {
        Ok(())
    } else {
        Err(QueryError::InvalidIdentifier(identifier.to_owned()))
    }
}

/// Validates and bracket-quotes a table name.
pub fn format_table_name(table_name: &str) -> QueryResult<String> {
    validate_identifier(table_name)?;
    Ok(format!("[{table_name}]"))
}

/// Validates and bracket-quotes a column name.
pub fn format_member(member_name: &str) -> QueryResult<String> {
    validate_identifier(member_name)?;
    Ok(format!("[{member_name}]"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_ordinary_names() {
        assert!(is_valid_identifier("todoItem"));
        assert!(is_valid_identifier("_ops"));
        assert!(is_valid_identifier("__operations"));
        assert!(is_valid_identifier("a1_b2"));
    }

    #[test]
    fn rejects_hostile_names() {
        assert!(!is_valid_identifier(""));
        assert!(!is_valid_identifier("1abc"));
        assert!(!is_valid_identifier("drop table"));
        assert!(!is_valid_identifier("x]; DROP TABLE t;--"));
        assert!(!is_valid_identifier(&"a".repeat(129)));
    }

    #[test]
    fn formats_with_brackets() {
        assert_eq!(format_table_name("todo").unwrap(), "[todo]");
        assert_eq!(format_member("__updatedAt").unwrap(), "[__updatedAt]");
        assert!(format_member("bad name").is_err());
    }

    proptest::proptest! {
        #[test]
        fn generated_identifiers_validate(name in "[A-Za-z_][A-Za-z0-9_]{0,127}") {
            proptest::prop_assert!(is_valid_identifier(&name));
        }

        #[test]
        fn quoting_never_emits_unvalidated_text(name in "\\PC{0,40}") {
            if let Ok(quoted) = format_member(&name) {
                proptest::prop_assert!(quoted.starts_with('[') && quoted.ends_with(']'));
                proptest::prop_assert!(!name.contains(']') && !name.contains('['));
            }
        }
    }
}
