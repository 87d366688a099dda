//! Identifier and shape validation for tables and fields
//!
//! Identifiers follow the portable rule shared by MySQL, PostgreSQL and SQLite for
//! unquoted names: an ASCII letter or underscore, then ASCII letters, digits or
//! underscores. Style issues (reserved words, leading underscores) are reported as
//! warnings unless the level is [`ValidationLevel::Strict`].

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::LazyLock;

/// Maximum length for identifiers (MySQL limit)
pub const MAX_IDENTIFIER_LENGTH: usize = 64;

/// Reserved words that would need quoting when exported as unquoted identifiers
static RESERVED_KEYWORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "ADD", "ALL", "ALTER", "AND", "ANY", "AS", "ASC", "BETWEEN", "BY", "CASE", "CAST",
        "CHECK", "COLUMN", "CONSTRAINT", "CREATE", "CROSS", "CURRENT_DATE", "CURRENT_TIME",
        "CURRENT_TIMESTAMP", "CURRENT_USER", "DATABASE", "DEFAULT", "DELETE", "DESC",
        "DISTINCT", "DROP", "ELSE", "END", "EXCEPT", "EXISTS", "FALSE", "FETCH", "FOR",
        "FOREIGN", "FROM", "FULL", "GRANT", "GROUP", "HAVING", "IN", "INDEX", "INNER",
        "INSERT", "INTERSECT", "INTO", "IS", "JOIN", "KEY", "LEFT", "LIKE", "LIMIT", "NATURAL",
        "NOT", "NULL", "OFFSET", "ON", "OR", "ORDER", "OUTER", "PRIMARY", "REFERENCES",
        "RETURNING", "RIGHT", "SCHEMA", "SELECT", "SET", "TABLE", "THEN", "TO", "TRIGGER",
        "TRUE", "TRUNCATE", "UNION", "UNIQUE", "UPDATE", "USING", "VALUES", "VIEW", "WHEN",
        "WHERE", "WINDOW", "WITH",
    ]
    .into_iter()
    .collect()
});

/// A single problem with an identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    Empty,
    TooLong { max: usize, actual: usize },
    InvalidCharacters { invalid: Vec<char> },
    StartsWithDigit,
    StartsWithUnderscore,
    ReservedKeyword { keyword: String },
    NoLetters,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Empty => write!(f, "Name cannot be empty"),
            ValidationError::TooLong { max, actual } => {
                write!(f, "Name is too long ({} chars, max {})", actual, max)
            }
            ValidationError::InvalidCharacters { invalid } => {
                let chars: String = invalid.iter().collect();
                write!(
                    f,
                    "Name contains invalid characters: '{}'. Only letters, numbers, and underscores are allowed",
                    chars
                )
            }
            ValidationError::StartsWithDigit => write!(f, "Name cannot start with a digit"),
            ValidationError::StartsWithUnderscore => {
                write!(f, "Name should not start with an underscore")
            }
            ValidationError::ReservedKeyword { keyword } => {
                write!(f, "'{}' is a reserved SQL keyword", keyword)
            }
            ValidationError::NoLetters => write!(f, "Name should contain at least one letter"),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Validation strictness level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationLevel {
    /// Identifier syntax only
    Minimal,
    /// Syntax errors plus style warnings (reserved words, leading underscore)
    #[default]
    Standard,
    /// Style warnings become errors
    Strict,
}

impl std::str::FromStr for ValidationLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "minimal" => Ok(ValidationLevel::Minimal),
            "standard" => Ok(ValidationLevel::Standard),
            "strict" => Ok(ValidationLevel::Strict),
            other => Err(format!("Unknown validation level '{}'", other)),
        }
    }
}

/// Errors and warnings for one identifier
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationError>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// Validates a table or field name
pub fn validate_identifier(name: &str, level: ValidationLevel) -> ValidationResult {
    let mut result = ValidationResult::default();

    if name.is_empty() {
        result.errors.push(ValidationError::Empty);
        return result;
    }

    if name.len() > MAX_IDENTIFIER_LENGTH {
        result.errors.push(ValidationError::TooLong {
            max: MAX_IDENTIFIER_LENGTH,
            actual: name.len(),
        });
    }

    let invalid: Vec<char> = name
        .chars()
        .filter(|c| !c.is_ascii_alphanumeric() && *c != '_')
        .collect();
    if !invalid.is_empty() {
        result
            .errors
            .push(ValidationError::InvalidCharacters { invalid });
    }

    if name.starts_with(|c: char| c.is_ascii_digit()) {
        result.errors.push(ValidationError::StartsWithDigit);
    }

    if level == ValidationLevel::Minimal {
        return result;
    }

    let mut style = Vec::new();
    if is_reserved_keyword(name) {
        style.push(ValidationError::ReservedKeyword {
            keyword: name.to_string(),
        });
    }
    if name.starts_with('_') {
        style.push(ValidationError::StartsWithUnderscore);
    }
    if !name.chars().any(|c| c.is_ascii_alphabetic()) {
        style.push(ValidationError::NoLetters);
    }

    if level == ValidationLevel::Strict {
        result.errors.extend(style);
    } else {
        result.warnings.extend(style);
    }

    result
}

/// Data types are free-form, but must be non-empty and have balanced parameters
pub fn validate_data_type(data_type: &str) -> Result<(), String> {
    let trimmed = data_type.trim();
    if trimmed.is_empty() {
        return Err("Data type cannot be empty".to_string());
    }

    let mut depth: i32 = 0;
    for c in trimmed.chars() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    break;
                }
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(format!("Data type '{}' has unbalanced parentheses", trimmed));
    }

    if trimmed.starts_with('(') {
        return Err(format!("Data type '{}' is missing a type name", trimmed));
    }

    Ok(())
}

/// Check if a string is a reserved keyword
pub fn is_reserved_keyword(name: &str) -> bool {
    RESERVED_KEYWORDS.contains(name.to_uppercase().as_str())
}

/// One entry of a structured validation failure, e.g. `fields[1].name`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldIssue {
    pub path: String,
    pub message: String,
}

/// All problems found while validating a table or connection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub issues: Vec<FieldIssue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<FieldIssue>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn error(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.issues.push(FieldIssue {
            path: path.into(),
            message: message.into(),
        });
    }

    pub fn warn(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(FieldIssue {
            path: path.into(),
            message: message.into(),
        });
    }

    /// Fold an identifier result into the report under `path`
    pub fn merge_identifier(&mut self, path: &str, result: ValidationResult) {
        for error in result.errors {
            self.error(path, error.to_string());
        }
        for warning in result.warnings {
            self.warn(path, warning.to_string());
        }
    }

    pub fn messages(&self) -> Vec<String> {
        self.issues
            .iter()
            .map(|i| format!("{}: {}", i.path, i.message))
            .collect()
    }

    pub fn warning_messages(&self) -> Vec<String> {
        self.warnings
            .iter()
            .map(|i| format!("{}: {}", i.path, i.message))
            .collect()
    }
}

impl std::fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.messages().join("; "))
    }
}
