//! Input validation for user-supplied file names and relative paths.
//!
//! Every check here runs on the raw string *before* it is joined with the
//! user's home prefix. Object keys are plain strings, so a path that escapes
//! the home prefix would read or write another tenant's objects.

use crate::file_types::{ExtensionSet, extension_of};
use std::borrow::Cow;
use thiserror::Error;
use tracing::debug;

pub const MAX_FILENAME_LEN: usize = 255;
pub const MAX_DIRECTORY_PATH_LEN: usize = 1000;

const ILLEGAL_CHARACTERS: [char; 9] = ['<', '>', ':', '"', '|', '?', '*', '\0', '\\'];

const RESERVED_NAMES: [&str; 22] = [
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// How many rounds of percent-decoding the traversal check unwinds.
const DECODE_ROUNDS: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("file name is empty")]
    EmptyName,
    #[error("name is too long (max {max} characters)")]
    NameTooLong { max: usize },
    #[error("name contains an illegal character {0:?}")]
    IllegalCharacter(char),
    #[error("`{0}` is a reserved name")]
    ReservedName(String),
    #[error("invalid path")]
    PathTraversal,
    #[error("unsupported file type, allowed extensions: {}", .allowed.join(", "))]
    UnsupportedExtension {
        extension: Option<String>,
        allowed: Vec<&'static str>,
    },
}

pub type ValidationResult<T = ()> = Result<T, ValidationError>;

/// Reject `..` segments and absolute paths, including percent-encoded forms.
///
/// Separators are normalized first (`\` becomes `/`, runs of `/` collapse).
/// The input is then percent-decoded up to two times and each round is checked
/// again. A decode failure ends the check without rejecting the input.
pub fn assert_no_path_traversal(input: &str) -> ValidationResult {
    let normalized = normalize_separators(input);
    if normalized.starts_with('/') || has_parent_segment(&normalized) {
        return Err(ValidationError::PathTraversal);
    }

    let mut current = Cow::Borrowed(input);
    for round in 1..=DECODE_ROUNDS {
        let decoded = match urlencoding::decode(&current) {
            Ok(decoded) => decoded.into_owned(),
            Err(err) => {
                // Fails open: a string we cannot decode is not rejected here.
                debug!(round, error = %err, "percent-decoding failed during traversal check");
                break;
            }
        };
        if has_parent_segment(&normalize_separators(&decoded)) {
            return Err(ValidationError::PathTraversal);
        }
        if decoded == current {
            break;
        }
        current = Cow::Owned(decoded);
    }

    Ok(())
}

/// Validate a single file name (one path segment).
pub fn validate_filename(name: &str) -> ValidationResult {
    if name.is_empty() {
        return Err(ValidationError::EmptyName);
    }
    if name.chars().count() > MAX_FILENAME_LEN {
        return Err(ValidationError::NameTooLong {
            max: MAX_FILENAME_LEN,
        });
    }
    assert_no_path_traversal(name)?;
    if name.contains('/') {
        return Err(ValidationError::IllegalCharacter('/'));
    }
    assert_legal_characters(name)?;

    let stem = name.split('.').next().unwrap_or(name).to_ascii_uppercase();
    if RESERVED_NAMES.contains(&stem.as_str()) {
        return Err(ValidationError::ReservedName(name.to_string()));
    }
    Ok(())
}

/// Validate a relative directory path. The empty string is the home root.
pub fn validate_directory(directory: &str) -> ValidationResult {
    assert_no_path_traversal(directory)?;
    assert_legal_characters(directory)?;
    if directory.chars().count() > MAX_DIRECTORY_PATH_LEN {
        return Err(ValidationError::NameTooLong {
            max: MAX_DIRECTORY_PATH_LEN,
        });
    }
    Ok(())
}

/// Validate a relative file path: the directory rules plus the file name
/// rules for its last segment.
pub fn validate_path(path: &str) -> ValidationResult {
    validate_directory(path)?;
    validate_filename(basename(path))
}

/// Check the extension of `name` against an allow-list.
pub fn assert_extension(name: &str, set: ExtensionSet) -> ValidationResult {
    match extension_of(name) {
        Some(ext) if set.allows(ext) => Ok(()),
        ext => Err(ValidationError::UnsupportedExtension {
            extension: ext.map(str::to_ascii_lowercase),
            allowed: set.extensions(),
        }),
    }
}

/// Login names double as home prefixes, so they must be a single safe segment.
pub fn validate_login_name(login: &str) -> ValidationResult {
    let well_formed = !login.is_empty()
        && login.split('-').all(|part| {
            !part.is_empty()
                && part
                    .bytes()
                    .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
        });
    if well_formed {
        Ok(())
    } else {
        Err(ValidationError::PathTraversal)
    }
}

/// Last `/`-separated segment of a path.
pub fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn assert_legal_characters(value: &str) -> ValidationResult {
    match value.chars().find(|c| ILLEGAL_CHARACTERS.contains(c)) {
        Some(c) => Err(ValidationError::IllegalCharacter(c)),
        None => Ok(()),
    }
}

fn normalize_separators(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        let c = if c == '\\' { '/' } else { c };
        if c == '/' && out.ends_with('/') {
            continue;
        }
        out.push(c);
    }
    out
}

fn has_parent_segment(normalized: &str) -> bool {
    normalized.split('/').any(|segment| segment == "..")
}
