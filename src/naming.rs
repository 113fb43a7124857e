//! Mapping of logical stream and namespace names to Snowflake identifiers.

use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

const RAW_TABLE_PREFIX: &str = "_airbyte_raw_";

pub trait NameTransformer {
    /// Converts a logical name into a SQL identifier.
    fn identifier(&self, name: &str) -> String;

    /// Name of the table holding the unmodeled JSON payloads of `stream`.
    fn raw_table_name(&self, stream: &str) -> String {
        self.identifier(&format!("{RAW_TABLE_PREFIX}{stream}"))
    }

    fn namespace(&self, namespace: &str) -> String {
        self.identifier(namespace)
    }
}

/// Snowflake naming rules.
///
/// By default names are decomposed (NFKD) with accents stripped, whitespace
/// runs collapse to one `_`, every other character outside `[A-Za-z0-9_]`
/// becomes `_`, and case is kept. With extended identifiers, names Snowflake would not accept unquoted
/// are quoted verbatim and all other names are upper-cased, matching how
/// Snowflake folds unquoted identifiers.
#[derive(Debug, Clone, Copy, Default)]
pub struct SnowflakeNameTransformer {
    extended_identifiers: bool,
}

impl SnowflakeNameTransformer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_extended_identifiers() -> Self {
        Self {
            extended_identifiers: true,
        }
    }

    fn needs_quoting(name: &str) -> bool {
        let starts_ok = name
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
        !starts_ok
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
    }
}

impl NameTransformer for SnowflakeNameTransformer {
    fn identifier(&self, name: &str) -> String {
        if self.extended_identifiers {
            if Self::needs_quoting(name) {
                return format!("\"{}\"", name.replace('"', "\"\""));
            }
            return name.to_ascii_uppercase();
        }
        to_alphanumeric_and_underscore(name)
    }
}

fn to_alphanumeric_and_underscore(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_whitespace = false;
    for c in name.nfkd().filter(|c| !is_combining_mark(*c)) {
        if c.is_whitespace() {
            if !in_whitespace {
                out.push('_');
            }
            in_whitespace = true;
            continue;
        }
        in_whitespace = false;
        out.push(if c.is_ascii_alphanumeric() { c } else { '_' });
    }
    out
}

/// Every spelling under which `identifier` may show up once resolved.
///
/// The logical name and its resolved form come first. Lower- and upper-case
/// variants follow only for unquoted identifiers, since quoting makes the name
/// case-sensitive.
pub fn resolve_identifier<N: NameTransformer + ?Sized>(namer: &N, identifier: &str) -> Vec<String> {
    let resolved = namer.identifier(identifier);
    let mut variants = vec![identifier.to_string(), resolved.clone()];
    if !resolved.starts_with('"') {
        variants.push(resolved.to_lowercase());
        variants.push(resolved.to_uppercase());
    }
    variants
}
