//! Compiled discovery patterns.
//!
//! Two pattern languages appear in configuration:
//!
//! - **Run patterns** are plain regexes, anchored at compile time, and
//!   matched against first-level directory names under a root. A named
//!   capture `id` supplies the run identifier.
//! - **File patterns** use glob syntax (`*`, `?` within a segment, `**`
//!   across segments) extended with `{name}` named wildcards, and are
//!   matched against run-relative paths. Both compile to a single
//!   anchored regex so matching and capture extraction share one pass.

use regex::Regex;
use std::collections::BTreeMap;

use crate::error::ConfigError;

/// A compiled run-discovery pattern.
#[derive(Debug, Clone)]
pub struct RunPattern {
    regex: Regex,
    raw: String,
}

impl RunPattern {
    /// Compiles a run pattern, anchoring it to the full entry name.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidRunPattern`] if the regex is invalid.
    pub fn compile(raw: &str) -> Result<Self, ConfigError> {
        let anchored = format!("^(?:{raw})$");
        let regex = Regex::new(&anchored).map_err(|source| ConfigError::InvalidRunPattern {
            pattern: raw.to_string(),
            source,
        })?;
        Ok(Self {
            regex,
            raw: raw.to_string(),
        })
    }

    /// Returns the raw pattern as written in configuration.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Matches a directory entry name, returning the run identifier.
    ///
    /// The identifier is the named capture `id` if the pattern declares
    /// one, otherwise the full match.
    #[must_use]
    pub fn match_entry(&self, name: &str) -> Option<String> {
        let captures = self.regex.captures(name)?;
        match captures.name("id") {
            Some(id) => Some(id.as_str().to_string()),
            None => Some(name.to_string()),
        }
    }
}

/// A compiled file-discovery pattern.
#[derive(Debug, Clone)]
pub struct FilePattern {
    regex: Regex,
    raw: String,
    wildcard_names: Vec<String>,
}

impl FilePattern {
    /// Compiles a file pattern into an anchored regex.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidFilePattern`] if the pattern
    /// contains malformed wildcards or compiles to an invalid regex.
    pub fn compile(raw: &str) -> Result<Self, ConfigError> {
        let (translated, wildcard_names) = translate(raw)?;
        let regex =
            Regex::new(&translated).map_err(|e| ConfigError::InvalidFilePattern {
                pattern: raw.to_string(),
                message: e.to_string(),
            })?;
        Ok(Self {
            regex,
            raw: raw.to_string(),
            wildcard_names,
        })
    }

    /// Returns the raw pattern as written in configuration.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Returns the `{name}` wildcards declared in the pattern, in order.
    #[must_use]
    pub fn wildcard_names(&self) -> &[String] {
        &self.wildcard_names
    }

    /// Matches a run-relative path, returning captured wildcard values.
    #[must_use]
    pub fn match_path(&self, path: &str) -> Option<BTreeMap<String, String>> {
        let captures = self.regex.captures(path)?;
        let mut values = BTreeMap::new();
        for name in &self.wildcard_names {
            if let Some(m) = captures.name(name) {
                values.insert(name.clone(), m.as_str().to_string());
            }
        }
        Some(values)
    }
}

/// Translates the glob-plus-wildcards syntax into an anchored regex.
fn translate(raw: &str) -> Result<(String, Vec<String>), ConfigError> {
    if raw.is_empty() {
        return Err(ConfigError::InvalidFilePattern {
            pattern: raw.to_string(),
            message: "pattern must not be empty".into(),
        });
    }

    let mut out = String::from("^");
    let mut names = Vec::new();
    let mut chars = raw.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    // `**/` matches zero or more whole segments; a bare
                    // `**` matches anything including separators.
                    if chars.peek() == Some(&'/') {
                        chars.next();
                        out.push_str("(?:.*/)?");
                    } else {
                        out.push_str(".*");
                    }
                } else {
                    out.push_str("[^/]*");
                }
            }
            '?' => out.push_str("[^/]"),
            '{' => {
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(c) if c.is_ascii_alphanumeric() || c == '_' => name.push(c),
                        Some(c) => {
                            return Err(ConfigError::InvalidFilePattern {
                                pattern: raw.to_string(),
                                message: format!("invalid character '{c}' in wildcard name"),
                            });
                        }
                        None => {
                            return Err(ConfigError::InvalidFilePattern {
                                pattern: raw.to_string(),
                                message: "unterminated '{' wildcard".into(),
                            });
                        }
                    }
                }
                if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit()) {
                    return Err(ConfigError::InvalidFilePattern {
                        pattern: raw.to_string(),
                        message: format!("invalid wildcard name '{{{name}}}'"),
                    });
                }
                if names.contains(&name) {
                    // A repeated wildcard must capture the same value;
                    // back-reference it instead of re-capturing.
                    return Err(ConfigError::InvalidFilePattern {
                        pattern: raw.to_string(),
                        message: format!("wildcard '{{{name}}}' appears more than once"),
                    });
                }
                out.push_str(&format!("(?P<{name}>[^/]+)"));
                names.push(name);
            }
            '}' => {
                return Err(ConfigError::InvalidFilePattern {
                    pattern: raw.to_string(),
                    message: "unmatched '}'".into(),
                });
            }
            c => out.push_str(&regex::escape(&c.to_string())),
        }
    }

    out.push('$');
    Ok((out, names))
}
