//! Reader for the bracketed `key = value` files holding naming rules.
//!
//! ```text
//! # comment
//! [EPICS]
//! separator1 = :
//! rootNode = "DEV %s"
//! ```
//!
//! A value ends at the first whitespace unless it is enclosed in double
//! quotes. Lines starting with `#` or `;` are comments.

use crate::error::{NdsError, Result};
use std::collections::BTreeMap;

/// Keys of one section.
pub type IniSection = BTreeMap<String, String>;

/// Parsed file: section name to keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IniDocument {
    sections: BTreeMap<String, IniSection>,
}

impl IniDocument {
    /// Parses the whole text.
    pub fn parse(text: &str) -> Result<Self> {
        let mut sections: BTreeMap<String, IniSection> = BTreeMap::new();
        let mut current: Option<String> = None;

        for (index, raw_line) in text.lines().enumerate() {
            let line_number = index + 1;
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            if let Some(header) = line.strip_prefix('[') {
                let name = header.strip_suffix(']').ok_or_else(|| NdsError::NamingRulesSyntax {
                    line: line_number,
                    message: "missing ']' in section header".to_string(),
                })?;
                let name = name.trim().to_string();
                sections.entry(name.clone()).or_default();
                current = Some(name);
                continue;
            }

            let (key, value) = line.split_once('=').ok_or_else(|| NdsError::NamingRulesSyntax {
                line: line_number,
                message: format!("expected 'key = value', found '{line}'"),
            })?;
            let key = key.trim();
            if key.is_empty() {
                return Err(NdsError::NamingRulesSyntax {
                    line: line_number,
                    message: "empty key".to_string(),
                });
            }
            let section = current.as_ref().ok_or_else(|| NdsError::NamingRulesSyntax {
                line: line_number,
                message: format!("key '{key}' outside of any section"),
            })?;
            let value = parse_value(value.trim_start(), line_number)?;
            sections
                .entry(section.clone())
                .or_default()
                .insert(key.to_string(), value);
        }

        Ok(Self { sections })
    }

    /// Looks up a section.
    pub fn section(&self, name: &str) -> Option<&IniSection> {
        self.sections.get(name)
    }

    /// Looks up a section, ignoring ASCII case.
    pub fn section_ignore_case(&self, name: &str) -> Option<(&str, &IniSection)> {
        self.sections
            .iter()
            .find(|(section, _)| section.eq_ignore_ascii_case(name))
            .map(|(section, keys)| (section.as_str(), keys))
    }

    /// Section names in sorted order.
    pub fn section_names(&self) -> impl Iterator<Item = &str> {
        self.sections.keys().map(String::as_str)
    }

    /// Looks up a key in a section.
    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections.get(section)?.get(key).map(String::as_str)
    }
}

fn parse_value(text: &str, line: usize) -> Result<String> {
    if let Some(quoted) = text.strip_prefix('"') {
        let end = quoted.find('"').ok_or_else(|| NdsError::NamingRulesSyntax {
            line,
            message: "unterminated quoted value".to_string(),
        })?;
        return Ok(quoted[..end].to_string());
    }
    Ok(text
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_string())
}
