//! External name resolution.
//!
//! The name a node shows to the backend is built from its raw name, its role
//! and its depth in the tree. A [`NamingRules`] table, usually loaded from an
//! INI-style file, supplies:
//!
//! - `separator<N>`: text placed before the level-N segment. A missing level
//!   falls back to the closest lower level that is defined, then to the
//!   backend's default separator.
//! - one template per role (`rootNode`, `genericNode`, `inputPV`, ...). `%s`
//!   is replaced by the raw name; a template without `%s` is used verbatim.
//!   Missing templates fall back along a chain ending in the raw name.
//! - `toUpper` / `toLower`: case folding applied to the raw name before the
//!   template.
//!
//! An empty resolved segment merges the node into its parent's name.
//!
//! Resolution is a pure function of (rules, role, name, level).

mod ini;

pub use ini::{IniDocument, IniSection};

use crate::error::{NdsError, Result};
use crate::types::NodeType;
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

/// What a named component is, for template selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NamingRole {
    /// Any node at depth 0
    Root,
    /// Non-root node of the given type
    Node(NodeType),
    /// Input PV
    InputPv,
    /// Output PV
    OutputPv,
    /// The state machine's `setState` PV
    SetStatePv,
    /// The state machine's `getState` PV
    GetStatePv,
    /// The state machine's `getGlobalState` PV
    GetGlobalStatePv,
    /// A data acquisition `Decimation` PV
    SetDecimationPv,
}

impl NamingRole {
    /// Template keys consulted for this role, most specific first.
    pub fn template_keys(self) -> &'static [&'static str] {
        match self {
            NamingRole::Root => &["rootNode", "genericNode"],
            NamingRole::Node(NodeType::Generic) => &["genericNode"],
            NamingRole::Node(NodeType::InputChannel) => &["inputNode", "genericNode"],
            NamingRole::Node(NodeType::OutputChannel) => &["outputNode", "genericNode"],
            NamingRole::Node(NodeType::DataSource) => &["sourceNode", "inputNode", "genericNode"],
            NamingRole::Node(NodeType::DataSink) => &["sinkNode", "outputNode", "genericNode"],
            NamingRole::Node(NodeType::StateMachine) => &["stateMachineNode", "genericNode"],
            NamingRole::InputPv => &["inputPV", "genericPV"],
            NamingRole::OutputPv => &["outputPV", "genericPV"],
            NamingRole::GetStatePv => &["getStatePV", "inputPV", "genericPV"],
            NamingRole::GetGlobalStatePv => &["getGlobalStatePV", "inputPV", "genericPV"],
            NamingRole::SetStatePv => &["setStatePV", "outputPV", "genericPV"],
            NamingRole::SetDecimationPv => &["setDecimationPV", "outputPV", "genericPV"],
        }
    }
}

/// A loaded rule table. The default table resolves every name to itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamingRules {
    section: String,
    to_upper: bool,
    to_lower: bool,
    separators: BTreeMap<u32, String>,
    templates: BTreeMap<String, String>,
}

impl NamingRules {
    /// Identity rules.
    pub fn identity() -> Self {
        Self::default()
    }

    /// Builds the rules from one section of a parsed document.
    pub fn from_document(document: &IniDocument, section: &str) -> Result<Self> {
        let keys = document
            .section(section)
            .ok_or_else(|| NdsError::NamingRulesMissingSection(section.to_string()))?;
        Ok(Self::from_section(section, keys))
    }

    /// Parses `text` and keeps `section`.
    pub fn parse(text: &str, section: &str) -> Result<Self> {
        Self::from_document(&IniDocument::parse(text)?, section)
    }

    /// Reads rules from a stream.
    pub fn from_reader<R: Read>(mut reader: R, section: &str) -> Result<Self> {
        let mut text = String::new();
        reader.read_to_string(&mut text)?;
        Self::parse(&text, section)
    }

    /// Reads rules from a file.
    pub fn from_file(path: impl AsRef<Path>, section: &str) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text, section)
    }

    fn from_section(section: &str, keys: &IniSection) -> Self {
        let mut rules = Self {
            section: section.to_string(),
            ..Self::default()
        };
        for (key, value) in keys {
            match key.as_str() {
                "toUpper" => rules.to_upper = parse_flag(value),
                "toLower" => rules.to_lower = parse_flag(value),
                _ => {
                    if let Some(level) = key
                        .strip_prefix("separator")
                        .and_then(|level| level.parse::<u32>().ok())
                    {
                        rules.separators.insert(level, value.clone());
                    } else {
                        rules.templates.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        rules
    }

    /// Name of the section the rules came from (empty for identity rules).
    pub fn section(&self) -> &str {
        &self.section
    }

    /// True when no rule is defined.
    pub fn is_identity(&self) -> bool {
        !self.to_upper && !self.to_lower && self.separators.is_empty() && self.templates.is_empty()
    }

    /// Separator configured for `level`, falling back to lower levels.
    ///
    /// `None` means the backend default applies.
    pub fn separator(&self, level: u32) -> Option<&str> {
        self.separators
            .range(..=level)
            .next_back()
            .map(|(_, separator)| separator.as_str())
    }

    /// Applies case folding and the role template to `name`.
    pub fn resolve(&self, role: NamingRole, name: &str) -> String {
        let folded = if self.to_upper {
            name.to_uppercase()
        } else if self.to_lower {
            name.to_lowercase()
        } else {
            name.to_string()
        };

        match role
            .template_keys()
            .iter()
            .find_map(|key| self.templates.get(*key))
        {
            Some(template) => template.replace("%s", &folded),
            None => folded,
        }
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}
