//! Resource tags applied to provisioned exports
//!
//! Tags are written as a comma separated list of `key=value` (freeform) or
//! `namespace.key=value` (defined) pairs.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Claim annotation carrying additional tags
pub const ADDITIONAL_TAGS_ANNOTATION: &str = "oraclecloud.com/additional-tags";

/// Freeform and namespaced tags
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tags {
    #[serde(default)]
    pub freeform: BTreeMap<String, String>,
    #[serde(default)]
    pub defined: BTreeMap<String, BTreeMap<String, String>>,
}

impl Tags {
    /// Parse a tag list; an empty string yields no tags
    pub fn parse(input: &str) -> Result<Self> {
        let mut tags = Tags::default();
        if input.trim().is_empty() {
            return Ok(tags);
        }

        for tag in input.split(',') {
            let invalid = || {
                Error::InvalidParameters(format!(
                    "tag format must follow (<namespace>.)<tagkey>=<value>: {:?}",
                    tag
                ))
            };

            let mut parts = tag.split('=');
            let (key, value) = match (parts.next(), parts.next(), parts.next()) {
                (Some(key), Some(value), None) => (key.trim(), value.trim()),
                _ => return Err(invalid()),
            };

            let key_parts: Vec<&str> = key.split('.').collect();
            match key_parts.as_slice() {
                [key] if !key.is_empty() => {
                    tags.freeform.insert(key.to_string(), value.to_string());
                }
                [namespace, key] if !namespace.is_empty() && !key.is_empty() => {
                    tags.defined
                        .entry(namespace.to_string())
                        .or_default()
                        .insert(key.to_string(), value.to_string());
                }
                _ => return Err(invalid()),
            }
        }

        Ok(tags)
    }

    /// Overlay `other` on top of these tags; `other` wins on collisions
    pub fn merged_with(mut self, other: &Tags) -> Self {
        for (key, value) in &other.freeform {
            self.freeform.insert(key.clone(), value.clone());
        }
        for (namespace, tags) in &other.defined {
            let entry = self.defined.entry(namespace.clone()).or_default();
            for (key, value) in tags {
                entry.insert(key.clone(), value.clone());
            }
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.freeform.is_empty() && self.defined.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_parse_empty() {
        assert!(Tags::parse("").unwrap().is_empty());
        assert!(Tags::parse("  ").unwrap().is_empty());
    }

    #[test]
    fn test_parse_mixed() {
        let tags = Tags::parse("team=storage,ops.cost-center=42,ops.owner=fss").unwrap();
        assert_eq!(tags.freeform.get("team").map(String::as_str), Some("storage"));
        let ops = tags.defined.get("ops").unwrap();
        assert_eq!(ops.get("cost-center").map(String::as_str), Some("42"));
        assert_eq!(ops.get("owner").map(String::as_str), Some("fss"));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert_matches!(Tags::parse("novalue"), Err(Error::InvalidParameters(_)));
        assert_matches!(Tags::parse("a=b=c"), Err(Error::InvalidParameters(_)));
        assert_matches!(Tags::parse("a.b.c=d"), Err(Error::InvalidParameters(_)));
        assert_matches!(Tags::parse("=d"), Err(Error::InvalidParameters(_)));
    }

    #[test]
    fn test_merge_overrides_defaults() {
        let defaults = Tags::parse("env=prod,ops.owner=platform").unwrap();
        let claim = Tags::parse("env=dev,ops.team=fss").unwrap();
        let merged = defaults.merged_with(&claim);

        assert_eq!(merged.freeform.get("env").map(String::as_str), Some("dev"));
        let ops = merged.defined.get("ops").unwrap();
        assert_eq!(ops.len(), 2);
    }
}
