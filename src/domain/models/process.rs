//! Process metadata models.
//!
//! Upstream catalogs are heterogeneous and often sparse, so process
//! documents are carried as raw JSON objects with typed accessors. The
//! handler pipeline normalizes every document before it enters a cache,
//! which is what makes the accessors reliable.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::models::job::Link;

/// Keys that belong to a process summary; everything else (inputs,
/// outputs, extended metadata) is descriptor-only.
const SUMMARY_KEYS: &[&str] = &[
    "id",
    "title",
    "description",
    "version",
    "keywords",
    "jobControlOptions",
    "outputTransmission",
    "links",
];

/// Condensed process entry as listed by `GET /processes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessSummary {
    pub doc: Map<String, Value>,
}

impl ProcessSummary {
    pub fn id(&self) -> Option<&str> {
        self.doc.get("id").and_then(Value::as_str)
    }

    pub fn title(&self) -> Option<&str> {
        self.doc.get("title").and_then(Value::as_str)
    }

    /// Promote a summary to a descriptor, used when the upstream
    /// description endpoint is unavailable.
    pub fn into_descriptor(self) -> ProcessDescriptor {
        ProcessDescriptor { doc: self.doc }
    }
}

/// Full process description as served by `GET /processes/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessDescriptor {
    pub doc: Map<String, Value>,
}

impl ProcessDescriptor {
    pub fn new(doc: Map<String, Value>) -> Self {
        Self { doc }
    }

    pub fn id(&self) -> Option<&str> {
        self.doc.get("id").and_then(Value::as_str)
    }

    pub fn version(&self) -> Option<&str> {
        self.doc.get("version").and_then(Value::as_str)
    }

    pub fn links(&self) -> Vec<Link> {
        self.doc
            .get("links")
            .and_then(Value::as_array)
            .map(|links| {
                links
                    .iter()
                    .filter_map(|l| serde_json::from_value(l.clone()).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Condense to the summary subset.
    pub fn summary(&self) -> ProcessSummary {
        let doc = self
            .doc
            .iter()
            .filter(|(k, _)| SUMMARY_KEYS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        ProcessSummary { doc }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn descriptor() -> ProcessDescriptor {
        let doc = json!({
            "id": "ms1:square",
            "title": "Square",
            "version": "1.0.0",
            "jobControlOptions": ["async-execute"],
            "inputs": {"n": {"schema": {"type": "number"}}},
            "outputs": {"root": {"schema": {"type": "number"}}},
        });
        match doc {
            Value::Object(map) => ProcessDescriptor::new(map),
            _ => unreachable!(),
        }
    }

    #[test]
    fn summary_strips_schema_sections() {
        let summary = descriptor().summary();
        assert_eq!(summary.id(), Some("ms1:square"));
        assert!(!summary.doc.contains_key("inputs"));
        assert!(!summary.doc.contains_key("outputs"));
    }

    #[test]
    fn summary_promotes_back_to_descriptor() {
        let descriptor = descriptor().summary().into_descriptor();
        assert_eq!(descriptor.id(), Some("ms1:square"));
        assert_eq!(descriptor.version(), Some("1.0.0"));
    }
}
