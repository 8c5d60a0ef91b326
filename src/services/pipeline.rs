//! Handler pipeline for upstream process documents.
//!
//! Every raw process document passes through these ordered transforms
//! before it enters a cache or a response: canonical id enforcement,
//! default filling, metadata sanitization and (optionally) rewriting of
//! provider links onto the gateway's public base URL. The pipeline is
//! idempotent: applying it twice equals applying it once.

use serde_json::{json, Map, Value};

use crate::domain::errors::{GatewayError, GatewayResult};
use crate::domain::models::{ProcessId, Provider};

#[derive(Debug, Clone)]
pub struct ProcessPipeline {
    rewrite_remote_links: bool,
    api_base: String,
}

impl ProcessPipeline {
    pub fn new(rewrite_remote_links: bool, api_base: impl Into<String>) -> Self {
        Self {
            rewrite_remote_links,
            api_base: api_base.into(),
        }
    }

    /// Run all handlers in order. An error means the document is
    /// unusable and must be dropped (and logged) by the caller.
    pub fn apply(&self, provider: &Provider, doc: Map<String, Value>) -> GatewayResult<Map<String, Value>> {
        let doc = self.enforce_id(provider, doc)?;
        let doc = self.fill_defaults(doc);
        let doc = self.sanitize_metadata(provider, doc);
        Ok(self.rewrite_links(provider, doc))
    }

    /// Overwrite the upstream id with the canonical `{provider}:{bare}`
    /// form. Already-canonical ids for the same provider pass through
    /// unchanged, which keeps the handler idempotent.
    fn enforce_id(
        &self,
        provider: &Provider,
        mut doc: Map<String, Value>,
    ) -> GatewayResult<Map<String, Value>> {
        let raw = doc
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| GatewayError::InvalidInput("process document has no id".to_string()))?;

        let bare = match ProcessId::extract_provider(raw) {
            Some(prefix) if prefix == provider.name => {
                raw.split_once(':').map(|(_, bare)| bare).unwrap_or(raw)
            }
            _ => raw,
        };
        let canonical = ProcessId::new(&provider.name, bare)?;
        doc.insert("id".to_string(), Value::String(canonical.to_string()));
        Ok(doc)
    }

    /// Upstream catalogs are often sparse; synthesize the fields the rest
    /// of the gateway relies on instead of dropping the document.
    fn fill_defaults(&self, mut doc: Map<String, Value>) -> Map<String, Value> {
        if !doc.get("version").is_some_and(Value::is_string) {
            doc.insert("version".to_string(), json!("1.0.0"));
        }

        let jco = doc.get("jobControlOptions");
        if !jco.is_some_and(|v| v.as_array().is_some_and(|a| !a.is_empty())) {
            doc.insert("jobControlOptions".to_string(), json!(["async-execute"]));
        }

        let ot = doc.get("outputTransmission");
        if !ot.is_some_and(|v| v.as_array().is_some_and(|a| !a.is_empty())) {
            doc.insert("outputTransmission".to_string(), json!(["reference", "value"]));
        }

        let id = doc.get("id").and_then(Value::as_str).unwrap_or_default().to_string();
        let has_self = doc
            .get("links")
            .and_then(Value::as_array)
            .is_some_and(|links| {
                links
                    .iter()
                    .any(|l| l.get("rel").and_then(Value::as_str) == Some("self"))
            });
        if !has_self {
            let self_link = json!({
                "href": format!("/processes/{id}"),
                "rel": "self",
                "type": "application/json",
                "title": doc.get("title").and_then(Value::as_str).unwrap_or(&id),
            });
            match doc.get_mut("links").and_then(Value::as_array_mut) {
                Some(links) => links.push(self_link),
                None => {
                    doc.insert("links".to_string(), json!([self_link]));
                }
            }
        }

        doc
    }

    /// Drop metadata entries that are not mappings. An empty list after
    /// filtering removes the key entirely.
    fn sanitize_metadata(
        &self,
        provider: &Provider,
        mut doc: Map<String, Value>,
    ) -> Map<String, Value> {
        let mut removed = 0usize;
        let drop_key = match doc.get_mut("metadata") {
            None => return doc,
            Some(metadata) => match metadata.as_array_mut() {
                Some(entries) => {
                    let before = entries.len();
                    entries.retain(Value::is_object);
                    removed = before - entries.len();
                    entries.is_empty()
                }
                None => {
                    removed += 1;
                    true
                }
            },
        };
        if drop_key {
            doc.remove("metadata");
        }

        if removed > 0 {
            tracing::debug!(
                provider = %provider.name,
                process = doc.get("id").and_then(serde_json::Value::as_str).unwrap_or("?"),
                removed,
                "sanitized malformed metadata entries"
            );
        }
        doc
    }

    /// Replace provider-base link prefixes with the gateway's public base
    /// URL, preserving path remainder, query and fragment.
    fn rewrite_links(&self, provider: &Provider, mut doc: Map<String, Value>) -> Map<String, Value> {
        if !self.rewrite_remote_links {
            return doc;
        }
        let Some(links) = doc.get_mut("links").and_then(Value::as_array_mut) else {
            return doc;
        };

        let provider_base = provider.base_url.as_str().trim_end_matches('/');
        let gateway_base = self.api_base.trim_end_matches('/');
        for link in links.iter_mut() {
            let Some(href) = link.get("href").and_then(Value::as_str) else {
                continue;
            };
            if let Some(rest) = href.strip_prefix(provider_base) {
                let rewritten = format!("{gateway_base}{rest}");
                link["href"] = Value::String(rewritten);
            }
        }
        doc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::time::Duration;
    use url::Url;

    fn provider() -> Provider {
        Provider {
            name: "ms1".to_string(),
            base_url: Url::parse("http://ms1.example").unwrap(),
            auth: None,
            timeout: Duration::from_secs(60),
            processes: BTreeMap::new(),
        }
    }

    fn pipeline() -> ProcessPipeline {
        ProcessPipeline::new(true, "http://gateway.example")
    }

    fn doc(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn enforces_canonical_id() {
        let out = pipeline()
            .apply(&provider(), doc(json!({"id": "square"})))
            .unwrap();
        assert_eq!(out["id"], "ms1:square");
    }

    #[test]
    fn drops_documents_with_missing_or_malformed_id() {
        let p = pipeline();
        assert!(p.apply(&provider(), doc(json!({"title": "x"}))).is_err());
        assert!(p
            .apply(&provider(), doc(json!({"id": "not a valid id"})))
            .is_err());
    }

    #[test]
    fn fills_spec_defaults() {
        let out = pipeline()
            .apply(&provider(), doc(json!({"id": "square"})))
            .unwrap();
        assert_eq!(out["version"], "1.0.0");
        assert_eq!(out["jobControlOptions"], json!(["async-execute"]));
        assert_eq!(out["outputTransmission"], json!(["reference", "value"]));
        let links = out["links"].as_array().unwrap();
        assert!(links
            .iter()
            .any(|l| l["rel"] == "self" && l["href"] == "/processes/ms1:square"));
    }

    #[test]
    fn removes_non_mapping_metadata_entries() {
        let out = pipeline()
            .apply(
                &provider(),
                doc(json!({
                    "id": "square",
                    "metadata": [{"title": "ok"}, "junk", 42],
                })),
            )
            .unwrap();
        assert_eq!(out["metadata"], json!([{"title": "ok"}]));

        let emptied = pipeline()
            .apply(&provider(), doc(json!({"id": "square", "metadata": ["junk"]})))
            .unwrap();
        assert!(!emptied.contains_key("metadata"));
    }

    #[test]
    fn rewrites_provider_links_preserving_query() {
        let out = pipeline()
            .apply(
                &provider(),
                doc(json!({
                    "id": "square",
                    "links": [
                        {"href": "http://ms1.example/processes/square?f=json#frag", "rel": "alternate"},
                        {"href": "http://elsewhere.example/doc", "rel": "describedby"},
                    ],
                })),
            )
            .unwrap();
        let links = out["links"].as_array().unwrap();
        assert_eq!(
            links[0]["href"],
            "http://gateway.example/processes/square?f=json#frag"
        );
        assert_eq!(links[1]["href"], "http://elsewhere.example/doc");
    }

    #[test]
    fn rewrite_can_be_disabled() {
        let p = ProcessPipeline::new(false, "http://gateway.example");
        let out = p
            .apply(
                &provider(),
                doc(json!({
                    "id": "square",
                    "links": [{"href": "http://ms1.example/x", "rel": "alternate"}],
                })),
            )
            .unwrap();
        assert_eq!(out["links"][0]["href"], "http://ms1.example/x");
    }

    #[test]
    fn pipeline_is_idempotent() {
        let p = pipeline();
        let input = doc(json!({
            "id": "square",
            "title": "Square",
            "metadata": [{"title": "ok"}, "junk"],
            "links": [{"href": "http://ms1.example/processes/square", "rel": "alternate"}],
        }));
        let once = p.apply(&provider(), input).unwrap();
        let twice = p.apply(&provider(), once.clone()).unwrap();
        assert_eq!(once, twice);
    }
}
