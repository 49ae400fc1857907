//! Response variant store and resolution.
//!
//! Stored variants are uniquely addressed by `(path, method, data_key)`.
//! Resolution walks a fixed candidate list with early return: the literal
//! request path wins over the endpoint's template path, and an exact key
//! wins over the wildcard key. Nothing matching yields the not-found
//! sentinel (`id == 0`).

use crate::config::ResponseVariantDefinition;
use crate::key;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::debug;

/// One stored response variant, or the synthesized not-found sentinel.
#[derive(Debug, Clone, Default)]
pub struct ResponseVariant {
    /// 1-based store id; 0 marks the not-found sentinel
    pub id: u32,
    /// Endpoint path the variant is stored under
    pub path: String,
    /// HTTP method
    pub method: String,
    /// Composite data key
    pub data_key: String,
    /// Status code (200 when unset)
    pub status_code: Option<u16>,
    /// Header block template
    pub header: Option<String>,
    /// Body template
    pub body: Option<String>,
    /// Attachment file streamed when no body template exists
    pub attachment_file: Option<PathBuf>,
    /// Download file name for the attachment
    pub file_name: Option<String>,
    /// Simulated latency in milliseconds
    pub waiting_millis: Option<u64>,
    /// Description
    pub description: String,
}

impl ResponseVariant {
    /// Whether this is the not-found sentinel.
    pub fn is_not_found(&self) -> bool {
        self.id == 0
    }
}

/// In-memory store of response variants with a unique-key index.
pub struct ResponseStore {
    variants: Vec<ResponseVariant>,
    index: HashMap<(String, String, String), usize>,
}

impl ResponseStore {
    /// Build the store from configuration. Ids are assigned in order,
    /// starting at 1 so that 0 stays reserved for the sentinel. Later
    /// duplicates of the same `(path, method, data_key)` are ignored.
    pub fn new(definitions: Vec<ResponseVariantDefinition>) -> Self {
        let mut variants = Vec::with_capacity(definitions.len());
        let mut index = HashMap::new();

        for (i, def) in definitions.into_iter().enumerate() {
            let variant = ResponseVariant {
                id: (i + 1) as u32,
                path: def.path,
                method: def.method.to_uppercase(),
                data_key: def.data_key,
                status_code: def.status_code,
                header: def.header,
                body: def.body,
                attachment_file: def.attachment_file,
                file_name: def.file_name,
                waiting_millis: def.waiting_millis,
                description: def.description,
            };
            let uk = (
                variant.path.clone(),
                variant.method.clone(),
                variant.data_key.clone(),
            );
            index.entry(uk).or_insert(variants.len());
            variants.push(variant);
        }

        Self { variants, index }
    }

    fn find_by_uk(&self, path: &str, method: &str, data_key: &str) -> Option<&ResponseVariant> {
        self.index
            .get(&(
                path.to_string(),
                method.to_uppercase(),
                data_key.to_string(),
            ))
            .map(|&i| &self.variants[i])
    }

    /// Resolve the response variant for a request.
    ///
    /// Candidates, in order: the literal request path, then the endpoint's
    /// template path when it differs, both first with the exact key and
    /// then (for non-blank keys) with its wildcard form. Returns the
    /// sentinel carrying the request path/method when nothing matches.
    pub fn resolve(
        &self,
        path: &str,
        template_path: Option<&str>,
        method: &str,
        data_key: &str,
    ) -> ResponseVariant {
        let template_path = template_path.filter(|t| *t != path);

        let mut keys = vec![data_key.to_string()];
        if !data_key.is_empty() {
            keys.push(key::wildcard(data_key));
        }

        for candidate_key in &keys {
            if let Some(found) = self.find_by_uk(path, method, candidate_key) {
                return found.clone();
            }
            if let Some(template) = template_path {
                if let Some(found) = self.find_by_uk(template, method, candidate_key) {
                    return found.clone();
                }
            }
        }

        debug!(path, method, data_key, "No stored response variant matched");
        ResponseVariant {
            id: 0,
            path: path.to_string(),
            method: method.to_uppercase(),
            data_key: data_key.to_string(),
            ..ResponseVariant::default()
        }
    }

    /// Number of stored variants.
    pub fn len(&self) -> usize {
        self.variants.len()
    }

    /// Whether the store holds no variants.
    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }
}
