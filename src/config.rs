//! Configuration for the API stub server.
//!
//! Defines endpoint key-extraction specs, stored response variants, and
//! evidence/template settings.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration for the stub server.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct StubConfig {
    /// Endpoint definitions (path template, method, key components)
    #[serde(default)]
    pub endpoints: Vec<EndpointDefinition>,

    /// Stored response variants
    #[serde(default)]
    pub responses: Vec<ResponseVariantDefinition>,

    /// Global settings
    #[serde(default)]
    pub settings: Settings,
}

impl StubConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        for (i, endpoint) in self.endpoints.iter().enumerate() {
            endpoint
                .validate()
                .map_err(|e| anyhow::anyhow!("Endpoint {}: {}", i, e))?;
        }
        for (i, response) in self.responses.iter().enumerate() {
            response
                .validate()
                .map_err(|e| anyhow::anyhow!("Response {}: {}", i, e))?;
        }
        Ok(())
    }
}

/// One stubbed endpoint: a path template plus the ordered key-component
/// specs used to build the lookup key for incoming requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EndpointDefinition {
    /// Path, possibly containing `{variable}` segments
    pub path: String,

    /// HTTP method
    pub method: String,

    /// Ordered key component specs (empty = every request maps to the
    /// blank key)
    #[serde(default)]
    pub key_components: Vec<KeyComponentSpec>,

    /// Key generation strategy
    #[serde(default)]
    pub key_generation: KeyGeneratingStrategy,

    /// Optional description
    #[serde(default)]
    pub description: Option<String>,
}

impl EndpointDefinition {
    /// Validate the endpoint definition.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.path.is_empty() {
            anyhow::bail!("Endpoint path cannot be empty");
        }
        if !self.path.starts_with('/') {
            anyhow::bail!("Endpoint path must start with '/': {}", self.path);
        }
        if self.method.is_empty() {
            anyhow::bail!("Endpoint method cannot be empty");
        }
        for spec in &self.key_components {
            if spec.expression.is_empty() {
                anyhow::bail!("Key component expression cannot be empty");
            }
        }
        Ok(())
    }

    /// Whether every key component is fed from path variables. Such
    /// endpoints get an empty data-key segment in the evidence directory
    /// because the key is already encoded in the path.
    pub fn is_path_variable_keyed(&self) -> bool {
        !self.key_components.is_empty()
            && self
                .key_components
                .iter()
                .all(|c| c.kind == ExtractorKind::PathVariable)
    }
}

/// One key component: which extractor to run and the expression it
/// evaluates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeyComponentSpec {
    /// Extractor kind
    pub kind: ExtractorKind,

    /// Extractor expression (JsonPath, XPath, `offset,length,type[,charset]`,
    /// or a plain name for path/parameter/header/cookie kinds)
    pub expression: String,
}

/// The closed set of key extractor kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractorKind {
    /// JsonPath expression against a JSON request body
    JsonPath,
    /// XPath expression against an XML request body
    XPath,
    /// `offset,length,type[,charset]` against a fixed-width binary body
    FixedLength,
    /// Named path variable from the endpoint's path template
    PathVariable,
    /// Named query/form parameter
    Parameter,
    /// Named request header
    Header,
    /// Named cookie
    Cookie,
}

/// Key generation strategy. Only delimiter concatenation has defined
/// semantics; the variant set is closed so unknown strategies fail at
/// configuration load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyGeneratingStrategy {
    /// Join component values with the fixed delimiter
    #[default]
    Concat,
}

/// One stored response variant, addressed by `(path, method, data_key)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResponseVariantDefinition {
    /// Endpoint path this variant belongs to (literal or template form)
    pub path: String,

    /// HTTP method
    pub method: String,

    /// Composite data key ("" matches the blank/wildcard key)
    #[serde(default)]
    pub data_key: String,

    /// HTTP status code (default 200 when unset)
    #[serde(default)]
    pub status_code: Option<u16>,

    /// Header block template: CRLF-separated `name: value` lines
    #[serde(default)]
    pub header: Option<String>,

    /// Body template
    #[serde(default)]
    pub body: Option<String>,

    /// File streamed as the body when no body template is defined
    #[serde(default)]
    pub attachment_file: Option<PathBuf>,

    /// Download file name for the attachment
    #[serde(default)]
    pub file_name: Option<String>,

    /// Simulated latency in milliseconds
    #[serde(default)]
    pub waiting_millis: Option<u64>,

    /// Optional description
    #[serde(default)]
    pub description: String,
}

impl ResponseVariantDefinition {
    /// Validate the response variant definition.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.path.is_empty() {
            anyhow::bail!("Response path cannot be empty");
        }
        if self.method.is_empty() {
            anyhow::bail!("Response method cannot be empty");
        }
        if let Some(status) = self.status_code {
            if !(100..=599).contains(&status) {
                anyhow::bail!("Invalid status code: {}", status);
            }
        }
        Ok(())
    }
}

/// Global settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Evidence capture settings
    #[serde(default)]
    pub evidence: EvidenceSettings,

    /// Response handling settings
    #[serde(default)]
    pub response: ResponseSettings,

    /// Header name carrying the per-request correlation id
    #[serde(default = "default_correlation_id_key")]
    pub correlation_id_key: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            evidence: EvidenceSettings::default(),
            response: ResponseSettings::default(),
            correlation_id_key: default_correlation_id_key(),
        }
    }
}

fn default_correlation_id_key() -> String {
    "x-correlation-id".to_string()
}

/// Evidence capture settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EvidenceSettings {
    /// Root directory for evidence artifacts
    #[serde(default = "default_evidence_dir")]
    pub dir: PathBuf,

    /// Disable persisting request artifacts (request.json, body.<ext>)
    #[serde(default)]
    pub disabled_request: bool,

    /// Disable persisting multipart upload files
    #[serde(default)]
    pub disabled_upload: bool,
}

impl Default for EvidenceSettings {
    fn default() -> Self {
        Self {
            dir: default_evidence_dir(),
            disabled_request: false,
            disabled_upload: false,
        }
    }
}

fn default_evidence_dir() -> PathBuf {
    PathBuf::from("evidence")
}

/// Response handling settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ResponseSettings {
    /// Status returned when no stored response matches (default 200)
    #[serde(default)]
    pub http_status_for_mock_not_found: Option<u16>,

    /// Template engine settings
    #[serde(default)]
    pub template: TemplateSettings,
}

/// Template engine settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct TemplateSettings {
    /// Disable templating entirely; stored header/body text is returned
    /// unmodified
    #[serde(default)]
    pub disabled: bool,
}
