//! Key extractors.
//!
//! Each configured key component pulls one value out of the request. The
//! extractor kind set is closed; dispatch is an exhaustive match. A
//! failing JsonPath/XPath expression contributes nothing and never aborts
//! the remaining components; only a malformed fixed-length expression is
//! fatal to the resolution attempt.

use crate::charset;
use crate::config::{ExtractorKind, KeyComponentSpec};
use crate::request::StubRequest;
use jsonpath_rust::JsonPath;
use sxd_document::parser as xml_parser;
use sxd_document::Package;
use thiserror::Error;
use tracing::debug;

/// Types accepted by the fixed-length mini-language.
pub const FIXED_LENGTH_TYPES: &[&str] =
    &["string", "short", "int", "long", "char", "float", "double"];

/// Extraction failure. Per-expression JsonPath/XPath errors are swallowed
/// before reaching this type; only configuration-level problems surface.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error(
        "A bad expression is detected. The specified type is not supported. \
         expression: '{expression}', specified type: '{type_name}', \
         allowed types: {FIXED_LENGTH_TYPES:?}"
    )]
    UnsupportedFixedLengthType {
        expression: String,
        type_name: String,
    },

    #[error("A bad expression is detected. expression: '{expression}', field '{field}' is not a number")]
    MalformedFixedLengthField { expression: String, field: String },
}

/// Run every configured key component against the request, in declaration
/// order. The result has exactly one entry per component; components that
/// yield nothing produce `None`.
pub fn extract_values(
    request: &StubRequest,
    components: &[KeyComponentSpec],
) -> Result<Vec<Option<String>>, ExtractError> {
    let mut bodies = BodyViews::new(request);
    components
        .iter()
        .map(|spec| extract_one(request, spec, &mut bodies))
        .collect()
}

fn extract_one(
    request: &StubRequest,
    spec: &KeyComponentSpec,
    bodies: &mut BodyViews<'_>,
) -> Result<Option<String>, ExtractError> {
    let value = match spec.kind {
        ExtractorKind::JsonPath => bodies.json_value(&spec.expression),
        ExtractorKind::XPath => bodies.xpath_value(&spec.expression),
        ExtractorKind::FixedLength => return extract_fixed_length(request, &spec.expression),
        ExtractorKind::PathVariable => request
            .path_variables
            .get(&spec.expression)
            .map(String::clone),
        ExtractorKind::Parameter => request.parameter(&spec.expression).map(String::from),
        ExtractorKind::Header => request.header(&spec.expression).map(String::from),
        ExtractorKind::Cookie => request.cookie(&spec.expression).map(String::from),
    };
    Ok(value.filter(|v| !v.is_empty()))
}

/// Lazily parsed views of the request body, shared across the components
/// of one extraction pass so JSON/XML parsing happens at most once.
struct BodyViews<'a> {
    request: &'a StubRequest,
    json: Option<Option<serde_json::Value>>,
    xml: Option<Option<Package>>,
}

impl<'a> BodyViews<'a> {
    fn new(request: &'a StubRequest) -> Self {
        Self {
            request,
            json: None,
            xml: None,
        }
    }

    fn json_value(&mut self, expression: &str) -> Option<String> {
        if self.request.body.is_empty() {
            return None;
        }
        let body = &self.request.body;
        let document = self
            .json
            .get_or_insert_with(|| match serde_json::from_slice(body) {
                Ok(value) => Some(value),
                Err(e) => {
                    debug!(error = %e, "Request body is not valid JSON");
                    None
                }
            })
            .as_ref()?;

        let path = match JsonPath::try_from(expression) {
            Ok(path) => path,
            Err(e) => {
                debug!(expression, error = %e, "JsonPath expression failed");
                return None;
            }
        };
        stringify_json(&path.find(document))
    }

    fn xpath_value(&mut self, expression: &str) -> Option<String> {
        if self.request.body.is_empty() {
            return None;
        }
        let body = &self.request.body;
        let package = self
            .xml
            .get_or_insert_with(|| {
                let text = std::str::from_utf8(body).ok()?;
                match xml_parser::parse(text) {
                    Ok(package) => Some(package),
                    Err(e) => {
                        debug!(error = %e, "Request body is not valid XML");
                        None
                    }
                }
            })
            .as_ref()?;

        let document = package.as_document();
        match sxd_xpath::evaluate_xpath(&document, expression) {
            Ok(sxd_xpath::Value::String(s)) => Some(s),
            Ok(sxd_xpath::Value::Number(n)) => Some(n.to_string()),
            Ok(sxd_xpath::Value::Boolean(b)) => Some(b.to_string()),
            Ok(sxd_xpath::Value::Nodeset(nodes)) => {
                nodes.iter().next().map(|n| n.string_value())
            }
            Err(e) => {
                debug!(expression, error = %e, "XPath expression failed");
                None
            }
        }
    }
}

/// Render a jsonpath result as a key component value. Query results come
/// back as an array of matches; the first one wins.
fn stringify_json(value: &serde_json::Value) -> Option<String> {
    let single = match value {
        serde_json::Value::Array(items) => items.first()?,
        other => other,
    };
    match single {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    }
}

/// Evaluate one `offset,length,type[,charset]` expression against the raw
/// body. Expressions with fewer than three fields and out-of-bounds reads
/// yield nothing; an unknown type or non-numeric field is a configuration
/// error.
fn extract_fixed_length(
    request: &StubRequest,
    expression: &str,
) -> Result<Option<String>, ExtractError> {
    let body = &request.body;
    if body.is_empty() {
        return Ok(None);
    }

    let fields: Vec<&str> = expression.split(',').map(str::trim).collect();
    if fields.len() <= 2 {
        return Ok(None);
    }

    let offset = parse_field(fields[0], expression, "offset")?;
    let length = parse_field(fields[1], expression, "length")?;
    let type_name = fields[2].to_lowercase();
    let charset = if fields.len() >= 4 {
        Some(fields[3].to_string())
    } else {
        request
            .content_type()
            .and_then(charset::from_content_type)
    };

    if body.len() < offset || body.len() < offset + length {
        return Ok(None);
    }
    let slice = &body[offset..offset + length];

    let value = match type_name.as_str() {
        "string" => Some(charset::decode(slice, charset.as_deref())),
        "short" => be_prefix::<2>(slice).map(|b| i16::from_be_bytes(b).to_string()),
        "int" => be_prefix::<4>(slice).map(|b| i32::from_be_bytes(b).to_string()),
        "long" => be_prefix::<8>(slice).map(|b| i64::from_be_bytes(b).to_string()),
        "char" => be_prefix::<2>(slice)
            .and_then(|b| char::from_u32(u32::from(u16::from_be_bytes(b))))
            .map(|c| c.to_string()),
        "float" => be_prefix::<4>(slice).map(|b| f32::from_be_bytes(b).to_string()),
        "double" => be_prefix::<8>(slice).map(|b| f64::from_be_bytes(b).to_string()),
        _ => {
            return Err(ExtractError::UnsupportedFixedLengthType {
                expression: expression.to_string(),
                type_name,
            })
        }
    };
    Ok(value)
}

fn parse_field(field: &str, expression: &str, name: &str) -> Result<usize, ExtractError> {
    field
        .parse()
        .map_err(|_| ExtractError::MalformedFixedLengthField {
            expression: expression.to_string(),
            field: name.to_string(),
        })
}

/// First `N` bytes of the slice as a fixed array, if available.
fn be_prefix<const N: usize>(slice: &[u8]) -> Option<[u8; N]> {
    slice.get(..N)?.try_into().ok()
}
