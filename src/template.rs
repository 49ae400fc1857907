//! Response rendering.
//!
//! Renders a selected response variant's header block and body through
//! Handlebars, using a context built from the request. Template failures
//! are never fatal: the literal stored text is returned and a diagnostic
//! header is attached.

use crate::charset;
use crate::config::Settings;
use crate::request::StubRequest;
use crate::resolver::ResponseVariant;
use bytes::Bytes;
use handlebars::Handlebars;
use serde::Serialize;
use std::collections::HashMap;
use tracing::error;

const HEADER_SEPARATOR: &str = "\r\n";
const TEMPLATE_ERROR_HEADER: (&str, &str) = ("x-error-code", "template_parsing_error");

/// Template engine for dynamic responses. Constructed once at startup,
/// and only when templating is enabled; absent, rendering degenerates to
/// returning stored text unmodified.
pub struct TemplateEngine {
    handlebars: Handlebars<'static>,
}

/// Evaluation context exposed to templates.
#[derive(Debug, Serialize)]
pub struct TemplateContext<'a> {
    /// Request method
    pub method: &'a str,
    /// Request path
    pub path: &'a str,
    /// Raw query string
    pub query: Option<&'a str>,
    /// Request headers
    pub headers: &'a HashMap<String, String>,
    /// Query/form parameters
    pub parameters: &'a HashMap<String, Vec<String>>,
    /// Path variables
    pub path_variables: &'a HashMap<String, String>,
    /// Request body as text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// Request body parsed as JSON, present only for JSON content types
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json: Option<serde_json::Value>,
}

impl TemplateEngine {
    /// Create a new template engine with the stock helpers registered.
    pub fn new() -> Self {
        let mut handlebars = Handlebars::new();

        handlebars.register_helper("jsonpath", Box::new(jsonpath_helper));
        handlebars.register_helper("xpath", Box::new(xpath_helper));
        handlebars.register_helper("now", Box::new(now_helper));
        handlebars.register_helper("uuid", Box::new(uuid_helper));
        handlebars.register_helper("default", Box::new(default_helper));

        // Responses are not HTML; don't escape
        handlebars.register_escape_fn(handlebars::no_escape);

        Self { handlebars }
    }

    /// Build the evaluation context for one request. The JSON view is
    /// only parsed for JSON content types; the XML view is reached
    /// through the `xpath` helper and parsed only when referenced.
    pub fn context<'a>(&self, request: &'a StubRequest) -> TemplateContext<'a> {
        let content_type = request.content_type().map(str::to_lowercase);
        let request_charset = request
            .content_type()
            .and_then(charset::from_content_type);

        let body = if request.body.is_empty() {
            None
        } else {
            Some(charset::decode(&request.body, request_charset.as_deref()))
        };

        let json = match (&body, &content_type) {
            (Some(text), Some(ct)) if ct.contains("json") => serde_json::from_str(text).ok(),
            _ => None,
        };

        TemplateContext {
            method: &request.method,
            path: &request.path,
            query: request.query.as_deref(),
            headers: &request.headers,
            parameters: &request.parameters,
            path_variables: &request.path_variables,
            body,
            json,
        }
    }

    /// Render a template string with the given context.
    pub fn render(
        &self,
        template: &str,
        context: &TemplateContext<'_>,
    ) -> Result<String, handlebars::RenderError> {
        self.handlebars.render_template(template, context)
    }
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// The rendered response: status, ordered headers, body bytes.
#[derive(Debug)]
pub struct RenderedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

/// Render the selected variant into the outgoing response.
///
/// Header block first (CRLF lines, first-colon split), then attachment
/// defaults, then the correlation header, then the body at the response's
/// resolved charset. The simulated wait is left to the caller.
pub fn render_response(
    variant: &ResponseVariant,
    request: &StubRequest,
    engine: Option<&TemplateEngine>,
    settings: &Settings,
    correlation_id: &str,
) -> RenderedResponse {
    let status = if variant.is_not_found() {
        settings
            .response
            .http_status_for_mock_not_found
            .unwrap_or(200)
    } else {
        variant.status_code.unwrap_or(200)
    };

    let context = engine.map(|e| e.context(request));
    let mut headers: Vec<(String, String)> = Vec::new();

    // Response headers from the header block template
    if let Some(header_template) = variant.header.as_deref().filter(|h| !h.is_empty()) {
        let rendered = process_template(engine, context.as_ref(), header_template, &mut headers);
        for line in rendered.split(HEADER_SEPARATOR) {
            if let Some((name, value)) = line.split_once(':') {
                headers.push((name.trim().to_string(), value.trim().to_string()));
            }
        }
    }

    // Attachment defaults
    if let Some(file_name) = variant.file_name.as_deref().filter(|f| !f.is_empty()) {
        if !contains_header(&headers, "content-disposition") {
            headers.push((
                "Content-Disposition".to_string(),
                format!("attachment; filename=\"{file_name}\""),
            ));
        }
        if !contains_header(&headers, "content-type") {
            headers.push((
                "Content-Type".to_string(),
                "application/octet-stream".to_string(),
            ));
        }
    }

    headers.push((
        settings.correlation_id_key.clone(),
        correlation_id.to_string(),
    ));

    // Response body: template first, attachment file second
    let body = if let Some(body_template) = variant.body.as_deref() {
        let response_charset = header_value(&headers, "content-type")
            .and_then(charset::from_content_type);
        let rendered = process_template(engine, context.as_ref(), body_template, &mut headers);
        Bytes::from(charset::encode(&rendered, response_charset.as_deref()))
    } else if let Some(attachment) = variant.attachment_file.as_deref() {
        match std::fs::read(attachment) {
            Ok(content) => Bytes::from(content),
            Err(e) => {
                error!(file = %attachment.display(), error = %e, "Attachment file cannot be read");
                Bytes::new()
            }
        }
    } else {
        Bytes::new()
    };

    RenderedResponse {
        status,
        headers,
        body,
    }
}

/// Render a template, falling back to the literal text on failure. The
/// diagnostic header is attached so callers can tell a fallback happened.
fn process_template(
    engine: Option<&TemplateEngine>,
    context: Option<&TemplateContext<'_>>,
    template: &str,
    headers: &mut Vec<(String, String)>,
) -> String {
    let (engine, context) = match (engine, context) {
        (Some(engine), Some(context)) => (engine, context),
        _ => return template.to_string(),
    };
    match engine.render(template, context) {
        Ok(rendered) => rendered,
        Err(e) => {
            error!(error = %e, "Returning the literal template text because rendering failed");
            headers.push((
                TEMPLATE_ERROR_HEADER.0.to_string(),
                TEMPLATE_ERROR_HEADER.1.to_string(),
            ));
            template.to_string()
        }
    }
}

fn contains_header(headers: &[(String, String)], name: &str) -> bool {
    headers.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
}

fn header_value<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

// Custom Handlebars helpers

/// `{{jsonpath "$.id"}}` - evaluate a JsonPath expression against the
/// request body. The body is read from the render context, so parsing
/// only happens when a template actually uses the helper.
fn jsonpath_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    ctx: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let expression = h.param(0).and_then(|v| v.value().as_str()).unwrap_or("");
    let body = ctx
        .data()
        .get("body")
        .and_then(|v| v.as_str())
        .unwrap_or("");

    if let Ok(json) = serde_json::from_str::<serde_json::Value>(body) {
        if let Ok(path) = jsonpath_rust::JsonPath::try_from(expression) {
            let found = path.find(&json);
            let single = match &found {
                serde_json::Value::Array(items) => items.first().cloned(),
                other => Some(other.clone()),
            };
            match single {
                Some(serde_json::Value::String(s)) => out.write(&s)?,
                Some(serde_json::Value::Null) | None => {}
                Some(other) => out.write(&other.to_string())?,
            }
        }
    }
    Ok(())
}

/// `{{xpath "/user/id"}}` - evaluate an XPath expression against the
/// request body.
fn xpath_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    ctx: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let expression = h.param(0).and_then(|v| v.value().as_str()).unwrap_or("");
    let body = ctx
        .data()
        .get("body")
        .and_then(|v| v.as_str())
        .unwrap_or("");

    if let Ok(package) = sxd_document::parser::parse(body) {
        let document = package.as_document();
        match sxd_xpath::evaluate_xpath(&document, expression) {
            Ok(sxd_xpath::Value::String(s)) => out.write(&s)?,
            Ok(sxd_xpath::Value::Number(n)) => out.write(&n.to_string())?,
            Ok(sxd_xpath::Value::Boolean(b)) => out.write(&b.to_string())?,
            Ok(sxd_xpath::Value::Nodeset(nodes)) => {
                if let Some(node) = nodes.iter().next() {
                    out.write(&node.string_value())?;
                }
            }
            Err(_) => {}
        }
    }
    Ok(())
}

fn now_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    use chrono::Utc;

    let format = h
        .param(0)
        .and_then(|v| v.value().as_str())
        .unwrap_or("%Y-%m-%dT%H:%M:%S%.3fZ");

    let now = Utc::now();
    out.write(&now.format(format).to_string())?;
    Ok(())
}

fn uuid_helper(
    _: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let uuid = format!(
        "{:08x}-{:04x}-4{:03x}-{:04x}-{:012x}",
        rng.gen::<u32>(),
        rng.gen::<u16>(),
        rng.gen::<u16>() & 0x0fff,
        (rng.gen::<u16>() & 0x3fff) | 0x8000,
        rng.gen::<u64>() & 0xffffffffffff,
    );
    out.write(&uuid)?;
    Ok(())
}

fn default_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let value = h.param(0).map(|v| v.value());
    let default = h.param(1).and_then(|v| v.value().as_str()).unwrap_or("");

    match value {
        Some(v) if !v.is_null() => {
            if let Some(s) = v.as_str() {
                if !s.is_empty() {
                    out.write(s)?;
                    return Ok(());
                }
            } else {
                out.write(&v.to_string())?;
                return Ok(());
            }
        }
        _ => {}
    }

    out.write(default)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::path::PathBuf;

    fn json_request(body: &str) -> StubRequest {
        let mut headers = HashMap::new();
        headers.insert(
            "Content-Type".to_string(),
            "application/json".to_string(),
        );
        StubRequest {
            method: "POST".to_string(),
            path: "/users".to_string(),
            headers,
            body: Bytes::copy_from_slice(body.as_bytes()),
            ..StubRequest::default()
        }
    }

    fn variant_with_body(body: &str) -> ResponseVariant {
        ResponseVariant {
            id: 1,
            path: "/users".to_string(),
            method: "POST".to_string(),
            body: Some(body.to_string()),
            ..ResponseVariant::default()
        }
    }

    #[test]
    fn test_render_json_field() {
        let engine = TemplateEngine::new();
        let request = json_request(r#"{"id":"42"}"#);
        let ctx = engine.context(&request);

        let result = engine.render("user:{{json.id}}", &ctx).unwrap();
        assert_eq!(result, "user:42");
    }

    #[test]
    fn test_render_jsonpath_helper() {
        let engine = TemplateEngine::new();
        let request = json_request(r#"{"user":{"id":"42"}}"#);
        let ctx = engine.context(&request);

        let result = engine
            .render(r#"user:{{jsonpath "$.user.id"}}"#, &ctx)
            .unwrap();
        assert_eq!(result, "user:42");
    }

    #[test]
    fn test_render_xpath_helper() {
        let engine = TemplateEngine::new();
        let mut request = json_request("<user><id>42</id></user>");
        request.headers.insert(
            "Content-Type".to_string(),
            "application/xml".to_string(),
        );
        let ctx = engine.context(&request);

        let result = engine.render(r#"user:{{xpath "/user/id"}}"#, &ctx).unwrap();
        assert_eq!(result, "user:42");
    }

    #[test]
    fn test_render_path_variables() {
        let engine = TemplateEngine::new();
        let mut request = json_request("{}");
        request
            .path_variables
            .insert("id".to_string(), "9".to_string());
        let ctx = engine.context(&request);

        let result = engine.render("id={{path_variables.id}}", &ctx).unwrap();
        assert_eq!(result, "id=9");
    }

    #[test]
    fn test_plain_text_passes_through_unchanged() {
        let engine = TemplateEngine::new();
        let request = json_request(r#"{"id":"42"}"#);
        let settings = Settings::default();

        let variant = variant_with_body(r#"{"status":"ok"}"#);
        let rendered = render_response(&variant, &request, Some(&engine), &settings, "c1");
        assert_eq!(rendered.body, Bytes::from(r#"{"status":"ok"}"#));
        assert_eq!(rendered.status, 200);
    }

    #[test]
    fn test_render_failure_falls_back_to_literal() {
        let engine = TemplateEngine::new();
        let request = json_request(r#"{"id":"42"}"#);
        let settings = Settings::default();

        let broken = "user:{{#if}}broken";
        let variant = variant_with_body(broken);
        let rendered = render_response(&variant, &request, Some(&engine), &settings, "c1");

        assert_eq!(rendered.body, Bytes::from(broken));
        assert!(rendered
            .headers
            .iter()
            .any(|(k, v)| k == "x-error-code" && v == "template_parsing_error"));
    }

    #[test]
    fn test_header_block_rendering() {
        let engine = TemplateEngine::new();
        let request = json_request(r#"{"id":"42"}"#);
        let settings = Settings::default();

        let mut variant = variant_with_body("ok");
        variant.header = Some(
            "Content-Type: application/json\r\nX-User: {{json.id}}\r\nmalformed line\r\n"
                .to_string(),
        );
        let rendered = render_response(&variant, &request, Some(&engine), &settings, "c1");

        assert!(rendered
            .headers
            .iter()
            .any(|(k, v)| k == "Content-Type" && v == "application/json"));
        assert!(rendered.headers.iter().any(|(k, v)| k == "X-User" && v == "42"));
        // Lines without a colon are ignored
        assert!(!rendered.headers.iter().any(|(k, _)| k.contains("malformed")));
    }

    #[test]
    fn test_header_value_splits_on_first_colon_only() {
        let engine = TemplateEngine::new();
        let request = json_request("{}");
        let settings = Settings::default();

        let mut variant = variant_with_body("ok");
        variant.header = Some("Location: http://example.com/x".to_string());
        let rendered = render_response(&variant, &request, Some(&engine), &settings, "c1");

        assert!(rendered
            .headers
            .iter()
            .any(|(k, v)| k == "Location" && v == "http://example.com/x"));
    }

    #[test]
    fn test_correlation_header_always_added() {
        let request = json_request("{}");
        let settings = Settings::default();

        let variant = variant_with_body("ok");
        let rendered = render_response(&variant, &request, None, &settings, "corr-9");
        assert!(rendered
            .headers
            .iter()
            .any(|(k, v)| k == "x-correlation-id" && v == "corr-9"));
    }

    #[test]
    fn test_templating_disabled_returns_literal() {
        let request = json_request(r#"{"id":"42"}"#);
        let settings = Settings::default();

        let variant = variant_with_body("user:{{json.id}}");
        let rendered = render_response(&variant, &request, None, &settings, "c1");
        assert_eq!(rendered.body, Bytes::from("user:{{json.id}}"));
        // No error header: nothing failed, templating is simply off
        assert!(!rendered.headers.iter().any(|(k, _)| k == "x-error-code"));
    }

    #[test]
    fn test_not_found_sentinel_uses_configured_status() {
        let request = json_request("{}");
        let mut settings = Settings::default();
        settings.response.http_status_for_mock_not_found = Some(404);

        let sentinel = ResponseVariant {
            id: 0,
            path: "/missing".to_string(),
            method: "GET".to_string(),
            ..ResponseVariant::default()
        };
        let rendered = render_response(&sentinel, &request, None, &settings, "c1");
        assert_eq!(rendered.status, 404);
        assert!(rendered.body.is_empty());
    }

    #[test]
    fn test_not_found_sentinel_default_status_is_200() {
        let request = json_request("{}");
        let settings = Settings::default();

        let sentinel = ResponseVariant::default();
        let rendered = render_response(&sentinel, &request, None, &settings, "c1");
        assert_eq!(rendered.status, 200);
    }

    #[test]
    fn test_attachment_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("report.bin");
        std::fs::write(&file, b"\x01\x02\x03").unwrap();

        let request = json_request("{}");
        let settings = Settings::default();

        let variant = ResponseVariant {
            id: 1,
            attachment_file: Some(file),
            file_name: Some("report.bin".to_string()),
            ..ResponseVariant::default()
        };
        let rendered = render_response(&variant, &request, None, &settings, "c1");

        assert_eq!(rendered.body, Bytes::from_static(b"\x01\x02\x03"));
        assert!(rendered.headers.iter().any(
            |(k, v)| k == "Content-Disposition" && v == "attachment; filename=\"report.bin\""
        ));
        assert!(rendered
            .headers
            .iter()
            .any(|(k, v)| k == "Content-Type" && v == "application/octet-stream"));
    }

    #[test]
    fn test_body_template_wins_over_attachment() {
        let request = json_request("{}");
        let settings = Settings::default();

        let variant = ResponseVariant {
            id: 1,
            body: Some("inline".to_string()),
            attachment_file: Some(PathBuf::from("/nonexistent")),
            ..ResponseVariant::default()
        };
        let rendered = render_response(&variant, &request, None, &settings, "c1");
        assert_eq!(rendered.body, Bytes::from("inline"));
    }

    #[test]
    fn test_response_charset_from_rendered_content_type() {
        let engine = TemplateEngine::new();
        let request = json_request("{}");
        let settings = Settings::default();

        let mut variant = variant_with_body("café");
        variant.header =
            Some("Content-Type: text/plain; charset=ISO-8859-1".to_string());
        let rendered = render_response(&variant, &request, Some(&engine), &settings, "c1");
        assert_eq!(rendered.body, Bytes::from_static(&[0x63, 0x61, 0x66, 0xe9]));
    }

    #[test]
    fn test_now_and_default_helpers() {
        let engine = TemplateEngine::new();
        let request = json_request("{}");
        let ctx = engine.context(&request);

        let result = engine.render("{{now \"%Y\"}}", &ctx).unwrap();
        assert_eq!(result.len(), 4);

        let result = engine
            .render("{{default parameters.missing \"fallback\"}}", &ctx)
            .unwrap();
        assert_eq!(result, "fallback");
    }

    #[test]
    fn test_uuid_helper_shape() {
        let engine = TemplateEngine::new();
        let request = json_request("{}");
        let ctx = engine.context(&request);

        let result = engine.render("{{uuid}}", &ctx).unwrap();
        assert_eq!(result.len(), 36);
        assert_eq!(result.chars().nth(8), Some('-'));
    }
}
