//! HTTP surface and request orchestration.
//!
//! `StubEngine` runs the per-request pipeline: endpoint lookup, key
//! extraction, response resolution, rendering, simulated latency, and
//! evidence capture. `StubServer` wraps it in a plain HTTP/1 accept loop.

use crate::config::{Settings, StubConfig};
use crate::endpoint::EndpointRegistry;
use crate::evidence::Evidence;
use crate::extract;
use crate::key;
use crate::request::{parse_parameters, StubRequest};
use crate::resolver::ResponseStore;
use crate::template::{render_response, RenderedResponse, TemplateEngine};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{HeaderName, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// The stub pipeline, shared across connections.
pub struct StubEngine {
    registry: EndpointRegistry,
    store: ResponseStore,
    template_engine: Option<TemplateEngine>,
    settings: Settings,
}

impl StubEngine {
    /// Build the engine from configuration. The template engine is only
    /// constructed when templating is enabled.
    pub fn new(config: StubConfig) -> Self {
        let template_engine = if config.settings.response.template.disabled {
            info!("Response templating is disabled");
            None
        } else {
            Some(TemplateEngine::new())
        };

        info!(
            endpoints = config.endpoints.len(),
            responses = config.responses.len(),
            "Stub engine initialized"
        );

        Self {
            registry: EndpointRegistry::new(config.endpoints),
            store: ResponseStore::new(config.responses),
            template_engine,
            settings: config.settings,
        }
    }

    /// Number of stored response variants.
    pub fn response_count(&self) -> usize {
        self.store.len()
    }

    /// Run one request through the full pipeline.
    pub async fn handle(&self, mut request: StubRequest) -> RenderedResponse {
        let correlation_id = request
            .header(&self.settings.correlation_id_key)
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let matched = self.registry.find(&request.method, &request.path);
        let endpoint = matched.as_ref().map(|m| m.endpoint);
        if let Some(m) = &matched {
            request.path_variables = m.path_variables.clone();
        }

        let data_key = match endpoint {
            Some(endpoint) => {
                match extract::extract_values(&request, &endpoint.key_components) {
                    Ok(values) => Some(key::build(&values, endpoint.key_generation)),
                    Err(e) => {
                        error!(path = %request.path, error = %e, "Key extraction failed");
                        return extraction_failure(&self.settings, &correlation_id, &e);
                    }
                }
            }
            None => {
                debug!(method = %request.method, path = %request.path, "No endpoint definition matched");
                None
            }
        };

        let evidence = Evidence::new(
            &self.settings.evidence,
            endpoint,
            &request,
            data_key.as_deref(),
            correlation_id,
        );
        evidence.start();
        evidence.request(&request);

        let variant = self.store.resolve(
            &request.path,
            endpoint.map(|e| e.path.as_str()),
            &request.method,
            data_key.as_deref().unwrap_or(""),
        );
        if variant.is_not_found() {
            evidence.not_found();
        } else {
            info!(
                id = variant.id,
                description = %variant.description,
                "Mock response found"
            );
        }

        let rendered = render_response(
            &variant,
            &request,
            self.template_engine.as_ref(),
            &self.settings,
            evidence.correlation_id(),
        );

        if let Some(millis) = variant.waiting_millis.filter(|&m| m > 0) {
            info!(millis, "Waiting before responding");
            tokio::time::sleep(Duration::from_millis(millis)).await;
        }

        evidence.response(&rendered);
        evidence.end();

        rendered
    }
}

/// A key extraction failure aborts the resolution attempt; the client
/// gets a 500 naming the bad expression, with the correlation header
/// still attached.
fn extraction_failure(
    settings: &Settings,
    correlation_id: &str,
    error: &extract::ExtractError,
) -> RenderedResponse {
    RenderedResponse {
        status: 500,
        headers: vec![
            ("Content-Type".to_string(), "text/plain".to_string()),
            (settings.correlation_id_key.clone(), correlation_id.to_string()),
        ],
        body: Bytes::from(error.to_string()),
    }
}

/// HTTP/1 server fronting a shared `StubEngine`.
pub struct StubServer {
    addr: SocketAddr,
    engine: Arc<StubEngine>,
}

impl StubServer {
    /// Create a server bound to the given address once run.
    pub fn new(addr: SocketAddr, engine: StubEngine) -> Self {
        Self {
            addr,
            engine: Arc::new(engine),
        }
    }

    /// Accept connections until Ctrl-C.
    pub async fn run(self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        info!("API stub listening on http://{}", self.addr);

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown signal received");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    let (stream, _) = accepted?;
                    let io = TokioIo::new(stream);
                    let engine = Arc::clone(&self.engine);

                    tokio::spawn(async move {
                        let service = service_fn(move |req| {
                            let engine = Arc::clone(&engine);
                            async move { serve_request(req, engine).await }
                        });

                        if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                            debug!("Connection error: {}", e);
                        }
                    });
                }
            }
        }
    }
}

async fn serve_request(
    req: Request<Incoming>,
    engine: Arc<StubEngine>,
) -> Result<Response<Full<Bytes>>, std::convert::Infallible> {
    let request = match read_request(req).await {
        Ok(request) => request,
        Err(e) => {
            warn!(error = %e, "Failed to read request");
            let mut response = Response::new(Full::new(Bytes::from(e)));
            *response.status_mut() = StatusCode::BAD_REQUEST;
            return Ok(response);
        }
    };

    let rendered = engine.handle(request).await;
    Ok(to_http_response(rendered))
}

/// Snapshot the hyper request into the pipeline's request type.
async fn read_request(req: Request<Incoming>) -> Result<StubRequest, String> {
    let method = req.method().as_str().to_uppercase();
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(str::to_string);
    let headers = flatten_headers(req.headers());

    let body = req
        .collect()
        .await
        .map(|collected| collected.to_bytes())
        .map_err(|e| format!("Failed to read request body: {e}"))?;

    let mut parameters = query
        .as_deref()
        .map(parse_parameters)
        .unwrap_or_default();

    // Url-encoded form bodies contribute parameters too
    let form_encoded = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-type"))
        .is_some_and(|(_, v)| v.to_lowercase().contains("x-www-form-urlencoded"));
    if form_encoded {
        if let Ok(form) = std::str::from_utf8(&body) {
            for (name, values) in parse_parameters(form) {
                parameters.entry(name).or_default().extend(values);
            }
        }
    }

    Ok(StubRequest {
        method,
        path,
        query,
        headers,
        parameters,
        path_variables: HashMap::new(),
        body,
    })
}

/// Flatten a hyper header map, keeping the first value of each header.
fn flatten_headers(headers: &hyper::HeaderMap) -> HashMap<String, String> {
    let mut flattened = HashMap::new();
    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            flattened
                .entry(name.as_str().to_string())
                .or_insert_with(|| value.to_string());
        }
    }
    flattened
}

fn to_http_response(rendered: RenderedResponse) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(rendered.body));
    *response.status_mut() =
        StatusCode::from_u16(rendered.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    for (name, value) in &rendered.headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                response.headers_mut().append(name, value);
            }
            _ => warn!(name, value, "Dropping invalid response header"),
        }
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        EndpointDefinition, ExtractorKind, KeyComponentSpec, KeyGeneratingStrategy,
        ResponseVariantDefinition,
    };

    fn quiet_settings() -> Settings {
        let mut settings = Settings::default();
        settings.evidence.disabled_request = true;
        settings.evidence.disabled_upload = true;
        settings
    }

    fn engine(
        endpoints: Vec<EndpointDefinition>,
        responses: Vec<ResponseVariantDefinition>,
    ) -> StubEngine {
        StubEngine::new(StubConfig {
            endpoints,
            responses,
            settings: quiet_settings(),
        })
    }

    fn json_endpoint(path: &str, expression: &str) -> EndpointDefinition {
        EndpointDefinition {
            path: path.to_string(),
            method: "POST".to_string(),
            key_components: vec![KeyComponentSpec {
                kind: ExtractorKind::JsonPath,
                expression: expression.to_string(),
            }],
            key_generation: KeyGeneratingStrategy::Concat,
            description: None,
        }
    }

    fn variant(path: &str, method: &str, data_key: &str, body: &str) -> ResponseVariantDefinition {
        ResponseVariantDefinition {
            path: path.to_string(),
            method: method.to_string(),
            data_key: data_key.to_string(),
            status_code: None,
            header: None,
            body: Some(body.to_string()),
            attachment_file: None,
            file_name: None,
            waiting_millis: None,
            description: String::new(),
        }
    }

    fn json_request(path: &str, body: &str) -> StubRequest {
        let mut headers = HashMap::new();
        headers.insert(
            "Content-Type".to_string(),
            "application/json".to_string(),
        );
        StubRequest {
            method: "POST".to_string(),
            path: path.to_string(),
            headers,
            body: Bytes::copy_from_slice(body.as_bytes()),
            ..StubRequest::default()
        }
    }

    #[tokio::test]
    async fn test_keyed_response_selection() {
        let engine = engine(
            vec![json_endpoint("/users", "$.id")],
            vec![
                variant("/users", "POST", "42", "forty-two"),
                variant("/users", "POST", "43", "forty-three"),
            ],
        );

        let rendered = engine.handle(json_request("/users", r#"{"id":"43"}"#)).await;
        assert_eq!(rendered.status, 200);
        assert_eq!(rendered.body, Bytes::from("forty-three"));
    }

    #[tokio::test]
    async fn test_wildcard_fallback_through_pipeline() {
        let engine = engine(
            vec![json_endpoint("/users", "$.id")],
            vec![variant("/users", "POST", "", "default")],
        );

        let rendered = engine.handle(json_request("/users", r#"{"id":"99"}"#)).await;
        assert_eq!(rendered.body, Bytes::from("default"));
    }

    #[tokio::test]
    async fn test_unmatched_request_uses_not_found_status() {
        let mut settings = quiet_settings();
        settings.response.http_status_for_mock_not_found = Some(404);
        let engine = StubEngine::new(StubConfig {
            endpoints: vec![],
            responses: vec![],
            settings,
        });

        let rendered = engine.handle(json_request("/nowhere", "{}")).await;
        assert_eq!(rendered.status, 404);
        assert!(rendered.body.is_empty());
    }

    #[tokio::test]
    async fn test_path_variable_key_through_template_endpoint() {
        let endpoint = EndpointDefinition {
            path: "/users/{id}".to_string(),
            method: "GET".to_string(),
            key_components: vec![KeyComponentSpec {
                kind: ExtractorKind::PathVariable,
                expression: "id".to_string(),
            }],
            key_generation: KeyGeneratingStrategy::Concat,
            description: None,
        };
        let engine = engine(
            vec![endpoint],
            vec![variant("/users/{id}", "GET", "7", "user seven")],
        );

        let mut request = json_request("/users/7", "");
        request.method = "GET".to_string();
        let rendered = engine.handle(request).await;
        assert_eq!(rendered.body, Bytes::from("user seven"));
    }

    #[tokio::test]
    async fn test_malformed_fixed_length_expression_is_fatal() {
        let endpoint = EndpointDefinition {
            path: "/legacy".to_string(),
            method: "POST".to_string(),
            key_components: vec![KeyComponentSpec {
                kind: ExtractorKind::FixedLength,
                expression: "0,4,decimal".to_string(),
            }],
            key_generation: KeyGeneratingStrategy::Concat,
            description: None,
        };
        let engine = engine(vec![endpoint], vec![]);

        let rendered = engine.handle(json_request("/legacy", "ABCD")).await;
        assert_eq!(rendered.status, 500);
        let message = String::from_utf8_lossy(&rendered.body).into_owned();
        assert!(message.contains("decimal"), "message = {message}");
        assert!(
            rendered
                .headers
                .iter()
                .any(|(k, _)| k == "x-correlation-id"),
            "correlation header missing"
        );
    }

    #[tokio::test]
    async fn test_correlation_id_taken_from_request_header() {
        let engine = engine(
            vec![json_endpoint("/users", "$.id")],
            vec![variant("/users", "POST", "42", "ok")],
        );

        let mut request = json_request("/users", r#"{"id":"42"}"#);
        request
            .headers
            .insert("x-correlation-id".to_string(), "given-id".to_string());
        let rendered = engine.handle(request).await;
        assert!(rendered
            .headers
            .iter()
            .any(|(k, v)| k == "x-correlation-id" && v == "given-id"));
    }

    #[tokio::test]
    async fn test_simulated_latency() {
        let mut def = variant("/slow", "GET", "", "slow");
        def.waiting_millis = Some(30);
        let engine = engine(
            vec![EndpointDefinition {
                path: "/slow".to_string(),
                method: "GET".to_string(),
                key_components: vec![],
                key_generation: KeyGeneratingStrategy::Concat,
                description: None,
            }],
            vec![def],
        );

        let mut request = json_request("/slow", "");
        request.method = "GET".to_string();
        let started = std::time::Instant::now();
        let rendered = engine.handle(request).await;
        assert!(started.elapsed() >= Duration::from_millis(30));
        assert_eq!(rendered.body, Bytes::from("slow"));
    }

    #[test]
    fn test_to_http_response_drops_invalid_headers() {
        let rendered = RenderedResponse {
            status: 201,
            headers: vec![
                ("X-Ok".to_string(), "yes".to_string()),
                ("bad header".to_string(), "value".to_string()),
            ],
            body: Bytes::from("done"),
        };
        let response = to_http_response(rendered);
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers().get("X-Ok").unwrap(), "yes");
        assert_eq!(response.headers().len(), 1);
    }

    #[test]
    fn test_to_http_response_invalid_status_becomes_500() {
        let rendered = RenderedResponse {
            status: 99,
            headers: vec![],
            body: Bytes::new(),
        };
        let response = to_http_response(rendered);
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
