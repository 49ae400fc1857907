//! Per-request evidence capture.
//!
//! Each inbound request gets its own recorder with the lifecycle
//! `start()` -> `request()`/`response()` -> `end()`. Structured summaries
//! are always logged; artifacts (request metadata, raw body, multipart
//! uploads) are persisted under a per-request directory unless capture is
//! disabled. Persistence failures never abort the request.

use crate::config::{EndpointDefinition, EvidenceSettings};
use crate::request::StubRequest;
use crate::template::RenderedResponse;
use chrono::Local;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{enabled, error, info, warn, Level};

const DIR_NAME_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S%3f";

/// Recorder for one request's audit trail.
pub struct Evidence {
    settings: EvidenceSettings,
    dir: PathBuf,
    timestamp: chrono::DateTime<Local>,
    label: String,
    data_key: String,
    correlation_id: String,
    content_extension: &'static str,
}

impl Evidence {
    /// Create the recorder. The directory name is deterministic:
    /// `{root}/{path}/{dataKey}/{method}/{timestamp}_{correlationId}`,
    /// with an empty data-key segment for path-variable-keyed endpoints.
    pub fn new(
        settings: &EvidenceSettings,
        endpoint: Option<&EndpointDefinition>,
        request: &StubRequest,
        data_key: Option<&str>,
        correlation_id: String,
    ) -> Self {
        let timestamp = Local::now();

        let mut dir = settings.dir.clone();
        dir.push(request.path.trim_start_matches('/'));
        let path_variable_keyed = endpoint.is_some_and(EndpointDefinition::is_path_variable_keyed);
        if !path_variable_keyed {
            if let Some(key) = data_key.filter(|k| !k.is_empty()) {
                dir.push(key.trim_start_matches('/'));
            }
        }
        dir.push(&request.method);
        dir.push(format!(
            "{}_{}",
            timestamp.format(DIR_NAME_TIMESTAMP_FORMAT),
            correlation_id
        ));

        let label = match endpoint {
            Some(endpoint) => format!("{} {}", endpoint.method.to_uppercase(), endpoint.path),
            None => format!("{} {}", request.method, request.path),
        };

        Self {
            settings: settings.clone(),
            dir,
            timestamp,
            label,
            data_key: data_key
                .filter(|k| !k.is_empty())
                .unwrap_or("-")
                .to_string(),
            correlation_id,
            content_extension: content_extension(request.content_type()),
        }
    }

    /// The per-request correlation id.
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// The audit directory for this request.
    pub fn dir(&self) -> &std::path::Path {
        &self.dir
    }

    /// Log the start marker and ensure the audit directory exists.
    pub fn start(&self) {
        info!(endpoint = %self.label, key = %self.data_key, "Start");
        if self.settings.disabled_request && self.settings.disabled_upload {
            return;
        }
        if let Err(e) = std::fs::create_dir_all(&self.dir) {
            error!(dir = %self.dir.display(), error = %e, "Evidence directory cannot be created");
            return;
        }
        info!(dir = %self.dir.display(), "Evidence dir");
    }

    /// Log and (unless disabled) persist the request artifacts: a
    /// structured `request.json`, the raw body, and any multipart upload
    /// files under deterministic numbered names.
    pub fn request(&self, request: &StubRequest) {
        if enabled!(Level::INFO) {
            let summary = RequestRecord::from_request(request, &self.timestamp);
            info!(
                endpoint = %self.label,
                request = %to_compact_json(&summary),
                "Request"
            );
        }
        if !self.settings.disabled_request {
            let record = RequestRecord::from_request(request, &self.timestamp);
            self.write_artifact("request.json", to_pretty_json(&record).as_bytes());
        }

        if request.body.is_empty() {
            info!(endpoint = %self.label, "Request body: empty");
        } else {
            if enabled!(Level::INFO) {
                info!(
                    endpoint = %self.label,
                    body = %String::from_utf8_lossy(&request.body),
                    "Request body"
                );
            }
            if !self.settings.disabled_request {
                let name = format!("body.{}", self.content_extension);
                self.write_artifact(&name, &request.body);
            }
        }

        for (index, part) in multipart_file_parts(request).iter().enumerate() {
            let save_file_name = format!("uploadFile_{:02}_{}", index + 1, part.file_name);
            if enabled!(Level::INFO) {
                let record = UploadRecord {
                    save_file_name: &save_file_name,
                    size: part.data.len(),
                    headers: &part.headers,
                };
                info!(endpoint = %self.label, upload = %to_compact_json(&record), "Upload file");
            }
            if !self.settings.disabled_upload {
                self.write_artifact(&save_file_name, &part.data);
            }
        }
    }

    /// Log a structured summary of the outgoing response. Never persisted.
    pub fn response(&self, response: &RenderedResponse) {
        if enabled!(Level::INFO) {
            let record = ResponseRecord {
                status: response.status,
                headers: &response.headers,
            };
            info!(endpoint = %self.label, response = %to_compact_json(&record), "Response");
        }
    }

    /// Log the warning for an unmatched request.
    pub fn not_found(&self) {
        warn!(endpoint = %self.label, key = %self.data_key, "Mock response is not found");
    }

    /// Log the completion marker.
    pub fn end(&self) {
        info!(endpoint = %self.label, key = %self.data_key, "End");
    }

    fn write_artifact(&self, name: &str, content: &[u8]) {
        let path = self.dir.join(name);
        if let Err(e) = std::fs::write(&path, content) {
            error!(file = %path.display(), error = %e, "Evidence artifact cannot be written");
        }
    }
}

/// File extension for the persisted raw body, derived from content-type.
fn content_extension(content_type: Option<&str>) -> &'static str {
    match content_type.map(str::to_lowercase) {
        Some(ct) if ct.contains("json") => "json",
        Some(ct) if ct.contains("xml") => "xml",
        Some(ct) if ct.contains("html") => "html",
        _ => "txt",
    }
}

#[derive(Debug, Serialize)]
struct RequestRecord<'a> {
    timestamp: String,
    path: &'a str,
    method: &'a str,
    query: Option<&'a str>,
    parameters: &'a HashMap<String, Vec<String>>,
    headers: &'a HashMap<String, String>,
}

impl<'a> RequestRecord<'a> {
    fn from_request(request: &'a StubRequest, timestamp: &chrono::DateTime<Local>) -> Self {
        Self {
            timestamp: timestamp.to_rfc3339(),
            path: &request.path,
            method: &request.method,
            query: request.query.as_deref(),
            parameters: &request.parameters,
            headers: &request.headers,
        }
    }
}

#[derive(Debug, Serialize)]
struct UploadRecord<'a> {
    save_file_name: &'a str,
    size: usize,
    headers: &'a HashMap<String, String>,
}

#[derive(Debug, Serialize)]
struct ResponseRecord<'a> {
    status: u16,
    headers: &'a [(String, String)],
}

fn to_compact_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| format!("<serialize error: {e}>"))
}

fn to_pretty_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("<serialize error: {e}>"))
}

/// One uploaded file from a multipart body.
struct MultipartFilePart {
    file_name: String,
    headers: HashMap<String, String>,
    data: Vec<u8>,
}

/// Split a `multipart/form-data` body into its file parts (parts whose
/// Content-Disposition carries a filename). Non-multipart requests yield
/// an empty list.
fn multipart_file_parts(request: &StubRequest) -> Vec<MultipartFilePart> {
    let Some(content_type) = request.content_type() else {
        return Vec::new();
    };
    if !content_type.to_lowercase().starts_with("multipart/") {
        return Vec::new();
    }
    let Some(boundary) = boundary_of(content_type) else {
        return Vec::new();
    };

    let delimiter = format!("--{boundary}");
    let body = &request.body[..];
    let mut parts = Vec::new();
    let mut pos = 0;

    while let Some(start) = find_subslice(body, delimiter.as_bytes(), pos) {
        let part_start = start + delimiter.len();
        // Closing delimiter is "--boundary--"
        if body[part_start..].starts_with(b"--") {
            break;
        }
        let Some(end) = find_subslice(body, delimiter.as_bytes(), part_start) else {
            break;
        };
        if let Some(part) = parse_part(&body[part_start..end]) {
            parts.push(part);
        }
        pos = end;
    }

    parts
}

fn boundary_of(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (name, value) = param.split_once('=')?;
        if name.trim().eq_ignore_ascii_case("boundary") {
            Some(value.trim().trim_matches('"').to_string())
        } else {
            None
        }
    })
}

fn parse_part(raw: &[u8]) -> Option<MultipartFilePart> {
    // The part opens with the CRLF that terminated the delimiter line
    let raw = raw.strip_prefix(b"\r\n").unwrap_or(raw);
    let header_end = find_subslice(raw, b"\r\n\r\n", 0)?;
    let header_text = std::str::from_utf8(&raw[..header_end]).ok()?;

    let mut headers = HashMap::new();
    for line in header_text.split("\r\n") {
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_string(), value.trim().to_string());
        }
    }

    let disposition = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-disposition"))
        .map(|(_, v)| v.as_str())?;
    let file_name = disposition.split(';').find_map(|param| {
        let (name, value) = param.trim().split_once('=')?;
        if name.eq_ignore_ascii_case("filename") {
            Some(value.trim_matches('"').to_string())
        } else {
            None
        }
    })?;
    // Only the basename matters for the saved artifact
    let file_name = file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(&file_name)
        .to_string();

    let mut data = raw[header_end + 4..].to_vec();
    // Trailing CRLF before the next delimiter belongs to the framing
    if data.ends_with(b"\r\n") {
        data.truncate(data.len() - 2);
    }

    Some(MultipartFilePart {
        file_name,
        headers,
        data,
    })
}

fn find_subslice(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from > haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|i| i + from)
}
