//! Endpoint registry and path-template matching.
//!
//! Maps an incoming `(method, path)` pair to its configured endpoint
//! definition and captures path variables from `{name}` segments.

use crate::config::EndpointDefinition;
use std::collections::HashMap;

/// A matched endpoint plus the path variables captured while matching.
#[derive(Debug)]
pub struct EndpointMatch<'a> {
    /// The matched endpoint definition
    pub endpoint: &'a EndpointDefinition,
    /// Path variables extracted from template segments
    pub path_variables: HashMap<String, String>,
}

/// Registry of configured endpoints with pre-parsed path templates.
pub struct EndpointRegistry {
    endpoints: Vec<EndpointDefinition>,
    templates: Vec<Option<PathTemplate>>,
}

impl EndpointRegistry {
    /// Build a registry from endpoint definitions. Paths containing
    /// `{name}` segments are parsed into templates once.
    pub fn new(endpoints: Vec<EndpointDefinition>) -> Self {
        let templates = endpoints
            .iter()
            .map(|e| {
                if e.path.contains('{') {
                    Some(PathTemplate::parse(&e.path))
                } else {
                    None
                }
            })
            .collect();
        Self {
            endpoints,
            templates,
        }
    }

    /// Find the first endpoint matching the request, in configuration
    /// order. Literal paths compare exactly; templated paths match per
    /// segment and yield their variables.
    pub fn find(&self, method: &str, path: &str) -> Option<EndpointMatch<'_>> {
        for (endpoint, template) in self.endpoints.iter().zip(&self.templates) {
            if !endpoint.method.eq_ignore_ascii_case(method) {
                continue;
            }
            match template {
                None => {
                    if endpoint.path == path {
                        return Some(EndpointMatch {
                            endpoint,
                            path_variables: HashMap::new(),
                        });
                    }
                }
                Some(template) => {
                    if let Some(path_variables) = template.matches(path) {
                        return Some(EndpointMatch {
                            endpoint,
                            path_variables,
                        });
                    }
                }
            }
        }
        None
    }
}

/// A parsed path template like `/users/{id}/orders`.
struct PathTemplate {
    segments: Vec<TemplateSegment>,
}

enum TemplateSegment {
    Literal(String),
    Variable(String),
}

impl PathTemplate {
    fn parse(template: &str) -> Self {
        let segments = template
            .split('/')
            .map(|segment| {
                if let Some(name) = segment
                    .strip_prefix('{')
                    .and_then(|s| s.strip_suffix('}'))
                {
                    TemplateSegment::Variable(name.to_string())
                } else {
                    TemplateSegment::Literal(segment.to_string())
                }
            })
            .collect();
        Self { segments }
    }

    fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        let parts: Vec<&str> = path.split('/').collect();
        if parts.len() != self.segments.len() {
            return None;
        }
        let mut variables = HashMap::new();
        for (segment, part) in self.segments.iter().zip(&parts) {
            match segment {
                TemplateSegment::Literal(literal) => {
                    if literal != part {
                        return None;
                    }
                }
                TemplateSegment::Variable(name) => {
                    // Variables must not match an empty segment
                    if part.is_empty() {
                        return None;
                    }
                    variables.insert(name.clone(), (*part).to_string());
                }
            }
        }
        Some(variables)
    }
}
