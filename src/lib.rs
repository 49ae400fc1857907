//! API Stub Server
//!
//! An HTTP stub responder that picks canned responses by a composite key
//! extracted from each request. Useful for standing in for backends during
//! testing, development, and demos.
//!
//! # Features
//!
//! - **Key Extraction**: Build a lookup key from JsonPath, XPath,
//!   fixed-length fields, path variables, parameters, headers, or cookies
//! - **Response Resolution**: Exact key first, endpoint-wide wildcard as
//!   fallback, literal path before path template
//! - **Dynamic Templates**: Handlebars rendering of response headers and
//!   bodies, with request data in scope
//! - **Attachments**: Stream a file as the response body with download
//!   headers
//! - **Latency Simulation**: Per-variant response delays
//! - **Evidence Capture**: Per-request audit directory with request
//!   metadata, raw body, and uploaded files
//!
//! # Example Configuration
//!
//! ```yaml
//! endpoints:
//!   - path: /users
//!     method: POST
//!     key_components:
//!       - kind: json_path
//!         expression: $.id
//! responses:
//!   - path: /users
//!     method: POST
//!     data_key: "42"
//!     status_code: 200
//!     header: "Content-Type: application/json"
//!     body: '{"name": "{{jsonpath "$.name"}}"}'
//! ```

pub mod charset;
pub mod config;
pub mod endpoint;
pub mod evidence;
pub mod extract;
pub mod key;
pub mod request;
pub mod resolver;
pub mod server;
pub mod template;

pub use config::StubConfig;
pub use server::{StubEngine, StubServer};
