//! Networking for document retrieval: URL model, HTTP/1.1 GET over TCP or
//! rustls, content decoding, and charset detection.

pub mod charset;
pub mod client;
pub mod http;
pub mod tls;
pub mod transport;
pub mod url;

pub use charset::decode_text_response;
pub use charset::is_html_content_type;
pub use client::ClientConfig;
pub use client::FetchedResponse;
pub use client::HttpClient;
pub use http::Header;
pub use http::HttpResponse;
pub use http::HttpStatusCode;
pub use tls::TrustStoreMode;
pub use url::NavUrl;
pub use url::Scheme;
