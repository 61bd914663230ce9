//! # bpscan-probe
//!
//! Network-facing adapters used by the validation engine. All external I/O
//! is reachable only through traits ([`HttpTransport`], [`NameResolver`],
//! [`ToolRunner`]) so the engine can be driven end-to-end with mocks; the
//! real implementations wrap reqwest, hickory and `tokio::process`.

pub mod dns;
pub mod http;
pub mod http2;
pub mod p2p;
pub mod tls;
pub mod tools;
pub mod whois;

pub use dns::{HickoryResolver, HostInfo, IpResolver, MockResolver, NameResolver, ResolveError};
pub use http::{
    HttpMethod, HttpProbe, HttpRequest, HttpTransport, MockHttpTransport, MockResponse,
    ReqwestTransport, RequestOpts, ResponseEnvelope, TransportError, TransportResponse,
};
pub use http2::Http2Probe;
pub use p2p::{P2pProbe, SocketCheck, SpeedTestResult};
pub use tls::{TlsProbe, MODERN_TLS_VERSIONS, TLS_CACHE_TTL_SECS};
pub use tools::{MockToolRunner, SystemToolRunner, ToolError, ToolOutput, ToolRunner};
pub use whois::{WhoisProbe, WHOIS_TTL_SECS};
