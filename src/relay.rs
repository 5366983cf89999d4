use std::error::Error as _;
use std::time::Duration;

use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::{Request, Response, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;

use crate::proxy::{empty, full, ProxyBody};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const KEEPALIVE_TIME: Duration = Duration::from_secs(10);
const MAX_IDLE_CONNS: usize = 1000;
const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Origin-identifying headers the proxy owns; client-supplied values are
/// dropped before the request goes upstream.
const TRUST_SENSITIVE: [&str; 3] = ["x-real-ip", "x-forwarded-for", "x-forwarded-proto"];

/// Shared upstream transport for plain-HTTP relaying
pub type RelayClient = Client<HttpConnector, Incoming>;

/// Build the process-wide pooled HTTP transport.
///
/// One instance serves every relay request, so upstream connections are
/// reused across requests to the same host.
pub fn build_client() -> RelayClient {
    let mut connector = HttpConnector::new();
    connector.set_connect_timeout(Some(CONNECT_TIMEOUT));
    connector.set_keepalive(Some(KEEPALIVE_TIME));

    Client::builder(TokioExecutor::new())
        .pool_max_idle_per_host(MAX_IDLE_CONNS)
        .pool_idle_timeout(IDLE_TIMEOUT)
        .http1_preserve_header_case(true)
        .http1_title_case_headers(true)
        .build(connector)
}

/// Forward one plain-HTTP request and return the upstream response.
///
/// The upstream response is handed back as-is: status, every header with
/// its multiplicity intact, and the body streamed through until EOF. A
/// body that errors mid-stream reaches the client truncated; the status
/// and headers are already on the wire by then.
pub async fn handle(client: &RelayClient, mut req: Request<Incoming>) -> Response<ProxyBody> {
    // Forward-proxy semantics only: absolute-form http:// targets
    if !is_absolute_http(req.uri()) {
        let mut resp = Response::new(empty());
        *resp.status_mut() = http::StatusCode::NOT_FOUND;
        return resp;
    }

    for name in TRUST_SENSITIVE {
        req.headers_mut().remove(name);
    }

    match client.request(req).await {
        Ok(resp) => resp.map(|body| body.boxed()),
        Err(err) => {
            // Single attempt; the failure text goes back to the client
            let detail = match err.source() {
                Some(source) => format!("{err}: {source}"),
                None => err.to_string(),
            };
            let mut resp = Response::new(full(detail));
            *resp.status_mut() = http::StatusCode::SERVICE_UNAVAILABLE;
            resp
        }
    }
}

/// True for the only request shape this proxy relays: an absolute
/// `http://host[:port]/...` target.
pub fn is_absolute_http(uri: &Uri) -> bool {
    uri.scheme_str() == Some("http") && uri.authority().is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uri(s: &str) -> Uri {
        s.parse().unwrap()
    }

    #[test]
    fn absolute_http_targets_are_accepted() {
        assert!(is_absolute_http(&uri("http://example.test/resource")));
        assert!(is_absolute_http(&uri("http://example.test:8080/")));
        assert!(is_absolute_http(&uri("http://example.test")));
    }

    #[test]
    fn other_request_shapes_are_rejected() {
        // Origin-form, as sent to an origin server
        assert!(!is_absolute_http(&uri("/resource")));
        // Wrong scheme
        assert!(!is_absolute_http(&uri("https://example.test/")));
        assert!(!is_absolute_http(&uri("ftp://example.test/")));
        // Authority-form, as sent with CONNECT
        assert!(!is_absolute_http(&uri("example.test:443")));
    }
}
