use std::sync::Arc;

use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Empty, Full};
use hyper::body::Incoming;
use hyper::header::{HeaderValue, PROXY_AUTHENTICATE};
use hyper::{Method, Request, Response};
use tracing::info;

use crate::buffer_pool::BufferPool;
use crate::config::ProxyConfig;
use crate::relay::{self, RelayClient};
use crate::tunnel;

/// Response body type shared by every handler
pub type ProxyBody = BoxBody<Bytes, hyper::Error>;

/// Process-wide immutable state captured by every request handler
pub struct ProxyState {
    pub config: ProxyConfig,
    pub pool: Arc<BufferPool>,
    pub client: RelayClient,
}

impl ProxyState {
    pub fn new(config: ProxyConfig) -> Arc<Self> {
        Arc::new(Self {
            pool: Arc::new(BufferPool::new(config.buffer_size)),
            client: relay::build_client(),
            config,
        })
    }
}

/// Entry point for every inbound request: authentication gate, then pure
/// method dispatch.
pub async fn serve(
    state: Arc<ProxyState>,
    mut req: Request<Incoming>,
) -> Result<Response<ProxyBody>, hyper::Error> {
    // Credentials are verified and stripped up front, so neither handler
    // ever observes or forwards Proxy-Authorization.
    if !state.config.auth.authenticate(req.headers_mut()) {
        return Ok(auth_required());
    }

    if req.method() == Method::CONNECT {
        if state.config.log_requests {
            info!("{} {}", req.method(), req.uri());
        }
        Ok(tunnel::handle(req, Arc::clone(&state.pool)).await)
    } else {
        if state.config.log_requests {
            info!("{} {}", req.method(), req.uri().host().unwrap_or("-"));
        }
        Ok(relay::handle(&state.client, req).await)
    }
}

fn auth_required() -> Response<ProxyBody> {
    let mut resp = Response::new(full("proxy authentication required"));
    *resp.status_mut() = http::StatusCode::PROXY_AUTHENTICATION_REQUIRED;
    resp.headers_mut().insert(
        PROXY_AUTHENTICATE,
        HeaderValue::from_static("Basic realm=\"proxy\""),
    );
    resp
}

pub fn empty() -> ProxyBody {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed()
}

pub fn full<T: Into<Bytes>>(chunk: T) -> ProxyBody {
    Full::new(chunk.into())
        .map_err(|never| match never {})
        .boxed()
}
