//! HTTP entry point for remote writes.

use std::{convert::Infallible, net::SocketAddr, sync::Arc};

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use hyper::{
    Body, Method, Request, Response, StatusCode,
    server::conn::{AddrIncoming, AddrStream},
};
use observability_deps::tracing::{debug, error, info};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::handler::{HandlerError, WriteHandler};

pub const REMOTE_WRITE_PATH: &str = "/api/v1/prom/remote/write";

/// Default limit on the size of a compressed remote write body.
pub const DEFAULT_MAX_REQUEST_SIZE: usize = 10 * 1024 * 1024;

const UNKNOWN_REMOTE_ADDR: &str = "unknown";

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("body exceeds limit of {max_body_size} bytes")]
    RequestSizeExceeded { max_body_size: usize },

    #[error("client hung up while sending body: {0}")]
    ClientHangup(#[source] hyper::Error),

    #[error("not found")]
    NotFound,

    #[error("method not allowed: {0}")]
    MethodNotAllowed(Method),

    #[error(transparent)]
    Write(#[from] HandlerError),
}

impl HttpError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::RequestSizeExceeded { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::ClientHangup(_) => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            Self::Write(e) => e.status(),
        }
    }

    fn response(&self) -> Response<Body> {
        let json = serde_json::json!({ "error": self.to_string() }).to_string();
        let mut response = Response::new(Body::from(json));
        *response.status_mut() = self.status();
        response.headers_mut().insert(
            hyper::header::CONTENT_TYPE,
            hyper::header::HeaderValue::from_static("application/json"),
        );
        response
    }
}

/// Read the request body into memory, failing once it exceeds `max_size`.
pub async fn parse_body(req: Request<Body>, max_size: usize) -> Result<Bytes, HttpError> {
    let mut payload = req.into_body();
    let mut body = BytesMut::new();
    while let Some(chunk) = payload.next().await {
        let chunk = chunk.map_err(HttpError::ClientHangup)?;
        if body.len() + chunk.len() > max_size {
            return Err(HttpError::RequestSizeExceeded {
                max_body_size: max_size,
            });
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body.freeze())
}

/// The address of the client, preferring proxy headers over the peer address.
fn extract_client_ip<T>(req: &Request<T>) -> String {
    req.headers()
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(|s| s.trim().to_string())
        .or_else(|| {
            req.headers()
                .get("x-real-ip")
                .and_then(|h| h.to_str().ok())
                .map(|s| s.to_string())
        })
        .or_else(|| {
            req.extensions()
                .get::<Option<SocketAddr>>()
                .copied()
                .flatten()
                .map(|addr| addr.to_string())
        })
        .unwrap_or_else(|| UNKNOWN_REMOTE_ADDR.to_string())
}

async fn remote_write(
    handler: &WriteHandler,
    max_request_size: usize,
    req: Request<Body>,
) -> Result<Response<Body>, HttpError> {
    let remote_addr = extract_client_ip(&req);
    let headers = req.headers().clone();
    let body = parse_body(req, max_request_size).await?;
    handler.write(&headers, body, &remote_addr).await?;
    Ok(Response::new(Body::empty()))
}

pub async fn route_request(
    handler: Arc<WriteHandler>,
    max_request_size: usize,
    req: Request<Body>,
) -> Result<Response<Body>, Infallible> {
    let method = req.method().clone();
    let uri = req.uri().clone();

    let response = match (&method, uri.path()) {
        (&Method::POST, REMOTE_WRITE_PATH) => remote_write(&handler, max_request_size, req).await,
        (_, REMOTE_WRITE_PATH) => Err(HttpError::MethodNotAllowed(method.clone())),
        _ => Err(HttpError::NotFound),
    };

    match response {
        Ok(response) => Ok(response),
        Err(error) => {
            // Write failures are logged by the handler.
            if !matches!(error, HttpError::Write(_)) {
                debug!(%error, %method, %uri, "error while handling request");
            }
            Ok(error.response())
        }
    }
}

/// Serve remote writes on `addr` until `shutdown` is cancelled, then stop
/// any outstanding forwards.
pub async fn serve(
    addr: AddrIncoming,
    handler: Arc<WriteHandler>,
    max_request_size: usize,
    shutdown: CancellationToken,
) -> Result<(), hyper::Error> {
    info!(local_addr = %addr.local_addr(), "serving remote writes");

    let res = hyper::Server::builder(addr)
        .serve(hyper::service::make_service_fn(|conn: &AddrStream| {
            let handler = Arc::clone(&handler);
            let remote_addr = conn.remote_addr();
            let service = hyper::service::service_fn(move |mut req: Request<Body>| {
                req.extensions_mut().insert(Some(remote_addr));
                route_request(Arc::clone(&handler), max_request_size, req)
            });
            futures::future::ready(Ok::<_, Infallible>(service))
        }))
        .with_graceful_shutdown(shutdown.cancelled())
        .await;

    if let Some(forwarder) = handler.forwarder() {
        forwarder.context().shutdown().await;
    }
    if let Err(e) = &res {
        error!(error = %e, "remote write server failed");
    }
    res
}
