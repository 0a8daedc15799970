//! Sending one forward attempt to a downstream coordinator.

use std::time::Duration;

use bytes::Bytes;
use coordinator_types::{headers::is_coordinator_header, prompb::WriteRequest};
use http::{HeaderMap, HeaderName, HeaderValue, Method};

use crate::error::{ForwardError, Result};
use crate::options::ForwardTargetOptions;

/// A parsed write, as handed to the forwarder.
#[derive(Debug)]
pub struct ForwardPayload {
    /// The decoded write, used to build shadow bodies.
    pub request: WriteRequest,
    /// The body exactly as received, forwarded as is to full targets.
    pub compressed: Bytes,
    /// The coordinator headers of the inbound request.
    headers: HeaderMap,
}

impl ForwardPayload {
    /// Keeps only the coordinator headers of `inbound`; those alter how a
    /// write is handled and must reach the downstream coordinator unchanged.
    pub fn new(request: WriteRequest, compressed: Bytes, inbound: &HeaderMap) -> Self {
        let mut headers = HeaderMap::new();
        for (name, value) in inbound {
            if is_coordinator_header(name.as_str()) {
                headers.append(name.clone(), value.clone());
            }
        }
        Self {
            request,
            compressed,
            headers,
        }
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }
}

/// Issues forward attempts over a shared connection pool.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl Dispatcher {
    /// `timeout` bounds each attempt on its own.
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self { client, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Make a single attempt to send `body` to `target`.
    pub async fn send(
        &self,
        target: &ForwardTargetOptions,
        body: Bytes,
        inbound: &HeaderMap,
    ) -> Result<()> {
        let method = target.method();
        let parsed_method =
            Method::from_bytes(method.as_bytes()).map_err(|source| ForwardError::InvalidMethod {
                method: method.to_string(),
                source,
            })?;

        let mut headers = inbound.clone();
        for (name, value) in &target.headers {
            let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) else {
                return Err(ForwardError::InvalidHeader { name: name.clone() });
            };
            headers.append(name, value);
        }

        let request = self
            .client
            .request(parsed_method, &target.url)
            .headers(headers)
            .body(body);

        let attempt = async {
            let resp = request
                .send()
                .await
                .map_err(|source| ForwardError::RequestSend {
                    method: method.to_string(),
                    url: target.url.clone(),
                    source,
                })?;

            let status = resp.status();
            if status.is_success() {
                return Ok(());
            }
            let body = resp
                .text()
                .await
                .unwrap_or_else(|e| format!("error reading body: {e}"));
            Err(ForwardError::UnexpectedStatus {
                status: status.as_u16(),
                method: method.to_string(),
                url: target.url.clone(),
                body,
            })
        };

        tokio::time::timeout(self.timeout, attempt)
            .await
            .map_err(|_| ForwardError::Timeout {
                method: method.to_string(),
                url: target.url.clone(),
                timeout: self.timeout,
            })?
    }
}

#[cfg(test)]
mod tests {
    use coordinator_types::headers::{METRICS_TYPE_HEADER, PROM_TYPE_HEADER};
    use mockito::{Matcher, Server};
    use pretty_assertions::assert_eq;

    use super::*;

    fn inbound() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(METRICS_TYPE_HEADER, HeaderValue::from_static("aggregated"));
        headers.insert(PROM_TYPE_HEADER, HeaderValue::from_static("gauge"));
        headers.insert("authorization", HeaderValue::from_static("Bearer secret"));
        headers.insert("content-encoding", HeaderValue::from_static("snappy"));
        headers
    }

    #[test]
    fn payload_keeps_coordinator_headers_only() {
        let payload = ForwardPayload::new(WriteRequest::default(), Bytes::new(), &inbound());
        let mut names: Vec<_> = payload.headers().keys().map(|k| k.as_str()).collect();
        names.sort_unstable();
        assert_eq!(vec![METRICS_TYPE_HEADER, PROM_TYPE_HEADER], names);
    }

    #[tokio::test]
    async fn sends_body_and_headers() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v1/prom/remote/write")
            .match_header(METRICS_TYPE_HEADER, "aggregated")
            .match_header("x-target", "shadow")
            .match_header("authorization", Matcher::Missing)
            .match_body("payload")
            .with_status(200)
            .create_async()
            .await;

        let payload = ForwardPayload::new(
            WriteRequest::default(),
            Bytes::from_static(b"payload"),
            &inbound(),
        );
        let url = format!("{}/api/v1/prom/remote/write", server.url());
        let target = ForwardTargetOptions::new(url).with_header("x-target", "shadow");

        Dispatcher::new(Duration::from_secs(5))
            .unwrap()
            .send(&target, payload.compressed.clone(), payload.headers())
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn non_2xx_is_an_error() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("PUT", "/write")
            .with_status(503)
            .with_body("overloaded")
            .create_async()
            .await;

        let mut target = ForwardTargetOptions::new(format!("{}/write", server.url()));
        target.method = "PUT".to_string();
        let url = target.url.clone();

        let err = Dispatcher::new(Duration::from_secs(5))
            .unwrap()
            .send(&target, Bytes::new(), &HeaderMap::new())
            .await
            .unwrap_err();
        assert_eq!(
            format!("expected status code 2XX: actual=503, method=PUT, url={url}, resp=overloaded"),
            err.to_string()
        );
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn transport_and_config_errors() {
        let dispatcher = Dispatcher::new(Duration::from_secs(5)).unwrap();

        let target = ForwardTargetOptions::new("http://127.0.0.1:1/write");
        let err = dispatcher
            .send(&target, Bytes::new(), &HeaderMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ForwardError::RequestSend { .. }), "{err}");

        let target = target.with_header("bad header", "v");
        let err = dispatcher
            .send(&target, Bytes::new(), &HeaderMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ForwardError::InvalidHeader { .. }), "{err}");
    }
}
