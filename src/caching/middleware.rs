//! # Cache Middleware
//!
//! Tower layer that puts an [`ApiCache`] in front of any axum service.
//!
//! For a GET request the cache is consulted first. A hit is answered directly
//! with `200 OK` and the inner service is never called. On a miss, or when the
//! stored entry cannot be read, the request goes to the inner service and its
//! response body is wrapped in a [`TeeBody`]: frames reach the client as they
//! are produced and are copied into a buffer on the side. Once the body has
//! been fully streamed the buffer is written to the cache on a background task.
//!
//! Caching never changes what the client receives. Read failures are logged
//! and treated as misses; write failures and rate-limit denials are logged
//! and dropped.

use crate::caching::api_cache::{ApiCache, CacheLookup, CacheWrite};
use crate::caching::codec::CachePayload;
use crate::caching::key_generator::RequestDescriptor;
use crate::core::error::{CacheError, CacheResult};
use axum::body::Body;
use axum::extract::Request;
use axum::http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use axum::http::StatusCode;
use axum::response::Response;
use bytes::{Bytes, BytesMut};
use http_body::{Body as HttpBody, Frame, SizeHint};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use tower::{Layer, Service};
use tracing::{debug, warn};

/// Response header reporting whether the cache answered the request
pub const X_CACHE: HeaderName = HeaderName::from_static("x-cache");

/// Tower layer for response caching
#[derive(Clone)]
pub struct CacheLayer {
    cache: Arc<ApiCache>,
}

impl CacheLayer {
    pub fn new(cache: Arc<ApiCache>) -> Self {
        Self { cache }
    }
}

impl<S> Layer<S> for CacheLayer {
    type Service = CacheService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CacheService {
            inner,
            cache: self.cache.clone(),
        }
    }
}

/// Tower service for response caching
#[derive(Clone)]
pub struct CacheService<S> {
    inner: S,
    cache: Arc<ApiCache>,
}

impl<S> Service<Request> for CacheService<S>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request) -> Self::Future {
        let cache = self.cache.clone();
        // the readied service handles this request; the clone waits for the next poll_ready
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let descriptor = RequestDescriptor::from_request(&request);
            if !descriptor.is_cacheable() {
                return inner.call(request).await;
            }

            match cache.get_cache(&descriptor).await {
                Ok(CacheLookup::Hit(payload)) => match hit_response(&cache, &payload) {
                    Ok(response) => return Ok(response),
                    Err(e) => {
                        warn!(path = %descriptor.path, error = %e, "Failed to build cached response");
                    }
                },
                Ok(_) => {}
                Err(e) => {
                    warn!(path = %descriptor.path, error = %e, "Cache lookup failed, serving from handler");
                }
            }

            let response = inner.call(request).await?;
            Ok(tee_response(cache, descriptor, response))
        })
    }
}

/// Response for a cache hit
fn hit_response(cache: &ApiCache, payload: &CachePayload) -> CacheResult<Response> {
    let body = payload.to_body()?;

    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, cache.config().content_type.as_str())
        .header(X_CACHE, HeaderValue::from_static("HIT"))
        .body(Body::from(body))
        .map_err(|e| CacheError::serialization(format!("invalid cached response: {}", e)))
}

/// Mark a handler response as a miss and capture its body when cacheable
fn tee_response(cache: Arc<ApiCache>, request: RequestDescriptor, response: Response) -> Response {
    let (mut parts, body) = response.into_parts();
    parts.headers.insert(X_CACHE, HeaderValue::from_static("MISS"));

    if !parts.status.is_success() {
        debug!(path = %request.path, status = %parts.status, "Response not cacheable");
        return Response::from_parts(parts, body);
    }

    let limit = cache.config().max_body_bytes;
    if body.size_hint().lower() > limit as u64 {
        debug!(path = %request.path, limit, "Response larger than cache limit");
        return Response::from_parts(parts, body);
    }

    let capture = Capture {
        cache,
        request,
        buffer: BytesMut::new(),
        limit,
    };

    Response::from_parts(parts, Body::new(TeeBody::new(body, capture)))
}

/// Body bytes collected on their way to the client
struct Capture {
    cache: Arc<ApiCache>,
    request: RequestDescriptor,
    buffer: BytesMut,
    limit: usize,
}

impl Capture {
    /// Append `data`; `false` once the limit would be exceeded
    fn push(&mut self, data: &Bytes) -> bool {
        if self.buffer.len() + data.len() > self.limit {
            return false;
        }
        self.buffer.extend_from_slice(data);
        true
    }

    /// Hand the captured body to the cache on a background task
    fn store(self) {
        let Capture {
            cache,
            request,
            buffer,
            ..
        } = self;
        let payload = CachePayload::Bytes(buffer.freeze());

        tokio::spawn(async move {
            match cache.set_cache(&request, &payload).await {
                Ok(CacheWrite::Stored { key, .. }) => {
                    debug!(key = %key, "Stored handler response");
                }
                Ok(CacheWrite::RateLimited { key }) => {
                    debug!(key = %key, "Skipped cache write, rate limited");
                }
                Ok(CacheWrite::NotApplicable) => {}
                Err(e) => {
                    warn!(path = %request.path, error = %e, "Failed setting cache");
                }
            }
        });
    }
}

/// Body wrapper that forwards every frame unchanged while copying data
/// frames into a [`Capture`].
///
/// The capture is only written once the inner body reports its end. An
/// error frame, an oversized body or dropping the body early discards it.
pub struct TeeBody {
    inner: Body,
    capture: Option<Capture>,
}

impl TeeBody {
    fn new(inner: Body, capture: Capture) -> Self {
        let mut body = Self {
            inner,
            capture: Some(capture),
        };

        // an empty body may never be polled
        if body.inner.is_end_stream() {
            body.finish();
        }

        body
    }

    fn finish(&mut self) {
        if let Some(capture) = self.capture.take() {
            capture.store();
        }
    }

    fn abandon(&mut self, reason: &'static str) {
        if let Some(capture) = self.capture.take() {
            debug!(path = %capture.request.path, reason, "Abandoned response capture");
        }
    }
}

impl HttpBody for TeeBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let polled = ready!(Pin::new(&mut this.inner).poll_frame(cx));

        match &polled {
            Some(Ok(frame)) => {
                let kept = match (frame.data_ref(), this.capture.as_mut()) {
                    (Some(data), Some(capture)) => capture.push(data),
                    _ => true,
                };

                if !kept {
                    this.abandon("body exceeds max_body_bytes");
                } else if this.inner.is_end_stream() {
                    this.finish();
                }
            }
            Some(Err(_)) => this.abandon("body error"),
            None => this.finish(),
        }

        Poll::Ready(polled)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for TeeBody {
    fn drop(&mut self) {
        self.abandon("body dropped before completion");
    }
}
