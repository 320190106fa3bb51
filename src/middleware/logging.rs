//! Structured request logging.
//!
//! One span per request carrying method, path and client address, with a
//! completion event at a level that follows the response status: `info` for
//! success, `warn` for client errors and `error` for server errors. Upload bodies
//! and chat messages are never logged.

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error,
};
use futures_util::future::LocalBoxFuture;
use std::{
    future::{ready, Ready},
    time::Instant,
};
use tracing::{error, info, info_span, warn, Instrument};

pub struct RequestLogging;

impl<S, B> Transform<S, ServiceRequest> for RequestLogging
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = RequestLoggingMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RequestLoggingMiddleware { service }))
    }
}

pub struct RequestLoggingMiddleware<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for RequestLoggingMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let start_time = Instant::now();
        let remote_addr = req
            .connection_info()
            .realip_remote_addr()
            .unwrap_or("unknown")
            .to_string();
        let span = info_span!(
            "http_request",
            method = %req.method(),
            path = %req.path(),
            remote_addr = %remote_addr
        );

        // Entering the span while calling the inner service puts handler logs inside it
        let fut = {
            let _entered = span.enter();
            self.service.call(req)
        };

        Box::pin(
            async move {
                let result = fut.await;
                let duration_ms = start_time.elapsed().as_millis() as u64;

                match &result {
                    Ok(response) => {
                        let status = response.status();
                        if status.is_server_error() {
                            error!(status = status.as_u16(), duration_ms, "Request failed");
                        } else if status.is_client_error() {
                            warn!(status = status.as_u16(), duration_ms, "Request rejected");
                        } else {
                            info!(status = status.as_u16(), duration_ms, "Request completed");
                        }
                    }
                    Err(err) => {
                        error!(error = %err, duration_ms, "Request errored");
                    }
                }

                result
            }
            .instrument(span),
        )
    }
}
