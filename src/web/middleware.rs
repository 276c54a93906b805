//! Request-scoped logging: every request gets a random id and a child
//! logger carrying it, stashed in the request extensions for handlers, and
//! the request/response pair is logged around the inner service call.

use actix_web::dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::HttpMessage;
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use slog::Logger;
use std::future::{ready, Future, Ready};
use std::pin::Pin;
use std::time::Instant;

/// Handler-visible wrapper around the request-scoped logger.
#[derive(Clone)]
pub struct RequestLog(pub Logger);

pub struct RequestLogger {
    pub log: Logger,
}

impl<S, B> Transform<S, ServiceRequest> for RequestLogger
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = actix_web::Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = actix_web::Error;
    type Transform = RequestLoggerMiddleware<S>;
    type InitError = ();
    type Future = Ready<std::result::Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RequestLoggerMiddleware {
            service,
            log: self.log.clone(),
        }))
    }
}

pub struct RequestLoggerMiddleware<S> {
    service: S,
    log:     Logger,
}

impl<S, B> Service<ServiceRequest> for RequestLoggerMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = actix_web::Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = actix_web::Error;
    type Future =
        Pin<Box<dyn Future<Output = std::result::Result<Self::Response, Self::Error>>>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let request_id: String = thread_rng()
            .sample_iter(&Alphanumeric)
            .take(8)
            .map(char::from)
            .collect();
        let log = self.log.new(o!("request_id" => request_id));
        info!(log, "Request";
            "method" => req.method().as_str().to_owned(), "path" => req.path().to_owned());
        req.extensions_mut().insert(RequestLog(log.clone()));

        let start = Instant::now();
        let fut = self.service.call(req);
        Box::pin(async move {
            let res = fut.await?;
            info!(log, "Response";
                "status" => u64::from(res.status().as_u16()),
                "elapsed" => crate::time_helpers::unit_str(start.elapsed().as_nanos() as u64));
            Ok(res)
        })
    }
}
