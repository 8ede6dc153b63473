//! Liveness and readiness endpoints served on a separate admin listener.

use crate::http::make_boxed_error_response;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::service::Service;
use hyper::{Method, Request, Response, StatusCode};
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

/// Reports whether the service is ready to take traffic.
pub trait ReadinessProbe: Send + Sync + 'static {
    fn is_ready(&self) -> bool;
}

/// Serves `GET /health` (always ok) and `GET /ready` (ok once the probe reports ready).
pub struct AdminService<E> {
    probe: Arc<dyn ReadinessProbe>,
    _error: PhantomData<fn() -> E>,
}

impl<E> AdminService<E> {
    pub fn new(probe: Arc<dyn ReadinessProbe>) -> Self {
        Self {
            probe,
            _error: PhantomData,
        }
    }
}

impl<E> Service<Request<Incoming>> for AdminService<E>
where
    E: Send + 'static,
{
    type Response = Response<BoxBody<Bytes, E>>;
    type Error = E;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let res = admin_response(req.method(), req.uri().path(), self.probe.is_ready());
        Box::pin(async move { Ok(res) })
    }
}

fn admin_response<E>(method: &Method, path: &str, is_ready: bool) -> Response<BoxBody<Bytes, E>> {
    let ok_body = || {
        Full::new(Bytes::from("ok\n"))
            .map_err(|never| match never {})
            .boxed()
    };

    if method != Method::GET {
        return make_boxed_error_response(StatusCode::METHOD_NOT_ALLOWED);
    }

    match path {
        "/health" => Response::new(ok_body()),
        "/ready" if is_ready => Response::new(ok_body()),
        "/ready" => make_boxed_error_response(StatusCode::SERVICE_UNAVAILABLE),
        _ => make_boxed_error_response(StatusCode::NOT_FOUND),
    }
}
