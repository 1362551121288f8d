use actix_web::dev::{Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::{http::header, Error};
use futures_util::future::{ready, LocalBoxFuture, Ready};
use std::rc::Rc;

use crate::storage::RenditionKind;

const IMMUTABLE: &str = "public, max-age=31536000, immutable";

/// Adds baseline hardening headers to every response, plus caching policy:
/// renditions are immutable once written, panel listings are never cached.
#[derive(Clone, Default)]
pub struct ResponseHeaders;

fn is_rendition_path(path: &str) -> bool {
    RenditionKind::ALL.iter().any(|kind| {
        path.strip_prefix('/')
            .and_then(|p| p.strip_prefix(kind.mount()))
            .is_some_and(|rest| rest.starts_with('/'))
    })
}

impl<S, B> Transform<S, ServiceRequest> for ResponseHeaders
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = ResponseHeadersMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(ResponseHeadersMiddleware { service: Rc::new(service) }))
    }
}

pub struct ResponseHeadersMiddleware<S> {
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for ResponseHeadersMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(
        &self,
        ctx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.service.poll_ready(ctx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let svc = self.service.clone();
        let rendition = is_rendition_path(req.path());
        Box::pin(async move {
            let mut res = svc.call(req).await?;
            let ok = res.status().is_success();
            let headers = res.response_mut().headers_mut();
            if !headers.contains_key(header::X_CONTENT_TYPE_OPTIONS) {
                headers.insert(
                    header::X_CONTENT_TYPE_OPTIONS,
                    header::HeaderValue::from_static("nosniff"),
                );
            }
            if !headers.contains_key(header::REFERRER_POLICY) {
                headers.insert(
                    header::REFERRER_POLICY,
                    header::HeaderValue::from_static("no-referrer"),
                );
            }
            if !headers.contains_key(header::CACHE_CONTROL) {
                let policy = if rendition && ok { IMMUTABLE } else { "no-store" };
                headers.insert(header::CACHE_CONTROL, header::HeaderValue::from_static(policy));
            }
            Ok(res)
        })
    }
}
