//! Request counting middleware feeding `AppState` metrics.
//!
//! Requests are keyed by their matched route pattern rather than the raw path,
//! so `/ws/s2s?rate=48000` and `/ws/s2s` land in the same bucket.

use crate::state::AppState;
use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    web, Error,
};
use futures_util::future::LocalBoxFuture;
use std::{
    future::{ready, Ready},
    time::Instant,
};

pub struct RequestMetrics;

impl<S, B> Transform<S, ServiceRequest> for RequestMetrics
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = RequestMetricsService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RequestMetricsService { service }))
    }
}

pub struct RequestMetricsService<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for RequestMetricsService<S>
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
        let started = Instant::now();
        let route = req
            .match_pattern()
            .unwrap_or_else(|| req.path().to_string());
        let key = format!("{} {}", req.method(), route);
        let state = req.app_data::<web::Data<AppState>>().cloned();

        let fut = self.service.call(req);

        Box::pin(async move {
            let result = fut.await;
            let is_error = match &result {
                Ok(response) => {
                    response.status().is_client_error() || response.status().is_server_error()
                }
                Err(_) => true,
            };

            if let Some(state) = state {
                state.record_request(&key, started.elapsed().as_millis() as u64, is_error);
            }

            result
        })
    }
}
