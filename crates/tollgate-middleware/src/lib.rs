//! Rate-limit and quota middleware for actix-web 4.
//!
//! Sits between the router and a downstream handler, names the caller from
//! request metadata (header, cookie, query parameter, or client IP), then
//! enforces a token-bucket rate limit and a fixed-window quota per
//! identifier, both persisted in a RESP backing store.
//!
//! ```rust,no_run
//! use actix_web::{web, App, HttpServer, Responder};
//! use tollgate_middleware::Tollgate;
//! use tollgate_core::GateConfig;
//!
//! async fn index() -> impl Responder {
//!     "hello"
//! }
//!
//! # async fn run(config: GateConfig) -> std::io::Result<()> {
//! let gate = Tollgate::connect(config, "api-gate")
//!     .await
//!     .expect("gate construction");
//!
//! HttpServer::new(move || {
//!     App::new()
//!         .wrap(gate.clone())
//!         .route("/", web::get().to(index))
//! })
//! .bind(("127.0.0.1", 8080))?
//! .run()
//! .await
//! # }
//! ```
//!
//! Once construction succeeds, store trouble never surfaces as a 5xx: reads
//! fail open and quota writes are logged and dropped.

use std::future::{ready, Future, Ready};
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;

use actix_web::body::EitherBody;
use actix_web::dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::Error;

use tollgate_core::config::GateConfig;
use tollgate_core::error::GateError;
use tollgate_core::ports::StoreClient;
use tollgate_infra::RespClient;

mod emitter;
mod gate;
pub mod resolver;

use gate::{QuotaCharge, RuleEngines, Verdict};

struct GateCore {
    name: String,
    engines: Vec<RuleEngines>,
}

/// Middleware factory. Cheap to clone; all state is shared.
#[derive(Clone)]
pub struct Tollgate {
    core: Arc<GateCore>,
}

impl Tollgate {
    /// Build the gate over an already-connected store. Validates the
    /// configuration and constructs one engine pair per identifier rule.
    pub fn new(
        config: GateConfig,
        store: Arc<dyn StoreClient>,
        name: impl Into<String>,
    ) -> Result<Self, GateError> {
        let name = name.into();
        config.validate()?;

        let engines = RuleEngines::build(&config.identifiers, &store)?;
        tracing::info!(gate = %name, rules = engines.len(), "tollgate initialized");

        Ok(Self {
            core: Arc::new(GateCore { name, engines }),
        })
    }

    /// Validate the configuration, dial the RESP store, and build the gate.
    /// Construction fails on invalid configuration or an unreachable store.
    pub async fn connect(config: GateConfig, name: impl Into<String>) -> Result<Self, GateError> {
        config.validate()?;
        let store = RespClient::connect(&config.persistence.redis).await?;
        Self::new(config, Arc::new(store), name)
    }
}

impl<S, B> Transform<S, ServiceRequest> for Tollgate
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = TollgateService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(TollgateService {
            service: Rc::new(service),
            core: Arc::clone(&self.core),
        }))
    }
}

pub struct TollgateService<S> {
    service: Rc<S>,
    core: Arc<GateCore>,
}

impl<S, B> Service<ServiceRequest> for TollgateService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let core = Arc::clone(&self.core);
        let service = Rc::clone(&self.service);

        Box::pin(async move {
            let Some((index, identifier)) = gate::resolve(&core.engines, &req) else {
                tracing::debug!(gate = %core.name, "no identifier found in request");
                let res = emitter::no_identifier_response();
                return Ok(req.into_response(res).map_into_right_body());
            };
            let engines = &core.engines[index];

            match gate::evaluate(engines, &identifier).await {
                Verdict::Deny {
                    reason,
                    status,
                    body,
                    rate,
                    quota,
                } => {
                    tracing::warn!(
                        gate = %core.name,
                        rule = %engines.rule.key(),
                        identifier = %identifier,
                        reason = reason.text(),
                        "request blocked"
                    );
                    let res =
                        emitter::deny_response(reason, status, &body, rate.as_ref(), quota.as_ref());
                    Ok(req.into_response(res).map_into_right_body())
                }
                Verdict::Pass { rate, quota } => {
                    tracing::debug!(
                        gate = %core.name,
                        rule = %engines.rule.key(),
                        identifier = %identifier,
                        "request allowed"
                    );
                    // Armed here so a request dropped before dispatch is
                    // never billed; dropped after the handler, it is.
                    let charge = engines
                        .quota
                        .is_enabled()
                        .then(|| QuotaCharge::new(engines.quota.clone(), identifier.clone()));

                    let mut res = service.call(req).await?;
                    emitter::apply_limit_headers(res.headers_mut(), rate.as_ref(), quota.as_ref());

                    // Quota counts served requests; the unit lands after the
                    // handler has returned.
                    drop(charge);
                    Ok(res.map_into_left_body())
                }
            }
        })
    }
}
