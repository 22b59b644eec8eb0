//! ebookstore-api
//!
//! Backend for a digital bookstore. The interesting parts are the order
//! pricing and coupon engine (`services::pricing`, `services::coupons`),
//! the payment-intent orchestration (`services::checkout`), the
//! webhook-confirmed fulfillment that mints download links
//! (`services::fulfillment`), and the download-link issuer
//! (`services::downloads`). Everything else is transport and wiring.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod auth;
pub mod cache;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod migrator;
pub mod notifications;
pub mod openapi;
pub mod services;

use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub use handlers::AppServices;

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<db::DbPool>,
    pub config: config::AppConfig,
    pub event_sender: events::EventSender,
    pub services: AppServices,
}

/// Assemble the HTTP router.
pub fn app_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health))
        .nest("/api/v1/checkout", handlers::checkout::checkout_routes())
        .nest("/api/v1/coupons", handlers::coupons::coupon_routes())
        .nest("/api/v1/payments", handlers::webhooks::webhook_routes())
        .nest("/api/v1/downloads", handlers::downloads::download_routes())
        .merge(
            SwaggerUi::new("/docs").url("/api-docs/openapi.json", openapi::ApiDoc::openapi()),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
