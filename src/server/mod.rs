//! HTTP server layer.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         HTTP Layer                              │
//! │            GET /{*path}?fetch&exponential:1:2:160               │
//! │                                                                 │
//! │  ┌─────────────────────┐          ┌──────────────────────────┐  │
//! │  │      handlers       │          │          routes          │  │
//! │  │ (resolve, errors)   │          │  (router config, CORS)   │  │
//! │  └──────────┬──────────┘          └──────────────────────────┘  │
//! └─────────────┼───────────────────────────────────────────────────┘
//!               ▼
//!          pipeline::Resolver
//! ```

pub mod handlers;
pub mod routes;

pub use handlers::{
    health_handler, master_handler, target_handler, AppState, ErrorResponse, HandlerError,
    HealthResponse,
};
pub use routes::{create_router, CorsPolicy, RouterConfig};
