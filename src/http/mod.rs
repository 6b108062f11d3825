//! HTTP surface of the prediction service.
//!
//! An Axum router exposing prediction, health, info, reload and retraining
//! endpoints over a shared [`ServiceContext`](crate::context::ServiceContext).

mod routes;

#[cfg(test)]
mod tests;

pub use routes::{
    build_router, run_http_server, HealthResponse, HttpServerError, HttpState, InfoResponse,
    PredictResponse, RetrainAck, RetrainStatusQuery,
};
