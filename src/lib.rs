//! Minimal upload gateway: one HTML page, one multipart endpoint, objects
//! streamed into a bucket under random names.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
