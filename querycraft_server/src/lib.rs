#![forbid(unsafe_code)]

pub mod auth;
pub mod cli;
pub mod dev_backends;
pub mod error;
pub mod extract;
pub mod middleware;
pub mod routes;
pub mod server;
