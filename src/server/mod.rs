//! # HTTP Server Module
//!
//! This module exposes the emotion classifier over HTTP. The `routes`
//! submodule defines the `/analyze` and `/health` handlers, the JSON
//! validation layer and the function that binds and runs the actix server.

pub mod routes;
