/* src/lib.rs */

//! Edge API gateway: bearer-token verification, keyed rate limiting,
//! path routing, and circuit-breaking dispatch to named backends.

pub mod auth;
pub mod breaker;
pub mod clock;
pub mod config;
pub mod error;
pub mod middleware;
pub mod models;
pub mod proxy;
pub mod ratelimit;
pub mod routing;
pub mod server;
pub mod setup;
pub mod state;
