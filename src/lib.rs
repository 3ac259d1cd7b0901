pub mod aggregation;
pub mod cache;
pub mod clients;
pub mod config;
pub mod domain;
pub mod errors;
pub mod handlers;
pub mod locations;
pub mod normalize;
pub mod routes;
pub mod services;
pub mod utils;
