pub mod annotations;
pub mod app;
pub mod cache;
pub mod decimal;
pub mod domain;
pub mod error;
pub mod fetch;
pub mod formatter;
pub mod manifest;
pub mod output;
pub mod rules;
pub mod server;
pub mod store;
