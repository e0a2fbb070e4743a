//! bookdesk - library book issue/return desk.
//!
//! A PostgREST-style query builder over a pluggable SQL transport, the SQL
//! proxy that the dashboard talks to, and the library workflows and data
//! scripts built on both.

pub mod auth;
pub mod backup;
pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod import;
pub mod library;
pub mod logging;
pub mod proxy;
pub mod query;
pub mod safety;
