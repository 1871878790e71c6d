pub mod api;
pub mod app;
pub mod checker;
pub mod classify;
pub mod clock;
pub mod config;
pub mod core;
pub mod domain;
pub mod probe;
pub mod scheduler;
pub mod services;
pub mod store;
pub mod tasks;
