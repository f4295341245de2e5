pub mod api;
pub mod audit;
pub mod auth;
pub mod config;
pub mod poster;
pub mod scheduler;
