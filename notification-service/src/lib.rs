pub mod api;
pub mod clients;
pub mod config;
pub mod consumer;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod models;
pub mod producer;
pub mod service;
pub mod utils;
