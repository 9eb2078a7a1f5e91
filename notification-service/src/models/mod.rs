pub mod circuit_breaker;
pub mod dependency;
pub mod events;
pub mod health;
pub mod message;
pub mod notification;
pub mod retry;
pub mod status;
pub mod validation;
