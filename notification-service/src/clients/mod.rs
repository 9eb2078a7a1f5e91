pub mod circuit_breaker;
pub mod database;
pub mod dependency;
pub mod email;
pub mod health;
pub mod memory;
pub mod rbmq;
