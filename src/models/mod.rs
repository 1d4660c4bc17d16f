pub mod circuit_breaker;
pub mod complaint;
pub mod envelope;
pub mod event;
pub mod health;
pub mod message;
pub mod outcome;
pub mod response;
pub mod retry;
pub mod status;
