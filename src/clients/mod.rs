pub mod circuit_breaker;
pub mod database;
pub mod dead_letter;
pub mod health;
pub mod notifier;
pub mod queue;
pub mod rbmq;
pub mod redis;
pub mod topic;
