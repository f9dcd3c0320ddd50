pub mod backup;
pub mod health;
pub mod metrics;
pub mod restore;
pub mod scheduler;
