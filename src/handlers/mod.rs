pub mod health_handlers;
pub mod log_handlers;
