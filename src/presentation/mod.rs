// Presentation layer - HTTP surface for chart clients
pub mod app_state;
pub mod handlers;
