// Application layer - Plot buffering and view use cases
pub mod chart_view_service;
pub mod clock;
pub mod plot_buffer;
pub mod station_provider;
pub mod station_service;
