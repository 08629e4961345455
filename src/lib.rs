// Weather station plot backend - buffers station series per chart view
pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod presentation;
