//! Live air-quality reading plus a 30-day model-driven forecast for one city.

pub mod config;
pub mod features;
pub mod forecast;
pub mod live;
pub mod model;
pub mod server;
pub mod summary;
pub mod types;
