mod labels;
mod routes;
mod server;
#[cfg(test)]
mod test_support;

pub mod app;
pub mod config;
pub mod detector;
pub mod ort_detector;
pub mod registry;
pub mod session;
pub mod telemetry;
pub mod tracker;
pub mod translator;

pub use app::start_app;
