pub mod app;

pub use app::{EndpointReport, MediationRuntime};
