//! HTTP API layer: the dynamic endpoint router and the management REST API.

pub mod endpoints;
pub mod workflows;

pub use endpoints::{create_endpoint_routes, EndpointState};
pub use workflows::{create_management_routes, AppState};
