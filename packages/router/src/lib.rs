// ABOUTME: Request router for Corral applications
// ABOUTME: Resolves components, leases sandboxes, dispatches execution and always releases

pub mod dispatch;
pub mod router;

pub use dispatch::{DispatchError, HttpDispatcher, SandboxDispatcher, EXECUTE_ROUTE};
pub use router::{
    RequestRouter, RouterOptions, DEFAULT_COMPONENT_NAME, DISPATCH_DURATION_METRIC,
    REQUESTS_METRIC,
};
