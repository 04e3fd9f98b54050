pub mod endpoint;
pub mod target;

pub use endpoint::{Arena, Endpoint, EndpointId};
pub use target::Target;
