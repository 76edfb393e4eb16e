// Method Registry and Instance Registry.

mod instance;
mod method;

pub use instance::{InstanceRegistry, LocalInstance, RemoteProxy};
pub use method::{Handler, HandlerOutcome, MethodRegistry};
