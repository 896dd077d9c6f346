pub mod error;
pub mod types;

pub use error::{GatewayError, Result};
pub use types::{Instance, InstanceStatus};
