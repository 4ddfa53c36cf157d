pub mod dom;
pub mod driver;
pub mod engine;
pub mod errors;
pub mod session;
pub mod task;
pub mod testing;
pub mod types;

pub use driver::{Driver, DriverState};
#[cfg(feature = "chrome")]
pub use engine::ChromeEngine;
pub use engine::Engine;
pub use errors::{DriverError, Result};
pub use session::Session;
pub use task::{ExtractTarget, Step, Task, TaskOutput};
pub use types::*;
