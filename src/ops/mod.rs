pub mod deploy;
pub mod dissect;
pub mod error;
pub mod report;
pub mod resolve;

pub use deploy::{Hooks, NoopHooks};
pub use error::{ManagerError, PickInfo};
pub use report::{PackageData, Report};
pub use resolve::{Manager, Requested};
