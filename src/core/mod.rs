pub mod clock;
pub mod error;
pub mod ids;
pub mod money;
pub mod principal;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{AppError, ErrorBody, Result};
pub use principal::{Principal, Role};
