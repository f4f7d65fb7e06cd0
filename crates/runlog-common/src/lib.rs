//! Small, dependency-light helpers used around experiment recording:
//! computer quantities ("4K", "1.5 GB") and a resumable stopwatch.

pub mod quantity;
pub mod timer;

pub use quantity::{ByteSuffix, Quantity, QuantityError, Unit};
pub use timer::{format_duration, Timer};
