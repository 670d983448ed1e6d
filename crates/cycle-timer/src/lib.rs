#![doc = "Elapsed-cycle timing with a portable fallback."]

pub mod affinity;
pub mod calibration;
pub mod counter;
pub mod timer;

pub use affinity::*;
pub use calibration::*;
pub use counter::*;
pub use timer::*;
