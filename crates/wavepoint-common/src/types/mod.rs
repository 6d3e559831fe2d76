//! Records shared with the device agent

pub mod device;
pub mod momentary;
pub mod segment;
pub mod wave;

pub use device::*;
pub use momentary::*;
pub use segment::*;
pub use wave::*;
