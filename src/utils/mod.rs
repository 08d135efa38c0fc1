pub mod allocator;
pub mod logging;
pub mod math;
