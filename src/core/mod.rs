pub mod object;
pub mod shape;
pub mod types;
