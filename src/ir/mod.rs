pub mod build;
pub mod types;

pub use build::{lower_body, lower_program};
pub use types::*;
