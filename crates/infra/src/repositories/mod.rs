pub mod support;

pub use support::*;
