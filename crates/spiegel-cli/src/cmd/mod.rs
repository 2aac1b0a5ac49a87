pub mod completions;
pub mod mirror;
pub mod validate;
