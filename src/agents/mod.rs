pub mod error_handling;
pub mod planning;
pub mod prompts;
pub mod reflection;
