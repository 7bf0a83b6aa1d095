pub mod action;
pub mod coordinator;
#[cfg(feature = "desktop")]
pub mod desktop;
pub mod dispatcher;
#[cfg(feature = "desktop")]
pub mod input;
pub mod machine;
pub mod operations;
pub mod remote;
