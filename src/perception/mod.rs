pub mod omniparser;
pub mod pipeline;
pub mod screenshot;
pub mod traits;
pub mod types;
