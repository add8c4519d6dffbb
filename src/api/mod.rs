pub mod client;
pub mod resource;
pub mod types;

pub use client::{ApiClient, ApiError};
pub use resource::Resource;
