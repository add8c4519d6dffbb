pub mod controller;
pub mod export;
pub mod filter;
pub mod query;
pub mod session;
pub mod status;

pub use controller::{ControllerConfig, ListController, ListSnapshot, Page, Phase};
pub use filter::FilterStrategy;
pub use query::{DateRange, QueryState};
pub use session::{FetchSession, SessionDone};
pub use status::StatusMonitor;
