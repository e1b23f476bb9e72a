pub mod cache;
pub mod download;
pub mod error;
pub mod events;
pub mod extract;
pub mod feed;
mod fsutil;
pub mod pipeline;
pub mod preserve;
pub mod version;
pub mod worker;

pub use cache::{CacheEntry, CacheManager};
pub use error::{BackendFailure, ErrorKind, UpdateError};
pub use events::{Observer, Outcome, Silent, Stage, UpdateEvent};
pub use feed::ReleaseInfo;
pub use pipeline::UpdatePipeline;
