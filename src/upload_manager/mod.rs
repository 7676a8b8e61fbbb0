pub mod batcher;
pub mod core;
pub mod executor;

pub use batcher::{authorize_in_batches, run_in_batches, AuthorizationOutcome};
pub use core::UploadManager;
pub use executor::UploadExecutor;
