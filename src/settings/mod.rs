pub mod download_directory;
pub mod endpoints;
pub mod queue_config;

pub use download_directory::{
    default_download_directory, get_download_directory, set_download_directory,
};
pub use endpoints::EndpointConfig;
pub use queue_config::{
    load_queue_config, save_queue_config, QueueKind, QueueManagerConfig, MAX_BATCH_SIZE,
    MAX_CONCURRENCY, MIN_BATCH_SIZE, MIN_CONCURRENCY,
};
