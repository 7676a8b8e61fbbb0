mod claims;
pub mod core;
pub mod storage;

pub use core::DownloadManager;
pub use storage::{FsLocalStorage, LocalStorage};
