pub mod auth;
pub mod drive;
pub mod service;

pub use service::PhotoBackupService;
