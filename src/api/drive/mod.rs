pub mod client;
pub mod download;
pub mod endpoints;
pub mod models;
pub mod upload;

pub use client::DriveApi;
pub use download::{sanitize_file_name, HttpDownloadTransport};
pub use endpoints::{
    CompletionReporter, DownloadTransport, DownloadUrlResolver, UploadAuthorizer, UploadTransport,
};
pub use models::{
    AuthorizationRequest, DownloadTarget, DownloadTask, ProgressCallback, TaskOutcome, TaskResult,
    TransferProgress, UploadAuthorization, UploadSource, UploadTask,
};
pub use upload::HttpUploadTransport;
