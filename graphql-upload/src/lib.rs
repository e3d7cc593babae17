//! Middleware rewriting GraphQL multipart requests into plain JSON GraphQL requests.
//!
//! Requests following the multipart request convention carry an `operations` field, a `map`
//! field and one part per uploaded file. [`FileUploadsLayer`] stores the files on disk, writes
//! their [`Upload`] descriptors and the mapped text fields into the operations, and forwards a
//! regular `application/json` request to the service it wraps.

#![warn(unreachable_pub)]

pub mod body;
mod executable;
mod file_uploads;
pub mod layers;
pub mod services;
pub mod upload;

pub use executable::main;
pub use file_uploads::ArrayIndexing;
pub use file_uploads::FileUploadError;
pub use file_uploads::FileUploadsConfig;
pub use file_uploads::FileUploadsLayer;
pub use file_uploads::MapFieldRaw;
pub use file_uploads::MultipartRequestLimits;
pub use file_uploads::StorageConfig;
pub use file_uploads::UploadedFiles;
pub use file_uploads::is_eligible;
pub use upload::Upload;
