pub mod retry;
pub mod uploader;
