pub mod capture_provider;
pub mod encryptor;
pub mod object_store;
pub mod pipeline_delegate;
