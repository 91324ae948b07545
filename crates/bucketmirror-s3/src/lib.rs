#![warn(missing_docs)]

//! bucketmirror S3 integration: the AWS-backed object store, rule table
//! sources and the `bmirror` command line.

pub mod cli;
pub mod config;
pub mod s3;

pub use config::ConfigSource;
pub use s3::{S3BackendConfig, S3Store, S3StoreProvider};
