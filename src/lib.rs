//! Content-addressed backups with a best-effort restore engine.
//!
//! A backup turns a directory into a graph of objects: trees for
//! directories, inodes for regular files and blobs for file content. Trees
//! and inodes are also kept in a [`cache::LocalCache`] so that a restore
//! only needs to fetch blobs from the [`datastore::Datastore`].

pub mod cache;
pub mod command;
pub mod compress;
pub mod config;
pub mod crypto;
pub mod datastore;
pub mod error;
pub mod object;
pub mod platform;
pub mod reader;
pub mod repository;
pub mod storage;

pub use error::{Error, Result};
