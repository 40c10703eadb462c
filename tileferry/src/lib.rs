//! Library side of the `tileferry` command line tool.
//!
//! Conversions between containers live in [`tileferry_container`]; this crate adds publishing to a
//! remote object store in [`upload`].

pub mod upload;
