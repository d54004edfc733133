//! Loaders: normalized records → typed batches, appended
//! to the OLAP store; dimension upserts against OLTP.

pub mod migrations;
pub mod olap;
pub mod oltp;

pub use olap::OlapLoader;
pub use oltp::OltpLoader;
