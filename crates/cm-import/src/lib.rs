//! Client library for the ENM CM Import northbound interface (NBI).
//!
//! The crate is split along the lines of what a console client needs:
//!
//! - [`session`]: authenticated HTTP session towards ENM
//! - [`client`]: CM Import job operations on top of the session
//! - [`job`]: import job, summary and operation records
//! - [`search`]: date-range job search over the paged job collection
//! - [`cleanup`]: persistent registry and worker deleting uploaded import files
//! - [`undo`]: undo jobs generated from previous imports

pub mod cleanup;
pub mod client;
pub mod error;
pub mod gateway;
pub mod job;
pub mod search;
pub mod session;
pub mod timestamp;
pub mod undo;

pub use client::{CmImportClient, JobQuery, NewJob};
pub use error::{Error, Result};
pub use gateway::{JobGateway, JobPage, PageFetch, PageRequest};
pub use job::{ImportFile, ImportJob, JobSummary};
pub use search::{JobSearch, SearchCriteria};
pub use session::{NbiSession, SessionConfig};
pub use timestamp::parse_timestamp;
