//! Job search over the paged, newest-first job collection.
//!
//! The NBI only offers offset paging, so finding the jobs created in a date
//! interval goes in three steps:
//!
//! - [`PageRange`] gives the creation dates covered by a page
//! - [`PageLocator`] binary searches the page holding the start date
//! - [`collect_pages`] walks from that page towards page 0 until the end date
//!
//! [`JobSearch`] then filters the collected jobs one by one.

mod collector;
mod engine;
mod locator;
mod page_index;

pub use collector::collect_pages;
pub use engine::{DEFAULT_PAGE_SIZE, JobSearch, SearchCriteria};
pub use locator::PageLocator;
pub use page_index::PageRange;
