use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::debug;

use super::page_index::PageRange;
use crate::Result;
use crate::gateway::{JobGateway, JobPage, PageRequest};

/// Binary search for the page holding a given creation instant.
///
/// Page ranges read during the search are memoised by index; a locator is
/// meant to live for a single search.
pub struct PageLocator<'a, G: ?Sized> {
    gateway: &'a G,
    page_size: usize,
    total_pages: usize,
    ranges: HashMap<usize, PageRange>,
}

impl<'a, G: JobGateway + ?Sized> PageLocator<'a, G> {
    pub fn new(gateway: &'a G, page_size: usize, total_pages: usize) -> Self {
        Self {
            gateway,
            page_size,
            total_pages,
            ranges: HashMap::new(),
        }
    }

    /// Seed the memo with a range the caller already knows.
    pub fn remember(&mut self, index: usize, range: PageRange) {
        self.ranges.insert(index, range);
    }

    /// Range of page `index`, probing it without expansion on first use.
    pub async fn range_of(&mut self, index: usize) -> Result<Option<PageRange>> {
        if let Some(range) = self.ranges.get(&index) {
            return Ok(Some(*range));
        }

        let page = self
            .gateway
            .fetch_page(PageRequest::new(index, self.page_size))
            .await?
            .into_page()?;
        let range = page.as_ref().and_then(PageRange::of_page);
        if let Some(range) = range {
            self.ranges.insert(index, range);
        }
        Ok(range)
    }

    /// Find the page whose range contains `target`.
    ///
    /// Returns the expanded page and its index. When no page contains the
    /// instant (it falls between two pages, or a page came back empty) the
    /// page is `None` and the index is the last page visited, usable as an
    /// approximate position.
    pub async fn locate(&mut self, target: DateTime<Utc>) -> Result<(Option<JobPage>, usize)> {
        debug!(%target, total_pages = self.total_pages, "Searching page for date");
        if self.total_pages == 0 {
            return Ok((None, 0));
        }

        let mut min = 0usize;
        let mut max = self.total_pages - 1;
        let mut mid = 0usize;

        while min <= max {
            mid = min + (max - min) / 2;
            debug!(min, max, mid, "Probing page");

            let Some(range) = self.range_of(mid).await? else {
                debug!(page = mid, "Bisected page is empty, stopping search");
                return Ok((None, mid));
            };

            if target > range.end {
                // newer than this page
                if mid == 0 {
                    break;
                }
                max = mid - 1;
            } else if target < range.start {
                min = mid + 1;
            } else {
                debug!(page = mid, "Date found");
                let page = self
                    .gateway
                    .fetch_page(PageRequest::expanded(mid, self.page_size))
                    .await?
                    .into_page()?
                    .map(|page| JobPage { index: mid, ..page });
                return Ok((page, mid));
            }
        }

        debug!(page = mid, "Date falls between pages");
        Ok((None, mid.min(self.total_pages - 1)))
    }
}
