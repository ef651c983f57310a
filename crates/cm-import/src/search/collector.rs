use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::locator::PageLocator;
use super::page_index::PageRange;
use crate::Result;
use crate::gateway::{JobGateway, JobPage, PageRequest};

/// Fetch page `index` with summary and files expanded.
pub(crate) async fn fetch_expanded<G: JobGateway + ?Sized>(
    gateway: &G,
    index: usize,
    page_size: usize,
) -> Result<Option<JobPage>> {
    Ok(gateway
        .fetch_page(PageRequest::expanded(index, page_size))
        .await?
        .into_page()?
        .map(|page| JobPage { index, ..page }))
}

/// Collect the expanded pages overlapping `[date_start, date_end]`.
///
/// A missing bound is unbounded on that side. Pages come back in ascending
/// index order, page 0 being the newest one.
pub async fn collect_pages<G: JobGateway + ?Sized>(
    gateway: &G,
    date_start: Option<DateTime<Utc>>,
    date_end: Option<DateTime<Utc>>,
    page_size: usize,
) -> Result<Vec<JobPage>> {
    let page_size = page_size.max(1);

    let Some(first_page) = fetch_expanded(gateway, 0, page_size).await? else {
        debug!("First page is empty, no jobs on the system");
        return Ok(Vec::new());
    };

    let total_jobs = usize::try_from(first_page.total_count).unwrap_or(usize::MAX);
    if total_jobs == 0 {
        return Ok(Vec::new());
    }
    if total_jobs <= page_size {
        return Ok(vec![first_page]);
    }

    let total_pages = total_jobs.div_ceil(page_size);
    debug!(total_jobs, page_size, total_pages, "Collecting job pages");

    let Some(first_range) = PageRange::of_page(&first_page) else {
        warn!("Could not determine the date range of the first page");
        return Ok(vec![first_page]);
    };

    let mut locator = PageLocator::new(gateway, page_size, total_pages);
    locator.remember(0, first_range);

    let (located, boundary) = match date_start {
        Some(start) if start < first_range.start => locator.locate(start).await?,
        Some(_) => (None, 0),
        None => (None, total_pages - 1),
    };
    debug!(boundary, "End boundary page");

    let mut first_page = Some(first_page);
    let boundary_page = match located {
        Some(page) => Some(page),
        None if boundary == 0 => first_page.take(),
        None => fetch_expanded(gateway, boundary, page_size).await?,
    };

    let mut pages = Vec::new();
    pages.extend(boundary_page);

    for index in (0..boundary).rev() {
        let page = if index == 0 {
            first_page.take()
        } else {
            fetch_expanded(gateway, index, page_size).await?
        };
        let Some(page) = page else {
            debug!(page = index, "Skipping empty page");
            continue;
        };

        let Some(end) = date_end else {
            pages.push(page);
            continue;
        };

        match PageRange::of_page(&page) {
            Some(range) => {
                debug!(page = index, start = %range.start, end = %range.end, "Page dates");
                if end < range.start {
                    break;
                }
                pages.push(page);
                if end < range.end {
                    break;
                }
            }
            None => pages.push(page),
        }
    }

    pages.reverse();
    Ok(pages)
}
