mod common;

use chrono::Duration;
use cm_import::search::{PageLocator, collect_pages};
use cm_import::{Error, JobSearch, SearchCriteria};
use common::{FakeGateway, newest};

const PAGE_SIZE: usize = 200;

fn ids(jobs: &[cm_import::ImportJob]) -> Vec<usize> {
    jobs.iter().map(|job| job.id.parse().unwrap()).collect()
}

fn sorted_ids(jobs: &[cm_import::ImportJob]) -> Vec<usize> {
    let mut ids = ids(jobs);
    ids.sort_unstable();
    ids
}

#[tokio::test]
async fn locator_finds_the_page_holding_a_date() {
    let gateway = FakeGateway::with_jobs(1000);
    let mut locator = PageLocator::new(&gateway, PAGE_SIZE, 5);

    let (page, index) = locator.locate(gateway.created(650)).await.unwrap();
    let page = page.expect("page 3 holds job 650");
    assert_eq!(index, 3);
    assert_eq!(page.index, 3);
    assert_eq!(page.jobs.first().unwrap().id, "600");
    assert_eq!(page.jobs.last().unwrap().id, "799");

    // bisection reads are unexpanded, only the hit is fetched expanded
    assert_eq!(gateway.fetch_count(3, true), 1);
    assert!(gateway.requests().iter().filter(|r| r.expand).count() == 1);
}

#[tokio::test]
async fn locator_reads_each_page_once() {
    let gateway = FakeGateway::with_jobs(1000);
    let mut locator = PageLocator::new(&gateway, PAGE_SIZE, 5);

    locator.locate(gateway.created(999)).await.unwrap();
    locator.locate(gateway.created(950)).await.unwrap();

    for index in 0..5 {
        assert!(gateway.fetch_count(index, false) <= 1, "page {index} read twice");
    }
}

#[tokio::test]
async fn date_in_a_gap_returns_a_neighbour_index() {
    // pages of 2: [0,1] [2,3] [4,5]; a 10 day hole between job 3 and job 4
    let base = newest();
    let times = vec![
        base,
        base - Duration::hours(1),
        base - Duration::hours(2),
        base - Duration::hours(3),
        base - Duration::days(10),
        base - Duration::days(10) - Duration::hours(1),
    ];
    let gateway = FakeGateway::with_times(times);
    let mut locator = PageLocator::new(&gateway, 2, 3);

    let (page, index) = locator.locate(base - Duration::days(5)).await.unwrap();
    assert!(page.is_none());
    assert!(index == 1 || index == 2, "unexpected boundary {index}");
}

#[tokio::test]
async fn collects_pages_between_two_dates_in_page_order() {
    let gateway = FakeGateway::with_jobs(1000);

    let pages = collect_pages(
        &gateway,
        Some(gateway.created(700)),
        Some(gateway.created(300)),
        PAGE_SIZE,
    )
    .await
    .unwrap();

    let indexes: Vec<_> = pages.iter().map(|p| p.index).collect();
    assert_eq!(indexes, [1, 2, 3]);
    assert_eq!(gateway.fetch_count(0, true), 1);
    for index in 1..=3 {
        assert_eq!(gateway.fetch_count(index, true), 1, "page {index}");
    }
    assert_eq!(gateway.fetch_count(4, true), 0);
}

#[tokio::test]
async fn find_jobs_returns_exactly_the_interval() {
    let gateway = FakeGateway::with_jobs(1000);
    let criteria = SearchCriteria::between(gateway.created(700), gateway.created(300));

    let jobs = JobSearch::new(&gateway).find_jobs(&criteria).await.unwrap();
    // order across pages follows the server and is not part of the contract
    assert_eq!(sorted_ids(&jobs), (300..=700).collect::<Vec<_>>());
}

#[tokio::test]
async fn interval_inside_the_newest_page_reuses_it() {
    let gateway = FakeGateway::with_jobs(1000);
    let criteria = SearchCriteria::between(gateway.created(150), gateway.created(10));

    let jobs = JobSearch::new(&gateway).find_jobs(&criteria).await.unwrap();
    assert_eq!(ids(&jobs), (10..=150).collect::<Vec<_>>());
    assert_eq!(gateway.requests().len(), 1);
}

#[tokio::test]
async fn open_start_walks_back_to_the_oldest_page() {
    let gateway = FakeGateway::with_jobs(1000);
    let criteria = SearchCriteria {
        created_end: Some(gateway.created(900)),
        ..Default::default()
    };

    let jobs = JobSearch::new(&gateway).find_jobs(&criteria).await.unwrap();
    assert_eq!(sorted_ids(&jobs), (900..1000).collect::<Vec<_>>());
}

#[tokio::test]
async fn interval_older_than_every_job_is_empty() {
    let gateway = FakeGateway::with_jobs(1000);
    let oldest = gateway.created(999);
    let criteria = SearchCriteria::between(oldest - Duration::days(30), oldest - Duration::days(1));

    let jobs = JobSearch::new(&gateway).find_jobs(&criteria).await.unwrap();
    assert!(jobs.is_empty());
}

#[tokio::test]
async fn interval_newer_than_every_job_is_empty() {
    let gateway = FakeGateway::with_jobs(1000);
    let criteria = SearchCriteria::between(newest() + Duration::days(1), newest() + Duration::days(2));

    let jobs = JobSearch::new(&gateway).find_jobs(&criteria).await.unwrap();
    assert!(jobs.is_empty());
    assert_eq!(gateway.requests().len(), 1);
}

#[tokio::test]
async fn start_in_a_gap_keeps_every_newer_job() {
    let base = newest();
    let times = vec![
        base,
        base - Duration::hours(1),
        base - Duration::hours(2),
        base - Duration::hours(3),
        base - Duration::days(10),
        base - Duration::days(10) - Duration::hours(1),
    ];
    let gateway = FakeGateway::with_times(times);
    let criteria = SearchCriteria::between(base - Duration::days(5), base).with_page_size(2);

    let jobs = JobSearch::new(&gateway).find_jobs(&criteria).await.unwrap();
    assert_eq!(sorted_ids(&jobs), [0, 1, 2, 3]);
}

#[tokio::test]
async fn filters_only_narrow_the_result() {
    let gateway = FakeGateway::with_jobs(1000);
    let search = JobSearch::new(&gateway);
    let dates = SearchCriteria::between(gateway.created(700), gateway.created(300));

    let all = ids(&search.find_jobs(&dates).await.unwrap());
    let by_user = ids(&search.find_jobs(&dates.clone().with_user("user1")).await.unwrap());
    let by_both = ids(
        &search
            .find_jobs(&dates.clone().with_user("user1").with_name("JOB-4"))
            .await
            .unwrap(),
    );

    assert!(by_user.iter().all(|id| all.contains(id)));
    assert!(by_both.iter().all(|id| by_user.contains(id)));
    assert!(by_user.iter().all(|id| id % 3 == 1));
    assert!(!by_both.is_empty());
    assert!(by_both.iter().all(|id| id.to_string().starts_with('4')));
}

#[tokio::test]
async fn empty_system_has_no_jobs() {
    let gateway = FakeGateway::with_jobs(0);
    let criteria = SearchCriteria::between(newest() - Duration::days(1), newest());

    let jobs = JobSearch::new(&gateway).find_jobs(&criteria).await.unwrap();
    assert!(jobs.is_empty());
    assert_eq!(gateway.requests().len(), 1);
}

#[tokio::test]
async fn unavailable_service_fails_the_search() {
    let gateway = FakeGateway::unavailable();
    let criteria = SearchCriteria::between(newest() - Duration::days(1), newest());

    let err = JobSearch::new(&gateway).find_jobs(&criteria).await.unwrap_err();
    assert!(matches!(err, Error::ServiceUnavailable));
}
