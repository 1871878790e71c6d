use std::time::Duration;

use url_checker::{
    checker::CheckTask,
    config::CheckerSettings,
    domain::CheckableUrl,
};

use crate::common::{Harness, NOW, failing_entry, settings, url_field};

mod common;

fn record_ids(tasks: &[CheckTask]) -> Vec<i64> {
    tasks
        .iter()
        .filter(|t| matches!(t, CheckTask::Record { .. }))
        .map(CheckTask::record_id)
        .collect()
}

#[tokio::test]
async fn domain_cap_limits_checks_per_pass() {
    let h = Harness::new(CheckerSettings {
        per_domain_cap: 2,
        ..settings()
    });
    let urls = [
        "https://a.example/1",
        "https://www.a.example/2",
        "https://a.example/3",
        "https://b.example/1",
        "https://b.example/2",
    ];
    for (id, url) in (1..).zip(urls) {
        h.store.insert_record(id, vec![url_field(1, url)]).await;
    }

    let tasks = h.checker.plan_batch(NOW).await.unwrap();

    assert_eq!(record_ids(&tasks), vec![1, 2, 4, 5]);
}

#[tokio::test]
async fn records_are_admitted_whole_or_not_at_all() {
    let h = Harness::new(CheckerSettings {
        per_domain_cap: 2,
        ..settings()
    });
    h.store
        .insert_record(1, vec![url_field(1, "https://a.example/1")])
        .await;
    // a second a.example URL would be fine, but three together exceed the cap
    h.store
        .insert_record(
            2,
            vec![
                url_field(1, "https://a.example/2"),
                url_field(2, "https://a.example/3"),
                url_field(3, "https://c.example/1"),
            ],
        )
        .await;
    h.store
        .insert_record(3, vec![url_field(1, "https://c.example/2")])
        .await;

    let tasks = h.checker.plan_batch(NOW).await.unwrap();

    assert_eq!(record_ids(&tasks), vec![1, 3]);
}

#[tokio::test]
async fn record_with_many_urls_on_one_domain_fits_untouched_domain() {
    let h = Harness::new(CheckerSettings {
        per_domain_cap: 2,
        ..settings()
    });
    h.store
        .insert_record(
            1,
            (1..=5)
                .map(|n| url_field(n, &format!("https://big.example/{n}")))
                .collect(),
        )
        .await;
    h.store
        .insert_record(2, vec![url_field(1, "https://big.example/other")])
        .await;

    let tasks = h.checker.plan_batch(NOW).await.unwrap();

    assert_eq!(record_ids(&tasks), vec![1]);
}

#[tokio::test]
async fn both_record_pools_share_the_batch() {
    let h = Harness::new(CheckerSettings {
        batch_size: 10,
        per_domain_cap: 100,
        ..settings()
    });
    for id in 1..=40 {
        h.store
            .insert_record(id, vec![url_field(1, &format!("https://site{id}.example/"))])
            .await;
    }
    // ten records were checked two days ago, thirty never
    for id in 31..=40 {
        h.store
            .put_record_history(id, NOW - time::Duration::days(2))
            .await;
    }

    let tasks = h.checker.plan_batch(NOW).await.unwrap();
    let ids = record_ids(&tasks);

    assert_eq!(ids.len(), 10);
    let never_checked = ids.iter().filter(|id| **id <= 30).count();
    let due = ids.iter().filter(|id| **id > 30).count();
    assert_eq!((never_checked, due), (8, 2));
    // never-checked records come in ascending id order
    assert_eq!(&ids[..8], &[1, 2, 3, 4, 5, 6, 7, 8]);
}

#[tokio::test]
async fn due_records_oldest_first() {
    let h = Harness::new(CheckerSettings {
        batch_size: 2,
        ..settings()
    });
    for (id, days_ago) in [(1, 2), (2, 9), (3, 5), (4, 0)] {
        h.store
            .insert_record(id, vec![url_field(1, &format!("https://r{id}.example/"))])
            .await;
        h.store
            .put_record_history(id, NOW - time::Duration::days(days_ago))
            .await;
    }

    let tasks = h.checker.plan_batch(NOW).await.unwrap();

    assert_eq!(record_ids(&tasks), vec![2, 3]);
}

#[tokio::test]
async fn failing_urls_are_rechecked_by_severity_interval() {
    let h = Harness::new(CheckerSettings {
        invalidation_threshold: 4,
        valid_recheck_interval_s: 24 * 60 * 60,
        invalid_recheck_interval_s: 7 * 24 * 60 * 60,
        ..settings()
    });
    let fresh_record = NOW - time::Duration::hours(1);
    for id in 1..=4 {
        h.store
            .insert_record(id, vec![url_field(1, &format!("https://u{id}.example/"))])
            .await;
        h.store.put_record_history(id, fresh_record).await;
    }

    let two_days = NOW - time::Duration::days(2);
    let key = |id: i64| CheckableUrl::new(id, 1, format!("https://u{id}.example/"));
    // possibly invalid, past the daily interval
    h.store.put_url_history(failing_entry(key(1), 3, two_days)).await;
    // invalid, not yet past the weekly interval
    h.store.put_url_history(failing_entry(key(2), 4, two_days)).await;
    // invalid, past the weekly interval
    h.store
        .put_url_history(failing_entry(key(3), 7, NOW - time::Duration::days(8)))
        .await;
    // possibly invalid, checked recently
    h.store.put_url_history(failing_entry(key(4), 1, NOW)).await;

    let tasks = h.checker.plan_batch(NOW).await.unwrap();

    assert_eq!(
        tasks,
        vec![CheckTask::Url(key(3)), CheckTask::Url(key(1))]
    );
}

#[tokio::test]
async fn url_of_record_in_batch_is_not_queued_twice() {
    let h = Harness::new(settings());
    let key = CheckableUrl::new(1, 1, "https://a.example/");
    h.store
        .insert_record(1, vec![url_field(1, &key.url)])
        .await;
    h.store
        .put_record_history(1, NOW - time::Duration::days(3))
        .await;
    h.store
        .put_url_history(failing_entry(key.clone(), 1, NOW - time::Duration::days(3)))
        .await;

    let tasks = h.checker.plan_batch(NOW).await.unwrap();

    assert_eq!(tasks, vec![CheckTask::record(1)]);
}

#[tokio::test]
async fn pass_defers_while_checks_are_waiting() {
    let s = settings();
    let (retry, queued, idle) = (s.retry_delay(), s.queued_delay(), s.idle_delay());
    let h = Harness::new(s);
    for id in 1..=3 {
        h.store
            .insert_record(id, vec![url_field(1, &format!("https://p{id}.example/"))])
            .await;
    }

    assert_eq!(h.checker.run_scheduling_pass().await.unwrap(), queued);
    assert_eq!(h.checker.queued(), 3);
    let status = h.checker.status();
    assert_eq!(status.last_batch, 3);
    assert_eq!(status.last_pass, Some(NOW));
    assert_eq!(status.next_pass, Some(NOW + queued));

    // nothing is queued twice while the batch is outstanding
    assert_eq!(h.checker.run_scheduling_pass().await.unwrap(), retry);
    assert_eq!(h.checker.queued(), 3);
    assert_eq!(h.checker.status().last_batch, 0);

    assert_eq!(h.drain().await, 3);
    assert_eq!(h.checker.run_scheduling_pass().await.unwrap(), idle);

    // a day later every record is due again
    h.clock.advance(time::Duration::days(1) + time::Duration::seconds(1));
    assert_eq!(h.checker.run_scheduling_pass().await.unwrap(), queued);
    assert_eq!(h.checker.queued(), 3);
}

#[tokio::test]
async fn empty_store_is_idle() {
    let h = Harness::new(settings());

    let delay = h.checker.run_scheduling_pass().await.unwrap();

    assert_eq!(delay, Duration::from_secs(60 * 60));
    assert_eq!(h.checker.queued(), 0);
}
