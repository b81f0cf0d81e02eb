mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use common::{capture_logs, instant_retry, registry, tracking_retry, ServiceError};
use metered_retry::metrics::key::{CLASS_TAG, EXCEPTION_TAG, METHOD_TAG, NAME_TAG, RETRY_TAG};
use metered_retry::{
    CallSite, InstantSleeper, LogListener, MeterId, MeteredRetry, RetryConfig, RetryError,
    ThreadSleeper, TrackingSleeper, NO_ERROR,
};

#[test]
fn always_failing_call_exhausts_every_attempt() {
    let registry = registry();
    let retry = instant_retry(&registry, "svc", 3);
    let site = CallSite::method("Inventory", "reserve");
    let calls = AtomicUsize::new(0);

    let err = retry
        .execute(&site, || {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(ServiceError::Timeout)
        })
        .unwrap_err();

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(matches!(err, RetryError::Exhausted { attempts: 3, source: ServiceError::Timeout }));

    let failures = registry
        .exactly_one_counter(
            "svc_failures",
            &[(NAME_TAG, "Inventory.reserve"), (EXCEPTION_TAG, "Timeout")],
        )
        .unwrap();
    assert_eq!(failures.count(), 1);

    let sequence = registry.exactly_one_timer("svc_retry", &[]).unwrap();
    assert_eq!(sequence.count(), 1);
    assert_eq!(sequence.id().tag(EXCEPTION_TAG), Some("Timeout"));

    let attempts = registry
        .exactly_one_timer(
            "svc",
            &[(CLASS_TAG, "Inventory"), (METHOD_TAG, "reserve"), (EXCEPTION_TAG, "Timeout")],
        )
        .unwrap();
    assert_eq!(attempts.count(), 3);
    assert!(registry.find_timers("svc", &[(EXCEPTION_TAG, NO_ERROR)]).is_empty());

    for retry_index in ["0", "1"] {
        let retries = registry
            .exactly_one_counter("svc_retries", &[(RETRY_TAG, retry_index)])
            .unwrap();
        assert_eq!(retries.count(), 1, "retry index {retry_index}");
    }
    assert!(registry.find_counters("svc_retries", &[(RETRY_TAG, "2")]).is_empty());
}

#[test]
fn fail_once_then_succeed() {
    let registry = registry();
    let retry = instant_retry(&registry, "svc", 3);
    let site = CallSite::new("lookup");
    let mut calls = 0;

    let value = retry
        .execute(&site, || {
            calls += 1;
            if calls == 1 {
                Err(ServiceError::Unavailable)
            } else {
                Ok("found")
            }
        })
        .unwrap();

    assert_eq!(value, "found");
    assert_eq!(calls, 2);

    let first = registry
        .exactly_one_counter("svc_retries", &[(RETRY_TAG, "0"), (EXCEPTION_TAG, "Unavailable")])
        .unwrap();
    assert_eq!(first.count(), 1);
    let closing = registry
        .exactly_one_counter("svc_retries", &[(RETRY_TAG, "1"), (EXCEPTION_TAG, NO_ERROR)])
        .unwrap();
    assert_eq!(closing.count(), 1);
    assert_eq!(registry.find_counters("svc_retries", &[]).len(), 2);
    assert!(registry.find_counters("svc_failures", &[]).is_empty());

    let failed = registry.exactly_one_timer("svc", &[(EXCEPTION_TAG, "Unavailable")]).unwrap();
    let succeeded = registry.exactly_one_timer("svc", &[(EXCEPTION_TAG, NO_ERROR)]).unwrap();
    assert_eq!((failed.count(), succeeded.count()), (1, 1));

    let sequence = registry.exactly_one_timer("svc_retry", &[(EXCEPTION_TAG, NO_ERROR)]).unwrap();
    assert_eq!(sequence.count(), 1);
}

#[test]
fn first_attempt_success_records_timers_only() {
    let registry = registry();
    let retry = instant_retry(&registry, "svc", 3);

    let value = retry.execute(&CallSite::new("ping"), || Ok::<_, ServiceError>(1)).unwrap();

    assert_eq!(value, 1);
    assert_eq!(registry.exactly_one_timer("svc", &[]).unwrap().count(), 1);
    assert_eq!(registry.exactly_one_timer("svc_retry", &[]).unwrap().count(), 1);
    assert!(registry.find_counters("svc_retries", &[]).is_empty());
    assert!(registry.find_counters("svc_failures", &[]).is_empty());
    assert_eq!(registry.len(), 2);
}

#[test]
fn backoff_delay_is_at_least_the_base_interval() {
    let registry = registry();
    let sleeper = TrackingSleeper::new();
    let config = RetryConfig::new("svc")
        .with_max_attempts(4)
        .with_initial_backoff(Duration::from_millis(100));
    let retry = tracking_retry(&registry, config, &sleeper);

    let _ = retry.execute(&CallSite::new("op"), || Err::<(), _>(ServiceError::Timeout));

    let delays = sleeper.calls();
    assert_eq!(delays.len(), 3, "no sleep after the final attempt");
    assert!(delays[0] >= Duration::from_millis(100));
    assert!(delays[1] >= Duration::from_millis(200));
    assert!(delays[2] >= Duration::from_millis(400));
}

#[test]
fn real_sleep_separates_attempts() {
    let registry = registry();
    let retry = MeteredRetry::<ServiceError>::builder(registry.clone())
        .config(
            RetryConfig::new("svc")
                .with_max_attempts(2)
                .with_initial_backoff(Duration::from_millis(20)),
        )
        .with_sleeper(ThreadSleeper)
        .build()
        .unwrap();
    let mut starts = Vec::new();

    let _ = retry.execute(&CallSite::new("op"), || {
        starts.push(Instant::now());
        if starts.len() == 1 {
            Err(ServiceError::Timeout)
        } else {
            Ok(())
        }
    });

    assert_eq!(starts.len(), 2);
    assert!(starts[1].duration_since(starts[0]) >= Duration::from_millis(20));
}

#[test]
fn sequence_duration_covers_resolving_attempt() {
    let registry = registry();
    let retry = instant_retry(&registry, "svc", 3);
    let mut calls = 0;

    retry
        .execute(&CallSite::new("op"), || {
            calls += 1;
            thread::sleep(Duration::from_millis(5));
            if calls < 2 {
                Err(ServiceError::Timeout)
            } else {
                Ok(())
            }
        })
        .unwrap();

    let resolving = registry.exactly_one_timer("svc", &[(EXCEPTION_TAG, NO_ERROR)]).unwrap();
    let sequence = registry.exactly_one_timer("svc_retry", &[]).unwrap();
    assert!(resolving.total() >= Duration::from_millis(5));
    assert!(sequence.total() >= resolving.total());

    let all_attempts: Duration = registry.find_timers("svc", &[]).iter().map(|t| t.total()).sum();
    assert!(sequence.total() >= all_attempts);
}

#[test]
fn recoverer_result_is_returned_and_failure_still_counted() {
    let registry = registry();
    let retry = instant_retry(&registry, "svc", 2);
    let site = CallSite::method("PriceClient", "quote");
    let fallback = |sku: &String, error: ServiceError| -> Result<String, ServiceError> {
        assert_eq!(error, ServiceError::Unavailable);
        Ok(format!("cached price for {sku}"))
    };

    let quote = retry
        .execute_with_recoverer(
            &site,
            "sku-42".to_string(),
            |_| Err(ServiceError::Unavailable),
            &fallback,
        )
        .unwrap();

    assert_eq!(quote, "cached price for sku-42");
    let failures = registry.exactly_one_counter("svc_failures", &[]).unwrap();
    assert_eq!(failures.count(), 1);
    let sequence = registry.exactly_one_timer("svc_retry", &[]).unwrap();
    assert_eq!(sequence.id().tag(EXCEPTION_TAG), Some(NO_ERROR));
}

#[test]
fn failing_recoverer_surfaces_its_error() {
    let registry = registry();
    let retry = instant_retry(&registry, "svc", 2);

    let err = retry
        .execute_with_recoverer(
            &CallSite::new("op"),
            (),
            |_| Err::<(), _>(ServiceError::Unavailable),
            &|_: &(), _: ServiceError| Err(ServiceError::Timeout),
        )
        .unwrap_err();

    assert!(matches!(err, RetryError::Recovery { attempts: 2, source: ServiceError::Timeout }));
    let sequence = registry.exactly_one_timer("svc_retry", &[]).unwrap();
    assert_eq!(sequence.id().tag(EXCEPTION_TAG), Some("Timeout"));
}

#[test]
fn counters_are_separated_by_class_and_method() {
    let registry = registry();
    let retry = instant_retry(&registry, "svc", 2);
    let list = CallSite::method("GithubApi", "list").with_name("github");
    let get = CallSite::method("GithubApi", "get").with_name("github");

    for site in [&list, &get] {
        let _ = retry.execute(site, || Err::<(), _>(ServiceError::Timeout));
    }

    let retries = registry.find_counters(
        "svc_retries",
        &[(NAME_TAG, "github"), (RETRY_TAG, "0"), (EXCEPTION_TAG, "Timeout")],
    );
    assert_eq!(retries.len(), 2);
    assert!(retries.iter().all(|c| c.count() == 1));
    assert_eq!(registry.find_counters("svc_failures", &[(NAME_TAG, "github")]).len(), 2);
}

#[test]
fn monitoring_failure_is_invisible_to_the_caller() {
    let registry = registry();
    registry.counter(MeterId::new("svc")).unwrap();
    let retry = instant_retry(&registry, "svc", 3);

    let logs = capture_logs(|| {
        let value = retry.execute(&CallSite::new("op"), || Ok::<_, ServiceError>("value"));
        assert_eq!(value.unwrap(), "value");
    });

    assert!(registry.find_timers("svc", &[]).is_empty());
    assert_eq!(registry.exactly_one_timer("svc_retry", &[]).unwrap().count(), 1);
    assert!(logs.contains("failed to record timer"), "logs: {logs}");
    assert!(logs.contains("metered_retry::metrics"), "logs: {logs}");
}

#[test]
fn lifecycle_is_logged() {
    let registry = registry();
    let retry = instant_retry(&registry, "svc", 2);

    let logs = capture_logs(|| {
        let _ = retry.execute(&CallSite::new("op"), || Err::<(), _>(ServiceError::Timeout));
    });

    assert!(logs.contains("attempt failed; retrying"), "logs: {logs}");
    assert!(logs.contains("retry attempts exhausted"), "logs: {logs}");
    assert!(logs.contains("error_kind=Timeout"), "logs: {logs}");
    assert!(logs.contains("elapsed_ms="), "logs: {logs}");
}

#[test]
fn log_listener_writes_every_lifecycle_event() {
    let registry = registry();
    let retry = MeteredRetry::<ServiceError>::builder(registry.clone())
        .config(RetryConfig::new("svc").with_max_attempts(2))
        .with_sleeper(InstantSleeper)
        .with_listener(LogListener)
        .build()
        .unwrap();
    let site = CallSite::method("Ledger", "post");

    let logs = capture_logs(|| {
        let _ = retry.execute(&site, || Err::<(), _>(ServiceError::Unavailable));
        retry.execute(&site, || Ok::<_, ServiceError>(())).unwrap();
    });

    let events: Vec<&str> = logs.lines().filter(|line| line.contains("retry_event")).collect();
    assert_eq!(events.len(), 3, "logs: {logs}");
    assert!(events[0].contains("Retry::Retrying(Ledger.post (Ledger::post), failures=1"));
    assert!(events[0].contains("error=service unavailable"), "{}", events[0]);
    assert!(events[1].contains("Retry::Exhausted(Ledger.post (Ledger::post), failures=2)"));
    assert!(events[2].contains("Retry::Succeeded(Ledger.post (Ledger::post), failures=0)"));
}

#[test]
fn timers_publish_configured_percentiles() {
    let registry = registry();
    let retry = MeteredRetry::<ServiceError>::builder(registry.clone())
        .config(RetryConfig::new("svc").with_percentiles(vec![0.5, 0.99]))
        .build()
        .unwrap();

    for _ in 0..10 {
        retry
            .execute(&CallSite::new("op"), || {
                thread::sleep(Duration::from_millis(2));
                Ok::<_, ServiceError>(())
            })
            .unwrap();
    }

    let snapshot = registry.exactly_one_timer("svc", &[]).unwrap().snapshot();
    assert_eq!(snapshot.count, 10);
    let quantiles: Vec<f64> = snapshot.percentiles.iter().map(|p| p.quantile).collect();
    assert_eq!(quantiles, vec![0.5, 0.99]);

    // Histogram buckets hold 3 significant figures.
    let ceiling = snapshot.max + snapshot.max / 500;
    for percentile in &snapshot.percentiles {
        assert!(percentile.value >= Duration::from_micros(1_990), "{percentile:?}");
        assert!(percentile.value <= ceiling, "{percentile:?} above max {:?}", snapshot.max);
    }
    assert!(snapshot.percentiles[0].value <= snapshot.percentiles[1].value);
}
