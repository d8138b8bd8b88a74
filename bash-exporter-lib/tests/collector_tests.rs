//! Integration tests for scrape orchestration
//!
//! Covers fan-out and joining, failure isolation, blacklist enforcement,
//! result caching through the collector, the concurrency cap and
//! configuration hot-reload against in-flight scrapes.

mod common;

use bash_exporter_lib::{CommandCollector, CommandError, Config, MetricSpec, PostfixMetricSpec};
use bash_exporter_lib::{ExporterMetrics, ResultCache, ShellRunner};
use common::{
    command_errors, family_names, find, harness, label, single_value, value_of, MemoryConfigSource,
};
use prometheus::proto::MetricType;
use std::sync::Arc;
use std::time::Duration;

fn ok(output: &str) -> bash_exporter_lib::CommandResult {
    Ok(output.to_string())
}

fn config(metrics: Vec<MetricSpec>) -> Config {
    metrics
        .into_iter()
        .fold(Config::builder(), |builder, metric| builder.metric(metric))
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_simple_metrics_select_fields() {
    let h = harness(
        config(vec![
            MetricSpec::new("first_field", "First.", "gauge", "echo '10 20'"),
            MetricSpec::new("second_field", "Second.", "counter", "echo '10 20'").field(1),
        ]),
        |r| r.respond("echo '10 20'", ok("10 20")),
    );

    let families = h.collector.collect().await;

    assert_eq!(families.len(), 2);
    let first = find(&families, "first_field").unwrap();
    assert_eq!(single_value(first), 10.0);
    assert_eq!(first.get_field_type(), MetricType::GAUGE);
    let second = find(&families, "second_field").unwrap();
    assert_eq!(single_value(second), 20.0);
    assert_eq!(second.get_field_type(), MetricType::COUNTER);
}

#[tokio::test]
async fn test_multi_row_output_becomes_label_partitioned_family() {
    let h = harness(
        config(vec![MetricSpec::new(
            "sockets_in_use",
            "Sockets in use per protocol.",
            "gauge",
            "sockstat",
        )
        .field(1)
        .label("host", "db1")
        .dynamic_label("protocol", 0)]),
        |r| r.respond("sockstat", ok("TCP 12\nUDP 4\nRAW 0")),
    );

    let families = h.collector.collect().await;
    let family = find(&families, "sockets_in_use").unwrap();
    let metrics = family.get_metric();
    assert_eq!(metrics.len(), 3);
    for metric in metrics {
        assert_eq!(label(metric, "host"), Some("db1"));
    }
    let udp = metrics
        .iter()
        .find(|m| label(m, "protocol") == Some("UDP"))
        .unwrap();
    assert_eq!(value_of(udp), 4.0);
}

#[tokio::test]
async fn test_compound_metric_has_no_cross_contamination() {
    let h = harness(
        config(vec![MetricSpec::new("system", "System.", "gauge", "stats")
            .postfix(
                PostfixMetricSpec::new("cpu", "CPU usage.", "gauge", 2)
                    .line_filter("^CPU")
                    .dynamic_label("name", 1),
            )
            .postfix(
                PostfixMetricSpec::new("mem", "Memory usage.", "gauge", 2)
                    .line_filter("^MEM")
                    .dynamic_label("name", 1),
            )]),
        |r| r.respond("stats", ok("CPU label1 100\nMEM label2 200")),
    );

    let families = h.collector.collect().await;
    assert_eq!(family_names(&families), vec!["system_cpu", "system_mem"]);

    let cpu = &find(&families, "system_cpu").unwrap().get_metric()[0];
    assert_eq!(label(cpu, "name"), Some("label1"));
    assert_eq!(value_of(cpu), 100.0);

    let mem = &find(&families, "system_mem").unwrap().get_metric()[0];
    assert_eq!(label(mem, "name"), Some("label2"));
    assert_eq!(value_of(mem), 200.0);

    assert_eq!(h.runner.calls_for("stats"), 1);
}

#[tokio::test]
async fn test_failing_metric_is_omitted_and_counted() {
    let h = harness(
        config(vec![
            MetricSpec::new("healthy", "Works.", "gauge", "echo 1"),
            MetricSpec::new("broken", "Fails.", "gauge", "false"),
            MetricSpec::new("slow", "Times out.", "gauge", "sleep 60"),
        ]),
        |r| {
            r.respond("echo 1", ok("1"))
                .respond("false", Err(CommandError::execution("exit status: 1", "")))
                .respond(
                    "sleep 60",
                    Err(CommandError::Timeout {
                        timeout: Duration::from_secs(10),
                    }),
                )
        },
    );

    let families = h.collector.collect().await;

    assert_eq!(family_names(&families), vec!["healthy"]);
    assert_eq!(command_errors(&h.metrics, "broken"), 1.0);
    assert_eq!(command_errors(&h.metrics, "slow"), 1.0);
    assert_eq!(command_errors(&h.metrics, "healthy"), 0.0);
    let errors = h
        .metrics
        .gather()
        .into_iter()
        .find(|f| f.get_name() == "bash_exporter_command_errors_total")
        .unwrap();
    assert_eq!(errors.get_metric().len(), 2);
    assert!(errors
        .get_metric()
        .iter()
        .all(|m| label(m, "metric_name") != Some("healthy")));
    assert_eq!(h.metrics.scrapes.get(), 1.0);
    assert_eq!(h.metrics.scrape_duration.get_sample_count(), 1);
}

#[tokio::test]
async fn test_bad_lines_do_not_affect_other_lines_or_metrics() {
    let h = harness(
        config(vec![
            MetricSpec::new("per_line", "Lines.", "gauge", "mixed")
                .field(1)
                .dynamic_label("key", 0),
            MetricSpec::new("other", "Other.", "gauge", "echo 5"),
        ]),
        |r| {
            r.respond("mixed", ok("a 1\nb\nc not_a_number\nd 4"))
                .respond("echo 5", ok("5"))
        },
    );

    let families = h.collector.collect().await;
    let per_line = find(&families, "per_line").unwrap();
    let keys: Vec<&str> = per_line
        .get_metric()
        .iter()
        .filter_map(|m| label(m, "key"))
        .collect();
    assert_eq!(keys, vec!["a", "d"]);
    assert_eq!(single_value(find(&families, "other").unwrap()), 5.0);
}

#[tokio::test]
async fn test_blacklisted_command_never_runs() {
    let cfg = Config::builder()
        .blacklist("rm")
        .metric(MetricSpec::new("danger", "Never runs.", "gauge", "rm -rf /tmp/x"))
        .metric(
            MetricSpec::new("trusted", "Opted out.", "gauge", "rm -f /tmp/y; echo 1")
                .ignore_blacklist(true),
        )
        .build()
        .unwrap();
    let h = harness(cfg, |r| r.respond("rm -f /tmp/y; echo 1", ok("1")));

    let families = h.collector.collect().await;

    assert_eq!(family_names(&families), vec!["trusted"]);
    assert_eq!(h.runner.calls_for("rm -rf /tmp/x"), 0);
    assert!(h
        .cache
        .get(&bash_exporter_lib::cache_key("danger", "rm -rf /tmp/x"))
        .is_none());
    assert_eq!(h.metrics.cache_misses.get(), 1.0);
    assert_eq!(command_errors(&h.metrics, "danger"), 1.0);
}

#[tokio::test]
async fn test_second_scrape_served_from_cache() {
    let h = harness(
        config(vec![MetricSpec::new("cached", "Cached.", "gauge", "echo 7")]),
        |r| r.respond("echo 7", ok("7")),
    );

    h.collector.collect().await;
    h.runner.set_response("echo 7", ok("8"));
    let families = h.collector.collect().await;

    assert_eq!(single_value(find(&families, "cached").unwrap()), 7.0);
    assert_eq!(h.runner.call_count(), 1);
    assert_eq!(h.metrics.cache_misses.get(), 1.0);
    assert_eq!(h.metrics.cache_hits.get(), 1.0);
}

#[tokio::test]
async fn test_cached_failure_is_not_rerun() {
    let h = harness(
        config(vec![MetricSpec::new("flaky", "Fails.", "gauge", "exit 1")]),
        |r| r.respond("exit 1", Err(CommandError::execution("exit status: 1", "nope"))),
    );

    assert!(h.collector.collect().await.is_empty());
    h.runner.set_response("exit 1", ok("1"));
    assert!(h.collector.collect().await.is_empty());

    assert_eq!(h.runner.call_count(), 1);
    assert_eq!(h.metrics.cache_hits.get(), 1.0);
    assert_eq!(command_errors(&h.metrics, "flaky"), 1.0);
}

#[tokio::test]
async fn test_cache_entries_are_per_metric() {
    let h = harness(
        config(vec![
            MetricSpec::new("a", "A.", "gauge", "echo 1"),
            MetricSpec::new("b", "B.", "gauge", "echo 1"),
        ]),
        |r| r.respond("echo 1", ok("1")),
    );

    h.collector.collect().await;
    assert_eq!(h.runner.calls_for("echo 1"), 2);
    assert_eq!(h.cache.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_expired_entry_is_rerun() {
    let h = harness(
        config(vec![
            MetricSpec::new("short", "Short TTL.", "gauge", "echo 1").cache_ttl(Duration::from_secs(1))
        ]),
        |r| r.respond("echo 1", ok("1")),
    );

    h.collector.collect().await;
    tokio::time::advance(Duration::from_secs(2)).await;
    h.collector.collect().await;

    assert_eq!(h.runner.call_count(), 2);
    assert_eq!(h.metrics.cache_misses.get(), 2.0);
}

#[tokio::test]
async fn test_effective_settings_reach_runner() {
    let cfg = Config::builder()
        .timeout(Duration::from_secs(3))
        .shell("sh")
        .metric(MetricSpec::new("defaults", "D.", "gauge", "echo 1"))
        .metric(
            MetricSpec::new("overrides", "O.", "gauge", "echo 2")
                .timeout(Duration::from_millis(500))
                .shell("zsh"),
        )
        .build()
        .unwrap();
    let h = harness(cfg, |r| r.respond("echo 1", ok("1")).respond("echo 2", ok("2")));

    h.collector.collect().await;

    let calls = h.runner.calls();
    let defaults = calls.iter().find(|c| c.command == "echo 1").unwrap();
    assert_eq!(defaults.shell, "sh");
    assert_eq!(defaults.timeout, Duration::from_secs(3));
    let overrides = calls.iter().find(|c| c.command == "echo 2").unwrap();
    assert_eq!(overrides.shell, "zsh");
    assert_eq!(overrides.timeout, Duration::from_millis(500));
}

fn jobs_config(max_concurrent: usize, jobs: usize) -> Config {
    (0..jobs)
        .fold(Config::builder().max_concurrent(max_concurrent), |builder, i| {
            builder.metric(MetricSpec::new(
                format!("job_{}", i),
                "Job.",
                "gauge",
                format!("job {}", i),
            ))
        })
        .build()
        .unwrap()
}

fn jobs_harness(config: Config, jobs: usize) -> common::Harness {
    harness(config, |r| {
        (0..jobs)
            .fold(r, |r, i| r.respond(&format!("job {}", i), ok("1")))
            .with_delay(Duration::from_millis(30))
    })
}

#[tokio::test]
async fn test_concurrency_never_exceeds_cap() {
    let h = jobs_harness(jobs_config(2, 8), 8);

    let families = h.collector.collect().await;

    assert_eq!(families.len(), 8);
    assert_eq!(h.runner.peak_in_flight(), 2);
    assert!(h.runner.peak_gauge() <= 2.0);
    assert_eq!(h.metrics.concurrent_commands.get(), 0.0);
}

#[tokio::test]
async fn test_overlapping_scrapes_share_cap() {
    let h = jobs_harness(jobs_config(2, 8), 8);

    let (first, second) = tokio::join!(h.collector.collect(), h.collector.collect());

    assert_eq!(first.len(), 8);
    assert_eq!(second.len(), 8);
    assert_eq!(h.runner.peak_in_flight(), 2);
    assert!(h.runner.peak_gauge() <= 2.0);
    assert_eq!(h.metrics.concurrent_commands.get(), 0.0);
}

#[tokio::test]
async fn test_reload_resizes_cap() {
    let h = jobs_harness(jobs_config(4, 6), 6);

    h.source.set(jobs_config(1, 6));
    h.collector.reload_config().await.unwrap();
    let families = h.collector.collect().await;

    assert_eq!(families.len(), 6);
    assert_eq!(h.runner.peak_in_flight(), 1);
}

#[tokio::test]
async fn test_invalid_reload_keeps_previous_snapshot() {
    let h = harness(
        config(vec![MetricSpec::new("stable", "Stable.", "gauge", "echo 3")]),
        |r| r.respond("echo 3", ok("3")),
    );

    let before = h.collector.collect().await;
    h.source.fail("at least one metric must be defined");

    let err = h.collector.reload_config().await.unwrap_err();
    assert!(err.is_config_error());

    let after = h.collector.collect().await;
    assert_eq!(before, after);
    assert_eq!(h.metrics.config_reload_errors.get(), 1.0);
    assert_eq!(h.metrics.config_reloads.get(), 0.0);
}

#[tokio::test]
async fn test_valid_reload_swaps_snapshot() {
    let h = harness(
        config(vec![MetricSpec::new("old_metric", "Old.", "gauge", "echo 1")]),
        |r| r.respond("echo 1", ok("1")).respond("echo 2", ok("2")),
    );

    h.collector.collect().await;
    h.source
        .set(config(vec![MetricSpec::new("new_metric", "New.", "gauge", "echo 2")]));
    h.collector.reload_config().await.unwrap();

    let families = h.collector.collect().await;
    assert_eq!(family_names(&families), vec!["new_metric"]);
    assert_eq!(h.metrics.config_reloads.get(), 1.0);
    assert_eq!(h.metrics.config_reload_errors.get(), 0.0);
    assert_eq!(h.collector.current_config().await.metrics[0].name, "new_metric");
}

#[tokio::test]
async fn test_reload_waits_for_in_flight_scrape() {
    let h = harness(
        config(vec![MetricSpec::new("before", "Before.", "gauge", "echo 1")]),
        |r| r.respond("echo 1", ok("1")).respond("echo 2", ok("2")).gated(),
    );
    h.source
        .set(config(vec![MetricSpec::new("after", "After.", "gauge", "echo 2")]));

    let collector = Arc::clone(&h.collector);
    let scrape = tokio::spawn(async move { collector.collect().await });
    h.runner.wait_for_calls(1).await;

    let collector = Arc::clone(&h.collector);
    let reload = tokio::spawn(async move { collector.reload_config().await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!reload.is_finished());
    assert_eq!(h.metrics.config_reloads.get(), 0.0);

    h.runner.open_gate();
    let families = scrape.await.unwrap();
    reload.await.unwrap().unwrap();

    assert_eq!(family_names(&families), vec!["before"]);
    let families = h.collector.collect().await;
    assert_eq!(family_names(&families), vec!["after"]);
}

#[tokio::test]
async fn test_cache_survives_reload() {
    let h = harness(
        config(vec![MetricSpec::new("kept", "Kept.", "gauge", "echo 1")]),
        |r| r.respond("echo 1", ok("1")),
    );

    h.collector.collect().await;
    h.source.set(
        Config::builder()
            .metric(MetricSpec::new("kept", "Kept with new help.", "gauge", "echo 1"))
            .build()
            .unwrap(),
    );
    h.collector.reload_config().await.unwrap();
    h.collector.collect().await;

    assert_eq!(h.runner.call_count(), 1);
    assert_eq!(h.metrics.cache_hits.get(), 1.0);
}

#[tokio::test]
async fn test_describe_lists_every_family() {
    let h = harness(
        config(vec![
            MetricSpec::new("simple", "Simple.", "gauge", "echo 1")
                .label("host", "db1")
                .dynamic_label("proto", 0),
            MetricSpec::new("compound", "Compound.", "gauge", "stats")
                .label("host", "db1")
                .postfix(
                    PostfixMetricSpec::new("cpu", "CPU.", "gauge", 1)
                        .label("host", "override")
                        .dynamic_label("core", 0),
                )
                .postfix(PostfixMetricSpec::new("mem", "Memory.", "gauge", 1)),
        ]),
        |r| r,
    );

    let descs = h.collector.describe().await;
    let names: Vec<&str> = descs.iter().map(|d| d.fq_name.as_str()).collect();
    assert_eq!(names, vec!["simple", "compound_cpu", "compound_mem"]);

    assert_eq!(descs[0].variable_labels, vec!["proto".to_string()]);
    let cpu_labels: Vec<(&str, &str)> = descs[1]
        .const_label_pairs
        .iter()
        .map(|p| (p.get_name(), p.get_value()))
        .collect();
    assert_eq!(cpu_labels, vec![("host", "override")]);

    assert_eq!(h.collector.describe().await.len(), 3);
    assert_eq!(h.runner.call_count(), 0);
}

#[tokio::test]
async fn test_end_to_end_with_shell_runner() {
    let cfg = Config::builder()
        .metric(
            MetricSpec::new("proto_packets", "Packets.", "counter", "printf 'tcp 5\\nudp 7\\n'")
                .field(1)
                .dynamic_label("proto", 0),
        )
        .metric(
            MetricSpec::new("too_slow", "Slow.", "gauge", "sleep 5; echo 1")
                .timeout(Duration::from_millis(100)),
        )
        .build()
        .unwrap();
    let metrics = Arc::new(ExporterMetrics::new().unwrap());
    let collector = CommandCollector::new(
        cfg.clone(),
        Arc::new(MemoryConfigSource::new(cfg)),
        Arc::new(ShellRunner::new()),
        Arc::new(ResultCache::new()),
        Arc::clone(&metrics),
    );

    let families = collector.collect().await;

    assert_eq!(family_names(&families), vec!["proto_packets"]);
    let metrics_by_proto: Vec<(Option<&str>, f64)> = families[0]
        .get_metric()
        .iter()
        .map(|m| (label(m, "proto"), value_of(m)))
        .collect();
    assert_eq!(
        metrics_by_proto,
        vec![(Some("tcp"), 5.0), (Some("udp"), 7.0)]
    );
    assert_eq!(command_errors(&metrics, "too_slow"), 1.0);
}
