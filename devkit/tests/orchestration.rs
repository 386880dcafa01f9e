//! Full experiment runs against the scripted executor.

use netbench_devkit::test_utils::FAST_SLOT;
use netbench_devkit::{ListenerBehavior, Reply, ScriptedExecutor, TestHarness};
use netbench_controller::models::Protocol;
use netbench_controller::orchestrator::ExperimentError;
use std::sync::Arc;
use std::time::Duration;

const RUN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn two_hosts_run_staggered_and_persist() {
    let exec = ScriptedExecutor::new()
        .reply("h1", Reply::mbps(94.0))
        .reply("h2", Reply::stdout(netbench_devkit::fixtures::iperf_udp_json(5_000_000.0)));
    let harness = TestHarness::new(exec.clone()).unwrap();

    let id = harness.start(&[("h2", "UDP", "5M"), ("h1", "TCP", "10M")]).await.unwrap();

    let orch = harness.orchestrator.clone();
    harness
        .wait_for("both hosts active", RUN_TIMEOUT, move || orch.snapshot().active_hosts.len() == 2)
        .await
        .unwrap();
    let snap = harness.orchestrator.snapshot();
    assert!(snap.running);
    assert_eq!(snap.current_experiment_id.as_deref(), Some(id.as_str()));

    harness.wait_until_idle(RUN_TIMEOUT).await.unwrap();

    let mut results = harness.persisted(&id).await.unwrap();
    results.sort_by(|a, b| a.hostname.cmp(&b.hostname));
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].hostname, "h1");
    assert_eq!(results[0].address, "10.1.1.10");
    assert_eq!(results[0].protocol, Protocol::Tcp);
    assert_eq!(results[0].throughput, 94.0);
    assert_eq!(results[1].hostname, "h2");
    assert_eq!(results[1].protocol, Protocol::Udp);
    assert_eq!(results[1].bitrate, "5M");
    assert_eq!(results[1].throughput, 5.0);

    // h1 starts first, h2 one slot later
    let clients = exec.client_calls();
    assert_eq!(exec.client_hosts(), vec!["h1", "h2"]);
    assert!(clients[1].at.duration_since(clients[0].at) >= FAST_SLOT - Duration::from_millis(20));
    assert!(clients[1].argv.windows(3).any(|w| w == ["-u", "-b", "5M"]));
    assert!(!clients[0].argv.iter().any(|a| a == "-u"));
    assert!(clients.iter().all(|c| c.argv.windows(2).any(|w| w == ["-c", "10.4.1.10"])));

    // one listener on the probe host, released at the end
    let spawns: Vec<_> = exec.calls().into_iter().filter(|c| c.detached).collect();
    assert_eq!(spawns.len(), 1);
    assert_eq!(spawns[0].host, "h7");
    assert_eq!(spawns[0].argv, vec!["iperf3", "-s", "-p", "5201"]);
    assert_eq!(exec.live_listeners(), 0);

    // in-memory view is reset once the run is over
    let snap = harness.orchestrator.snapshot();
    assert!(!snap.running);
    assert!(snap.active_hosts.is_empty());
    assert_eq!(snap.results_count, 0);
}

#[tokio::test]
async fn stop_aborts_waiting_hosts_but_keeps_running_ones() {
    let exec = ScriptedExecutor::new().reply("h1", Reply::mbps(50.0).after(Duration::from_millis(400)));
    let harness = TestHarness::new(exec.clone()).unwrap();

    let id = harness
        .start(&[("h1", "TCP", "1M"), ("h2", "TCP", "1M"), ("h3", "TCP", "1M")])
        .await
        .unwrap();

    let probe = exec.clone();
    harness
        .wait_for("h1 client running", RUN_TIMEOUT, move || !probe.client_calls().is_empty())
        .await
        .unwrap();

    harness.orchestrator.stop().await.unwrap();
    let snap = harness.orchestrator.snapshot();
    assert!(!snap.running);
    assert!(snap.active_hosts.is_empty());
    assert!(matches!(harness.orchestrator.stop().await, Err(ExperimentError::NotRunning)));

    // h1 finishes and is persisted under the stopped experiment
    let results = harness.wait_for_persisted(&id, 1, RUN_TIMEOUT).await.unwrap();
    assert_eq!(results[0].hostname, "h1");
    assert_eq!(results[0].throughput, 50.0);

    // h2 and h3 never start, even after their offsets
    tokio::time::sleep(FAST_SLOT * 3).await;
    assert_eq!(exec.client_hosts(), vec!["h1"]);
    assert_eq!(harness.persisted(&id).await.unwrap().len(), 1);
    assert_eq!(exec.live_listeners(), 0);
    assert_eq!(harness.orchestrator.snapshot().results_count, 0);
}

#[tokio::test]
async fn listener_spawn_failure_aborts_before_traffic() {
    let exec = ScriptedExecutor::new().listener(ListenerBehavior::FailSpawn);
    let harness = TestHarness::new(exec.clone()).unwrap();

    let id = harness.start(&[("h1", "TCP", "1M"), ("h2", "TCP", "1M")]).await.unwrap();
    harness.wait_until_idle(RUN_TIMEOUT).await.unwrap();

    assert!(exec.client_calls().is_empty());
    assert!(harness.persisted(&id).await.unwrap().is_empty());
    assert!(harness.orchestrator.snapshot().active_hosts.is_empty());
}

#[tokio::test]
async fn listener_dying_at_start_aborts_before_traffic() {
    let exec = ScriptedExecutor::new().listener(ListenerBehavior::ExitImmediately);
    let harness = TestHarness::new(exec.clone()).unwrap();

    harness.start(&[("h1", "TCP", "1M")]).await.unwrap();
    harness.wait_until_idle(RUN_TIMEOUT).await.unwrap();

    assert_eq!(exec.listener_spawns(), 1);
    assert!(exec.client_calls().is_empty());

    // the next experiment is admitted normally
    assert!(harness.start(&[("h1", "TCP", "1M")]).await.is_ok());
    harness.wait_until_idle(RUN_TIMEOUT).await.unwrap();
}

#[tokio::test]
async fn unreachable_probe_host_aborts_run() {
    let exec = ScriptedExecutor::new().unknown_host("h7");
    let harness = TestHarness::new(exec.clone()).unwrap();

    let id = harness.start(&[("h1", "TCP", "1M")]).await.unwrap();
    harness.wait_until_idle(RUN_TIMEOUT).await.unwrap();
    assert!(exec.client_calls().is_empty());
    assert!(harness.persisted(&id).await.unwrap().is_empty());
}

#[tokio::test]
async fn leftover_listener_is_killed_before_start() {
    let exec = ScriptedExecutor::new().with_leftover_listener();
    let harness = TestHarness::new(exec.clone()).unwrap();

    harness.start(&[("h1", "TCP", "1M")]).await.unwrap();
    harness.wait_until_idle(RUN_TIMEOUT).await.unwrap();

    let calls = exec.calls();
    let pgrep = calls.iter().position(|c| c.program() == "pgrep").unwrap();
    let pkill = calls.iter().position(|c| c.program() == "pkill").unwrap();
    let spawn = calls.iter().position(|c| c.detached).unwrap();
    assert!(pgrep < pkill && pkill < spawn);
    assert_eq!(calls[pkill].argv, vec!["pkill", "-f", "iperf3 -s -p 5201"]);
    assert_eq!(calls[pkill].host, "h7");
}

#[tokio::test]
async fn host_failures_degrade_to_zero_throughput() {
    let exec = ScriptedExecutor::new()
        .reply("h1", Reply::Unreachable)
        .reply("h2", Reply::exit(1, "iperf3: error - unable to connect to server"))
        .reply("h3", Reply::mbps(12.5));
    let harness = TestHarness::new(exec.clone()).unwrap();

    let id = harness
        .start(&[("h1", "TCP", "1M"), ("h2", "UDP", "1M"), ("h3", "TCP", "1M")])
        .await
        .unwrap();
    harness.wait_until_idle(RUN_TIMEOUT).await.unwrap();

    let mut results = harness.persisted(&id).await.unwrap();
    results.sort_by(|a, b| a.hostname.cmp(&b.hostname));
    let figures: Vec<_> = results.iter().map(|r| (r.hostname.as_str(), r.throughput)).collect();
    assert_eq!(figures, vec![("h1", 0.0), ("h2", 0.0), ("h3", 12.5)]);
}

#[tokio::test]
async fn concurrent_starts_admit_one() {
    let exec = ScriptedExecutor::new().default_reply(Reply::mbps(1.0).after(Duration::from_secs(1)));
    let harness = Arc::new(TestHarness::new(exec).unwrap());

    let mut handles = Vec::new();
    for _ in 0..8 {
        let harness = harness.clone();
        handles.push(tokio::spawn(async move { harness.start(&[("h1", "TCP", "1M")]).await }));
    }
    let mut admitted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => admitted += 1,
            Err(ExperimentError::Conflict) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(admitted, 1);

    harness.orchestrator.stop().await.unwrap();
    assert!(harness.orchestrator.snapshot().current_experiment_id.is_some());
}

#[tokio::test]
async fn stubborn_listener_is_force_killed() {
    let exec = ScriptedExecutor::new().listener(ListenerBehavior::IgnoreTerm);
    let harness = TestHarness::new(exec.clone()).unwrap();

    harness.start(&[("h1", "TCP", "1M")]).await.unwrap();
    harness.wait_until_idle(RUN_TIMEOUT).await.unwrap();

    assert_eq!(exec.listener_kills(), 1);
    assert_eq!(exec.live_listeners(), 0);
}

#[tokio::test]
async fn watchdog_releases_the_run_and_late_result_is_kept() {
    let exec = ScriptedExecutor::new().reply("h1", Reply::mbps(3.0).after(Duration::from_millis(800)));
    let mut settings = TestHarness::fast_settings();
    settings.watchdog_margin = Duration::from_millis(50);
    settings.traffic.client_grace = Duration::from_secs(5);
    let harness = TestHarness::with_settings(exec, settings).unwrap();

    let id = harness.start(&[("h1", "TCP", "1M")]).await.unwrap();

    // slot + margin, well before the client returns
    harness.wait_until_idle(Duration::from_millis(600)).await.unwrap();
    assert!(harness.persisted(&id).await.unwrap().is_empty());

    let results = harness.wait_for_persisted(&id, 1, RUN_TIMEOUT).await.unwrap();
    assert_eq!(results[0].throughput, 3.0);
    assert_eq!(harness.orchestrator.snapshot().results_count, 0);
}
