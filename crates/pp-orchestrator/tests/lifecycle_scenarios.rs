//! End-to-end lifecycle scenarios against simulated collaborators

use std::sync::Arc;
use std::time::Duration;

use pp_core::config::TimeoutConfig;
use pp_core::error::ErrorKind;
use pp_core::report::{Outcome, Step};
use pp_core::types::{
    Connectivity, InterfaceName, ProxyAction, ProxyConfigPatch, ProxyStatus, TunnelAction,
    TunnelStatus,
};
use pp_orchestrator::backend::{Fault, SimulatedBackend};
use pp_orchestrator::{Collaborators, Orchestrator};

fn iface(name: &str) -> InterfaceName {
    InterfaceName::new(name)
}

/// Orchestrator over `sim`, with the registry already populated
async fn orchestrator_with(
    sim: SimulatedBackend,
    timeouts: TimeoutConfig,
) -> (Arc<SimulatedBackend>, Arc<Orchestrator>) {
    let sim = Arc::new(sim);
    let orch = Arc::new(Orchestrator::new(
        Collaborators::from_backend(sim.clone()),
        timeouts,
    ));
    orch.refresh_all().await.expect("initial refresh");
    (sim, orch)
}

async fn seeded() -> (Arc<SimulatedBackend>, Arc<Orchestrator>) {
    orchestrator_with(SimulatedBackend::seeded(), TimeoutConfig::default()).await
}

#[tokio::test]
async fn test_start_proxy_on_connected_modem() {
    let (sim, orch) = orchestrator_with(
        SimulatedBackend::new().with_modem("ppp0", Some("10.0.0.5")),
        TimeoutConfig::default(),
    )
    .await;

    let report = orch
        .set_proxy_state(&iface("ppp0"), ProxyAction::Start)
        .await
        .unwrap();
    assert!(report.is_success(), "{}", report.message);

    let entry = orch.registry().get(&iface("ppp0")).await.unwrap();
    assert_eq!(entry.proxy.proxy_status, ProxyStatus::Running);
    assert!(entry.proxy.port.is_some());
    assert!(entry.proxy.credentials.is_some());
    assert_eq!(entry.proxy.bind_ip.as_deref(), Some("10.0.0.5"));
    assert!(sim.proxy_running("ppp0").await);
}

#[tokio::test]
async fn test_start_proxy_on_disconnected_modem_changes_nothing() {
    let (sim, orch) = seeded().await;
    let before = orch.snapshot().await;

    let report = orch
        .set_proxy_state(&iface("ppp2"), ProxyAction::Start)
        .await
        .unwrap();
    assert_eq!(report.outcome, Outcome::Failed);
    assert_eq!(report.error_kind, Some(ErrorKind::PreconditionFailed));
    assert!(report.message.contains("ppp2"));

    assert_eq!(orch.snapshot().await, before);
    assert_eq!(sim.calls().await.proxy_start, 0);
}

#[tokio::test]
async fn test_tunnel_binds_to_proxy_port() {
    let (_sim, orch) = seeded().await;
    let ppp0 = iface("ppp0");

    let patch = ProxyConfigPatch {
        port: Some(8080),
        ..Default::default()
    };
    assert!(orch.update_proxy_config(&ppp0, &patch).await.unwrap().is_success());
    orch.set_proxy_state(&ppp0, ProxyAction::Start).await.unwrap();

    let report = orch.set_tunnel_state(&ppp0, TunnelAction::Start).await.unwrap();
    assert!(report.is_success(), "{}", report.message);

    let tunnel = orch.registry().get(&ppp0).await.unwrap().tunnel.unwrap();
    assert_eq!(tunnel.status, TunnelStatus::Active);
    assert_eq!(tunnel.bound_local_port, 8080);
    assert!(tunnel.public_url.unwrap().starts_with("tcp://"));
}

#[tokio::test]
async fn test_stop_proxy_tears_down_tunnel_first() {
    let (sim, orch) = seeded().await;
    let ppp0 = iface("ppp0");
    orch.set_proxy_state(&ppp0, ProxyAction::Start).await.unwrap();
    orch.set_tunnel_state(&ppp0, TunnelAction::Start).await.unwrap();
    assert!(sim.tunnel_live("ppp0").await);

    let report = orch.set_proxy_state(&ppp0, ProxyAction::Stop).await.unwrap();
    assert!(report.is_success(), "{}", report.message);

    let entry = orch.registry().get(&ppp0).await.unwrap();
    assert!(entry.tunnel.is_none());
    assert_eq!(entry.proxy.proxy_status, ProxyStatus::Stopped);
    assert!(!sim.tunnel_live("ppp0").await);
    assert!(!sim.proxy_running("ppp0").await);
}

#[tokio::test]
async fn test_stop_proxy_aborts_when_tunnel_will_not_stop() {
    let (sim, orch) = seeded().await;
    let ppp0 = iface("ppp0");
    orch.set_proxy_state(&ppp0, ProxyAction::Start).await.unwrap();
    orch.set_tunnel_state(&ppp0, TunnelAction::Start).await.unwrap();
    let before = orch.registry().get(&ppp0).await;

    sim.set_fault("ppp0", Fault::TunnelStop, true).await;
    let report = orch.set_proxy_state(&ppp0, ProxyAction::Stop).await.unwrap();
    assert_eq!(report.outcome, Outcome::Failed);
    assert_eq!(report.error_kind, Some(ErrorKind::TunnelStopFailed));

    assert_eq!(orch.registry().get(&ppp0).await, before);
    assert!(sim.proxy_running("ppp0").await);
}

#[tokio::test]
async fn test_rotation_keeps_new_ip_when_restart_fails() {
    let (sim, orch) = seeded().await;
    let ppp0 = iface("ppp0");
    orch.set_proxy_state(&ppp0, ProxyAction::Start).await.unwrap();

    sim.queue_rotation_ip("ppp0", "10.0.0.9").await;
    sim.set_fault("ppp0", Fault::ProxyStart, true).await;

    let report = orch.rotate_ip(&ppp0).await.unwrap();
    assert!(report.is_partial());
    assert_eq!(
        report.outcome,
        Outcome::Partial {
            failed_step: Step::ProxyRestart
        }
    );
    assert_eq!(report.new_ip.as_deref(), Some("10.0.0.9"));
    assert!(report.message.contains("proxy restart"), "{}", report.message);

    let entry = orch.registry().get(&ppp0).await.unwrap();
    assert_eq!(entry.modem.ip_address.as_deref(), Some("10.0.0.9"));
    assert_eq!(entry.proxy.proxy_status, ProxyStatus::Error);
}

#[tokio::test]
async fn test_rotation_rebinds_running_proxy() {
    let (sim, orch) = seeded().await;
    let ppp0 = iface("ppp0");
    orch.set_proxy_state(&ppp0, ProxyAction::Start).await.unwrap();
    orch.set_tunnel_state(&ppp0, TunnelAction::Start).await.unwrap();

    sim.queue_rotation_ip("ppp0", "10.64.9.9").await;
    let report = orch.rotate_ip(&ppp0).await.unwrap();
    assert!(report.is_success(), "{}", report.message);

    let entry = orch.registry().get(&ppp0).await.unwrap();
    assert_eq!(entry.modem.ip_address.as_deref(), Some("10.64.9.9"));
    assert_eq!(entry.proxy.bind_ip.as_deref(), Some("10.64.9.9"));
    assert_eq!(entry.proxy.proxy_status, ProxyStatus::Running);
    // Same port, so the tunnel survives
    assert!(entry.tunnel.is_some());
}

#[tokio::test]
async fn test_rotation_starts_stopped_proxy_on_new_ip() {
    let (sim, orch) = seeded().await;
    let ppp1 = iface("ppp1");
    assert!(!sim.proxy_running("ppp1").await);

    sim.queue_rotation_ip("ppp1", "10.64.7.7").await;
    let report = orch.rotate_ip(&ppp1).await.unwrap();
    assert!(report.is_success(), "{}", report.message);
    assert_eq!(report.new_ip.as_deref(), Some("10.64.7.7"));

    let entry = orch.registry().get(&ppp1).await.unwrap();
    assert_eq!(entry.modem.ip_address.as_deref(), Some("10.64.7.7"));
    assert_eq!(entry.proxy.proxy_status, ProxyStatus::Running);
    assert_eq!(entry.proxy.bind_ip.as_deref(), Some("10.64.7.7"));
    assert!(sim.proxy_running("ppp1").await);
    assert_eq!(
        sim.proxy_config("ppp1").await.and_then(|c| c.bind_ip).as_deref(),
        Some("10.64.7.7")
    );
}

#[tokio::test]
async fn test_rotation_picks_up_broken_tunnel() {
    let (sim, orch) = seeded().await;
    let ppp0 = iface("ppp0");
    orch.set_proxy_state(&ppp0, ProxyAction::Start).await.unwrap();
    orch.set_tunnel_state(&ppp0, TunnelAction::Start).await.unwrap();
    let old_url = orch
        .registry()
        .get(&ppp0)
        .await
        .unwrap()
        .tunnel
        .and_then(|t| t.public_url)
        .unwrap();

    sim.break_tunnel("ppp0").await;
    let report = orch.rotate_ip(&ppp0).await.unwrap();
    assert!(report.new_ip.is_some(), "{}", report.message);

    let entry = orch.registry().get(&ppp0).await.unwrap();
    assert_eq!(entry.proxy.proxy_status, ProxyStatus::Running);
    if let Some(tunnel) = entry.tunnel {
        assert_ne!(tunnel.status, TunnelStatus::Active);
        assert_ne!(tunnel.public_url.as_deref(), Some(old_url.as_str()));
    }
    assert!(sim.calls().await.tunnel_status >= 2);
}

#[tokio::test]
async fn test_failed_restart_keeps_tunnel_that_will_not_stop() {
    let (sim, orch) = seeded().await;
    let ppp0 = iface("ppp0");
    orch.set_proxy_state(&ppp0, ProxyAction::Start).await.unwrap();
    orch.set_tunnel_state(&ppp0, TunnelAction::Start).await.unwrap();

    sim.set_fault("ppp0", Fault::TunnelStop, true).await;
    sim.set_fault("ppp0", Fault::ProxyStart, true).await;

    let report = orch.set_proxy_state(&ppp0, ProxyAction::Restart).await.unwrap();
    assert_eq!(report.outcome, Outcome::Failed);
    assert_eq!(report.error_kind, Some(ErrorKind::ProxyStartFailed));
    assert!(report.message.contains("tunnel_ppp0"), "{}", report.message);

    let entry = orch.registry().get(&ppp0).await.unwrap();
    assert_eq!(entry.proxy.proxy_status, ProxyStatus::Error);
    let tunnel = entry.tunnel.expect("tunnel that did not stop is still recorded");
    assert_eq!(tunnel.status, TunnelStatus::Error);
    assert!(tunnel.public_url.is_none());
    assert!(sim.tunnel_live("ppp0").await);

    // Once the tunnel can be stopped, stopping the proxy cleans it up
    sim.clear_faults().await;
    let report = orch.set_proxy_state(&ppp0, ProxyAction::Stop).await.unwrap();
    assert!(report.is_success(), "{}", report.message);
    assert!(orch.registry().get(&ppp0).await.unwrap().tunnel.is_none());
    assert!(!sim.tunnel_live("ppp0").await);
}

#[tokio::test]
async fn test_failed_rotation_records_what_modem_reports() {
    let (sim, orch) = seeded().await;
    let ppp0 = iface("ppp0");
    sim.set_fault("ppp0", Fault::Rotation, true).await;

    let report = orch.rotate_ip(&ppp0).await.unwrap();
    assert_eq!(report.outcome, Outcome::Failed);
    assert_eq!(report.error_kind, Some(ErrorKind::RotationFailed));

    let entry = orch.registry().get(&ppp0).await.unwrap();
    assert_eq!(entry.modem.connectivity, Connectivity::Disconnected);
    assert!(entry.modem.ip_address.is_none());
}

#[tokio::test]
async fn test_operations_are_idempotent() {
    let (sim, orch) = seeded().await;
    let ppp0 = iface("ppp0");

    orch.set_proxy_state(&ppp0, ProxyAction::Start).await.unwrap();
    let again = orch.set_proxy_state(&ppp0, ProxyAction::Start).await.unwrap();
    assert!(again.is_success());
    assert!(again.message.contains("already running"));
    assert_eq!(sim.calls().await.proxy_start, 1);

    orch.set_tunnel_state(&ppp0, TunnelAction::Start).await.unwrap();
    let again = orch.set_tunnel_state(&ppp0, TunnelAction::Start).await.unwrap();
    assert!(again.is_success());
    assert_eq!(sim.calls().await.tunnel_start, 1);

    orch.set_tunnel_state(&ppp0, TunnelAction::Stop).await.unwrap();
    let again = orch.set_tunnel_state(&ppp0, TunnelAction::Stop).await.unwrap();
    assert!(again.is_success());

    orch.set_proxy_state(&ppp0, ProxyAction::Stop).await.unwrap();
    let again = orch.set_proxy_state(&ppp0, ProxyAction::Stop).await.unwrap();
    assert!(again.is_success());
    assert!(again.message.contains("already stopped"));
    assert_eq!(sim.calls().await.proxy_stop, 1);
}

#[tokio::test]
async fn test_tunnel_requires_running_proxy() {
    let (sim, orch) = seeded().await;
    let report = orch
        .set_tunnel_state(&iface("ppp0"), TunnelAction::Start)
        .await
        .unwrap();
    assert_eq!(report.error_kind, Some(ErrorKind::PreconditionFailed));
    assert!(orch.registry().get(&iface("ppp0")).await.unwrap().tunnel.is_none());
    assert_eq!(sim.calls().await.tunnel_start, 0);
}

#[tokio::test]
async fn test_restart_on_new_port_drops_tunnel() {
    let (sim, orch) = seeded().await;
    let ppp0 = iface("ppp0");
    orch.set_proxy_state(&ppp0, ProxyAction::Start).await.unwrap();
    orch.set_tunnel_state(&ppp0, TunnelAction::Start).await.unwrap();

    let patch = ProxyConfigPatch {
        port: Some(31500),
        ..Default::default()
    };
    let report = orch.update_proxy_config(&ppp0, &patch).await.unwrap();
    assert!(report.message.contains("restart the proxy"));
    // Config changes are picked up on restart, not before
    assert_eq!(
        orch.registry().get(&ppp0).await.unwrap().proxy.port,
        Some(30000)
    );

    let report = orch.set_proxy_state(&ppp0, ProxyAction::Restart).await.unwrap();
    assert!(report.is_success(), "{}", report.message);
    assert!(report.message.contains("tunnel stopped"));

    let entry = orch.registry().get(&ppp0).await.unwrap();
    assert_eq!(entry.proxy.port, Some(31500));
    assert!(entry.tunnel.is_none());
    assert!(!sim.tunnel_live("ppp0").await);
}

#[tokio::test]
async fn test_rebind_follows_modem_ip() {
    let (sim, orch) = seeded().await;
    let ppp1 = iface("ppp1");
    orch.set_proxy_state(&ppp1, ProxyAction::Start).await.unwrap();

    sim.set_ip("ppp1", Some("10.64.3.3")).await;
    let outcome = orch.auto_rebind(&ppp1).await.unwrap();
    assert!(outcome.success, "{}", outcome.message);
    assert_eq!(outcome.message, "Proxy on ppp1 rebound to 10.64.3.3 (port 30000)");

    let entry = orch.registry().get(&ppp1).await.unwrap();
    assert_eq!(entry.proxy.bind_ip.as_deref(), Some("10.64.3.3"));
    assert_eq!(
        sim.proxy_config("ppp1").await.and_then(|c| c.bind_ip).as_deref(),
        Some("10.64.3.3")
    );
}

#[tokio::test]
async fn test_rebind_without_ip_leaves_proxy_alone() {
    let (sim, orch) = seeded().await;
    let ppp0 = iface("ppp0");
    orch.set_proxy_state(&ppp0, ProxyAction::Start).await.unwrap();
    sim.set_ip("ppp0", None).await;

    let outcome = orch.auto_rebind(&ppp0).await.unwrap();
    assert!(!outcome.success);
    assert_eq!(outcome.error_kind, Some(ErrorKind::PreconditionFailed));
    assert_eq!(sim.calls().await.proxy_update, 0);
    assert!(sim.proxy_running("ppp0").await);
}

#[tokio::test]
async fn test_unknown_interface_is_reported() {
    let (_sim, orch) = seeded().await;
    let report = orch.rotate_ip(&iface("wwan7")).await.unwrap();
    assert_eq!(report.error_kind, Some(ErrorKind::UnknownInterface));
    assert!(report.entry.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_same_interface_operations_never_overlap() {
    let (sim, orch) = orchestrator_with(
        SimulatedBackend::seeded().with_latency(Duration::from_millis(200)),
        TimeoutConfig::default(),
    )
    .await;
    let ppp0 = iface("ppp0");
    orch.set_proxy_state(&ppp0, ProxyAction::Start).await.unwrap();

    let a = {
        let orch = orch.clone();
        let ppp0 = ppp0.clone();
        tokio::spawn(async move { orch.rotate_ip(&ppp0).await })
    };
    let b = {
        let orch = orch.clone();
        let ppp0 = ppp0.clone();
        tokio::spawn(async move { orch.set_proxy_state(&ppp0, ProxyAction::Restart).await })
    };
    let c = {
        let orch = orch.clone();
        let ppp0 = ppp0.clone();
        tokio::spawn(async move { orch.set_tunnel_state(&ppp0, TunnelAction::Start).await })
    };

    assert!(a.await.unwrap().unwrap().is_success());
    assert!(b.await.unwrap().unwrap().is_success());
    assert!(c.await.unwrap().unwrap().is_success());
    assert_eq!(sim.max_concurrent_mutations(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_rotations_run_one_after_another() {
    let (sim, orch) = orchestrator_with(
        SimulatedBackend::seeded().with_latency(Duration::from_millis(200)),
        TimeoutConfig::default(),
    )
    .await;
    let ppp0 = iface("ppp0");
    sim.queue_rotation_ip("ppp0", "10.64.1.1").await;
    sim.queue_rotation_ip("ppp0", "10.64.2.2").await;

    let (a, b) = tokio::join!(orch.rotate_ip(&ppp0), orch.rotate_ip(&ppp0));
    let (a, b) = (a.unwrap(), b.unwrap());
    assert!(a.is_success(), "{}", a.message);
    assert!(b.is_success(), "{}", b.message);

    let mut ips = vec![a.new_ip.unwrap(), b.new_ip.unwrap()];
    ips.sort();
    assert_eq!(ips, vec!["10.64.1.1", "10.64.2.2"]);

    assert_eq!(sim.calls().await.rotate, 2);
    assert_eq!(sim.max_concurrent_mutations(), 1);
    let entry = orch.registry().get(&ppp0).await.unwrap();
    assert_eq!(entry.modem.ip_address.as_deref(), Some("10.64.2.2"));
    assert_eq!(entry.proxy.bind_ip.as_deref(), Some("10.64.2.2"));
}

#[tokio::test(start_paused = true)]
async fn test_different_interfaces_run_in_parallel() {
    let latency = Duration::from_millis(500);
    let (sim, orch) = orchestrator_with(
        SimulatedBackend::seeded().with_latency(latency),
        TimeoutConfig::default(),
    )
    .await;

    let ppp0 = iface("ppp0");
    let ppp1 = iface("ppp1");
    let started = tokio::time::Instant::now();
    let (a, b) = tokio::join!(
        orch.set_proxy_state(&ppp0, ProxyAction::Start),
        orch.set_proxy_state(&ppp1, ProxyAction::Start),
    );
    assert!(a.unwrap().is_success());
    assert!(b.unwrap().is_success());

    assert!(started.elapsed() < latency * 2);
    assert!(sim.proxy_running("ppp0").await && sim.proxy_running("ppp1").await);
}

#[tokio::test(start_paused = true)]
async fn test_busy_interface_rejects_after_admission_timeout() {
    let timeouts = TimeoutConfig {
        admission: Duration::from_secs(1),
        ..TimeoutConfig::default()
    };
    let (_sim, orch) = orchestrator_with(
        SimulatedBackend::seeded().with_latency(Duration::from_secs(5)),
        timeouts,
    )
    .await;
    let ppp0 = iface("ppp0");

    let long = {
        let orch = orch.clone();
        let ppp0 = ppp0.clone();
        tokio::spawn(async move { orch.set_proxy_state(&ppp0, ProxyAction::Start).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(orch.locks().is_busy(&ppp0));

    let report = orch.rotate_ip(&ppp0).await.unwrap();
    assert_eq!(report.error_kind, Some(ErrorKind::OperationInProgress));

    assert!(long.await.unwrap().unwrap().is_success());
}

#[tokio::test(start_paused = true)]
async fn test_collaborator_timeout_marks_proxy_error() {
    let timeouts = TimeoutConfig {
        proxy: Duration::from_secs(2),
        ..TimeoutConfig::default()
    };
    let (_sim, orch) = orchestrator_with(
        SimulatedBackend::seeded().with_latency(Duration::from_secs(10)),
        timeouts,
    )
    .await;

    let report = orch
        .set_proxy_state(&iface("ppp0"), ProxyAction::Start)
        .await
        .unwrap();
    assert_eq!(report.error_kind, Some(ErrorKind::Timeout));
    assert!(report.message.contains("proxy start on ppp0 timed out"), "{}", report.message);

    let entry = orch.registry().get(&iface("ppp0")).await.unwrap();
    assert_eq!(entry.proxy.proxy_status, ProxyStatus::Error);
}

#[tokio::test]
async fn test_refresh_tracks_hotplug() {
    let (sim, orch) = seeded().await;
    sim.add_modem("ppp3", Some("10.64.0.13")).await;
    sim.remove_modem("ppp2").await;

    let summary = orch.refresh_all().await.unwrap();
    assert_eq!(summary.removed, 1);

    let names = orch.registry().interfaces().await;
    assert_eq!(names, vec![iface("ppp0"), iface("ppp1"), iface("ppp3")]);
}

#[tokio::test]
async fn test_refresh_marks_broken_tunnel_as_error() {
    let (sim, orch) = seeded().await;
    let ppp0 = iface("ppp0");
    orch.set_proxy_state(&ppp0, ProxyAction::Start).await.unwrap();
    orch.set_tunnel_state(&ppp0, TunnelAction::Start).await.unwrap();

    sim.break_tunnel("ppp0").await;
    orch.refresh_all().await.unwrap();

    let tunnel = orch.registry().get(&ppp0).await.unwrap().tunnel.unwrap();
    assert_eq!(tunnel.status, TunnelStatus::Error);
    assert!(tunnel.public_url.is_none());
}
