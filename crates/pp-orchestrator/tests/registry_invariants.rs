//! Property tests: random operation sequences never leave the registry in
//! an impossible state

use std::sync::Arc;

use proptest::prelude::*;

use pp_core::config::TimeoutConfig;
use pp_core::types::{
    Connectivity, InterfaceName, ProxyAction, ProxyConfigPatch, TunnelAction, TunnelStatus,
};
use pp_orchestrator::backend::{Fault, SimulatedBackend};
use pp_orchestrator::registry::validate;
use pp_orchestrator::{Collaborators, Orchestrator};

const INTERFACES: [&str; 3] = ["ppp0", "ppp1", "ppp2"];

#[derive(Debug, Clone)]
enum Op {
    Proxy(usize, ProxyAction),
    Tunnel(usize, TunnelAction),
    Rotate(usize),
    Rebind(usize),
    MovePort(usize, u16),
    Refresh,
    Fault(usize, Fault, bool),
    Unplug(usize),
    Replug(usize),
    Disconnect(usize),
    BreakTunnel(usize),
}

fn fault() -> impl Strategy<Value = Fault> {
    prop_oneof![
        Just(Fault::Unreachable),
        Just(Fault::Rotation),
        Just(Fault::ProxyStart),
        Just(Fault::ProxyStop),
        Just(Fault::ProxyConfig),
        Just(Fault::TunnelStart),
        Just(Fault::TunnelStop),
    ]
}

fn op() -> impl Strategy<Value = Op> {
    let idx = 0..INTERFACES.len();
    prop_oneof![
        4 => (idx.clone(), prop_oneof![
            Just(ProxyAction::Start),
            Just(ProxyAction::Stop),
            Just(ProxyAction::Restart),
        ])
            .prop_map(|(i, a)| Op::Proxy(i, a)),
        3 => (idx.clone(), prop_oneof![Just(TunnelAction::Start), Just(TunnelAction::Stop)])
            .prop_map(|(i, a)| Op::Tunnel(i, a)),
        2 => idx.clone().prop_map(Op::Rotate),
        1 => idx.clone().prop_map(Op::Rebind),
        1 => (idx.clone(), 31000u16..31010).prop_map(|(i, p)| Op::MovePort(i, p)),
        1 => Just(Op::Refresh),
        2 => (idx.clone(), fault(), any::<bool>()).prop_map(|(i, f, on)| Op::Fault(i, f, on)),
        2 => (idx.clone(), any::<bool>())
            .prop_map(|(i, plug)| if plug { Op::Replug(i) } else { Op::Unplug(i) }),
        1 => idx.clone().prop_map(Op::Disconnect),
        1 => idx.prop_map(Op::BreakTunnel),
    ]
}

async fn check_registry(orch: &Orchestrator) -> Result<(), TestCaseError> {
    for entry in orch.snapshot().await {
        let key = entry.interface_name().clone();
        prop_assert!(validate(&key, &entry).is_ok(), "invalid entry {:?}", entry);

        if entry.modem.connectivity != Connectivity::Connected {
            prop_assert!(entry.modem.ip_address.is_none());
        }
        if let Some(tunnel) = &entry.tunnel {
            prop_assert_eq!(tunnel.tunnel_id.clone(), key.tunnel_id());
            if tunnel.status == TunnelStatus::Active {
                prop_assert!(entry.proxy.is_running());
                prop_assert!(tunnel.public_url.is_some());
            }
        }
    }
    Ok(())
}

async fn apply(
    sim: &SimulatedBackend,
    orch: &Orchestrator,
    op: Op,
) -> Result<(), TestCaseError> {
    let name = |i: usize| InterfaceName::new(INTERFACES[i]);
    let result = match op {
        Op::Proxy(i, action) => orch.set_proxy_state(&name(i), action).await.map(drop),
        Op::Tunnel(i, action) => orch.set_tunnel_state(&name(i), action).await.map(drop),
        Op::Rotate(i) => orch.rotate_ip(&name(i)).await.map(drop),
        Op::Rebind(i) => orch.auto_rebind(&name(i)).await.map(drop),
        Op::MovePort(i, port) => {
            let patch = ProxyConfigPatch {
                port: Some(port),
                ..Default::default()
            };
            orch.update_proxy_config(&name(i), &patch).await.map(drop)
        }
        Op::Refresh => {
            let _ = orch.refresh_all().await;
            Ok(())
        }
        Op::Fault(i, fault, on) => {
            sim.set_fault(INTERFACES[i], fault, on).await;
            Ok(())
        }
        Op::Unplug(i) => {
            sim.remove_modem(INTERFACES[i]).await;
            Ok(())
        }
        Op::Replug(i) => {
            if orch.registry().get(&name(i)).await.is_none() {
                sim.add_modem(INTERFACES[i], Some("10.64.1.1")).await;
            }
            Ok(())
        }
        Op::Disconnect(i) => {
            sim.set_ip(INTERFACES[i], None).await;
            Ok(())
        }
        Op::BreakTunnel(i) => {
            sim.break_tunnel(INTERFACES[i]).await;
            Ok(())
        }
    };
    prop_assert!(result.is_ok(), "registry refused a write: {:?}", result);
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_registry_stays_consistent(ops in prop::collection::vec(op(), 1..40)) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        rt.block_on(async {
            let sim = Arc::new(SimulatedBackend::seeded());
            let orch = Orchestrator::new(
                Collaborators::from_backend(sim.clone()),
                TimeoutConfig::default(),
            );
            let _ = orch.refresh_all().await;
            check_registry(&orch).await?;

            for op in ops {
                apply(&sim, &orch, op).await?;
                check_registry(&orch).await?;
            }
            Ok::<(), TestCaseError>(())
        })?;
    }
}
