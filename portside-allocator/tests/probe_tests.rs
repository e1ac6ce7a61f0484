use portside_allocator::probe::mock::ScriptedProbe;
use portside_allocator::{AllocError, PortProbe, ProbeOutcome, TcpProbe};
use std::net::TcpListener as StdTcpListener;

/// Picks a port that was free a moment ago. Probing it immediately after
/// can in principle race another process; acceptable for tests.
fn free_port() -> u16 {
    let listener = StdTcpListener::bind("0.0.0.0:0").expect("bind ephemeral");
    listener.local_addr().expect("local addr").port()
}

// ── TcpProbe ─────────────────────────────────────────────────────

#[tokio::test]
async fn unbound_port_is_available() {
    let port = free_port();
    let probe = TcpProbe::default();
    assert_eq!(probe.probe(port).await.unwrap(), ProbeOutcome::Available);
}

#[tokio::test]
async fn bound_port_is_occupied() {
    let listener = StdTcpListener::bind("0.0.0.0:0").expect("bind ephemeral");
    let port = listener.local_addr().expect("local addr").port();

    let probe = TcpProbe::default();
    assert_eq!(probe.probe(port).await.unwrap(), ProbeOutcome::Occupied);

    drop(listener);
    assert_eq!(probe.probe(port).await.unwrap(), ProbeOutcome::Available);
}

#[tokio::test]
async fn probe_leaves_port_free() {
    // The bind-and-close round trip must not keep the port occupied.
    let port = free_port();
    let probe = TcpProbe::default();
    probe.probe(port).await.unwrap();

    let listener = StdTcpListener::bind(("0.0.0.0", port));
    assert!(listener.is_ok(), "port still occupied after probe");
}

// ── ScriptedProbe ────────────────────────────────────────────────

#[tokio::test]
async fn scripted_probe_defaults_to_available() {
    let probe = ScriptedProbe::new();
    assert_eq!(probe.probe(3000).await.unwrap(), ProbeOutcome::Available);
}

#[tokio::test]
async fn scripted_probe_occupy_and_vacate() {
    let probe = ScriptedProbe::new();
    probe.occupy(3000);
    assert_eq!(probe.probe(3000).await.unwrap(), ProbeOutcome::Occupied);

    probe.vacate(3000);
    assert_eq!(probe.probe(3000).await.unwrap(), ProbeOutcome::Available);
}

#[tokio::test]
async fn scripted_probe_failure_surfaces_probe_error() {
    let probe = ScriptedProbe::new();
    probe.fail(3000);

    let err = probe.probe(3000).await.unwrap_err();
    assert!(matches!(err, AllocError::Probe { port: 3000, .. }));
}

#[tokio::test]
async fn scripted_probe_records_order() {
    let probe = ScriptedProbe::new();
    probe.probe(3002).await.unwrap();
    probe.probe(3000).await.unwrap();
    probe.probe(3001).await.unwrap();
    assert_eq!(probe.probed(), vec![3002, 3000, 3001]);
}
