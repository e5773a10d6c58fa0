use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Barrier;
use tokio::time::timeout;

use stitch_broker::domain::aggregate::AggregateDirectory;
use stitch_broker::domain::am_client::am_client_mock::{MockAggregateClient, MockOutcome};
use stitch_broker::domain::launcher::LauncherConfig;
use stitch_broker::domain::scs::scs::WorkflowResult;
use stitch_broker::domain::scs::scs_mock::MockScsClient;
use stitch_broker::domain::session::{SessionConfig, StitchingSession};
use stitch_broker::domain::topology::{Hop, Link, Node, Path, Stitching, Topology};
use stitch_broker::domain::util::id::{AggregateId, LinkId, NodeId, PathId, SliceId};
use stitch_broker::domain::vlan::VlanRange;
use stitch_broker::error::Error;
use stitch_broker::loader::rspec;

const AM_A: &str = "https://am-a.example.net";
const AM_B: &str = "https://am-b.example.net";
const AM_C: &str = "https://am-c.example.net";

// --- TEST SETUP HELPERS ---

fn node(id: &str, aggregate: &str) -> Node {
    Node { client_id: NodeId::new(id), aggregate: AggregateId::new(aggregate) }
}

fn hop(id: u32, aggregate: &str, translation: bool) -> Hop {
    Hop {
        id,
        aggregate: AggregateId::new(aggregate),
        vlan_range: VlanRange::from_spec("100-200").unwrap(),
        // Fixed suggestion keeps the negotiated tag deterministic.
        suggested_vlan: Some(100),
        vlan_translation: translation,
        import_vlans_from: None,
    }
}

/// An expanded topology with one stitched path across the given aggregates.
fn chain_topology(path_id: &str, hops: Vec<Hop>) -> Topology {
    let aggregates: Vec<AggregateId> = hops.iter().map(|h| h.aggregate.clone()).collect();
    Topology {
        nodes: hops
            .iter()
            .map(|h| node(&format!("host-{}", h.id), h.aggregate.as_str()))
            .collect(),
        links: vec![Link { client_id: LinkId::new(path_id), aggregates }],
        stitching: Some(Stitching {
            paths: vec![Path { id: PathId::new(path_id), hops }],
        }),
    }
}

/// Two nodes at two aggregates, no shared link, no stitching.
fn independent_topology() -> Topology {
    Topology {
        nodes: vec![node("host-a", AM_A), node("host-b", AM_B)],
        links: Vec::new(),
        stitching: None,
    }
}

mod workflow_json {
    use serde_json::{Value, json};

    pub fn hop_entry(url: &str, hop_id: u32, import: bool, deps: Vec<Value>) -> Value {
        json!({
            "aggregate_urn": format!("urn:publicid:IDN+{}", url),
            "aggregate_url": url,
            "hop_id": hop_id,
            "import_vlans": import,
            "dependencies": deps,
        })
    }
}

/// Builds a WorkflowResult for one path from json-shaped hop entries, the
/// same structure the computation service puts on the wire.
fn workflow_result(topology: &Topology, path_id: &str, entries: Vec<serde_json::Value>) -> WorkflowResult {
    let response = serde_json::json!({
        "code": { "geni_code": 0 },
        "value": {
            "service_rspec": rspec::to_xml(topology).unwrap(),
            "workflow_data": { path_id: { "dependencies": entries } },
        },
    });
    WorkflowResult::from_response(serde_json::from_value(response).unwrap()).unwrap()
}

fn empty_workflow_result(topology: &Topology) -> WorkflowResult {
    WorkflowResult {
        service_rspec: rspec::to_xml(topology).unwrap(),
        workflow_data: HashMap::new(),
    }
}

fn fast_config() -> SessionConfig {
    SessionConfig {
        max_attempts: 3,
        launcher: LauncherConfig {
            retry_pause: Duration::from_millis(10),
            dcn_retry_pause: Duration::from_millis(50),
        },
        directory: AggregateDirectory::default(),
    }
}

fn slice() -> SliceId {
    SliceId::new("urn:publicid:IDN+example+slice+stitch-test")
}

// --- SCENARIOS ---

/// Scenario A: two aggregates, no shared link. Both are ready at once, both
/// reservations run concurrently, and the computation service is called
/// exactly once. The barrier makes the test hang instead of pass if the
/// launcher were to serialize the two calls.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_independent_aggregates_run_concurrently() {
    let topology = independent_topology();
    let scs = Arc::new(MockScsClient::new(vec![Ok(empty_workflow_result(&topology))]));
    let am = Arc::new(
        MockAggregateClient::new(topology.clone()).with_barrier(Arc::new(Barrier::new(2))),
    );
    let session = StitchingSession::new(scs.clone(), am.clone(), fast_config());

    let combined = timeout(Duration::from_secs(5), session.run(&slice(), &topology))
        .await
        .expect("launcher must dispatch both aggregates concurrently")
        .unwrap();

    assert_eq!(scs.call_count(), 1);
    assert_eq!(am.reserve_count(), 2);
    assert_eq!(am.peak_in_flight(), 2);
    assert_eq!(combined.nodes.len(), 2);
}

/// Scenario B: chain A -> B -> C. Dispatch order must follow the dependency
/// graph strictly, and the combined manifest keeps the hops in path order.
#[tokio::test]
async fn test_chain_is_reserved_in_dependency_order() {
    let topology = chain_topology(
        "link-abc",
        vec![hop(1, AM_A, false), hop(2, AM_B, false), hop(3, AM_C, false)],
    );
    let wf = workflow_result(
        &topology,
        "link-abc",
        vec![workflow_json::hop_entry(
            AM_C,
            3,
            true,
            vec![workflow_json::hop_entry(
                AM_B,
                2,
                true,
                vec![workflow_json::hop_entry(AM_A, 1, false, vec![])],
            )],
        )],
    );
    let scs = Arc::new(MockScsClient::new(vec![Ok(wf)]));
    let am = Arc::new(MockAggregateClient::new(topology.clone()));
    let session = StitchingSession::new(scs.clone(), am.clone(), fast_config());

    let combined = session.run(&slice(), &topology).await.unwrap();

    assert_eq!(
        am.reserve_order(),
        vec![AggregateId::new(AM_A), AggregateId::new(AM_B), AggregateId::new(AM_C)]
    );
    assert_eq!(scs.call_count(), 1);

    let path = &combined.stitching.as_ref().unwrap().paths[0];
    assert_eq!(path.hops.iter().map(|h| h.id).collect::<Vec<_>>(), vec![1, 2, 3]);
    // A took its suggested tag and the others imported it.
    for hop in &path.hops {
        assert_eq!(hop.vlan_range.single(), Some(100));
    }
}

/// Scenario C: aggregate B rejects the shared tag once and succeeds on the
/// local retry with another tag from its range. One extra pause cycle, no
/// recomputation.
#[tokio::test]
async fn test_vlan_conflict_is_retried_locally() {
    // B can translate, so after the conflict it may pick a fresh tag.
    let topology = chain_topology("link-ab", vec![hop(1, AM_A, false), hop(2, AM_B, true)]);
    let wf = workflow_result(
        &topology,
        "link-ab",
        vec![workflow_json::hop_entry(
            AM_B,
            2,
            true,
            vec![workflow_json::hop_entry(AM_A, 1, false, vec![])],
        )],
    );
    let scs = Arc::new(MockScsClient::new(vec![Ok(wf)]));
    let am = Arc::new(MockAggregateClient::new(topology.clone()));
    am.script(&AggregateId::new(AM_B), vec![MockOutcome::VlanConflict, MockOutcome::Reserve]);
    let session = StitchingSession::new(scs.clone(), am.clone(), fast_config());

    let combined = session.run(&slice(), &topology).await.unwrap();

    assert_eq!(scs.call_count(), 1, "a local conflict must not trigger recomputation");
    assert_eq!(
        am.reserve_order(),
        vec![AggregateId::new(AM_A), AggregateId::new(AM_B), AggregateId::new(AM_B)]
    );

    let path = &combined.stitching.as_ref().unwrap().paths[0];
    let tag_b = path.hops[1].vlan_range.single().unwrap();
    // The conflicted tag (A's 100) was withdrawn from B's range.
    assert_ne!(tag_b, 100);
    assert!(VlanRange::from_spec("100-200").unwrap().contains(tag_b));
}

/// Scenario D: the computation service hands back a cyclic workflow. The
/// cycle is rejected before any reservation call goes out.
#[tokio::test]
async fn test_cyclic_workflow_fails_before_any_dispatch() {
    let topology = chain_topology("link-ab", vec![hop(1, AM_A, false), hop(2, AM_B, false)]);
    let wf = workflow_result(
        &topology,
        "link-ab",
        vec![
            workflow_json::hop_entry(
                AM_A,
                1,
                false,
                vec![workflow_json::hop_entry(AM_B, 2, false, vec![])],
            ),
            workflow_json::hop_entry(
                AM_B,
                2,
                false,
                vec![workflow_json::hop_entry(AM_A, 1, false, vec![])],
            ),
        ],
    );
    let scs = Arc::new(MockScsClient::new(vec![Ok(wf)]));
    let am = Arc::new(MockAggregateClient::new(topology.clone()));
    let session = StitchingSession::new(scs, am.clone(), fast_config());

    let err = session.run(&slice(), &topology).await.unwrap_err();

    assert!(matches!(err, Error::DependencyCycleError(_)));
    assert_eq!(am.reserve_count(), 0);
}

/// A circuit-level failure re-invokes the computation service with the
/// failed aggregate's hops excluded, then the second attempt goes through.
#[tokio::test]
async fn test_circuit_failure_triggers_recomputation_with_exclusions() {
    let topology = chain_topology("link-ab", vec![hop(1, AM_A, false), hop(2, AM_B, false)]);
    let make_wf = |topology: &Topology| {
        workflow_result(
            topology,
            "link-ab",
            vec![workflow_json::hop_entry(
                AM_B,
                2,
                true,
                vec![workflow_json::hop_entry(AM_A, 1, false, vec![])],
            )],
        )
    };
    let scs = Arc::new(MockScsClient::new(vec![Ok(make_wf(&topology)), Ok(make_wf(&topology))]));
    let am = Arc::new(MockAggregateClient::new(topology.clone()));
    am.script(&AggregateId::new(AM_B), vec![MockOutcome::CircuitFailed, MockOutcome::Reserve]);
    let session = StitchingSession::new(scs.clone(), am.clone(), fast_config());

    session.run(&slice(), &topology).await.unwrap();

    assert_eq!(scs.call_count(), 2);
    let exclusions = scs.received_exclusions();
    assert!(exclusions[0].is_empty());
    assert_eq!(exclusions[1], vec!["link-ab/2".to_string()]);
}

/// Repeated circuit failure exhausts the attempt budget and surfaces the
/// failing aggregate.
#[tokio::test]
async fn test_repeated_circuit_failure_exhausts_attempts() {
    let topology = chain_topology("link-ab", vec![hop(1, AM_A, false), hop(2, AM_B, false)]);
    let make_wf = |topology: &Topology| {
        workflow_result(
            topology,
            "link-ab",
            vec![workflow_json::hop_entry(
                AM_B,
                2,
                true,
                vec![workflow_json::hop_entry(AM_A, 1, false, vec![])],
            )],
        )
    };
    let scs = Arc::new(MockScsClient::new(vec![
        Ok(make_wf(&topology)),
        Ok(make_wf(&topology)),
        Ok(make_wf(&topology)),
    ]));
    let am = Arc::new(MockAggregateClient::new(topology.clone()));
    am.script(
        &AggregateId::new(AM_B),
        vec![MockOutcome::CircuitFailed, MockOutcome::CircuitFailed, MockOutcome::CircuitFailed],
    );
    let session = StitchingSession::new(scs.clone(), am.clone(), fast_config());

    let err = session.run(&slice(), &topology).await.unwrap_err();

    assert_eq!(scs.call_count(), 3);
    match err {
        Error::CircuitFailedError { aggregate, .. } => {
            assert_eq!(aggregate, AggregateId::new(AM_B));
        }
        other => panic!("Expected CircuitFailedError, got {:?}", other),
    }
}

/// Any other reservation failure is fatal: no launcher retry, no
/// recomputation, and the session never rolls back completed aggregates on
/// its own.
#[tokio::test]
async fn test_fatal_reservation_failure_aborts_without_rollback() {
    let topology = chain_topology("link-ab", vec![hop(1, AM_A, false), hop(2, AM_B, false)]);
    let wf = workflow_result(
        &topology,
        "link-ab",
        vec![workflow_json::hop_entry(
            AM_B,
            2,
            true,
            vec![workflow_json::hop_entry(AM_A, 1, false, vec![])],
        )],
    );
    let scs = Arc::new(MockScsClient::new(vec![Ok(wf)]));
    let am = Arc::new(MockAggregateClient::new(topology.clone()));
    am.script(
        &AggregateId::new(AM_B),
        vec![MockOutcome::Fatal("credential rejected".to_string())],
    );
    let session = StitchingSession::new(scs.clone(), am.clone(), fast_config());

    let err = session.run(&slice(), &topology).await.unwrap_err();

    match err {
        Error::ReservationError { aggregate, reason } => {
            assert_eq!(aggregate, AggregateId::new(AM_B));
            assert!(reason.contains("credential rejected"));
        }
        other => panic!("Expected ReservationError, got {:?}", other),
    }
    assert_eq!(scs.call_count(), 1);
    // A completed before B failed; rollback is the caller's decision.
    assert_eq!(am.deleted().len(), 0);
}

/// A service failure consumes an attempt; the next attempt may succeed.
#[tokio::test]
async fn test_service_failure_consumes_one_attempt() {
    let topology = independent_topology();
    let scs = Arc::new(MockScsClient::new(vec![
        Err(Error::ServiceFailedError { code: 2, output: "busy".to_string() }),
        Ok(empty_workflow_result(&topology)),
    ]));
    let am = Arc::new(MockAggregateClient::new(topology.clone()));
    let session = StitchingSession::new(scs.clone(), am.clone(), fast_config());

    session.run(&slice(), &topology).await.unwrap();

    assert_eq!(scs.call_count(), 2);
    assert_eq!(am.reserve_count(), 2);
}
