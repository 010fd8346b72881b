//! End-to-end bridge behavior: one session, a real worker thread, a fake
//! native engine
//!
//! These tests drive the full path: facade enqueue → worker dispatch →
//! message poll → continuation/broadcast delivery.

use std::future::{poll_fn, Future};
use std::pin::Pin;
use std::sync::{Arc, Barrier, Mutex};
use std::task::Poll;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use motiv_client::{Pending, Session};
use motiv_engine::testing::{sample_manifest, EngineProbe, FakeEngine};
use motiv_engine::{BridgeConfig, PropertyEvent, ServerState};
use motiv_protocol::{
    BindableInstanceHandle, BridgeError, DrawEntry, DrawOptions, DrawTarget, ErrorKind,
    InstanceSelector, PropertyKind, PropertyValue,
};

// =============================================================================
// Harness
// =============================================================================

type SharedProbes = Arc<Mutex<Vec<EngineProbe>>>;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn session_with_config(config: BridgeConfig) -> (Session<FakeEngine>, SharedProbes) {
    init_tracing();
    let probes: SharedProbes = Arc::new(Mutex::new(Vec::new()));
    let factory_probes = Arc::clone(&probes);
    let session = Session::new(config, move || {
        let engine = FakeEngine::new();
        if let Ok(mut slot) = factory_probes.lock() {
            slot.push(engine.probe());
        }
        engine
    });
    (session, probes)
}

fn new_session() -> (Session<FakeEngine>, SharedProbes) {
    session_with_config(BridgeConfig::default())
}

/// Poll messages until the pending operation resolves
async fn drive<T>(
    session: &Session<FakeEngine>,
    pending: Pending<T>,
) -> Result<T, BridgeError> {
    let mut pending = pending;
    for _ in 0..500 {
        session.poll_messages().expect("poll");
        let polled = poll_fn(|cx| Poll::Ready(Pin::new(&mut pending).poll(cx))).await;
        if let Poll::Ready(result) = polled {
            return result;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("command did not complete in time");
}

// =============================================================================
// Ordering & correlation
// =============================================================================

#[tokio::test]
async fn handle_is_usable_before_its_creation_completes() {
    let (session, _) = new_session();
    session.acquire("test").expect("acquire");

    // Enqueue the load, then immediately enumerate using the handle the
    // call returned synchronously. FIFO order makes this race-free even
    // though the load is logically asynchronous.
    let (file, loaded) = session.load_file(sample_manifest()).expect("enqueue load");
    let names = session.list_artboards(file).expect("enqueue list");

    drive(&session, loaded).await.expect("load succeeds");
    let names = drive(&session, names).await.expect("list succeeds");
    assert_eq!(names, vec!["Main".to_string()]);

    session.release("test").expect("release");
}

#[tokio::test]
async fn chained_creations_resolve_in_submission_order() {
    let (session, _) = new_session();
    session.acquire("test").expect("acquire");

    let (file, _loaded) = session.load_file(sample_manifest()).expect("load");
    let (artboard, _ab_done) = session
        .instantiate_artboard(file, InstanceSelector::ByName {
            name: "Main".to_string(),
        })
        .expect("artboard");
    let (machine, sm_done) = session
        .instantiate_state_machine(artboard, InstanceSelector::Default)
        .expect("machine");

    // Only the tail of the chain needs driving; everything ahead of it is
    // already ordered.
    drive(&session, sm_done).await.expect("chain succeeds");
    session.advance_state_machine(machine, 0.05).expect("advance");

    session.release("test").expect("release");
}

#[tokio::test]
async fn exactly_one_terminal_message_per_request() {
    let (session, _) = new_session();
    session.acquire("test").expect("acquire");

    let (file, loaded) = session.load_file(sample_manifest()).expect("load");
    drive(&session, loaded).await.expect("load succeeds");

    let names = session.list_artboards(file).expect("enqueue");
    drive(&session, names).await.expect("resolves once");

    // The queue is idle now; nothing further may arrive for that request.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(session.poll_messages().expect("poll"), 0);

    session.release("test").expect("release");
}

#[tokio::test]
async fn dropping_a_pending_discards_its_late_response() {
    let (session, _) = new_session();
    session.acquire("test").expect("acquire");

    let (file, loaded) = session.load_file(sample_manifest()).expect("load");
    drive(&session, loaded).await.expect("load succeeds");

    let abandoned = session.list_artboards(file).expect("enqueue");
    drop(abandoned);

    // The worker still answers; the poll drops the response silently and
    // the session keeps working.
    let follow_up = session.list_artboards(file).expect("enqueue");
    let names = drive(&session, follow_up).await.expect("still healthy");
    assert_eq!(names.len(), 1);

    session.release("test").expect("release");
}

// =============================================================================
// Handle lifetime
// =============================================================================

#[tokio::test]
async fn delete_then_use_always_yields_invalid_handle() {
    let (session, _) = new_session();
    session.acquire("test").expect("acquire");

    let mut rng = StdRng::seed_from_u64(0x5eed);
    for _ in 0..25 {
        let (file, loaded) = session.load_file(sample_manifest()).expect("load");
        drive(&session, loaded).await.expect("load succeeds");

        session.release_file(file).expect("enqueue release");
        if rng.gen_bool(0.3) {
            // Double free: error on the broadcast, never fatal.
            session.release_file(file).expect("enqueue second release");
        }

        for _ in 0..rng.gen_range(1..4usize) {
            let pending = session.list_artboards(file).expect("enqueue use-after-free");
            let err = drive(&session, pending).await.expect_err("must fail");
            assert_eq!(err.kind(), ErrorKind::InvalidHandle);
        }
    }

    // The worker survived every bad sequence.
    assert_eq!(session.server_state(), ServerState::Running);
    session.release("test").expect("release");
}

#[tokio::test]
async fn double_free_surfaces_on_the_error_broadcast() {
    let (session, _) = new_session();
    session.acquire("test").expect("acquire");
    let mut errors = session.error_events();

    let (file, loaded) = session.load_file(sample_manifest()).expect("load");
    drive(&session, loaded).await.expect("load succeeds");

    session.release_file(file).expect("first release");
    session.release_file(file).expect("second release enqueues fine");

    let mut seen = None;
    for _ in 0..500 {
        session.poll_messages().expect("poll");
        if let Some(error) = errors.try_next() {
            seen = Some(error);
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    let error = seen.expect("double free must be broadcast");
    assert_eq!(error.kind(), ErrorKind::InvalidHandle);

    session.release("test").expect("release");
}

// =============================================================================
// Property subscriptions
// =============================================================================

async fn bound_instance(
    session: &Session<FakeEngine>,
) -> BindableInstanceHandle {
    let (file, loaded) = session.load_file(sample_manifest()).expect("load");
    drive(session, loaded).await.expect("load succeeds");
    let (instance, bound) = session
        .bind_instance(file, Some("hud".to_string()))
        .expect("bind");
    drive(session, bound).await.expect("bind succeeds");
    instance
}

#[tokio::test]
async fn n_sets_yield_n_broadcasts_in_order() {
    let (session, _) = new_session();
    session.acquire("test").expect("acquire");
    let instance = bound_instance(&session).await;

    let mut stream = session
        .subscribe(instance, "score", PropertyKind::Number)
        .expect("subscribe");

    for n in 1..=5 {
        session
            .set_property(instance, "score", PropertyValue::Number(f64::from(n)))
            .expect("set");
    }

    let mut seen = Vec::new();
    for _ in 0..500 {
        session.poll_messages().expect("poll");
        while let Some(event) = stream.try_next() {
            seen.push(event);
        }
        if seen.len() >= 5 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    let expected: Vec<PropertyEvent> = (1..=5)
        .map(|n| PropertyEvent::Changed(PropertyValue::Number(f64::from(n))))
        .collect();
    assert_eq!(seen, expected);

    session.release("test").expect("release");
}

#[tokio::test]
async fn slow_listener_overflow_drops_oldest_observably() {
    let (session, _) = session_with_config(BridgeConfig {
        broadcast_capacity: 2,
        ..BridgeConfig::default()
    });
    session.acquire("test").expect("acquire");
    let instance = bound_instance(&session).await;

    let mut stream = session
        .subscribe(instance, "score", PropertyKind::Number)
        .expect("subscribe");

    for n in 1..=6 {
        session
            .set_property(instance, "score", PropertyValue::Number(f64::from(n)))
            .expect("set");
    }
    // Fence: a driven query behind the sets proves they all executed and
    // published while the listener never read.
    let fence = session
        .get_property(instance, "score", PropertyKind::Number)
        .expect("fence");
    let latest = drive(&session, fence).await.expect("fence resolves");
    assert_eq!(latest, PropertyValue::Number(6.0));

    assert_eq!(stream.try_next(), Some(PropertyEvent::Lagged { missed: 4 }));
    assert_eq!(
        stream.try_next(),
        Some(PropertyEvent::Changed(PropertyValue::Number(5.0)))
    );
    assert_eq!(
        stream.try_next(),
        Some(PropertyEvent::Changed(PropertyValue::Number(6.0)))
    );
    assert_eq!(stream.try_next(), None);

    session.release("test").expect("release");
}

#[tokio::test]
async fn unsubscribe_silences_further_mutations() {
    let (session, _) = new_session();
    session.acquire("test").expect("acquire");
    let instance = bound_instance(&session).await;

    let mut stream = session
        .subscribe(instance, "label", PropertyKind::Text)
        .expect("subscribe");

    session
        .set_property(instance, "label", PropertyValue::Text("go".to_string()))
        .expect("set");
    let fence = session
        .get_property(instance, "label", PropertyKind::Text)
        .expect("fence");
    drive(&session, fence).await.expect("fence resolves");
    assert_eq!(
        stream.try_next(),
        Some(PropertyEvent::Changed(PropertyValue::Text("go".to_string())))
    );

    assert!(session.unsubscribe(instance, "label").expect("unsubscribe"));

    session
        .set_property(instance, "label", PropertyValue::Text("gone".to_string()))
        .expect("set");
    let fence = session
        .get_property(instance, "label", PropertyKind::Text)
        .expect("fence");
    drive(&session, fence).await.expect("fence resolves");

    // Topic removed: the stream ended and nothing further arrives.
    assert_eq!(stream.next().await, None);

    session.release("test").expect("release");
}

#[tokio::test]
async fn trigger_fires_reach_subscribers() {
    let (session, _) = new_session();
    session.acquire("test").expect("acquire");
    let instance = bound_instance(&session).await;

    let mut stream = session
        .subscribe(instance, "ping", PropertyKind::Trigger)
        .expect("subscribe");

    session.fire_trigger(instance, "ping").expect("fire");
    let fence = session
        .get_property(instance, "score", PropertyKind::Number)
        .expect("fence");
    drive(&session, fence).await.expect("fence resolves");

    assert_eq!(
        stream.try_next(),
        Some(PropertyEvent::Changed(PropertyValue::Trigger))
    );

    session.release("test").expect("release");
}

// =============================================================================
// Fire-and-forget failures & settling
// =============================================================================

#[tokio::test]
async fn fire_and_forget_failure_lands_on_error_broadcast() {
    let (session, _) = new_session();
    session.acquire("test").expect("acquire");
    let mut errors = session.error_events();

    // Never bound: the set must fail, and only the broadcast can tell.
    let ghost = BindableInstanceHandle::from_raw(4096);
    session
        .set_property(ghost, "score", PropertyValue::Number(1.0))
        .expect("enqueue");

    let mut seen = None;
    for _ in 0..500 {
        session.poll_messages().expect("poll");
        if let Some(error) = errors.try_next() {
            seen = Some(error);
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    assert_eq!(seen.expect("broadcast arrives").kind(), ErrorKind::InvalidHandle);

    session.release("test").expect("release");
}

#[tokio::test]
async fn settle_notification_fires_once_per_edge() {
    let (session, _) = new_session();
    session.acquire("test").expect("acquire");
    let mut settles = session.settle_events();

    let (file, _) = session.load_file(sample_manifest()).expect("load");
    let (artboard, _) = session
        .instantiate_artboard(file, InstanceSelector::Default)
        .expect("artboard");
    let (machine, created) = session
        .instantiate_state_machine(artboard, InstanceSelector::Default)
        .expect("machine");
    drive(&session, created).await.expect("chain succeeds");

    // settle_after is 0.2 in the sample manifest
    session.advance_state_machine(machine, 0.1).expect("advance");
    session.advance_state_machine(machine, 0.15).expect("advance");
    // Already settled; no second edge.
    session.advance_state_machine(machine, 0.1).expect("advance");

    let mut events = Vec::new();
    for _ in 0..500 {
        session.poll_messages().expect("poll");
        while let Some(handle) = settles.try_next() {
            events.push(handle);
        }
        if !events.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    // Drain any stragglers before asserting the count.
    let fence = session.list_artboards(file).expect("fence");
    drive(&session, fence).await.expect("fence resolves");
    while let Some(handle) = settles.try_next() {
        events.push(handle);
    }

    assert_eq!(events, vec![machine]);
    session.release("test").expect("release");
}

// =============================================================================
// Batched draws
// =============================================================================

#[tokio::test]
async fn hundred_draw_entries_complete_in_one_message() {
    let (session, probes) = new_session();
    session.acquire("test").expect("acquire");

    let (file, _) = session.load_file(sample_manifest()).expect("load");
    let (artboard, _) = session
        .instantiate_artboard(file, InstanceSelector::Default)
        .expect("artboard");
    let (surface, created) = session.create_surface(640, 480).expect("surface");
    drive(&session, created).await.expect("setup resolves");

    let entries: Vec<DrawEntry> = (0..100)
        .map(|_| DrawEntry {
            artboard,
            state_machine: None,
            draw_key: Some(session.draw_key()),
            options: DrawOptions::default(),
        })
        .collect();

    let pending = session
        .draw(DrawTarget::Surface { handle: surface }, Some(0xff202020), entries)
        .expect("enqueue draw");

    // Count every message observed until the batch resolves: it must be
    // exactly one, not one per entry.
    let mut pending = pending;
    let mut messages = 0usize;
    let drawn = loop {
        messages += session.poll_messages().expect("poll");
        let polled = poll_fn(|cx| Poll::Ready(Pin::new(&mut pending).poll(cx))).await;
        if let Poll::Ready(result) = polled {
            break result.expect("draw succeeds");
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    };

    assert_eq!(drawn, 100);
    assert_eq!(messages, 1);

    let probes = probes.lock().expect("probes");
    assert_eq!(probes[0].draw_batches(), vec![100]);
    drop(probes);

    session.release("test").expect("release");
}

#[tokio::test]
async fn invalid_draw_entries_are_skipped_not_fatal() {
    let (session, probes) = new_session();
    session.acquire("test").expect("acquire");
    let mut errors = session.error_events();

    let (file, _) = session.load_file(sample_manifest()).expect("load");
    let (artboard, _) = session
        .instantiate_artboard(file, InstanceSelector::Default)
        .expect("artboard");
    let (ghost, _) = session
        .instantiate_artboard(file, InstanceSelector::ByName {
            name: "Nope".to_string(),
        })
        .expect("enqueue doomed artboard");
    let (surface, created) = session.create_surface(64, 64).expect("surface");
    drive(&session, created).await.expect("setup resolves");

    let entries = vec![
        DrawEntry {
            artboard,
            state_machine: None,
            draw_key: None,
            options: DrawOptions::default(),
        },
        DrawEntry {
            // Creation failed, so this handle never bound.
            artboard: ghost,
            state_machine: None,
            draw_key: Some(session.draw_key()),
            options: DrawOptions::default(),
        },
    ];

    let pending = session
        .draw(DrawTarget::Surface { handle: surface }, None, entries)
        .expect("enqueue draw");
    let drawn = drive(&session, pending).await.expect("batch still succeeds");
    assert_eq!(drawn, 1);

    let skip = errors.try_next().expect("skip is reported");
    assert_eq!(skip.kind(), ErrorKind::InvalidHandle);

    let probes = probes.lock().expect("probes");
    assert_eq!(probes[0].draw_batches(), vec![1]);
    drop(probes);

    session.release("test").expect("release");
}

// =============================================================================
// Reference counting & teardown
// =============================================================================

#[test]
fn concurrent_holders_share_one_worker() {
    let (session, probes) = new_session();
    let session = Arc::new(session);
    let barrier = Arc::new(Barrier::new(2));

    std::thread::scope(|scope| {
        for i in 0..2 {
            let session = Arc::clone(&session);
            let barrier = Arc::clone(&barrier);
            scope.spawn(move || {
                let tag = format!("thread-{i}");
                session.acquire(&tag).expect("acquire");
                // Both hold a reference at this point.
                barrier.wait();
                session.release(&tag).expect("release");
            });
        }
    });

    let probes = probes.lock().expect("probes");
    assert_eq!(probes.len(), 1, "worker started once, not per acquire");
    assert_eq!(probes[0].init_count(), 1);
    assert_eq!(probes[0].teardown_count(), 1);
}

#[tokio::test]
async fn release_to_zero_stops_the_worker_and_rejects_enqueues() {
    let (session, probes) = new_session();
    session.acquire("a").expect("acquire");

    let (file, loaded) = session.load_file(sample_manifest()).expect("load");
    drive(&session, loaded).await.expect("load succeeds");

    session.release("a").expect("release");
    assert_eq!(session.server_state(), ServerState::Stopped);

    let err = session.list_artboards(file).expect_err("enqueue must fail");
    assert_eq!(err.kind(), ErrorKind::Lifecycle);

    // Re-acquire: fresh worker, fresh (empty) registry - the old handle is
    // gone even though the id space marches on.
    session.acquire("b").expect("re-acquire");
    let pending = session.list_artboards(file).expect("enqueue works again");
    let err = drive(&session, pending).await.expect_err("stale handle");
    assert_eq!(err.kind(), ErrorKind::InvalidHandle);
    session.release("b").expect("release");

    let probes = probes.lock().expect("probes");
    assert_eq!(probes.len(), 2, "each acquire cycle gets its own engine");
    assert_eq!(probes[0].init_count(), 1);
    assert_eq!(probes[0].teardown_count(), 1);
    assert_eq!(probes[1].init_count(), 1);
    assert_eq!(probes[1].teardown_count(), 1);
}

#[tokio::test]
async fn release_delivers_outcomes_of_still_pending_commands() {
    let (session, _) = new_session();
    session.acquire("a").expect("acquire");

    // Never polled before release; teardown itself must resolve it.
    let pending = session
        .get_property(BindableInstanceHandle::from_raw(77), "x", PropertyKind::Number)
        .expect("enqueue");
    session.release("a").expect("release");

    let err = pending.await.expect_err("resolved during teardown");
    assert_eq!(err.kind(), ErrorKind::InvalidHandle);
}

#[test]
fn unbalanced_release_fails_loudly() {
    let (session, _) = new_session();
    session.acquire("only").expect("acquire");

    let err = session.release("stranger").expect_err("unknown tag");
    assert_eq!(err.kind(), ErrorKind::Lifecycle);

    session.release("only").expect("balanced release");
    let err = session.release("only").expect_err("double release");
    assert_eq!(err.kind(), ErrorKind::Lifecycle);
}

#[test]
fn poll_without_acquire_is_a_quiet_no_op() {
    let (session, _) = new_session();
    assert_eq!(session.poll_messages().expect("poll"), 0);
}
