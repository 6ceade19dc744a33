//! End-to-end: downlink traffic recorded into a playback, saved, restored
//! into a fresh playback and replayed onto a second scene.

use std::sync::{Arc, Mutex};

use serde_json::json;
use vuer_core::core::store_ops::fuse;
use vuer_core::entities::events::{add_op, remove_op, set_op, update_op, upsert_op};
use vuer_core::entities::node::find_by_key;
use vuer_core::entities::scene::default_scene;
use vuer_core::entities::ChildrenKey;
use vuer_core::runner;
use vuer_core::{ClientEvent, Frame, Node, Playback, PlaybackSettings, SceneStore, ServerEvent, Store};

fn session() -> Vec<ServerEvent> {
    vec![
        set_op(&default_scene().with_attr("up", json!([0, 0, 1])), Some(0.0)),
        add_op(vec![Node::keyed("group", "Group")], None, Some(1.0)),
        add_op(vec![Node::keyed("ball", "Sphere")], Some("group"), Some(2.0)),
        upsert_op(
            vec![Node::keyed("ball", "Sphere").with_attr("radius", 2)],
            Some("group"),
            Some(3.0),
        ),
        add_op(vec![Node::keyed("bg", "Plane")], Some("bgChildren"), Some(4.0)),
        update_op(vec![Node::keyed("bg", "").with_attr("color", "blue")], Some(5.0)),
        remove_op(vec!["group".into()], Some(6.0)),
    ]
}

#[test]
fn recorded_session_survives_save_and_restore() {
    let downlink = Store::<ServerEvent>::new();
    let live = SceneStore::new();
    let _live = live.bind(&downlink);

    let recorder = Arc::new(Mutex::new(Playback::new()));
    recorder.lock().unwrap().toggle_recording();
    let _rec = Playback::record_from(&recorder, &downlink);

    for event in session() {
        downlink.publish(event);
    }
    downlink.scheduler().run_until_idle();

    let saved = serde_json::to_string(&recorder.lock().unwrap().key_frames().to_vec()).unwrap();
    let frames: Vec<Frame> = serde_json::from_str(&saved).unwrap();
    assert_eq!(frames.len(), 7);

    let mut restored = Playback::new();
    restored.load_frames(frames);
    assert_eq!((restored.start(), restored.end(), restored.curr()), (0, 6, 0));

    let replay = SceneStore::new();
    let _replay = replay.bind(restored.store());
    restored.reset();
    for _ in 0..6 {
        restored.seek_next();
    }
    restored.store().scheduler().run_until_idle();

    assert_eq!(restored.curr(), 6);
    assert_eq!(*replay.snapshot(), *live.snapshot());

    let tree = live.snapshot();
    assert!(find_by_key(&tree, "ball", &ChildrenKey::ALL).is_none());
    let bg = find_by_key(&tree, "bg", &ChildrenKey::ALL).unwrap();
    assert_eq!(bg.attr("color"), Some(&json!("blue")));
    assert_eq!(tree.attr("up"), Some(&json!([0, 0, 1])));
}

#[test]
fn looping_replay_stops_after_one_pass() {
    let settings = PlaybackSettings {
        loop_enabled: true,
        fps: 24.0,
        ..Default::default()
    };
    let report = runner::replay(session(), &settings).unwrap();
    assert_eq!(report.retained, 7);
    assert_eq!(report.replayed, 7);
    assert!(report.converged());
    assert!(report.settings.loop_enabled);
}

#[test]
fn fused_uplink_runs_both_reducer_chains() {
    let tagging = Store::<ClientEvent>::new();
    tagging.add_reducer("CAMERA_MOVE", |mut e: ClientEvent| {
        e.key = Some("defaultCamera".into());
        e
    });
    let stamping = Store::<ClientEvent>::new();
    stamping.add_reducer("CAMERA_MOVE", |mut e: ClientEvent| {
        e.value = Some(json!({ "position": [0, 1, 2] }));
        e
    });

    let uplink = fuse(&tagging, &stamping);
    let out = uplink.publish(ClientEvent::new("CAMERA_MOVE", None, None));
    assert_eq!(out.key.as_deref(), Some("defaultCamera"));
    assert_eq!(out.value, Some(json!({ "position": [0, 1, 2] })));

    // Registrations made after fusing stay on their own store.
    stamping.add_reducer("CAMERA_MOVE", |mut e: ClientEvent| {
        e.key = None;
        e
    });
    let again = uplink.publish(ClientEvent::new("CAMERA_MOVE", None, None));
    assert_eq!(again.key.as_deref(), Some("defaultCamera"));

    let frame = ServerEvent::from(again);
    assert_eq!(frame.data["key"], json!("defaultCamera"));
}
