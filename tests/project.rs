use luma_graph::{BlockManager, MergeMode, NodeId, ProjectState, PROJECT_FORMAT_VERSION};
use serde_json::json;

/// value -> dimmer intensity, color -> dimmer color, dimmer -> monitor
fn build_chain(manager: &mut BlockManager) {
    let color = manager.create_block_instance("color", Some("c")).unwrap();
    let value = manager.create_block_instance("value", Some("v")).unwrap();
    manager.create_block_instance("dimmer", Some("d")).unwrap();
    let monitor = manager.create_block_instance("monitor", Some("m")).unwrap();
    assert!(manager.connect_by_uid("c|0", "d|0"));
    assert!(manager.connect_by_uid("v|0", "d|1"));
    assert!(manager.connect_by_uid("d|2", "m|0"));
    manager.set_block_state(monitor, &json!({ "width": 2, "height": 2 }));
    manager.set_block_state(color, &json!({ "h": 0.25, "s": 1.0, "v": 1.0 }));
    manager.set_block_state(value, &json!({ "value": 0.75 }));
}

fn monitor_rgb(manager: &BlockManager, uid: &str) -> (f64, f64, f64) {
    let node = manager.get_node_by_uid(&format!("{}|0", uid)).unwrap();
    let rgb = manager.graph().node(node).unwrap().data().rgb_at(1, 1);
    (rgb.r, rgb.g, rgb.b)
}

#[test]
fn project_round_trips_through_json() {
    let mut manager = BlockManager::with_builtin_blocks();
    build_chain(&mut manager);
    let d = manager.get_block_by_uid("d").unwrap();
    manager.graph_mut().set_htp_mode(NodeId::new(d, 1), false);
    let before = monitor_rgb(&manager, "m");

    let json = manager.project_json().unwrap();
    let project = ProjectState::from_json(&json).unwrap();
    assert_eq!(project.version, PROJECT_FORMAT_VERSION);
    assert_eq!(project.blocks.len(), 4);
    let mut connections = project.connections.clone();
    connections.sort();
    assert_eq!(connections, vec!["c|0->d|0", "d|2->m|0", "v|0->d|1"]);

    let mut restored = BlockManager::with_builtin_blocks();
    assert_eq!(restored.load_project_json(&json).unwrap(), 4);
    assert_eq!(restored.block_instance_count(), 4);
    let after = monitor_rgb(&restored, "m");
    assert!((before.0 - after.0).abs() < 1e-9);
    assert!((before.1 - after.1).abs() < 1e-9);
    assert!((before.2 - after.2).abs() < 1e-9);

    let d = restored.get_block_by_uid("d").unwrap();
    let intensity = restored.graph().node(NodeId::new(d, 1)).unwrap();
    assert_eq!(intensity.merge_mode(), MergeMode::Ltp);
}

#[test]
fn loading_replaces_the_current_graph() {
    let mut manager = BlockManager::with_builtin_blocks();
    manager.create_block_instance("trigger", Some("old")).unwrap();
    let project = ProjectState::from_json(
        r#"{
            "blocks": [
                { "name": "value", "uid": "a", "focused": true, "internalState": { "value": 1.0 } },
                { "name": "notRegistered", "uid": "b" },
                { "name": "monitor", "uid": "c", "nodeMergeModes": { "c|0": false } }
            ],
            "connections": ["a|0->c|0"]
        }"#,
    )
    .unwrap();

    assert_eq!(manager.load_project(&project), 2);
    assert!(manager.get_block_by_uid("old").is_none());
    let a = manager.get_block_by_uid("a").unwrap();
    assert_eq!(manager.focused_block(), Some(a));

    let input = manager.get_node_by_uid("c|0").unwrap();
    let node = manager.graph().node(input).unwrap();
    assert_eq!(node.merge_mode(), MergeMode::Ltp);
    assert_eq!(node.value(), 1.0);
}

#[test]
fn malformed_project_json_is_an_error() {
    let mut manager = BlockManager::with_builtin_blocks();
    assert!(manager.load_project_json("{ not json").is_err());
    assert!(manager
        .load_project_json(r#"{"blocks": [{"uid": "missing name"}]}"#)
        .is_err());
}

#[test]
fn combination_is_added_with_fresh_uids() {
    let mut manager = BlockManager::with_builtin_blocks();
    build_chain(&mut manager);
    let combination = manager.save_combination();
    assert_eq!(combination.blocks.len(), 4);
    assert_eq!(combination.connections.len(), 3);

    manager.set_displayed_group("copy");
    let added = manager.add_combination(&combination);
    assert_eq!(added.len(), 4);
    assert_eq!(manager.block_instance_count(), 8);
    assert_eq!(manager.blocks_in_displayed_group(), added);

    for id in &added {
        let uid = manager.graph().block_uid(*id).unwrap();
        assert!(!["c", "v", "d", "m"].contains(&uid));
    }
    assert_eq!(manager.graph().all_connections().len(), 6);

    // the copy computes the same output as the original chain
    let copied_monitor = manager.graph().block_uid(added[3]).unwrap().to_string();
    let (copy, original) = (monitor_rgb(&manager, &copied_monitor), monitor_rgb(&manager, "m"));
    assert!((copy.0 - original.0).abs() < 1e-9);
    assert!((copy.1 - original.1).abs() < 1e-9);
    assert!((copy.2 - original.2).abs() < 1e-9);

    let state = manager.get_block_state(added[0]).unwrap();
    assert_eq!(state.internal_state["group"], json!("copy"));
}

#[test]
fn combination_only_keeps_internal_connections() {
    let mut manager = BlockManager::with_builtin_blocks();
    let outside = manager.create_block_instance("value", Some("outside")).unwrap();
    manager.set_group_of_block(outside, "elsewhere");
    manager.create_block_instance("monitor", Some("inside")).unwrap();
    manager.create_block_instance("value", Some("feeder")).unwrap();
    manager.connect_by_uid("outside|0", "inside|0");
    manager.connect_by_uid("feeder|0", "inside|0");

    let combination = manager.save_combination();
    assert_eq!(combination.blocks.len(), 2);
    assert_eq!(combination.connections, vec!["feeder|0->inside|0"]);
}

#[test]
fn combination_never_wires_into_live_blocks() {
    let mut manager = BlockManager::with_builtin_blocks();
    let live = manager.create_block_instance("value", Some("v")).unwrap();
    let combination = ProjectState::from_json(
        r#"{
            "blocks": [
                { "name": "notRegistered", "uid": "v" },
                { "name": "monitor", "uid": "m" }
            ],
            "connections": ["v|0->m|0"]
        }"#,
    )
    .unwrap();

    let added = manager.add_combination(&combination);
    assert_eq!(added.len(), 1);
    assert!(manager.graph().all_connections().is_empty());
    assert!(!manager.graph().node(NodeId::new(live, 0)).unwrap().is_connected());
}
