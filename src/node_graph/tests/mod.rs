use super::{Block, BlockBuilder, BlockContext, BlockId, Graph, NodeEvent, NodeId};
use crate::events::GraphEvent;
use crate::models::schema::{MergeMode, Size};
use crate::settings::GraphSettings;
use serde_json::{json, Value};
use std::cell::RefCell;
use std::rc::Rc;

const EPS: f64 = 1e-9;

struct Source;

fn source(builder: &mut BlockBuilder) -> Box<dyn Block> {
    builder.create_output("Output");
    Box::new(Source)
}

impl Block for Source {}

/// One input; remembers every event it receives.
#[derive(Default)]
struct Recorder {
    events: Vec<String>,
}

fn recorder(builder: &mut BlockBuilder) -> Box<dyn Block> {
    builder.create_input("Input");
    Box::new(Recorder::default())
}

impl Block for Recorder {
    fn on_node_event(&mut self, _ctx: &mut BlockContext<'_>, node: usize, event: NodeEvent) {
        self.events.push(format!("{}:{:?}", node, event));
    }

    fn state(&self) -> Value {
        json!({ "events": self.events })
    }
}

/// Input 0 to output 1, either copied or inverted.
struct Relay {
    invert: bool,
    handled: u32,
}

fn follower(builder: &mut BlockBuilder) -> Box<dyn Block> {
    builder.create_input("Input");
    builder.create_output("Output");
    Box::new(Relay {
        invert: false,
        handled: 0,
    })
}

fn inverter(builder: &mut BlockBuilder) -> Box<dyn Block> {
    builder.create_input("Input");
    builder.create_output("Output");
    Box::new(Relay {
        invert: true,
        handled: 0,
    })
}

impl Block for Relay {
    fn on_node_event(&mut self, ctx: &mut BlockContext<'_>, node: usize, event: NodeEvent) {
        if node != 0 || event != NodeEvent::DataChanged {
            return;
        }
        self.handled += 1;
        let v = ctx.value(0);
        ctx.set_value(1, if self.invert { 1.0 - v } else { v });
    }

    fn state(&self) -> Value {
        json!({ "handled": self.handled })
    }
}

fn out(block: BlockId) -> NodeId {
    NodeId::new(block, 0)
}

fn input(block: BlockId) -> NodeId {
    NodeId::new(block, 0)
}

fn recorded(graph: &Graph, block: BlockId) -> Vec<String> {
    graph
        .block_state(block)
        .and_then(|state| serde_json::from_value(state["events"].clone()).ok())
        .unwrap_or_default()
}

#[test]
fn htp_takes_maximum_and_ltp_takes_last_writer() {
    let mut graph = Graph::default();
    let o1 = graph.insert_block("o1".into(), "source", source);
    let o2 = graph.insert_block("o2".into(), "source", source);
    let htp = graph.insert_block("i1".into(), "recorder", recorder);
    let ltp = graph.insert_block("i2".into(), "recorder", recorder);
    assert!(graph.set_merge_mode(input(ltp), MergeMode::Ltp));

    for o in [o1, o2] {
        assert!(graph.connect(out(o), input(htp)));
        assert!(graph.connect(out(o), input(ltp)));
    }

    graph.set_value(out(o1), 0.6);
    graph.set_value(out(o2), 0.3);

    let i1 = graph.node(input(htp)).unwrap();
    let i2 = graph.node(input(ltp)).unwrap();
    assert!((i1.value() - 0.6).abs() < EPS);
    assert!((i2.value() - 0.3).abs() < EPS);

    graph.set_value(out(o1), 0.1);
    assert!((graph.node(input(htp)).unwrap().value() - 0.3).abs() < EPS);
    assert!((graph.node(input(ltp)).unwrap().value() - 0.1).abs() < EPS);
}

#[test]
fn htp_input_mixes_colors_channelwise() {
    let mut graph = Graph::default();
    let red = graph.insert_block("r".into(), "source", source);
    let blue = graph.insert_block("b".into(), "source", source);
    let sink = graph.insert_block("s".into(), "recorder", recorder);
    graph.connect(out(red), input(sink));
    graph.connect(out(blue), input(sink));

    graph.modify_data(out(red), |data| data.set_rgb(1.0, 0.0, 0.0));
    graph.modify_data(out(blue), |data| data.set_rgb(0.0, 0.2, 0.8));

    let rgb = graph.node(input(sink)).unwrap().data().rgb_at(0, 0);
    assert!((rgb.r - 1.0).abs() < EPS);
    assert!((rgb.g - 0.2).abs() < EPS);
    assert!((rgb.b - 0.8).abs() < EPS);
}

#[test]
fn connect_is_symmetric_and_idempotent() {
    let mut graph = Graph::default();
    let o = graph.insert_block("o".into(), "source", source);
    let i = graph.insert_block("i".into(), "recorder", recorder);

    assert!(graph.connect(input(i), out(o)));
    assert!(graph.connect(out(o), input(i)));
    assert_eq!(graph.node(out(o)).unwrap().connected_nodes(), &[input(i)]);
    assert_eq!(graph.node(input(i)).unwrap().connected_nodes(), &[out(o)]);
    assert_eq!(graph.all_connections().len(), 1);
    assert_eq!(graph.all_connections()[0].to_string(), "o|0->i|0");
}

#[test]
fn invalid_connections_are_rejected() {
    let mut graph = Graph::default();
    let a = graph.insert_block("a".into(), "source", source);
    let b = graph.insert_block("b".into(), "source", source);
    let relay = graph.insert_block("r".into(), "follower", follower);

    assert!(!graph.connect(out(a), out(b)));
    assert!(!graph.connect(out(a), out(a)));
    // own input and output
    assert!(!graph.connect(NodeId::new(relay, 0), NodeId::new(relay, 1)));
    assert!(!graph.connect(out(a), NodeId::new(relay, 7)));
    assert!(!graph.disconnect(out(a), NodeId::new(relay, 0)));
    assert!(graph.all_connections().is_empty());
}

#[test]
fn requested_size_is_component_wise_max() {
    let mut graph = Graph::default();
    let o = graph.insert_block("o".into(), "source", source);
    let wide = graph.insert_block("w".into(), "recorder", recorder);
    let tall = graph.insert_block("t".into(), "recorder", recorder);

    assert!(graph.set_requested_size(input(wide), Size::new(4, 1)));
    assert!(graph.set_requested_size(input(tall), Size::new(2, 3)));
    assert!(!graph.set_requested_size(input(tall), Size::new(0, 3)));

    graph.connect(out(o), input(wide));
    assert_eq!(graph.node(out(o)).unwrap().requested_size(), Size::new(4, 1));
    graph.connect(out(o), input(tall));
    assert_eq!(graph.node(out(o)).unwrap().requested_size(), Size::new(4, 3));

    graph.disconnect(out(o), input(wide));
    assert_eq!(graph.node(out(o)).unwrap().requested_size(), Size::new(2, 3));
    graph.disconnect_all(out(o));
    assert_eq!(graph.node(out(o)).unwrap().requested_size(), Size::new(1, 1));
}

#[test]
fn output_is_active_while_any_consumer_is() {
    let mut graph = Graph::default();
    let o = graph.insert_block("o".into(), "source", source);
    let a = graph.insert_block("a".into(), "recorder", recorder);
    let b = graph.insert_block("b".into(), "recorder", recorder);

    assert!(!graph.node(out(o)).unwrap().is_active());
    graph.connect(out(o), input(a));
    graph.connect(out(o), input(b));
    assert!(graph.node(out(o)).unwrap().is_active());

    graph.set_active(input(a), false);
    assert!(graph.node(out(o)).unwrap().is_active());
    graph.set_active(input(b), false);
    assert!(!graph.node(out(o)).unwrap().is_active());

    graph.set_active(input(a), true);
    graph.disconnect(out(o), input(a));
    assert!(!graph.node(out(o)).unwrap().is_active());
}

#[test]
fn shared_state_follows_the_output() {
    let mut graph = Graph::default();
    let o = graph.insert_block("o".into(), "source", source);
    let dimmer = graph.insert_block("d".into(), "dimmer", super::blocks::DimmerBlock::create);
    let sink = graph.insert_block("s".into(), "recorder", recorder);
    let color_in = NodeId::new(dimmer, 0);
    let dimmer_out = NodeId::new(dimmer, 2);

    graph.connect(out(o), color_in);
    assert!(!graph.node(color_in).unwrap().is_active());
    assert!(!graph.node(out(o)).unwrap().is_active());

    graph.set_requested_size(input(sink), Size::new(3, 2));
    graph.connect(dimmer_out, input(sink));
    assert!(graph.node(dimmer_out).unwrap().is_active());
    assert!(graph.node(color_in).unwrap().is_active());
    assert!(graph.node(out(o)).unwrap().is_active());
    assert_eq!(graph.node(color_in).unwrap().requested_size(), Size::new(3, 2));
    assert_eq!(graph.node(out(o)).unwrap().requested_size(), Size::new(3, 2));
}

#[test]
fn last_disconnect_resets_input_to_zero() {
    let mut graph = Graph::default();
    let o = graph.insert_block("o".into(), "source", source);
    let i = graph.insert_block("i".into(), "recorder", recorder);
    graph.set_requested_size(input(i), Size::new(2, 2));
    graph.connect(out(o), input(i));
    graph.set_value(out(o), 0.8);
    assert!((graph.node(input(i)).unwrap().value() - 0.8).abs() < EPS);

    graph.disconnect(input(i), out(o));
    let node = graph.node(input(i)).unwrap();
    assert_eq!(node.value(), 0.0);
    assert_eq!(node.data().size(), Size::new(2, 2));
    assert!(!node.is_connected());
}

#[test]
fn input_handler_sees_data_before_write_returns() {
    let mut graph = Graph::default();
    let o = graph.insert_block("o".into(), "source", source);
    let i = graph.insert_block("i".into(), "recorder", recorder);
    graph.connect(out(o), input(i));
    let before = recorded(&graph, i).len();

    graph.set_value(out(o), 0.5);
    let events = recorded(&graph, i);
    assert_eq!(&events[before..], &["0:DataChanged".to_string()]);

    // unchanged value is not pushed again
    graph.set_value(out(o), 0.5);
    assert_eq!(recorded(&graph, i).len(), before + 1);
}

#[test]
fn steal_connections_moves_every_edge() {
    let mut graph = Graph::default();
    let old = graph.insert_block("old".into(), "source", source);
    let new = graph.insert_block("new".into(), "source", source);
    let a = graph.insert_block("a".into(), "recorder", recorder);
    let b = graph.insert_block("b".into(), "recorder", recorder);
    graph.connect(out(old), input(a));
    graph.connect(out(old), input(b));

    assert!(graph.steal_connections(out(new), out(old)));
    assert!(!graph.node(out(old)).unwrap().is_connected());
    assert_eq!(graph.node(out(new)).unwrap().connected_nodes().len(), 2);
    assert_eq!(graph.node(input(a)).unwrap().connected_nodes(), &[out(new)]);
    assert!(!graph.steal_connections(out(new), input(a)));
}

#[test]
fn ltp_switch_to_htp_remerges() {
    let mut graph = Graph::default();
    let o1 = graph.insert_block("o1".into(), "source", source);
    let o2 = graph.insert_block("o2".into(), "source", source);
    let i = graph.insert_block("i".into(), "recorder", recorder);
    graph.set_htp_mode(input(i), false);
    graph.connect(out(o1), input(i));
    graph.connect(out(o2), input(i));
    graph.set_value(out(o1), 0.9);
    graph.set_value(out(o2), 0.2);
    assert!((graph.node(input(i)).unwrap().value() - 0.2).abs() < EPS);

    assert!(graph.toggle_htp_mode(input(i)));
    assert!(graph.node(input(i)).unwrap().htp_mode());
    assert!((graph.node(input(i)).unwrap().value() - 0.9).abs() < EPS);
    assert!(!graph.set_htp_mode(out(o1), true));
}

#[test]
fn touch_connects_toggles_and_clears() {
    let mut graph = Graph::default();
    let o = graph.insert_block("o".into(), "source", source);
    let i = graph.insert_block("i".into(), "recorder", recorder);

    graph.touch_node(out(o));
    assert_eq!(graph.focused_node(), Some(out(o)));
    graph.touch_node(input(i));
    assert_eq!(graph.focused_node(), None);
    assert!(graph.node(out(o)).unwrap().is_connected());

    graph.touch_node(input(i));
    graph.touch_node(out(o));
    assert!(!graph.node(out(o)).unwrap().is_connected());

    graph.connect(out(o), input(i));
    graph.touch_node(out(o));
    graph.touch_node(out(o));
    assert_eq!(graph.focused_node(), None);
    assert!(!graph.node(out(o)).unwrap().is_connected());
}

#[test]
fn node_focus_emits_once_per_change() {
    let mut graph = Graph::default();
    let o = graph.insert_block("o".into(), "source", source);
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    graph.subscribe(Box::new(move |event: &GraphEvent| {
        if let GraphEvent::NodeFocusChanged { focused } = event {
            sink.borrow_mut().push(*focused);
        }
    }));

    graph.focus_node(out(o));
    graph.focus_node(out(o));
    graph.remove_block(o);
    assert_eq!(*seen.borrow(), vec![Some(out(o)), None]);
    assert_eq!(graph.focused_node(), None);
}

#[test]
fn removed_block_handles_go_stale() {
    let mut graph = Graph::default();
    let o = graph.insert_block("o".into(), "source", source);
    let i = graph.insert_block("i".into(), "recorder", recorder);
    graph.connect(out(o), input(i));
    graph.set_value(out(o), 1.0);

    assert!(graph.remove_block(o));
    assert!(graph.node(out(o)).is_none());
    assert!(graph.node_uid(out(o)).is_none());
    assert!(!graph.node(input(i)).unwrap().is_connected());
    assert_eq!(graph.node(input(i)).unwrap().value(), 0.0);
    assert!(!graph.remove_block(o));
    assert!(!graph.connect(out(o), input(i)));
}

#[test]
fn feedback_loop_terminates() {
    let settings = GraphSettings {
        max_deferred_events: 8,
        ..GraphSettings::default()
    };
    let mut graph = Graph::new(settings);
    let src = graph.insert_block("src".into(), "source", source);
    let inv = graph.insert_block("inv".into(), "inverter", inverter);
    let fol = graph.insert_block("fol".into(), "follower", follower);

    graph.connect(out(src), NodeId::new(inv, 0));
    graph.connect(NodeId::new(inv, 1), NodeId::new(fol, 0));
    assert!(!graph.has_feedback_loop());
    graph.connect(NodeId::new(fol, 1), NodeId::new(inv, 0));
    assert!(graph.has_feedback_loop());

    graph.set_value(out(src), 1.0);
    let handled = graph.block_state(inv).unwrap()["handled"].as_u64().unwrap();
    assert!(handled > 1);
    assert!(handled < 100);
}

#[test]
fn impulse_detection_and_reset() {
    let mut graph = Graph::default();
    let o = graph.insert_block("o".into(), "source", source);
    let trigger = graph.insert_block("t".into(), "trigger", super::blocks::TriggerBlock::create);
    let sink = graph.insert_block("s".into(), "recorder", recorder);
    graph.connect(out(o), NodeId::new(trigger, 0));
    graph.connect(NodeId::new(trigger, 1), input(sink));

    graph.set_value(out(o), 0.5);
    assert_eq!(graph.node(input(sink)).unwrap().value(), 1.0);
    graph.set_value(out(o), 0.8);
    assert_eq!(graph.block_state(trigger).unwrap()["count"], json!(1));

    graph.advance_impulses(0.05);
    assert_eq!(graph.node(input(sink)).unwrap().value(), 1.0);
    graph.advance_impulses(0.06);
    assert_eq!(graph.node(input(sink)).unwrap().value(), 0.0);

    graph.set_value(out(o), 0.0);
    graph.set_value(out(o), 1.0);
    assert_eq!(graph.block_state(trigger).unwrap()["count"], json!(2));
}

#[test]
fn connection_events_reach_listeners() {
    let mut graph = Graph::default();
    let o = graph.insert_block("o".into(), "source", source);
    let i = graph.insert_block("i".into(), "recorder", recorder);
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    graph.subscribe(Box::new(move |event: &GraphEvent| {
        if let GraphEvent::ConnectionChanged { connected, .. } = event {
            sink.borrow_mut().push(*connected);
        }
    }));

    graph.connect(out(o), input(i));
    graph.connect(out(o), input(i));
    graph.disconnect(out(o), input(i));
    assert_eq!(*seen.borrow(), vec![true, false]);

    let events = recorded(&graph, i);
    assert!(events.contains(&"0:ConnectionChanged".to_string()));
}

#[test]
fn htp_and_ltp_inputs_see_the_same_shape() {
    let mut graph = Graph::default();
    let o = graph.insert_block("o".into(), "source", source);
    let htp = graph.insert_block("h".into(), "recorder", recorder);
    let ltp = graph.insert_block("l".into(), "recorder", recorder);
    graph.set_merge_mode(input(ltp), MergeMode::Ltp);
    for sink in [htp, ltp] {
        graph.set_requested_size(input(sink), Size::new(3, 2));
        graph.connect(out(o), input(sink));
    }
    let output = graph.node(out(o)).unwrap();
    assert_eq!(output.requested_size(), Size::new(3, 2));
    assert_eq!(output.data().size(), Size::new(3, 2));

    graph.modify_data(out(o), |data| data.set_rgb(1.0, 0.0, 0.0));
    for sink in [htp, ltp] {
        let data = graph.node(input(sink)).unwrap().data();
        assert_eq!(data.size(), Size::new(3, 2));
        let far = data.rgb_at(2, 1);
        assert!((far.r - 1.0).abs() < EPS && far.g.abs() < EPS && far.b.abs() < EPS);
    }
}

#[test]
fn clamped_repeat_write_is_not_propagated() {
    let mut graph = Graph::default();
    let o = graph.insert_block("o".into(), "source", source);
    let i = graph.insert_block("i".into(), "recorder", recorder);
    graph.connect(out(o), input(i));

    graph.set_value(out(o), 2.0);
    graph.set_value(out(o), 2.0);
    graph.set_value(out(o), 1.0);
    let updates = recorded(&graph, i)
        .iter()
        .filter(|event| event.as_str() == "0:DataChanged")
        .count();
    // one from connecting, one from the first write
    assert_eq!(updates, 2);
}

#[test]
fn uid_lookup_follows_insert_and_remove() {
    let mut graph = Graph::default();
    let first = graph.insert_block("a".into(), "source", source);
    graph.insert_block("b".into(), "source", source);
    assert_eq!(graph.find_block("a"), Some(first));

    graph.remove_block(first);
    assert_eq!(graph.find_block("a"), None);
    assert!(graph.find_block("b").is_some());

    let second = graph.insert_block("a".into(), "recorder", recorder);
    assert_ne!(first, second);
    assert_eq!(graph.find_block("a"), Some(second));
}
