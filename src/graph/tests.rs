//! Node lifecycle and linking tests

use super::*;
use crate::propagator::{Ack, CallbackPropagator, Propagator, PropagatorError, TerminalPropagator};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn counting_node(name: &str) -> (Arc<Node<u32>>, Arc<AtomicUsize>) {
    let count = Arc::new(AtomicUsize::new(0));
    let counter = count.clone();
    let node = Node::with_propagator(
        name,
        Arc::new(CallbackPropagator::sink(name, move |_msg: u32| {
            counter.fetch_add(1, Ordering::SeqCst);
        })),
    );
    (node, count)
}

fn record_changes(node: &Node<u32>) -> Arc<Mutex<Vec<StateChange>>> {
    let changes = Arc::new(Mutex::new(Vec::new()));
    let sink = changes.clone();
    node.subscribe(move |change| sink.lock().unwrap().push(change.clone()));
    changes
}

#[test]
fn unlinked_node_drops_messages() {
    let node: Arc<Node<u32>> = Node::new("idle");
    assert_eq!(node.deliver(1), None);
    assert!(node.propagator().is_none());
    assert_eq!(node.state(), NodeState::Open);
}

#[test]
fn delivery_reaches_propagator_until_closed() {
    let (node, count) = counting_node("sink");

    assert_eq!(node.deliver(1), Some(Ack::Consumed));
    assert_eq!(node.deliver_direct(2), Some(Ack::Consumed));
    assert!(node.close(false));
    assert_eq!(node.deliver(3), None);
    assert_eq!(count.load(Ordering::SeqCst), 2);
}

#[test]
fn first_terminal_transition_wins() {
    let (node, _) = counting_node("sink");
    let changes = record_changes(&node);

    assert!(node.close(true));
    assert!(!node.close(false));
    assert!(!node.error(&PropagatorError::upstream("late"), false));

    assert_eq!(node.state(), NodeState::Closed);
    assert_eq!(node.completion().result(), Some(Ok(())));
    assert_eq!(*changes.lock().unwrap(), vec![StateChange::Closed { force: true }]);
}

#[test]
fn error_resolves_completion_with_failure() {
    let (node, _) = counting_node("sink");
    let err = PropagatorError::upstream("broken pipe");

    assert!(node.error(&err, false));
    assert_eq!(node.state(), NodeState::Errored);
    assert_eq!(node.completion().result(), Some(Err(err)));
}

#[test]
fn pause_and_resume_notify_only_on_change() {
    let (node, _) = counting_node("sink");
    let changes = record_changes(&node);

    assert!(node.pause());
    assert!(!node.pause());
    assert_eq!(node.state(), NodeState::Paused);
    // Paused is advisory
    assert_eq!(node.deliver(1), Some(Ack::Consumed));
    assert!(node.resume());
    assert!(!node.resume());

    assert_eq!(
        *changes.lock().unwrap(),
        vec![StateChange::Paused, StateChange::Resumed]
    );
}

#[test]
fn apply_replays_changes() {
    let (node, _) = counting_node("sink");
    assert!(node.apply(&StateChange::Paused));
    assert!(node.apply(&StateChange::Errored {
        error: PropagatorError::upstream("elsewhere"),
        force: true,
    }));
    assert_eq!(node.state(), NodeState::Errored);
}

#[test]
fn link_runs_hooks_in_order() {
    let node: Arc<Node<u32>> = Node::new("source");
    let order = Arc::new(Mutex::new(Vec::new()));

    let (before, after) = (order.clone(), order.clone());
    let hooks = LinkHooks::none()
        .before(move |node: &Arc<Node<u32>>, _link: &Link<u32>| {
            assert!(node.propagator().is_none());
            before.lock().unwrap().push("pre");
            Ok(())
        })
        .after(move |node: &Arc<Node<u32>>, link: &Link<u32>| {
            assert!(node.propagator().is_some());
            assert_eq!(link.description(), Some("cap"));
            after.lock().unwrap().push("post");
        });

    node.link(Arc::new(TerminalPropagator::default()), Some("cap".into()), hooks)
        .unwrap();
    assert_eq!(*order.lock().unwrap(), vec!["pre", "post"]);
    assert_eq!(node.link_description(), Some("cap"));
}

#[test]
fn pre_hook_can_veto_link() {
    let node: Arc<Node<u32>> = Node::new("source");
    let hooks = LinkHooks::none().before(|_node: &Arc<Node<u32>>, _link: &Link<u32>| {
        Err(GraphError::LinkVetoed("not today".into()))
    });

    let result = node.link(Arc::new(TerminalPropagator::default()), None, hooks);
    assert!(matches!(result, Err(GraphError::LinkVetoed(_))));
    assert!(node.propagator().is_none());
}

#[test]
fn node_links_once() {
    let (node, _) = counting_node("sink");
    let result = node.link(Arc::new(TerminalPropagator::default()), None, LinkHooks::none());
    assert!(matches!(result, Err(GraphError::AlreadyLinked(_))));
}

#[test]
fn transactional_before_link_escalates_on_link() {
    struct Escalations(Arc<AtomicUsize>);

    impl Propagator<u32> for Escalations {
        fn description(&self) -> &str {
            "escalations"
        }
        fn error(&self, _err: &PropagatorError, _force: bool) {}
        fn close(&self, _force: bool) {}
        fn downstream(&self) -> Vec<Edge<u32>> {
            Vec::new()
        }
        fn transactional(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
        fn propagate(&self, _msg: u32, _direct: bool) -> Option<Ack> {
            None
        }
    }

    let count = Arc::new(AtomicUsize::new(0));
    let node: Arc<Node<u32>> = Node::new("late");
    node.transactional();
    node.transactional();
    node.link(Arc::new(Escalations(count.clone())), None, LinkHooks::none())
        .unwrap();

    assert!(node.is_transactional());
    assert_eq!(count.load(Ordering::SeqCst), 1);
}
