//! End-to-end tests for field materialization and incremental propagation.

use fieldnet::{
    Comparison, FieldId, Graph, MaxConfig, ObjId, ObjSnapshot, Operator, Phase, QueueProvider,
    RelationId, RelationKind, SimpleObj, TieBreak, TypeId, TypeRegistryBuilder,
};
use pretty_assertions::assert_eq;

/// `T { a, b, out = op(a, b) }`
fn binary(op: Operator) -> (Graph<SimpleObj>, ObjId, FieldId, FieldId, FieldId) {
    binary_with(op, |_, _| {})
}

fn binary_with(
    op: Operator,
    tweak: impl FnOnce(&mut TypeRegistryBuilder, FieldId),
) -> (Graph<SimpleObj>, ObjId, FieldId, FieldId, FieldId) {
    let mut b = TypeRegistryBuilder::new();
    let t = b.add_type("T").unwrap();
    let a = b.input_field(t, "a").unwrap();
    let bb = b.input_field(t, "b").unwrap();
    let out = b.add_field(t, "out", op).unwrap();
    b.out(a, RelationId::SELF, out, Some(0)).unwrap();
    b.out(bb, RelationId::SELF, out, Some(1)).unwrap();
    tweak(&mut b, out);

    let mut graph = Graph::new(b.flatten().unwrap());
    let obj = graph.add_object(t, SimpleObj::default());
    (graph, obj, a, bb, out)
}

/// `Item { x }` related to `Hub { agg = op(items.x) }`
struct Fanin {
    graph: Graph<SimpleObj>,
    hub: ObjId,
    items: Vec<ObjId>,
    x: FieldId,
    agg: FieldId,
}

fn fanin(op: Operator, n: usize) -> Fanin {
    let mut b = TypeRegistryBuilder::new();
    let item = b.add_type("Item").unwrap();
    let hub_ty = b.add_type("Hub").unwrap();
    let (to_hub, _) = b
        .add_relation_pair("hub", RelationKind::One, "items", RelationKind::Many, item, hub_ty)
        .unwrap();
    let x = b.input_field(item, "x").unwrap();
    let agg = b.add_field(hub_ty, "agg", op).unwrap();
    b.out(x, to_hub, agg, None).unwrap();

    let mut graph = Graph::new(b.flatten().unwrap());
    let hub = graph.add_object(hub_ty, SimpleObj::default());
    let items = (0..n)
        .map(|_| {
            let i = graph.add_object(item, SimpleObj::default());
            graph.relate(i, to_hub, hub).unwrap();
            i
        })
        .collect();
    Fanin { graph, hub, items, x, agg }
}

fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

fn value(graph: &Graph<SimpleObj>, obj: ObjId, fd: FieldId) -> f64 {
    graph.field_value(obj, fd).unwrap()
}

// ============================================================================
// 1. Multiplication, immediate propagation
// ============================================================================

#[test]
fn test_multiplication_immediate() {
    let (mut graph, obj, a, b, m) = binary(Operator::Multiplication);
    graph.set_field_value(obj, a, 3.0).unwrap();
    graph.set_field_value(obj, b, 4.0).unwrap();
    assert_eq!(graph.field_value(obj, m), Some(12.0));

    graph.receive_update(obj, a, 2.0).unwrap();
    assert_eq!(graph.field_value(obj, m), Some(20.0));

    graph.receive_update(obj, b, -1.0).unwrap();
    assert_eq!(graph.field_value(obj, m), Some(15.0));
    assert!(graph.queue().is_empty());
}

// ============================================================================
// 2. Multiplication, scheduled: one pending step per field
// ============================================================================

#[test]
fn test_multiplication_scheduled_merges_into_one_step() {
    let (mut graph, obj, a, b, m) = binary_with(Operator::Multiplication, |reg, out| {
        reg.set_phase(out, Some(Phase::Inference)).unwrap();
    });
    graph.set_field_value(obj, a, 3.0).unwrap();
    graph.set_field_value(obj, b, 4.0).unwrap();
    assert_eq!(graph.field_value(obj, m), Some(0.0));
    assert_eq!(graph.queue().len(), 1);
    graph.process();
    assert_eq!(graph.field_value(obj, m), Some(12.0));

    graph.receive_update(obj, a, 2.0).unwrap();
    graph.receive_update(obj, b, -1.0).unwrap();
    assert_eq!(graph.queue().len(), 1);
    assert_eq!(graph.field_value(obj, m), Some(12.0));
    assert_eq!(graph.field(obj, m).unwrap().pending_delta(), Some(3.0));

    let stats = graph.process();
    assert_eq!(stats.processed, 1);
    assert_eq!(graph.field_value(obj, m), Some(15.0));
    assert_eq!(graph.field(obj, m).unwrap().pending_delta(), None);
}

#[test]
fn test_replace_mode_keeps_latest_target() {
    let mut b = TypeRegistryBuilder::new();
    let t = b.add_type("T").unwrap();
    let x = b.input_field(t, "x").unwrap();
    let e = b.add_field(t, "e", Operator::Exp).unwrap();
    b.out(x, RelationId::SELF, e, Some(0)).unwrap();
    b.set_phase(e, Some(Phase::Inference)).unwrap();
    let mut graph = Graph::new(b.flatten().unwrap());
    let obj = graph.add_object(t, SimpleObj::default());

    graph.receive_update(obj, x, 1.0).unwrap();
    graph.receive_update(obj, x, 1.0).unwrap();
    assert_eq!(graph.queue().len(), 1);
    graph.process();

    let v = graph.field_value(obj, e).unwrap();
    assert!(approx(v, 2f64.exp()), "got {v}");
}

// ============================================================================
// 3. Division, including a zero denominator
// ============================================================================

#[test]
fn test_division() {
    let (mut graph, obj, a, b, q) = binary(Operator::Division);
    graph.set_field_value(obj, a, 25.0).unwrap();
    assert_eq!(graph.field_value(obj, q), Some(0.0));

    graph.set_field_value(obj, b, 5.0).unwrap();
    assert_eq!(graph.field_value(obj, q), Some(5.0));

    graph.set_field_value(obj, b, 10.0).unwrap();
    assert_eq!(graph.field_value(obj, q), Some(2.5));

    graph.set_field_value(obj, b, 0.0).unwrap();
    assert_eq!(graph.field_value(obj, q), Some(0.0));
}

// ============================================================================
// 4. Tolerance
// ============================================================================

#[test]
fn test_tolerance_drops_small_updates() {
    let mut b = TypeRegistryBuilder::new();
    let t = b.add_type("T").unwrap();
    let x = b.input_field(t, "x").unwrap();
    let y = b.add_field(t, "y", Operator::Identity).unwrap();
    b.out(x, RelationId::SELF, y, Some(0)).unwrap();
    b.set_tolerance(y, 1.0).unwrap();
    let z = b.input_field(t, "z").unwrap();
    b.set_tolerance(z, 0.5).unwrap();
    let mut graph = Graph::new(b.flatten().unwrap());
    let obj = graph.add_object(t, SimpleObj::default());

    graph.receive_update(obj, x, 0.5).unwrap();
    assert_eq!(graph.field_value(obj, x), Some(0.5));
    assert_eq!(graph.field_value(obj, y), Some(0.0));

    graph.receive_update(obj, x, 2.0).unwrap();
    assert_eq!(graph.field_value(obj, y), Some(2.0));

    graph.receive_update(obj, z, 0.3).unwrap();
    assert_eq!(graph.field_value(obj, z), Some(0.0));
    graph.receive_update(obj, z, -0.6).unwrap();
    assert_eq!(graph.field_value(obj, z), Some(-0.6));
}

// ============================================================================
// 5. Feedback loops settle once deltas fall below tolerance
// ============================================================================

/// `T { x (tolerance 0.1), y = 0.5 * x }` with `y` feeding back into `x`.
fn feedback(phase: Option<Phase>) -> (Graph<SimpleObj>, ObjId, FieldId, FieldId) {
    let mut b = TypeRegistryBuilder::new();
    let t = b.add_type("T").unwrap();
    let x = b.input_field(t, "x").unwrap();
    let y = b.add_field(t, "y", Operator::Scale(0.5)).unwrap();
    b.out(x, RelationId::SELF, y, Some(0)).unwrap();
    b.out(y, RelationId::SELF, x, None).unwrap();
    b.set_tolerance(x, 0.1).unwrap();
    b.set_phase(y, phase).unwrap();

    let mut graph = Graph::new(b.flatten().unwrap());
    let obj = graph.add_object(t, SimpleObj::default());
    (graph, obj, x, y)
}

#[test]
fn test_immediate_feedback_loop_accumulates() {
    let (mut graph, obj, x, y) = feedback(None);
    graph.receive_update(obj, x, 1.0).unwrap();

    // 1 + 0.5 + 0.25 + 0.125, then 0.0625 is below tolerance
    assert!(approx(value(&graph, obj, x), 1.875), "x = {}", value(&graph, obj, x));
    assert!(approx(value(&graph, obj, y), 0.9375));
    assert!(!graph.field(obj, x).unwrap().is_within_update());
    assert!(!graph.field(obj, y).unwrap().is_within_update());
    assert!(graph.queue().is_empty());
}

#[test]
fn test_scheduled_feedback_loop_relaxes_step_by_step() {
    let (mut graph, obj, x, y) = feedback(Some(Phase::Inference));
    graph.receive_update(obj, x, 1.0).unwrap();
    assert_eq!(graph.field_value(obj, x), Some(1.0));
    assert_eq!(graph.queue().len(), 1);

    let stats = graph.process();
    assert_eq!(stats.processed, 4);
    assert!(approx(value(&graph, obj, x), 1.875));
    assert!(approx(value(&graph, obj, y), 0.9375));
    assert!(graph.queue().is_empty());
}

// ============================================================================
// 6. Lazy materialization across a relation
// ============================================================================

#[test]
fn test_sum_over_relation_materializes_lazily() {
    let Fanin { mut graph, hub, items, x, agg } = fanin(Operator::Sum, 3);
    assert!(graph.field(hub, agg).is_none());
    assert!(graph.field(items[0], x).is_none());

    graph.set_field_value(items[0], x, 2.0).unwrap();
    assert!(graph.field(items[1], x).is_none());
    assert_eq!(graph.field_value(hub, agg), Some(2.0));

    graph.set_field_value(items[1], x, 3.0).unwrap();
    graph.receive_update(items[0], x, 1.5).unwrap();
    assert_eq!(graph.field_value(hub, agg), Some(6.5));
}

#[test]
fn test_init_fields_materializes_everything_once() {
    let Fanin { mut graph, hub, items, x, agg } = fanin(Operator::Sum, 2);
    graph.init_fields(items[1]).unwrap();
    assert_eq!(graph.field_value(items[1], x), Some(0.0));
    assert!(graph.field(hub, agg).is_none());

    graph.set_field_value(items[0], x, 4.0).unwrap();
    graph.init_fields(hub).unwrap();
    assert_eq!(graph.field_value(hub, agg), Some(4.0));

    graph.init_fields(items[0]).unwrap();
    assert_eq!(graph.field_value(items[0], x), Some(4.0));

    graph.remove_object(items[1]);
    assert!(graph.init_fields(items[1]).is_err());
}

#[test]
fn test_late_field_initializes_from_existing_inputs() {
    let (mut graph, obj, a, b, s) = binary(Operator::Addition);
    graph.set_field_value(obj, a, 2.0).unwrap();
    graph.set_field_value(obj, b, 3.0).unwrap();

    // inputs only, written without propagation
    let mut snap = graph.snapshot(obj).unwrap();
    snap.fields.retain(|(fd, _)| *fd != s);
    let copy = graph.add_object_from_snapshot(&snap, SimpleObj::default()).unwrap();
    assert!(graph.field(copy, s).is_none());

    let field = graph.get_or_create_field_input(copy, s).unwrap();
    assert_eq!(field.value(), 5.0);
    assert!(!field.is_within_update());
}

// ============================================================================
// 7. Max: winner selection and notifications
// ============================================================================

#[test]
fn test_max_selection_notifications() {
    let Fanin { mut graph, hub, items, x, agg } = fanin(Operator::Max(MaxConfig::default()), 3);
    graph.set_field_value(items[0], x, 0.2).unwrap();
    graph.set_field_value(items[1], x, 0.7).unwrap();
    graph.set_field_value(items[2], x, 0.5).unwrap();
    assert!(approx(value(&graph, hub, agg), 0.7));
    assert_eq!(graph.object(items[1]).unwrap().selections().last(), Some(&(x, true)));

    graph.set_field_value(items[2], x, 0.9).unwrap();
    assert!(approx(value(&graph, hub, agg), 0.9));
    assert_eq!(graph.object(items[1]).unwrap().selections().last(), Some(&(x, false)));
    assert_eq!(graph.object(items[2]).unwrap().selections(), &[(x, true)]);

    graph.set_field_value(items[2], x, 0.1).unwrap();
    assert!(approx(value(&graph, hub, agg), 0.7));
    assert_eq!(graph.object(items[1]).unwrap().selections().last(), Some(&(x, true)));
}

#[test]
fn test_max_ignores_negative_inputs() {
    let Fanin { mut graph, hub, items, x, agg } = fanin(Operator::Max(MaxConfig::default()), 2);
    graph.set_field_value(items[0], x, -0.3).unwrap();
    graph.set_field_value(items[1], x, -0.1).unwrap();
    assert_eq!(graph.field_value(hub, agg), Some(0.0));

    let Fanin { mut graph, hub, items, x, agg } =
        fanin(Operator::Max(MaxConfig::default().allowing_negative()), 2);
    graph.set_field_value(items[0], x, -0.3).unwrap();
    graph.set_field_value(items[1], x, -0.1).unwrap();
    assert!(approx(value(&graph, hub, agg), -0.1));
}

#[test]
fn test_max_selects_nothing_when_inputs_are_zero() {
    let Fanin { mut graph, hub, items, x, agg } = fanin(Operator::Max(MaxConfig::default()), 1);
    graph.init_fields(items[0]).unwrap();
    graph.init_fields(hub).unwrap();
    assert_eq!(graph.field_value(hub, agg), Some(0.0));
    assert!(graph.object(items[0]).unwrap().selections().is_empty());

    graph.set_field_value(items[0], x, 0.4).unwrap();
    assert_eq!(graph.object(items[0]).unwrap().selections(), &[(x, true)]);
    graph.set_field_value(items[0], x, 0.0).unwrap();
    assert_eq!(graph.field_value(hub, agg), Some(0.0));
    assert_eq!(graph.object(items[0]).unwrap().selections().last(), Some(&(x, false)));
}

#[test]
fn test_max_tie_break() {
    let Fanin { mut graph, items, x, .. } = fanin(Operator::Max(MaxConfig::default()), 2);
    graph.set_field_value(items[1], x, 0.5).unwrap();
    graph.set_field_value(items[0], x, 0.5).unwrap();
    assert_eq!(graph.object(items[0]).unwrap().selections().last(), Some(&(x, true)));

    let cfg = MaxConfig::default().with_tie_break(TieBreak::LastObject);
    let Fanin { mut graph, items, x, .. } = fanin(Operator::Max(cfg), 2);
    graph.set_field_value(items[1], x, 0.5).unwrap();
    graph.set_field_value(items[0], x, 0.5).unwrap();
    assert_eq!(graph.object(items[1]).unwrap().selections().last(), Some(&(x, true)));
}

// ============================================================================
// 8. Threshold
// ============================================================================

fn threshold(sticky: bool) -> (Graph<SimpleObj>, ObjId, FieldId, FieldId) {
    let mut b = TypeRegistryBuilder::new();
    let t = b.add_type("T").unwrap();
    let x = b.input_field(t, "x").unwrap();
    let th = b
        .add_field(t, "th", Operator::Threshold { threshold: 0.5, comparison: Comparison::Above, sticky })
        .unwrap();
    b.out(x, RelationId::SELF, th, Some(0)).unwrap();
    let mut graph = Graph::new(b.flatten().unwrap());
    let obj = graph.add_object(t, SimpleObj::default());
    (graph, obj, x, th)
}

#[test]
fn test_threshold_sticky_and_plain() {
    let (mut graph, obj, x, th) = threshold(false);
    graph.set_field_value(obj, x, 0.7).unwrap();
    assert_eq!(graph.field_value(obj, th), Some(1.0));
    graph.set_field_value(obj, x, 0.1).unwrap();
    assert_eq!(graph.field_value(obj, th), Some(0.0));

    let (mut graph, obj, x, th) = threshold(true);
    graph.set_field_value(obj, x, 0.7).unwrap();
    graph.set_field_value(obj, x, 0.1).unwrap();
    assert_eq!(graph.field_value(obj, th), Some(1.0));
}

// ============================================================================
// 9. Exp
// ============================================================================

#[test]
fn test_exp_of_sum() {
    let mut b = TypeRegistryBuilder::new();
    let t = b.add_type("T").unwrap();
    let a = b.input_field(t, "a").unwrap();
    let c = b.input_field(t, "c").unwrap();
    let s = b.add_field(t, "s", Operator::Addition).unwrap();
    b.out(a, RelationId::SELF, s, Some(0)).unwrap();
    b.out(c, RelationId::SELF, s, Some(1)).unwrap();
    let e = b.add_field(t, "e", Operator::Exp).unwrap();
    b.out(s, RelationId::SELF, e, Some(0)).unwrap();
    let mut graph = Graph::new(b.flatten().unwrap());
    let obj = graph.add_object(t, SimpleObj::default());

    graph.set_field_value(obj, a, 2.5).unwrap();
    graph.set_field_value(obj, c, 2.5).unwrap();
    let v = graph.field_value(obj, e).unwrap();
    assert!((v - 148.413159).abs() < 1e-6, "got {v}");
}

// ============================================================================
// 10. Removing an object withdraws its pending updates
// ============================================================================

#[test]
fn test_remove_object_withdraws_steps() {
    let (mut graph, obj, a, _, m) = binary_with(Operator::Addition, |reg, out| {
        reg.set_phase(out, Some(Phase::Fired)).unwrap();
    });
    graph.set_field_value(obj, a, 1.0).unwrap();
    assert_eq!(graph.queue().len(), 1);
    assert!(graph.field(obj, m).unwrap().pending_step().is_some());

    assert!(graph.remove_object(obj).is_some());
    assert!(graph.queue().is_empty());
    assert!(!graph.contains(obj));
    assert!(graph.field(obj, m).is_none());
    assert_eq!(graph.process().processed, 0);
}

// ============================================================================
// 11. Snapshots
// ============================================================================

#[test]
fn test_snapshot_roundtrip_through_json() {
    let (mut graph, obj, a, b, m) = binary(Operator::Multiplication);
    graph.set_field_value(obj, a, 3.0).unwrap();
    graph.set_field_value(obj, b, 4.0).unwrap();

    let json = graph.snapshot(obj).unwrap().to_json().unwrap();
    let snap = ObjSnapshot::from_json(&json).unwrap();
    assert_eq!(snap.type_id, TypeId(0));
    assert_eq!(snap.fields.len(), 3);

    let copy = graph.add_object_from_snapshot(&snap, SimpleObj::default()).unwrap();
    assert_eq!(graph.field_value(copy, m), Some(12.0));

    // restored values are committed, later deltas build on them
    graph.receive_update(copy, a, 1.0).unwrap();
    assert_eq!(graph.field_value(copy, m), Some(16.0));
    assert_eq!(graph.field_value(obj, m), Some(12.0));
}
