//! End-to-end tests for type flattening and field overrides.
//!
//! Each test declares a small hierarchy, flattens it and checks both the
//! compiled slot layout and the values that flow through it at runtime.

use std::sync::Arc;
use std::thread;

use fieldnet::{
    Direction, Error, Graph, Operator, RelationId, SimpleObj, TypeRegistryBuilder,
};
use pretty_assertions::assert_eq;

// ============================================================================
// 1. A ⊂ B ⊂ C, C overrides a field declared on A
// ============================================================================

#[test]
fn test_override_resolution_across_three_levels() {
    let mut b = TypeRegistryBuilder::new();
    let ta = b.add_type("A").unwrap();
    let tb = b.add_type("B").unwrap();
    let tc = b.add_type("C").unwrap();
    b.add_parent(tb, ta).unwrap();
    b.add_parent(tc, tb).unwrap();

    let v = b.input_field(ta, "v").unwrap();
    let w = b.add_field(ta, "w", Operator::Scale(2.0)).unwrap();
    b.out(v, RelationId::SELF, w, Some(0)).unwrap();
    let v_c = b.input_field(tc, "v").unwrap();
    b.set_parent(v_c, v).unwrap();

    let reg = b.flatten().unwrap();

    // B still stores A's definition
    let b_in = reg.flattened(tb, Direction::Input);
    assert_eq!(b_in.num_slots(), 2);
    assert!(b_in.field_slot(v).is_some());

    // C: one slot shared by both handles
    let c_in = reg.flattened(tc, Direction::Input);
    assert_eq!(c_in.num_slots(), 2);
    assert_eq!(c_in.field_slot(v), None);
    let slot = reg.field_slot(tc, v_c).unwrap();
    assert_eq!(reg.field_slot(tc, v), Some(slot));
    assert_eq!(reg.flattened(tc, Direction::Output).field_definitions(slot), &[v, v_c]);

    let mut graph = Graph::new(reg);
    let obj = graph.add_object(tc, SimpleObj::default());
    graph.set_field_value(obj, v, 1.5).unwrap();
    assert_eq!(graph.field_value(obj, v_c), Some(1.5));
    graph.set_field_value(obj, v_c, 4.0).unwrap();
    assert_eq!(graph.field_value(obj, v), Some(4.0));
    assert_eq!(graph.field_value(obj, w), Some(8.0));
}

// ============================================================================
// 2. Child overrides an operator field; outputs of the parent handle still fire
// ============================================================================

#[test]
fn test_overridden_operator_drives_parent_outputs() {
    let mut b = TypeRegistryBuilder::new();
    let parent = b.add_type("Parent").unwrap();
    let child = b.add_type("Child").unwrap();
    b.add_parent(child, parent).unwrap();

    let a = b.input_field(parent, "a").unwrap();
    let bb = b.input_field(parent, "b").unwrap();
    let c = b.add_field(parent, "c", Operator::Addition).unwrap();
    b.out(a, RelationId::SELF, c, Some(0)).unwrap();
    b.out(bb, RelationId::SELF, c, Some(1)).unwrap();
    let d = b.add_field(parent, "d", Operator::Identity).unwrap();
    b.out(c, RelationId::SELF, d, Some(0)).unwrap();

    let c_sub = b.add_field(child, "c", Operator::Subtraction).unwrap();
    b.set_parent(c_sub, c).unwrap();
    b.out(a, RelationId::SELF, c_sub, Some(0)).unwrap();
    b.out(bb, RelationId::SELF, c_sub, Some(1)).unwrap();

    let reg = b.flatten().unwrap();
    assert_eq!(reg.ty(child).num_slots(), 4);
    assert_eq!(reg.ty(parent).num_slots(), 4);

    let mut graph = Graph::new(reg);
    let co = graph.add_object(child, SimpleObj::default());
    graph.set_field_value(co, a, 50.0).unwrap();
    graph.set_field_value(co, bb, 20.0).unwrap();

    assert_eq!(graph.field_value(co, c_sub), Some(30.0));
    assert_eq!(graph.field_value(co, c), Some(30.0));
    assert_eq!(graph.field_value(co, d), Some(30.0));
    assert_eq!(graph.snapshot(co).unwrap().fields.len(), 4);

    let po = graph.add_object(parent, SimpleObj::default());
    graph.set_field_value(po, a, 50.0).unwrap();
    graph.set_field_value(po, bb, 20.0).unwrap();
    assert_eq!(graph.field_value(po, c), Some(70.0));
    assert_eq!(graph.field_value(po, d), Some(70.0));
    assert!(graph.field(po, c_sub).is_none());
}

// ============================================================================
// 3. Input-side override: child replaces an input of a parent operator
// ============================================================================

#[test]
fn test_input_side_override() {
    let mut b = TypeRegistryBuilder::new();
    let parent = b.add_type("Parent").unwrap();
    let child = b.add_type("Child").unwrap();
    b.add_parent(child, parent).unwrap();

    let a = b.input_field(parent, "a").unwrap();
    let bb = b.input_field(parent, "b").unwrap();
    let m = b.add_field(parent, "m", Operator::Multiplication).unwrap();
    b.out(a, RelationId::SELF, m, Some(0)).unwrap();
    b.out(bb, RelationId::SELF, m, Some(1)).unwrap();

    let z = b.input_field(child, "z").unwrap();
    let a_child = b.add_field(child, "a", Operator::Identity).unwrap();
    b.out(z, RelationId::SELF, a_child, Some(0)).unwrap();
    b.set_parent(a_child, a).unwrap();

    let mut graph = Graph::new(b.flatten().unwrap());
    let obj = graph.add_object(child, SimpleObj::default());
    graph.set_field_value(obj, z, 5.0).unwrap();
    graph.set_field_value(obj, bb, 5.0).unwrap();

    assert_eq!(graph.field_value(obj, a), Some(5.0));
    assert_eq!(graph.field_value(obj, m), Some(25.0));
}

// ============================================================================
// 4. Output-side override: links into the overridden definition are not walked
// ============================================================================

#[test]
fn test_output_side_override() {
    let mut b = TypeRegistryBuilder::new();
    let parent = b.add_type("Parent").unwrap();
    let child = b.add_type("Child").unwrap();
    b.add_parent(child, parent).unwrap();

    let a = b.input_field(parent, "a").unwrap();
    let bb = b.input_field(parent, "b").unwrap();
    let s = b.add_field(parent, "s", Operator::Addition).unwrap();
    b.out(a, RelationId::SELF, s, Some(0)).unwrap();
    b.out(bb, RelationId::SELF, s, Some(1)).unwrap();
    let o = b.add_field(parent, "o", Operator::Identity).unwrap();
    b.out(s, RelationId::SELF, o, Some(0)).unwrap();

    let o_exp = b.add_field(child, "o", Operator::Exp).unwrap();
    b.out(s, RelationId::SELF, o_exp, Some(0)).unwrap();
    b.set_parent(o_exp, o).unwrap();

    let mut graph = Graph::new(b.flatten().unwrap());

    let co = graph.add_object(child, SimpleObj::default());
    graph.set_field_value(co, a, 2.5).unwrap();
    graph.set_field_value(co, bb, 2.5).unwrap();
    assert_eq!(graph.field_value(co, s), Some(5.0));
    let o_val = graph.field_value(co, o).unwrap();
    assert!((o_val - 148.413159).abs() < 1e-6, "got {o_val}");

    let po = graph.add_object(parent, SimpleObj::default());
    graph.set_field_value(po, a, 2.5).unwrap();
    graph.set_field_value(po, bb, 2.5).unwrap();
    assert_eq!(graph.field_value(po, o), Some(5.0));
}

// ============================================================================
// 5. Diamond inheritance: a field reached through two parents has one slot
// ============================================================================

#[test]
fn test_diamond_inheritance_single_slot() {
    let mut b = TypeRegistryBuilder::new();
    let root = b.add_type("Root").unwrap();
    let left = b.add_type("Left").unwrap();
    let right = b.add_type("Right").unwrap();
    let leaf = b.add_type("Leaf").unwrap();
    b.add_parent(left, root).unwrap();
    b.add_parent(right, root).unwrap();
    b.add_parent(leaf, left).unwrap();
    b.add_parent(leaf, right).unwrap();
    let x = b.input_field(root, "x").unwrap();
    b.input_field(left, "l").unwrap();
    b.input_field(right, "r").unwrap();

    let reg = b.flatten().unwrap();
    assert_eq!(reg.ty(leaf).depth(), 2);
    assert_eq!(reg.ty(leaf).num_slots(), 3);
    assert!(reg.field_slot(leaf, x).is_some());
    assert!(reg.is_instance_of(leaf, root));
}

// ============================================================================
// 6. Configuration errors surface from the builder
// ============================================================================

#[test]
fn test_configuration_errors() {
    let mut b = TypeRegistryBuilder::new();
    let t = b.add_type("T").unwrap();
    assert!(matches!(b.add_type("T"), Err(Error::DuplicateType(_))));
    b.input_field(t, "x").unwrap();
    assert!(matches!(b.input_field(t, "x"), Err(Error::DuplicateField(_))));
    assert!(matches!(b.set_tolerance(fieldnet::FieldId(99), 0.1), Err(Error::NotFound(_))));
}

// ============================================================================
// 7. A frozen registry is shared by graphs on several threads
// ============================================================================

#[test]
fn test_registry_shared_across_threads() {
    let mut b = TypeRegistryBuilder::new();
    let t = b.add_type("T").unwrap();
    let x = b.input_field(t, "x").unwrap();
    let y = b.add_field(t, "y", Operator::Scale(3.0)).unwrap();
    b.out(x, RelationId::SELF, y, Some(0)).unwrap();
    let reg = Arc::new(b.flatten().unwrap());

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let reg = Arc::clone(&reg);
            thread::spawn(move || {
                let mut graph: Graph<SimpleObj> = Graph::new(reg);
                let obj = graph.add_object(t, SimpleObj::default());
                graph.set_field_value(obj, x, i as f64).unwrap();
                graph.field_value(obj, y).unwrap()
            })
        })
        .collect();

    let results: Vec<f64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(results, vec![0.0, 3.0, 6.0, 9.0]);
}
