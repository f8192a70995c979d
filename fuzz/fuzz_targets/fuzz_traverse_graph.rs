#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use ripple_core::{List, Map, ObservingPaused, Traversal, Value};

const MAX_NODES: usize = 64;
const MAX_EDGES: usize = 256;

#[derive(Arbitrary, Debug)]
enum Shape {
    Map,
    List,
    FrozenMap,
    Unobserved,
}

#[derive(Arbitrary, Debug)]
struct Graph {
    nodes: Vec<Shape>,
    edges: Vec<(u8, u8)>,
    leaves: Vec<(u8, i64)>,
}

fn build(shape: &Shape) -> Value {
    match shape {
        Shape::Map => Value::Map(Map::new(Vec::<(String, Value)>::new())),
        Shape::List => Value::List(List::new(Vec::new())),
        Shape::FrozenMap => Value::Map(Map::frozen([("leaf", Value::from(0))])),
        Shape::Unobserved => {
            let _paused = ObservingPaused::new();
            Value::Map(Map::new(Vec::<(String, Value)>::new()))
        }
    }
}

fn link(from: &Value, key: usize, to: Value) {
    match from {
        Value::Map(map) => {
            let _ = map.insert(format!("k{key}"), to);
        }
        Value::List(list) => {
            let _ = list.push(to);
        }
        _ => {}
    }
}

fn unlink(value: &Value) {
    match value {
        Value::Map(map) => {
            for key in map.keys() {
                let _ = map.remove(&key);
            }
        }
        Value::List(list) => {
            while list.remove(0).is_ok() {}
        }
        _ => {}
    }
}

fuzz_target!(|graph: Graph| {
    if graph.nodes.is_empty() {
        return;
    }
    let nodes: Vec<Value> = graph.nodes.iter().take(MAX_NODES).map(build).collect();
    let n = nodes.len();
    for (i, (from, to)) in graph.edges.iter().take(MAX_EDGES).enumerate() {
        link(&nodes[*from as usize % n], i, nodes[*to as usize % n].clone());
    }
    for (i, (at, leaf)) in graph.leaves.iter().take(MAX_EDGES).enumerate() {
        link(&nodes[*at as usize % n], MAX_EDGES + i, Value::from(*leaf));
    }

    let mut traversal = Traversal::new();
    let entered = traversal.run(&nodes[0]);
    assert!(entered <= n);
    assert_eq!(traversal.seen_len(), 0);

    // Cycles would otherwise leak across iterations.
    for node in &nodes {
        unlink(node);
    }
});
