#![forbid(unsafe_code)]

//! Injected fields participate in dependency tracking like any other field.

use std::cell::RefCell;
use std::rc::Rc;

use ripple::prelude::*;

#[test]
fn watcher_over_injected_field_reruns_on_write() {
    let app = Node::builder()
        .provide(Provide::values([("count", Value::from(1))]))
        .build();
    let child = Node::builder()
        .parent(&app)
        .inject(Injections::from_names(["count"]))
        .build();

    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    let reader = child.clone();
    let _watcher = Watcher::new(
        move || reader.get("count").unwrap_or_default(),
        WatcherOptions::default().sync(),
        ripple::callback(move |new, old| {
            sink.borrow_mut().push((old.as_int(), new.as_int()));
            Ok(())
        }),
    );

    child.set("count", 2);
    assert_eq!(*seen.borrow(), vec![(Some(1), Some(2))]);
}

#[test]
fn provider_record_is_not_tracked() {
    let app = Node::builder()
        .provide(Provide::values([("count", Value::from(1))]))
        .build();
    let reader = app.clone();
    let watcher = Watcher::new(
        move || {
            reader
                .provided_value(&ripple::Key::from("count"))
                .unwrap_or_default()
        },
        WatcherOptions::default().sync(),
        None,
    );
    assert_eq!(watcher.value(), Value::from(1));
    assert!(watcher.dependency_ids().is_empty());
}
