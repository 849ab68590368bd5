//! Integration Tests for Reactive System
//!
//! These tests verify that signals, reactive objects, computed values,
//! subscribers and scopes work together correctly.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use filament_core::graph::{flush, has_pending};
use filament_core::reactive::{
    collect, peek, subscribe, watch, watch_property, Computed, Effect, EffectScope, Reactive,
    Runtime, Signal, SubscribeOptions, Subscriber, SubscriberOptions, WatchOptions,
};
use filament_core::{batch, set_fallback_error_handler, clear_fallback_error_handler};
use serde_json::json;

/// Test that writing an equal value never notifies.
#[test]
fn equal_write_does_not_notify() {
    let r = Signal::new(1);
    let seen: Rc<Cell<Option<i32>>> = Rc::new(Cell::new(None));

    let (s, r2) = (seen.clone(), r.clone());
    let _sub = subscribe(
        &r,
        move |_| s.set(Some(peek(&r2))),
        SubscribeOptions::default(),
    );

    r.set(1);
    assert_eq!(seen.get(), None);
    assert_eq!(r.version(), 0);
}

/// Test that a computed over a reactive object follows property writes.
#[test]
fn computed_over_reactive_object() {
    let obj = Reactive::new(json!({ "a": 1 }));

    let o = obj.clone();
    let c = Computed::new(move |_| o.get_value("a").and_then(|v| v.as_i64()).unwrap_or(0) * 2);
    assert_eq!(c.get(), 2);

    obj.set("a", 2).unwrap();
    flush();

    assert_eq!(c.get(), 4);
}

/// Test that a computed over a whole snapshot follows writes to nested
/// objects.
#[test]
fn computed_over_nested_snapshot() {
    let obj = Reactive::new(json!({ "a": { "x": 1 } }));

    let o = obj.clone();
    let c = Computed::new(move |_| o.snapshot());
    assert_eq!(c.get(), json!({ "a": { "x": 1 } }));

    obj.child("a").unwrap().set("x", 2).unwrap();
    assert_eq!(c.get(), json!({ "a": { "x": 2 } }));
}

/// Test that a computed owned by a paused scope is current after resume.
#[test]
fn computed_catches_up_after_scope_resume() {
    let base = Signal::new(1);
    let scope = EffectScope::detached();

    let b = base.clone();
    let doubled = scope.run(|| Computed::new(move |_| b.get() * 2)).unwrap();
    assert_eq!(doubled.get(), 2);

    scope.pause();
    base.set(5);
    scope.resume();

    assert_eq!(doubled.get(), 10);
}

/// Test that a subscriber with a limit disposes itself.
#[test]
fn limited_subscriber_fires_exactly_limit_times() {
    let calls = Rc::new(Cell::new(0));
    let c = calls.clone();
    let sub = Subscriber::new(
        move |_| c.set(c.get() + 1),
        SubscriberOptions {
            limit: 2,
            ..Default::default()
        },
    );

    assert!(sub.trigger());
    assert!(!sub.trigger());
    assert!(sub.is_disposed());
    assert!(!sub.trigger());

    assert_eq!(calls.get(), 2);
}

/// Test that batched property watchers get one call per flush.
#[test]
fn watch_property_batches_changes() {
    let obj = Reactive::object();
    let calls = Rc::new(RefCell::new(Vec::new()));

    let c = calls.clone();
    let _sub = watch_property(
        &obj,
        &["x", "y"],
        move |t| c.borrow_mut().push(t.properties.to_vec()),
        SubscribeOptions {
            batch: true,
            ..Default::default()
        },
    );

    obj.set("x", 1).unwrap();
    obj.set("y", 2).unwrap();
    assert!(has_pending());

    flush();
    assert_eq!(
        *calls.borrow(),
        vec![vec!["x".to_string(), "y".to_string()]]
    );
}

/// Test that an effect's links match exactly what its last run read.
#[test]
fn dependency_accuracy_across_runs() {
    let use_a = Signal::new(true);
    let a = Signal::new(1);
    let b = Signal::new(2);

    let (u, a2, b2) = (use_a.clone(), a.clone(), b.clone());
    let effect = Effect::new(move || {
        // Read `a` twice to check deduplication.
        if u.get() {
            a2.get();
            a2.get();
        } else {
            b2.get();
        }
    });

    assert_eq!(a.subscriber_count(), 1);
    assert!(Runtime::has_link(effect.id(), a.id()));
    assert!(!Runtime::has_link(effect.id(), b.id()));

    use_a.set(false);
    assert_eq!(a.subscriber_count(), 0);
    assert_eq!(b.subscriber_count(), 1);
    assert_eq!(effect.dependency_count(), 2);
}

/// Test that disposing twice is the same as disposing once.
#[test]
fn dispose_is_idempotent() {
    let value = Signal::new(0);
    let cleanups = Rc::new(Cell::new(0));

    let scope = EffectScope::detached();
    let effect = scope
        .run(|| {
            let v = value.clone();
            Effect::new(move || {
                v.get();
            })
        })
        .unwrap();

    let k = cleanups.clone();
    scope.on_dispose(move || k.set(k.get() + 1));

    assert!(scope.dispose());
    assert!(!scope.dispose());
    assert_eq!(cleanups.get(), 1);

    assert!(effect.is_disposed());
    assert!(!effect.dispose());
    assert_eq!(value.subscriber_count(), 0);
}

/// Test that N synchronous notifications reach a batch subscriber once.
#[test]
fn batched_delivery_is_at_most_once() {
    let obj = Reactive::object();
    let calls = Rc::new(Cell::new(0));

    let c = calls.clone();
    let _sub = subscribe(
        &obj,
        move |_| c.set(c.get() + 1),
        SubscribeOptions {
            property: Some("p".into()),
            batch: true,
            ..Default::default()
        },
    );

    for i in 0..10 {
        obj.set("p", i).unwrap();
    }
    flush();
    assert_eq!(calls.get(), 1);

    // A second flush with nothing pending delivers nothing.
    flush();
    assert_eq!(calls.get(), 1);
}

/// Test that `batch` flushes once at the outermost exit.
#[test]
fn nested_batches_flush_at_outermost_exit() {
    let value = Signal::new(0);
    let runs = Rc::new(Cell::new(0));

    let r = runs.clone();
    let _sub = subscribe(
        &value,
        move |_| r.set(r.get() + 1),
        SubscribeOptions {
            batch: true,
            ..Default::default()
        },
    );

    batch(|| {
        value.set(1);
        batch(|| value.set(2));
        assert_eq!(runs.get(), 0);
        value.set(3);
    });
    assert_eq!(runs.get(), 1);
}

/// Test that one failing subscriber does not stop its siblings.
#[test]
fn failing_subscriber_is_isolated() {
    let value = Signal::new(0);
    let errors = Rc::new(Cell::new(0));
    let reached = Rc::new(Cell::new(false));

    let e = errors.clone();
    set_fallback_error_handler(move |_| e.set(e.get() + 1));

    let _bad = subscribe(
        &value,
        |_| panic!("subscriber failure"),
        SubscribeOptions::default(),
    );
    let r = reached.clone();
    let _good = subscribe(&value, move |_| r.set(true), SubscribeOptions::default());

    value.set(1);
    clear_fallback_error_handler();

    assert_eq!(errors.get(), 1);
    assert!(reached.get());
}

/// Test that nested scopes cascade disposal to watchers and computeds.
#[test]
fn scope_tears_down_everything_it_owns() {
    let value = Signal::new(1);
    let log = Rc::new(RefCell::new(Vec::new()));

    let outer = EffectScope::detached();
    let doubled = outer
        .run(|| {
            let inner = EffectScope::new();
            inner.run(|| {
                let (v, l) = (value.clone(), log.clone());
                watch(
                    move || v.get(),
                    move |new: &i32, _, _| l.borrow_mut().push(*new),
                    WatchOptions::default(),
                )
            });

            let v = value.clone();
            Computed::new(move |_| v.get() * 2)
        })
        .unwrap();

    assert_eq!(doubled.get(), 2);
    value.set(2);
    assert_eq!(*log.borrow(), vec![2]);
    assert_eq!(doubled.get(), 4);

    outer.dispose();
    value.set(3);
    assert_eq!(*log.borrow(), vec![2]);
    assert_eq!(doubled.get(), 4);
    assert_eq!(value.subscriber_count(), 0);
}

/// Test that `collect` reports reads without linking them.
#[test]
fn collect_reports_reads() {
    let a = Signal::new(1);
    let obj = Reactive::new(json!({ "k": true }));

    let collected = collect(|| {
        a.get();
        obj.get("k");
        "done"
    });

    assert_eq!(collected.result, "done");
    assert_eq!(collected.deps.len(), 2);
    assert_eq!(collected.deps[0], a.id());
    assert_eq!(a.subscriber_count(), 0);
}

/// Test that an effect disposing itself mid-run stops cleanly.
#[test]
fn effect_can_dispose_itself() {
    let value = Signal::new(0);
    let runs = Rc::new(Cell::new(0));
    let slot: Rc<RefCell<Option<Effect>>> = Rc::new(RefCell::new(None));

    let (v, r, s) = (value.clone(), runs.clone(), slot.clone());
    let effect = Effect::new_lazy(move || {
        r.set(r.get() + 1);
        if v.get() > 0 {
            if let Some(me) = s.borrow().as_ref() {
                me.dispose();
            }
        }
    });
    *slot.borrow_mut() = Some(effect.clone());
    effect.execute();

    value.set(1);
    value.set(2);
    assert_eq!(runs.get(), 2);
    assert!(effect.is_disposed());
    slot.borrow_mut().take();
}
