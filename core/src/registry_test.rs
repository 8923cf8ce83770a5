use std::sync::Arc;

use parking_lot::Mutex;

use crate::{key::QueryKey, registry::SubscriptionRegistry};

fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) -> Box<dyn Fn(&QueryKey) + Send + Sync>) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let make = {
        let log = log.clone();
        move |name: &str| -> Box<dyn Fn(&QueryKey) + Send + Sync> {
            let log = log.clone();
            let name = name.to_string();
            Box::new(move |key: &QueryKey| log.lock().push(format!("{name}:{key}")))
        }
    };
    (log, make)
}

#[test]
fn broadcast_reaches_listeners_in_registration_order() {
    let registry = SubscriptionRegistry::new();
    let (log, listener) = recorder();

    let _a = registry.subscribe(listener("a"));
    let _b = registry.subscribe(listener("b"));
    let _c = registry.subscribe(listener("c"));

    registry.broadcast(&QueryKey::from("x"));

    assert_eq!(
        *log.lock(),
        vec![r#"a:["x"]"#, r#"b:["x"]"#, r#"c:["x"]"#]
    );
}

#[test]
fn unsubscribe_removes_exactly_that_listener() {
    let registry = SubscriptionRegistry::new();
    let (log, listener) = recorder();

    let a = registry.subscribe(listener("a"));
    let _b = registry.subscribe(listener("b"));
    assert_eq!(registry.len(), 2);

    a.unsubscribe();
    assert_eq!(registry.len(), 1);

    registry.broadcast(&QueryKey::from("x"));
    assert_eq!(*log.lock(), vec![r#"b:["x"]"#]);
}

#[test]
fn dropping_the_subscription_unsubscribes() {
    let registry = SubscriptionRegistry::new();
    let (log, listener) = recorder();

    {
        let _a = registry.subscribe(listener("a"));
        assert_eq!(registry.len(), 1);
    }

    assert!(registry.is_empty());
    registry.broadcast(&QueryKey::from("x"));
    assert!(log.lock().is_empty());
}

#[test]
fn subscription_outliving_registry_is_harmless() {
    let registry = SubscriptionRegistry::new();
    let subscription = registry.subscribe(|_| {});
    drop(registry);
    subscription.unsubscribe();
}

#[test]
fn listeners_may_unsubscribe_during_broadcast() {
    let registry = SubscriptionRegistry::new();
    let slot = Arc::new(Mutex::new(None));
    let calls = Arc::new(Mutex::new(0));

    let subscription = {
        let slot = slot.clone();
        let calls = calls.clone();
        registry.subscribe(move |_| {
            *calls.lock() += 1;
            // Unsubscribes itself.
            drop(slot.lock().take());
        })
    };
    *slot.lock() = Some(subscription);

    let late = Arc::new(Mutex::new(Vec::new()));
    {
        let registry_handle = registry.clone();
        let late = late.clone();
        let _adder = registry.subscribe(move |_| {
            late.lock().push(registry_handle.subscribe(|_| {}));
        });

        registry.broadcast(&QueryKey::from("x"));
    }

    assert_eq!(*calls.lock(), 1);

    late.lock().clear();
    registry.broadcast(&QueryKey::from("x"));
    assert_eq!(*calls.lock(), 1);
    assert!(registry.is_empty());
}

#[test]
fn dropping_a_listener_that_owns_a_subscription() {
    let registry = SubscriptionRegistry::new();
    let inner = registry.subscribe(|_| {});
    let outer = registry.subscribe(move |_| {
        let _keep = &inner;
    });
    assert_eq!(registry.len(), 2);

    let (tx, rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        drop(outer);
        let _ = tx.send(());
    });

    rx.recv_timeout(std::time::Duration::from_secs(3))
        .expect("unsubscribing must not re-enter the listener lock");
    assert!(registry.is_empty());
}
