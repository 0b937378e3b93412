mod support;

use std::sync::{Arc, Mutex};

use audit_bus::filter::FilterPolicy;
use audit_bus::listeners::LoggingListener;
use audit_bus::{Broker, Error, EventSystem, EventType, InMemoryBroker, SinkError, Target};
use support::{event, fast_config, wait_until, RecordingListener};

#[test]
fn created_consumer_reaches_audit_log() {
    let broker = InMemoryBroker::new();
    let audit = Arc::new(Mutex::new(Vec::new()));
    let system = EventSystem::builder(fast_config(&["LoggingListener"]))
        .broker(Arc::new(broker.clone()), broker.clone())
        .audit_buffer(Arc::clone(&audit))
        .start()
        .unwrap();
    let source = Arc::clone(system.source().unwrap());
    wait_until("receivers connected", || source.is_connected());

    let mut sink = system.sink();
    sink.queue_event(event(EventType::Created, Target::Consumer));
    assert_eq!(sink.send_events(), 1);

    wait_until("audit line written", || !audit.lock().unwrap().is_empty());
    let line = audit.lock().unwrap()[0].clone();
    assert!(line.contains("target=CONSUMER"), "{}", line);
    assert!(line.contains("type=CREATED"), "{}", line);
    assert!(line.contains("ownerId=o1"), "{}", line);

    let queue = format!("event.{}", LoggingListener::NAME);
    wait_until("queue drained", || {
        broker.queue_depth(&queue) == 0 && broker.in_flight(&queue) == 0
    });

    drop(sink);
    system.shutdown();
    assert!(broker.is_closed());
}

#[test]
fn every_listener_gets_its_own_copy() {
    let broker = InMemoryBroker::new();
    let first = RecordingListener::new("first");
    let second = RecordingListener::new("second");
    let system = EventSystem::builder(fast_config(&[]))
        .broker(Arc::new(broker.clone()), broker.clone())
        .listener(first.clone())
        .listener(second.clone())
        .start()
        .unwrap();
    let source = Arc::clone(system.source().unwrap());
    wait_until("receivers connected", || source.is_connected());
    assert_eq!(source.queues(), vec!["event.first", "event.second"]);

    let mut sink = system.sink();
    sink.queue_event(event(EventType::Created, Target::Pool));
    sink.queue_event(event(EventType::Deleted, Target::Pool));
    assert_eq!(sink.send_events(), 2);

    wait_until("both listeners saw both events", || {
        first.events().len() == 2 && second.events().len() == 2
    });
    let types: Vec<_> = first.events().iter().map(|e| e.event_type).collect();
    assert_eq!(types, vec![EventType::Created, EventType::Deleted]);

    drop(sink);
    system.shutdown();
}

#[test]
fn failing_listener_redelivers_without_affecting_others() {
    let broker = InMemoryBroker::new();
    let flaky = RecordingListener::new("flaky");
    let steady = RecordingListener::new("steady");
    flaky.fail_next(2);

    let system = EventSystem::builder(fast_config(&[]))
        .broker(Arc::new(broker.clone()), broker.clone())
        .listener(flaky.clone())
        .listener(steady.clone())
        .start()
        .unwrap();
    let source = Arc::clone(system.source().unwrap());
    wait_until("receivers connected", || source.is_connected());

    let mut sink = system.sink();
    sink.queue_event(event(EventType::Modified, Target::Owner));
    sink.send_events();

    wait_until("flaky listener eventually succeeds", || flaky.events().len() == 1);
    wait_until("steady listener done", || steady.events().len() == 1);
    assert_eq!(flaky.attempts(), 3);
    assert_eq!(steady.attempts(), 1);
    wait_until("flaky queue drained", || {
        broker.queue_depth("event.flaky") == 0 && broker.in_flight("event.flaky") == 0
    });

    drop(sink);
    system.shutdown();
}

#[test]
fn filtered_events_never_reach_the_broker() {
    let broker = InMemoryBroker::new();
    let mut config = fast_config(&[]);
    config.filter.enabled = true;
    config.filter.policy = FilterPolicy::DoFilter;
    config.filter.include = vec!["CREATED-POOL".into()];

    let system = EventSystem::builder(config)
        .broker(Arc::new(broker.clone()), broker.clone())
        .start()
        .unwrap();

    let mut sink = system.sink();
    sink.queue_event(event(EventType::Modified, Target::Consumer));
    sink.queue_event(event(EventType::Created, Target::Pool));
    assert_eq!(sink.send_events(), 1);

    let published = broker.published("event.default");
    assert_eq!(published.len(), 1);
    let decoded = audit_bus::Event::from_json(&published[0].payload).unwrap();
    assert_eq!(decoded.target, Target::Pool);

    drop(sink);
    system.shutdown();
}

#[test]
fn disabled_broker_discards_events() {
    let broker = InMemoryBroker::new();
    let mut config = fast_config(&["LoggingListener"]);
    config.broker.enabled = false;

    let system = EventSystem::builder(config)
        .broker(Arc::new(broker.clone()), broker.clone())
        .start()
        .unwrap();
    assert!(system.source().is_none());
    assert!(system.dispatcher().is_none());

    let mut sink = system.sink();
    sink.queue_event(event(EventType::Created, Target::Consumer));
    assert_eq!(sink.send_events(), 0);

    assert!(broker.published("event.default").is_empty());
    assert!(broker.queue_names().is_empty());
    assert_eq!(broker.producer_sessions_created(), 0);

    drop(sink);
    system.shutdown();
}

#[test]
fn startup_fails_when_broker_unreachable() {
    let broker = InMemoryBroker::new();
    broker.go_down();

    let result = EventSystem::builder(fast_config(&["LoggingListener"]))
        .broker(Arc::new(broker.clone()), broker.clone())
        .start();
    assert!(matches!(result, Err(Error::Sink(SinkError::Startup(_)))));
    assert_eq!(broker.connection_epoch(), 1);
}
