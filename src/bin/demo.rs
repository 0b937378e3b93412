//! Runs the event layer against the in-memory broker and bus.
//!
//! ```text
//! audit-bus-demo [config.toml]
//! ```
//!
//! Publishes a few events, takes the broker down and brings it back, and
//! prints what reached the audit log and the external bus.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use audit_bus::config::ConfigLoader;
use audit_bus::logging::init_logging;
use audit_bus::{
    BusStatus, Event, EventSink, EventSystem, EventType, InMemoryBroker, InMemoryBus, Target,
};
use serde_json::json;
use tracing::info;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut loader = ConfigLoader::new();
    if let Some(path) = std::env::args().nth(1) {
        loader = loader.with_config_path(path);
    }
    let mut config = loader.load()?;
    init_logging(&config.logging)?;

    // Fast polling so the demo reacts within a second.
    config.broker.monitor_interval_ms = 100;
    config.broker.receive_timeout_ms = 50;
    config.external_bus.enabled = true;
    config.external_bus.monitor_interval_ms = 100;
    if !config.listeners.iter().any(|l| l == "BusForwardingListener") {
        config.listeners.push("BusForwardingListener".into());
    }

    let broker = InMemoryBroker::new();
    let bus = InMemoryBus::new();
    let audit = Arc::new(Mutex::new(Vec::new()));

    let system = EventSystem::builder(config)
        .broker(Arc::new(broker.clone()), broker.clone())
        .external_bus(Box::new(bus.clone()), bus.clone())
        .audit_buffer(Arc::clone(&audit))
        .start()?;

    thread::sleep(Duration::from_millis(300));

    let mut sink = system.sink();
    sink.queue_event(
        Event::builder(EventType::Created, Target::Consumer)
            .principal("admin")
            .owner_id("o1")
            .consumer_uuid("c-1")
            .build(),
    );
    sink.queue_event(
        Event::builder(EventType::Created, Target::Pool)
            .owner_id("o1")
            .event_data(json!({ "subscriptionId": "sub-1" }))
            .build(),
    );
    info!(sent = sink.send_events(), "published first batch");

    thread::sleep(Duration::from_millis(300));

    info!("taking the broker down");
    broker.go_down();
    thread::sleep(Duration::from_millis(300));
    broker.come_up();
    thread::sleep(Duration::from_millis(300));

    info!("stopping external bus flow");
    bus.set_status(BusStatus::FlowStopped);
    thread::sleep(Duration::from_millis(300));

    sink.queue_event(
        Event::builder(EventType::Deleted, Target::Consumer)
            .owner_id("o1")
            .consumer_uuid("c-1")
            .build(),
    );
    info!(sent = sink.send_events(), "published second batch");
    thread::sleep(Duration::from_millis(300));

    if let Some(source) = system.source() {
        info!(paused = ?source.paused_listeners(), "receivers paused while flow is stopped");
    }

    bus.set_status(BusStatus::Connected);
    thread::sleep(Duration::from_millis(500));

    drop(sink);
    system.shutdown();

    for line in audit.lock().map_err(|_| "audit buffer poisoned")?.iter() {
        println!("audit: {}", line);
    }
    for (destination, payload) in bus.sent() {
        println!("bus: {} ({} bytes)", destination, payload.len());
    }
    Ok(())
}
