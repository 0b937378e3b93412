//! Start-up and shutdown wiring.
//!
//! [`EventSystem`] assembles the sink, the message source, the status
//! monitors and (optionally) the external bus connector from a [`Config`].
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use audit_bus::broker::InMemoryBroker;
//! use audit_bus::config::Config;
//! use audit_bus::context::EventSystem;
//! use audit_bus::event::{Event, EventType, Target};
//! use audit_bus::sink::EventSink;
//!
//! let broker = InMemoryBroker::new();
//! let system = EventSystem::builder(Config::default())
//!     .broker(Arc::new(broker.clone()), broker.clone())
//!     .start()
//!     .unwrap();
//!
//! let mut sink = system.sink();
//! sink.queue_event(Event::builder(EventType::Created, Target::Consumer).build());
//! sink.send_events();
//!
//! system.shutdown();
//! assert!(broker.is_closed());
//! ```

use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use crate::broker::{Broker, InMemoryBroker};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::external::{BusStatus, BusTransport, ExternalBusConnector};
use crate::filter::EventFilter;
use crate::listeners::{
    build_listener, EventListener, ListenerContext, LoggingSubscriptionService, SubscriptionService,
};
use crate::sink::{EventDispatcher, EventSink, NoopEventSink};
use crate::source::MessageSource;
use crate::status::{ConnectionStatus, HealthCheck, MonitorThread, StatusMonitor};

type BrokerHealth = Box<dyn Fn() -> ConnectionStatus + Send>;
type BusHealth = Box<dyn Fn() -> BusStatus + Send>;

/// Collects the pieces [`EventSystem::start`] cannot build from config.
pub struct EventSystemBuilder {
    config: Config,
    broker: Option<(Arc<dyn Broker>, BrokerHealth)>,
    external_bus: Option<(Box<dyn BusTransport>, BusHealth)>,
    subscriptions: Arc<dyn SubscriptionService>,
    extra_listeners: Vec<Arc<dyn EventListener>>,
    audit_buffer: Option<Arc<Mutex<Vec<String>>>>,
}

impl EventSystemBuilder {
    /// The internal broker and the health check polled for its status.
    /// Defaults to a fresh [`InMemoryBroker`].
    pub fn broker<H>(mut self, broker: Arc<dyn Broker>, health: H) -> Self
    where
        H: HealthCheck<ConnectionStatus> + 'static,
    {
        let health: BrokerHealth = Box::new(move || health.check());
        self.broker = Some((broker, health));
        self
    }

    /// The external bus transport and its health check. Only used when
    /// `external_bus.enabled` is set.
    pub fn external_bus<H>(mut self, transport: Box<dyn BusTransport>, health: H) -> Self
    where
        H: HealthCheck<BusStatus> + 'static,
    {
        let health: BusHealth = Box::new(move || health.check());
        self.external_bus = Some((transport, health));
        self
    }

    pub fn subscription_service(mut self, service: Arc<dyn SubscriptionService>) -> Self {
        self.subscriptions = service;
        self
    }

    /// Attach a listener in addition to the configured ones.
    pub fn listener(mut self, listener: Arc<dyn EventListener>) -> Self {
        self.extra_listeners.push(listener);
        self
    }

    /// Keep a copy of every audit line written by the logging listener.
    pub fn audit_buffer(mut self, buffer: Arc<Mutex<Vec<String>>>) -> Self {
        self.audit_buffer = Some(buffer);
        self
    }

    pub fn start(self) -> Result<EventSystem> {
        EventSystem::start(self)
    }
}

/// A running event layer.
pub struct EventSystem {
    config: Config,
    broker: Arc<dyn Broker>,
    dispatcher: Option<EventDispatcher>,
    monitor: Arc<StatusMonitor<ConnectionStatus>>,
    source: Option<Arc<MessageSource>>,
    connector: Option<Arc<ExternalBusConnector>>,
    bus_monitor: Option<Arc<StatusMonitor<BusStatus>>>,
    pollers: Vec<MonitorThread>,
}

impl EventSystem {
    pub fn builder(config: Config) -> EventSystemBuilder {
        EventSystemBuilder {
            config,
            broker: None,
            external_bus: None,
            subscriptions: Arc::new(LoggingSubscriptionService),
            extra_listeners: Vec::new(),
            audit_buffer: None,
        }
    }

    fn start(builder: EventSystemBuilder) -> Result<Self> {
        let EventSystemBuilder {
            config,
            broker,
            external_bus,
            subscriptions,
            extra_listeners,
            audit_buffer,
        } = builder;
        crate::config::validate(&config)?;

        let (broker, broker_health) = match broker {
            Some(pair) => pair,
            None => {
                let broker = InMemoryBroker::new();
                let checked = broker.clone();
                let health: BrokerHealth = Box::new(move || checked.check());
                (Arc::new(broker) as Arc<dyn Broker>, health)
            }
        };

        let mut pollers = Vec::new();

        let (connector, bus_monitor) = match (config.external_bus.enabled, external_bus) {
            (true, Some((transport, health))) => {
                let connector = Arc::new(ExternalBusConnector::new(transport));
                let monitor: Arc<StatusMonitor<BusStatus>> =
                    Arc::new(StatusMonitor::new("external-bus"));
                monitor.register(connector.clone());
                pollers.push(MonitorThread::spawn(
                    Arc::clone(&monitor),
                    health,
                    config.external_bus.monitor_interval(),
                ));
                (Some(connector), Some(monitor))
            }
            (true, None) => {
                warn!("external bus enabled but no transport supplied, forwarding disabled");
                (None, None)
            }
            (false, _) => (None, None),
        };

        let monitor: Arc<StatusMonitor<ConnectionStatus>> = Arc::new(StatusMonitor::new("broker"));

        if !config.broker.enabled {
            info!("internal broker disabled, events will be discarded");
            return Ok(Self {
                config,
                broker,
                dispatcher: None,
                monitor,
                source: None,
                connector,
                bus_monitor,
                pollers,
            });
        }

        let dispatcher = EventDispatcher::new(
            Arc::clone(&broker),
            EventFilter::new(&config.filter),
            &config.broker,
        )?;

        let ctx = ListenerContext {
            subscriptions,
            webhook: config.webhook.clone(),
            external_bus: config.external_bus.clone(),
            connector: connector.clone(),
            audit_buffer,
        };
        let mut listeners = config
            .listeners
            .iter()
            .map(|name| build_listener(name, &ctx))
            .collect::<Result<Vec<_>, Error>>()?;
        listeners.extend(extra_listeners);

        let source = Arc::new(MessageSource::new(
            Arc::clone(&broker),
            listeners,
            &config.broker.address_prefix,
            config.broker.receive_timeout(),
        ));
        source.attach(&monitor);
        pollers.push(MonitorThread::spawn(
            Arc::clone(&monitor),
            broker_health,
            config.broker.monitor_interval(),
        ));

        info!(
            receivers = source.receiver_count(),
            address = dispatcher.address(),
            external_bus = connector.is_some(),
            "event system started"
        );

        Ok(Self {
            config,
            broker,
            dispatcher: Some(dispatcher),
            monitor,
            source: Some(source),
            connector,
            bus_monitor,
            pollers,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// A sink for the calling worker; discards everything when the broker
    /// is disabled.
    pub fn sink(&self) -> Box<dyn EventSink> {
        match &self.dispatcher {
            Some(dispatcher) => Box::new(dispatcher.sink()),
            None => Box::new(NoopEventSink),
        }
    }

    pub fn dispatcher(&self) -> Option<&EventDispatcher> {
        self.dispatcher.as_ref()
    }

    pub fn broker_monitor(&self) -> &Arc<StatusMonitor<ConnectionStatus>> {
        &self.monitor
    }

    pub fn source(&self) -> Option<&Arc<MessageSource>> {
        self.source.as_ref()
    }

    pub fn connector(&self) -> Option<&Arc<ExternalBusConnector>> {
        self.connector.as_ref()
    }

    pub fn bus_monitor(&self) -> Option<&Arc<StatusMonitor<BusStatus>>> {
        self.bus_monitor.as_ref()
    }

    /// Stop polling, close every receiver and the external bus, then close
    /// the broker connection last.
    pub fn shutdown(mut self) {
        // Signal all pollers before joining any.
        for poller in &self.pollers {
            poller.signal_stop();
        }
        for poller in self.pollers.drain(..) {
            poller.stop();
        }
        if let Some(source) = self.source.take() {
            source.shut_down();
        }
        if let Some(connector) = self.connector.take() {
            connector.close();
        }
        if let Err(err) = self.broker.close() {
            warn!(error = %err, "failed to close broker connection");
        }
        info!("event system stopped");
    }
}
