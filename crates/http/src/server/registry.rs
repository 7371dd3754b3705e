//! Process-wide processor factory registry.
//!
//! Protocol names advertised via ALPN map to the factories registered here.
//! The registry is shared by every server instance in the process; the
//! default `"http/1.1"` factory is installed exactly once, regardless of how
//! many servers are constructed. Registration is expected during setup, but
//! the lock makes later registration safe as well.

use std::collections::HashMap;
use std::sync::{Arc, Once, PoisonError, RwLock};

use once_cell::sync::Lazy;

use crate::server::processor::{ConnectionProcessorFactory, Http1ProcessorFactory};

static REGISTRY: Lazy<RwLock<HashMap<String, Arc<dyn ConnectionProcessorFactory>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

static DEFAULT_FACTORY: Once = Once::new();

/// Installs the default `"http/1.1"` factory, exactly once per process.
pub(crate) fn ensure_default_registration() {
    DEFAULT_FACTORY.call_once(|| register(Arc::new(Http1ProcessorFactory)));
}

/// Registers a processor factory under its protocol name.
///
/// Safe to call repeatedly; the last registration for a given name wins.
pub fn register(factory: Arc<dyn ConnectionProcessorFactory>) {
    let name = factory.protocol().to_owned();
    REGISTRY.write().unwrap_or_else(PoisonError::into_inner).insert(name, factory);
}

/// Looks a factory up by negotiated protocol name.
pub(crate) fn lookup(protocol: &str) -> Option<Arc<dyn ConnectionProcessorFactory>> {
    REGISTRY.read().unwrap_or_else(PoisonError::into_inner).get(protocol).map(Arc::clone)
}

/// All protocol names currently registered, for ALPN advertisement.
pub(crate) fn registered_protocols() -> Vec<String> {
    REGISTRY.read().unwrap_or_else(PoisonError::into_inner).keys().cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::processor::{ConnectionProcessor, KeepAliveState};
    use crate::server::request::ServerDelegate;

    #[derive(Debug)]
    struct FakeFactory {
        name: &'static str,
    }

    impl ConnectionProcessorFactory for FakeFactory {
        fn protocol(&self) -> &str {
            self.name
        }

        fn create(&self, delegate: Arc<dyn ServerDelegate>, keep_alive: KeepAliveState) -> Box<dyn ConnectionProcessor> {
            Http1ProcessorFactory.create(delegate, keep_alive)
        }
    }

    #[test]
    fn default_factory_registered_once() {
        ensure_default_registration();
        ensure_default_registration();

        assert!(lookup("http/1.1").is_some());
    }

    #[test]
    fn last_registration_wins() {
        register(Arc::new(FakeFactory { name: "x-test/1" }));
        let first = lookup("x-test/1").unwrap();

        register(Arc::new(FakeFactory { name: "x-test/1" }));
        let second = lookup("x-test/1").unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn unknown_protocol_misses() {
        assert!(lookup("x-no-such-protocol").is_none());
    }
}
