//! Registry of capability sets ("drivers") advertised during activation.

use std::collections::HashMap;
use std::fmt;

use tracing::debug;

use crate::router::{ROUTER_TARGET, Router};

type Initializer = Box<dyn Fn(&mut Router) + Send + Sync>;

/// Maps driver names to the initializers that bind their routes.
#[derive(Default)]
pub struct DriverRegistry {
    drivers: HashMap<String, Initializer>,
}

impl DriverRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `initializer` under `name`. A later registration for the
    /// same name replaces the earlier one.
    pub fn register<F>(&mut self, name: impl Into<String>, initializer: F)
    where
        F: Fn(&mut Router) + Send + Sync + 'static,
    {
        let driver = name.into();
        if self
            .drivers
            .insert(driver.clone(), Box::new(initializer))
            .is_some()
        {
            debug!(target: ROUTER_TARGET, driver = %driver, "replaced existing driver");
        }
    }

    /// Reports whether a driver with `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.drivers.contains_key(name)
    }

    /// Number of registered drivers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    /// Reports whether no drivers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }

    /// Runs every initializer once against `router` and returns the driver
    /// names. The order of both is unspecified.
    pub fn initialize(&self, router: &mut Router) -> Vec<String> {
        self.drivers
            .iter()
            .map(|(name, initializer)| {
                initializer(router);
                name.clone()
            })
            .collect()
    }
}

impl fmt::Debug for DriverRegistry {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.drivers.keys().map(String::as_str).collect();
        names.sort_unstable();
        formatter
            .debug_struct("DriverRegistry")
            .field("drivers", &names)
            .finish()
    }
}
