// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use acq_app::normalize_name;
use acq_core::{AcquisitionDevice, AcquisitionPipeline, DynResult};

#[cfg(feature = "simulated")]
pub mod simulated;

/// Hardware parameters handed to a backend factory.
#[derive(Debug, Clone)]
pub struct BackendSettings {
    pub device_id: String,
    /// Time the device needs to become ready after power-up or reset.
    pub ready_delay: Duration,
    pub sample_rate_hz: u64,
    pub channel_count: u32,
    /// Output storage size; `None` means unlimited.
    pub disk_capacity_bytes: Option<u64>,
    /// Make every automatic reset fail.
    pub fail_recovery: bool,
    /// Interval between progress updates from the pipeline.
    pub feed_interval: Duration,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            device_id: "SIM00001".to_string(),
            ready_delay: Duration::from_millis(500),
            sample_rate_hz: 4_000,
            channel_count: 512,
            disk_capacity_bytes: None,
            fail_recovery: false,
            feed_interval: Duration::from_millis(100),
        }
    }
}

/// The two collaborators an acquisition task drives.
#[derive(Clone)]
pub struct Backend {
    pub device: Arc<dyn AcquisitionDevice>,
    pub pipeline: Arc<dyn AcquisitionPipeline>,
}

pub type BackendFactory = fn(&BackendSettings) -> DynResult<Backend>;

/// Context for registering and instantiating acquisition backends.
#[derive(Clone, Default)]
pub struct RegistrationContext {
    factories: HashMap<String, BackendFactory>,
}

impl RegistrationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend factory under a stable name (e.g. "simulated").
    pub fn register_backend(&mut self, name: &str, factory: BackendFactory) {
        self.factories.insert(normalize_name(name), factory);
    }

    pub fn is_backend_registered(&self, name: &str) -> bool {
        self.factories.contains_key(&normalize_name(name))
    }

    /// Registered backend names, sorted.
    pub fn registered_backends(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn build_backend(&self, name: &str, settings: &BackendSettings) -> DynResult<Backend> {
        let factory = self
            .factories
            .get(&normalize_name(name))
            .ok_or_else(|| format!("Unknown acquisition backend: {}", name))?;
        factory(settings)
    }
}

/// Register all built-in backends enabled by features on a context.
pub fn register_builtin_backends_on(context: &mut RegistrationContext) {
    #[cfg(feature = "simulated")]
    context.register_backend("simulated", simulated_factory);
    #[cfg(not(feature = "simulated"))]
    let _ = context;
}

#[cfg(feature = "simulated")]
fn simulated_factory(settings: &BackendSettings) -> DynResult<Backend> {
    if settings.channel_count == 0 {
        return Err("simulated backend needs at least one channel".into());
    }
    let device = Arc::new(simulated::SimulatedDevice::new(settings));
    let pipeline = Arc::new(simulated::SimulatedPipeline::new(settings));
    Ok(Backend { device, pipeline })
}
