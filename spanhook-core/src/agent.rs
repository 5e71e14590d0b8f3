//! Control surface of the engine.
//!
//! `Agent` ties configuration, the registry, the controller and the tracer
//! together. It is created once per process with `Agent::builder(...)` or
//! `Agent::init_instrumentation(...)`; afterwards configuration changes are
//! pushed through `reconfigure`, which takes effect on already-loaded units
//! without a restart.

use anyhow::{Context, Result};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info};

use crate::boot_delegation::enable_boot_delegation;
use crate::config::AgentConfig;
use crate::context::{LoggingReporter, Tracer};
use crate::controller::{ApplicationController, ApplyReport};
use crate::descriptor::InstrumentationDescriptor;
use crate::enablement::EnablementState;
use crate::host::RuntimeTarget;
use crate::properties::SystemProperties;
use crate::registry::InstrumentationRegistry;
use crate::trace_methods::{self, is_trace_methods_descriptor};

pub struct AgentBuilder {
    config: AgentConfig,
    target: Arc<dyn RuntimeTarget>,
    tracer: Option<Arc<Tracer>>,
    descriptors: Vec<Arc<InstrumentationDescriptor>>,
}

impl AgentBuilder {
    pub fn tracer(mut self, tracer: Arc<Tracer>) -> Self {
        self.tracer = Some(tracer);
        self
    }

    pub fn descriptor(mut self, descriptor: Arc<InstrumentationDescriptor>) -> Self {
        self.descriptors.push(descriptor);
        self
    }

    pub fn descriptors<I>(mut self, descriptors: I) -> Self
    where
        I: IntoIterator<Item = Arc<InstrumentationDescriptor>>,
    {
        self.descriptors.extend(descriptors);
        self
    }

    /// Initialize against the process-wide property store
    pub fn init(self) -> Result<Agent> {
        self.init_with_properties(SystemProperties::global())
    }

    /// Initialize, exposing the agent packages through `properties`
    pub fn init_with_properties(self, properties: &SystemProperties) -> Result<Agent> {
        let state = EnablementState::from_config(&self.config)
            .context("Invalid instrumentation settings in agent configuration")?;
        let traced = trace_methods::build_descriptors(&self.config.trace_methods)
            .context("Invalid trace_methods in agent configuration")?;

        enable_boot_delegation(&self.config, properties);

        let registry = Arc::new(InstrumentationRegistry::new());
        registry.register_all(self.descriptors.into_iter().chain(traced));

        let tracer = self
            .tracer
            .unwrap_or_else(|| Tracer::new(Arc::new(LoggingReporter)));
        let controller = ApplicationController::new(registry, state, self.target, Arc::clone(&tracer));
        let report = controller.start();
        info!(
            registered = controller.registry().len(),
            active = controller.active_descriptors().len(),
            instrumented = report.instrumented,
            "Instrumentation initialized"
        );

        Ok(Agent {
            config: RwLock::new(self.config),
            controller,
            tracer,
        })
    }
}

pub struct Agent {
    config: RwLock<AgentConfig>,
    controller: Arc<ApplicationController>,
    tracer: Arc<Tracer>,
}

impl Agent {
    pub fn builder(config: AgentConfig, target: Arc<dyn RuntimeTarget>) -> AgentBuilder {
        AgentBuilder {
            config,
            target,
            tracer: None,
            descriptors: Vec::new(),
        }
    }

    /// One-call initialization against the process-wide property store
    pub fn init_instrumentation(
        config: AgentConfig,
        target: Arc<dyn RuntimeTarget>,
        tracer: Arc<Tracer>,
        descriptors: Vec<Arc<InstrumentationDescriptor>>,
    ) -> Result<Self> {
        Self::builder(config, target)
            .tracer(tracer)
            .descriptors(descriptors)
            .init()
    }

    /// Make sure `descriptors` are registered and applied to the units of `type_name`
    pub fn ensure_instrumented(
        &self,
        type_name: &str,
        descriptors: &[Arc<InstrumentationDescriptor>],
    ) -> ApplyReport {
        self.controller.ensure_instrumented(type_name, descriptors)
    }

    /// Register `descriptors`, re-read the current configuration and re-apply live
    pub fn re_init_instrumentation(
        &self,
        descriptors: Vec<Arc<InstrumentationDescriptor>>,
    ) -> Result<ApplyReport> {
        let config = self.config.read().unwrap_or_else(PoisonError::into_inner);
        let state = EnablementState::from_config(&config)
            .context("Invalid instrumentation settings in agent configuration")?;
        self.controller.registry().register_all(descriptors);
        Ok(self.controller.reinitialize(state))
    }

    /// Replace the configuration and bring the live process in line with it.
    ///
    /// An invalid configuration is rejected before anything changes.
    pub fn reconfigure(&self, config: AgentConfig) -> Result<ApplyReport> {
        let mut current = self.config.write().unwrap_or_else(PoisonError::into_inner);
        let state = EnablementState::from_config(&config)
            .context("Invalid instrumentation settings in agent configuration")?;
        let traced = trace_methods::build_descriptors(&config.trace_methods)
            .context("Invalid trace_methods in agent configuration")?;

        let registry = self.controller.registry();
        for stale in registry
            .all()
            .iter()
            .filter(|d| is_trace_methods_descriptor(d.name()))
            .filter(|d| !traced.iter().any(|t| t.name() == d.name()))
        {
            debug!(name = stale.name(), "Dropping trace_methods descriptor");
            registry.unregister(stale.name());
        }
        registry.register_all(traced);

        *current = config;
        let report = self.controller.reinitialize(state);
        info!(
            active = self.controller.active_descriptors().len(),
            instrumented = report.instrumented,
            retracted = report.retracted,
            "Agent reconfigured"
        );
        Ok(report)
    }

    pub fn config(&self) -> AgentConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn tracer(&self) -> &Arc<Tracer> {
        &self.tracer
    }

    pub fn controller(&self) -> &Arc<ApplicationController> {
        &self.controller
    }

    /// Retract all interception and stop handling newly loaded units
    pub fn shutdown(&self) -> ApplyReport {
        self.controller.shutdown()
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("controller", &self.controller)
            .finish_non_exhaustive()
    }
}
