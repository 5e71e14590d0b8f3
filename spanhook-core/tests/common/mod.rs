//! Test helper functions for integration tests
//!
//! Shared across the test files using the tests/common/ pattern. Not every
//! test binary uses every helper.
#![allow(dead_code)]

use serde_json::{json, Value};
use spanhook_core::context::MemoryReporter;
use spanhook_core::matcher::named;
use spanhook_core::properties::SystemProperties;
use spanhook_core::{
    Agent, AgentConfig, HostProcess, InstrumentationDescriptor, InterceptionPoint,
    MethodDescription, Tracer, TypeDescription, UnitDescription,
};
use std::sync::{Arc, Once};

/// Initialize logging for tests (only once per test run)
static INIT: Once = Once::new();

pub fn init_test_logging() {
    INIT.call_once(|| {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

        let _ = tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_test_writer()
                    .with_target(true)
                    .with_level(true)
                    .with_thread_ids(false)
                    .with_thread_names(false),
            )
            .with(tracing_subscriber::filter::EnvFilter::from_default_env())
            .try_init();
    });
}

pub const SENTINEL: &str = "intercepted";

pub fn unit(type_name: &str, method: &str) -> UnitDescription {
    UnitDescription::new(TypeDescription::new(type_name), MethodDescription::new(method))
}

/// Descriptor whose exit hook replaces the return value with `SENTINEL`
pub fn sentinel_descriptor(name: &str, group: &str, type_name: &str) -> Arc<InstrumentationDescriptor> {
    InstrumentationDescriptor::builder(name)
        .type_matcher(named(type_name))
        .group(group)
        .on_exit(|frame| {
            frame.set_return_value(json!(SENTINEL));
            Ok(())
        })
        .build()
}

/// Call a unit whose original body returns an empty string
pub fn call_original(point: &InterceptionPoint) -> Value {
    point
        .invoke(&[], |_| Ok(json!("")))
        .expect("original body does not fail")
}

/// Start an agent on `host` with an isolated property store and an in-memory reporter
pub fn start_agent(
    config: AgentConfig,
    host: &Arc<HostProcess>,
    descriptors: Vec<Arc<InstrumentationDescriptor>>,
) -> (Agent, Arc<MemoryReporter>) {
    let (tracer, reporter) = Tracer::with_memory_reporter();
    let agent = Agent::builder(config, host.clone())
        .tracer(tracer)
        .descriptors(descriptors)
        .init_with_properties(&SystemProperties::new())
        .expect("agent starts");
    (agent, reporter)
}
