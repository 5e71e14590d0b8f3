//! Spanhook core library exports
//!
//! The engine decides which program units to intercept, applies and retracts
//! interception on a live process, and manages the execution contexts
//! (transactions and spans) that intercepted calls create.

pub mod advice;
pub mod agent;
pub mod boot_delegation;
pub mod cache;
pub mod config;
pub mod context;
pub mod controller;
pub mod descriptor;
pub mod enablement;
pub mod error;
pub mod host;
pub mod matcher;
pub mod properties;
pub mod registry;
pub mod scope;
pub mod trace_methods;
pub mod unit;

pub use advice::{EntryFrame, ExitFrame, Failure};
pub use agent::{Agent, AgentBuilder};
pub use config::AgentConfig;
pub use context::{ContextRef, ContextState, Reporter, TraceContext, Tracer};
pub use controller::{ApplicationController, ApplyReport, MIN_SUPPORTED_FORMAT_VERSION};
pub use descriptor::{DescriptorBuilder, InstrumentationDescriptor};
pub use enablement::EnablementState;
pub use host::{HostProcess, InterceptionPoint, RuntimeTarget};
pub use registry::InstrumentationRegistry;
pub use scope::ModuleScope;
pub use unit::{MethodDescription, TypeDescription, UnitDescription};
