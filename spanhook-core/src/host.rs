//! The live-process seam.
//!
//! A `RuntimeTarget` is whatever can enumerate loaded program units, attach
//! hooks to them and report newly loaded ones. `HostProcess` is the
//! in-process implementation: units are registered as `InterceptionPoint`s
//! and host code calls through `InterceptionPoint::invoke`, which runs the
//! currently installed advice around the original body.

use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};
use tracing::{debug, trace};

use crate::advice::{panic_message, run_suppressed, EntryFrame, ExitFrame, Failure, HookPhase, LocalSlot};
use crate::context::Tracer;
use crate::descriptor::InstrumentationDescriptor;
use crate::error::ApplyError;
use crate::scope::ScopeId;
use crate::unit::UnitDescription;

/// `Failure::kind` seen by exit hooks when the original body panics
pub const PANIC_FAILURE_KIND: &str = "panic";

/// Notified whenever the target loads a new unit
pub trait LoadListener: Send + Sync {
    fn on_load(&self, point: &Arc<InterceptionPoint>);
}

/// Abstraction over the running program
pub trait RuntimeTarget: Send + Sync {
    /// Every unit loaded so far
    fn loaded_units(&self) -> Vec<Arc<InterceptionPoint>>;

    /// Replace the advice attached to `point`
    fn install(
        &self,
        point: &InterceptionPoint,
        advice: Arc<InstalledAdvice>,
    ) -> Result<(), ApplyError>;

    /// Set or clear the listener for units loaded from now on
    fn set_load_listener(&self, listener: Option<Arc<dyn LoadListener>>);
}

/// The descriptors attached to one point, ordered, plus the tracer their hooks use
pub struct InstalledAdvice {
    generation: u64,
    descriptors: Vec<Arc<InstrumentationDescriptor>>,
    tracer: Option<Arc<Tracer>>,
}

impl InstalledAdvice {
    pub fn new(
        generation: u64,
        descriptors: Vec<Arc<InstrumentationDescriptor>>,
        tracer: Arc<Tracer>,
    ) -> Self {
        Self {
            generation,
            descriptors,
            tracer: Some(tracer),
        }
    }

    /// No hooks at all
    pub fn none(generation: u64) -> Self {
        Self {
            generation,
            descriptors: Vec::new(),
            tracer: None,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn descriptors(&self) -> &[Arc<InstrumentationDescriptor>] {
        &self.descriptors
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.descriptors.iter().map(|d| d.name().to_string()).collect()
    }
}

impl fmt::Debug for InstalledAdvice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstalledAdvice")
            .field("generation", &self.generation)
            .field("descriptors", &self.names())
            .finish()
    }
}

/// A loaded unit that calls can be routed through
pub struct InterceptionPoint {
    unit: UnitDescription,
    advice: RwLock<Arc<InstalledAdvice>>,
    suppressed_failures: AtomicU64,
    skip: OnceLock<ApplyError>,
}

impl InterceptionPoint {
    pub fn new(unit: UnitDescription) -> Arc<Self> {
        Arc::new(Self {
            unit,
            advice: RwLock::new(Arc::new(InstalledAdvice::none(0))),
            suppressed_failures: AtomicU64::new(0),
            skip: OnceLock::new(),
        })
    }

    pub fn unit(&self) -> &UnitDescription {
        &self.unit
    }

    pub fn advice(&self) -> Arc<InstalledAdvice> {
        Arc::clone(&self.advice.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn is_intercepted(&self) -> bool {
        !self.advice().is_empty()
    }

    pub fn installed_descriptor_names(&self) -> Vec<String> {
        self.advice().names()
    }

    /// How many body failures were swallowed because a descriptor asked for it
    pub fn suppressed_failures(&self) -> u64 {
        self.suppressed_failures.load(Ordering::Relaxed)
    }

    /// Why the controller gave up on this unit for good, if it did
    pub fn skip_reason(&self) -> Option<&ApplyError> {
        self.skip.get()
    }

    /// Record a permanent fault; the first one sticks
    pub(crate) fn mark_skipped(&self, fault: ApplyError) {
        let _ = self.skip.set(fault);
    }

    /// Install `advice` unless advice from a newer application pass is already there
    pub fn replace_advice(&self, advice: Arc<InstalledAdvice>) -> bool {
        let mut current = self.advice.write().unwrap_or_else(PoisonError::into_inner);
        if advice.generation < current.generation {
            trace!(
                unit = %self.unit.signature(),
                stale = advice.generation,
                installed = current.generation,
                "Ignoring stale advice"
            );
            return false;
        }
        *current = advice;
        true
    }

    /// Call the unit: entry hooks, the original body, exit hooks.
    ///
    /// The advice is read once per call, so a call that started before a
    /// reconfiguration finishes with the hooks it started with. A panic in
    /// `body` is shown to the exit hooks as a `panic` failure and then
    /// resumed, so suppression never swallows it.
    pub fn invoke<F>(&self, args: &[Value], body: F) -> Result<Value, Failure>
    where
        F: FnOnce(&[Value]) -> Result<Value, Failure>,
    {
        let advice = self.advice();
        let tracer = match advice.tracer.as_deref() {
            Some(tracer) if !advice.descriptors.is_empty() => tracer,
            _ => return body(args),
        };
        let descriptors = &advice.descriptors;
        let mut slots: Vec<LocalSlot> = descriptors.iter().map(|_| None).collect();

        for (descriptor, slot) in descriptors.iter().zip(slots.iter_mut()) {
            if let Some(hook) = descriptor.on_enter() {
                run_suppressed(HookPhase::Enter, descriptor.name(), &self.unit, || {
                    hook(&mut EntryFrame::new(&self.unit, args, tracer, slot))
                });
            }
        }

        let mut panicked = None;
        let (mut return_value, thrown) = match panic::catch_unwind(AssertUnwindSafe(|| body(args))) {
            Ok(Ok(value)) => (value, None),
            Ok(Err(failure)) => (Value::Null, Some(failure)),
            Err(payload) => {
                let failure = Failure::new(PANIC_FAILURE_KIND, panic_message(payload.as_ref()));
                panicked = Some(payload);
                (Value::Null, Some(failure))
            }
        };

        for (descriptor, slot) in descriptors.iter().zip(slots.iter_mut()).rev() {
            if let Some(hook) = descriptor.on_exit() {
                let mut scratch = return_value.clone();
                let committed = run_suppressed(HookPhase::Exit, descriptor.name(), &self.unit, || {
                    hook(&mut ExitFrame::new(
                        &self.unit,
                        args,
                        tracer,
                        slot,
                        &mut scratch,
                        thrown.as_ref(),
                    ))
                });
                if committed {
                    return_value = scratch;
                }
            }
        }

        // exit hooks have finalized their contexts; the panic stays the host's own
        if let Some(payload) = panicked {
            panic::resume_unwind(payload);
        }

        match thrown {
            None => Ok(return_value),
            Some(failure) if descriptors.iter().any(|d| d.suppresses_body_failures()) => {
                self.suppressed_failures.fetch_add(1, Ordering::Relaxed);
                debug!(unit = %self.unit.signature(), "Suppressed body failure: {}", failure);
                Ok(return_value)
            }
            Some(failure) => Err(failure),
        }
    }
}

impl fmt::Debug for InterceptionPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptionPoint")
            .field("unit", &self.unit.signature())
            .field("advice", &self.advice())
            .finish()
    }
}

/// In-process runtime target
#[derive(Default)]
pub struct HostProcess {
    points: RwLock<BTreeMap<String, Arc<InterceptionPoint>>>,
    listener: RwLock<Option<Arc<dyn LoadListener>>>,
}

impl HostProcess {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Load a unit. Loading the same signature twice returns the existing point.
    pub fn load_unit(&self, unit: UnitDescription) -> Arc<InterceptionPoint> {
        let signature = unit.signature();
        let point = {
            let mut points = self.points.write().unwrap_or_else(PoisonError::into_inner);
            if let Some(existing) = points.get(&signature) {
                return Arc::clone(existing);
            }
            let point = InterceptionPoint::new(unit);
            points.insert(signature.clone(), Arc::clone(&point));
            point
        };
        debug!(unit = %signature, "Loaded unit");

        let listener = self
            .listener
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(listener) = listener {
            listener.on_load(&point);
        }
        point
    }

    /// Look up a point by `Type#method(Params)` signature
    pub fn find(&self, signature: &str) -> Option<Arc<InterceptionPoint>> {
        self.points
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(signature)
            .cloned()
    }

    /// Every loaded point declared by `type_name`
    pub fn units_of_type(&self, type_name: &str) -> Vec<Arc<InterceptionPoint>> {
        self.points
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|p| p.unit().type_name() == type_name)
            .cloned()
            .collect()
    }

    /// Drop every unit owned by `scope`, returning how many were dropped
    pub fn unload_scope(&self, scope: ScopeId) -> usize {
        let mut points = self.points.write().unwrap_or_else(PoisonError::into_inner);
        let before = points.len();
        points.retain(|_, p| p.unit().scope.as_ref().map(|s| s.id()) != Some(scope));
        let unloaded = before - points.len();
        debug!(%scope, unloaded, "Unloaded scope");
        unloaded
    }

    pub fn len(&self) -> usize {
        self.points.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RuntimeTarget for HostProcess {
    fn loaded_units(&self) -> Vec<Arc<InterceptionPoint>> {
        self.points
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    fn install(
        &self,
        point: &InterceptionPoint,
        advice: Arc<InstalledAdvice>,
    ) -> Result<(), ApplyError> {
        if !point.unit().type_description.modifiable {
            return Err(ApplyError::NotModifiable {
                unit: point.unit().signature(),
            });
        }
        point.replace_advice(advice);
        Ok(())
    }

    fn set_load_listener(&self, listener: Option<Arc<dyn LoadListener>>) {
        *self.listener.write().unwrap_or_else(PoisonError::into_inner) = listener;
    }
}

impl fmt::Debug for HostProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostProcess")
            .field("units", &self.len())
            .finish_non_exhaustive()
    }
}
