//! Dynamic application controller.
//!
//! Keeps the live process in line with the active descriptor set: installs
//! hooks on loaded units that match, clears them from units that no longer
//! match, and handles units loaded later through a load-time listener.
//!
//! ## Passes
//!
//! Every mutation (`apply`, `retract`, `reinitialize`, load-time handling)
//! runs under one lock, so at most one pass is in flight. A pass computes the
//! desired advice per unit and only touches units whose advice changes.
//! Hook execution never takes this lock; calls read the advice installed on
//! their point.
//!
//! ## Failure isolation
//!
//! Each unit is handled on its own. Matching or installing panics are caught,
//! install errors are logged, and the pass continues with the next unit.
//! Units below `MIN_SUPPORTED_FORMAT_VERSION` and units the target refuses to
//! modify are marked skipped on their interception point and never targeted
//! again. The mark goes away with the point when its scope is unloaded.

use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use tracing::{debug, info, trace, warn};

use crate::context::Tracer;
use crate::descriptor::InstrumentationDescriptor;
use crate::enablement::{EnablementCell, EnablementState};
use crate::error::ApplyError;
use crate::host::{InstalledAdvice, InterceptionPoint, LoadListener, RuntimeTarget};
use crate::matcher;
use crate::registry::InstrumentationRegistry;

/// Oldest runtime artifact format the controller will alter
pub const MIN_SUPPORTED_FORMAT_VERSION: u32 = 49;

/// Summary of one application pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApplyReport {
    /// Units whose hooks were installed or changed
    pub instrumented: usize,
    /// Units whose hooks were removed
    pub retracted: usize,
    /// Units left as they were
    pub unchanged: usize,
    /// Units permanently skipped
    pub skipped: usize,
    /// Per-unit faults hit during this pass
    pub failures: Vec<ApplyError>,
}

impl ApplyReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn record(&mut self, outcome: PointOutcome) {
        match outcome {
            PointOutcome::Instrumented => self.instrumented += 1,
            PointOutcome::Retracted => self.retracted += 1,
            PointOutcome::Unchanged => self.unchanged += 1,
            PointOutcome::Skipped => self.skipped += 1,
            PointOutcome::Failed(e) => {
                if e.is_permanent() {
                    self.skipped += 1;
                }
                self.failures.push(e);
            }
        }
    }
}

#[derive(Debug)]
enum PointOutcome {
    Instrumented,
    Retracted,
    Unchanged,
    Skipped,
    Failed(ApplyError),
}

/// The descriptor set in force and the snapshot it was computed from
#[derive(Debug)]
struct ActiveSet {
    generation: u64,
    descriptors: Vec<Arc<InstrumentationDescriptor>>,
    state: Arc<EnablementState>,
}

pub struct ApplicationController {
    registry: Arc<InstrumentationRegistry>,
    enablement: EnablementCell,
    target: Arc<dyn RuntimeTarget>,
    tracer: Arc<Tracer>,
    active: RwLock<Arc<ActiveSet>>,
    pass_lock: Mutex<()>,
    generation: AtomicU64,
}

impl ApplicationController {
    pub fn new(
        registry: Arc<InstrumentationRegistry>,
        state: EnablementState,
        target: Arc<dyn RuntimeTarget>,
        tracer: Arc<Tracer>,
    ) -> Arc<Self> {
        let state = Arc::new(state);
        Arc::new(Self {
            registry,
            enablement: EnablementCell::new((*state).clone()),
            target,
            tracer,
            active: RwLock::new(Arc::new(ActiveSet {
                generation: 0,
                descriptors: Vec::new(),
                state,
            })),
            pass_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
        })
    }

    /// Install the load-time hook and apply every active registered descriptor
    pub fn start(self: &Arc<Self>) -> ApplyReport {
        let listener: Arc<dyn LoadListener> = Arc::new(LoadTimeHook {
            controller: Arc::downgrade(self),
        });
        self.target.set_load_listener(Some(listener));
        let state = (*self.enablement.load()).clone();
        self.reinitialize(state)
    }

    /// Remove the load-time hook and retract everything
    pub fn shutdown(&self) -> ApplyReport {
        self.target.set_load_listener(None);
        let _pass = self.pass_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let state = self.enablement.load();
        let active = self.publish(Vec::new(), state);
        let report = self.reconcile(self.target.loaded_units(), &active);
        info!(retracted = report.retracted, "Instrumentation shut down");
        report
    }

    /// Add enabled `descriptors` to the active set and install them on matching loaded units
    pub fn apply(&self, descriptors: &[Arc<InstrumentationDescriptor>]) -> ApplyReport {
        let _pass = self.pass_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.active_set();
        let mut next = current.descriptors.clone();
        for descriptor in descriptors {
            if !current.state.is_descriptor_enabled(descriptor) {
                debug!(name = descriptor.name(), "Not applying disabled descriptor");
                continue;
            }
            if !next.iter().any(|d| d.name() == descriptor.name()) {
                next.push(Arc::clone(descriptor));
            }
        }
        if same_descriptors(&next, &current.descriptors) {
            return ApplyReport::default();
        }
        let active = self.publish(next, Arc::clone(&current.state));
        let report = self.reconcile(self.target.loaded_units(), &active);
        log_report("apply", &report);
        report
    }

    /// Remove `descriptors` from the active set and clear their hooks. Units
    /// they never intercepted are left alone.
    pub fn retract(&self, descriptors: &[Arc<InstrumentationDescriptor>]) -> ApplyReport {
        let _pass = self.pass_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.active_set();
        let next: Vec<_> = current
            .descriptors
            .iter()
            .filter(|d| !descriptors.iter().any(|r| r.name() == d.name()))
            .cloned()
            .collect();
        if next.len() == current.descriptors.len() {
            return ApplyReport::default();
        }
        let active = self.publish(next, Arc::clone(&current.state));
        let report = self.reconcile(self.target.loaded_units(), &active);
        log_report("retract", &report);
        report
    }

    /// Swap in a new enablement snapshot and bring the process in line with it.
    ///
    /// Descriptors that stay active keep their hooks; units whose desired
    /// advice is unchanged are not touched.
    pub fn reinitialize(&self, state: EnablementState) -> ApplyReport {
        let _pass = self.pass_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.enablement.swap(state);
        let state = self.enablement.load();
        let previous = self.active_set();
        let next = self.registry.active_descriptors(&state);

        let newly_active: Vec<&str> = next
            .iter()
            .filter(|d| !previous.descriptors.iter().any(|p| p.name() == d.name()))
            .map(|d| d.name())
            .collect();
        let no_longer_active: Vec<&str> = previous
            .descriptors
            .iter()
            .filter(|p| !next.iter().any(|d| d.name() == p.name()))
            .map(|d| d.name())
            .collect();
        debug!(
            newly_active = ?newly_active,
            no_longer_active = ?no_longer_active,
            "Reinitializing instrumentation"
        );

        let active = self.publish(next, state);
        let report = self.reconcile(self.target.loaded_units(), &active);
        log_report("reinitialize", &report);
        report
    }

    /// Register a descriptor after start-up and apply it right away unless it is already active
    pub fn ensure_registered(&self, descriptor: Arc<InstrumentationDescriptor>) -> ApplyReport {
        if self.is_active(descriptor.name()) {
            return ApplyReport::default();
        }
        self.registry.register(Arc::clone(&descriptor));
        let registered = self.registry.get(descriptor.name()).unwrap_or(descriptor);
        self.apply(&[registered])
    }

    /// Register and activate `descriptors`, then re-apply to units of `type_name`.
    ///
    /// When this activates a descriptor, every loaded unit is reconciled so
    /// the active set and the installed hooks never disagree.
    pub fn ensure_instrumented(
        &self,
        type_name: &str,
        descriptors: &[Arc<InstrumentationDescriptor>],
    ) -> ApplyReport {
        let _pass = self.pass_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.registry.register_all(descriptors.iter().cloned());

        let current = self.active_set();
        let mut next = current.descriptors.clone();
        for descriptor in descriptors {
            if current.state.is_descriptor_enabled(descriptor)
                && !next.iter().any(|d| d.name() == descriptor.name())
            {
                next.push(Arc::clone(descriptor));
            }
        }
        if !same_descriptors(&next, &current.descriptors) {
            // a changed active set has to reach every loaded unit it matches
            let active = self.publish(next, Arc::clone(&current.state));
            let report = self.reconcile(self.target.loaded_units(), &active);
            debug!(type_name, instrumented = report.instrumented, "Activated descriptors for type");
            return report;
        }

        let points: Vec<_> = self
            .target
            .loaded_units()
            .into_iter()
            .filter(|p| p.unit().type_name() == type_name)
            .collect();
        let report = self.reconcile(points, &current);
        debug!(type_name, instrumented = report.instrumented, "Ensured instrumentation");
        report
    }

    pub fn active_descriptors(&self) -> Vec<Arc<InstrumentationDescriptor>> {
        self.active_set().descriptors.clone()
    }

    pub fn is_active(&self, name: &str) -> bool {
        self.active_set().descriptors.iter().any(|d| d.name() == name)
    }

    pub fn enablement(&self) -> Arc<EnablementState> {
        self.enablement.load()
    }

    pub fn registry(&self) -> &Arc<InstrumentationRegistry> {
        &self.registry
    }

    pub fn tracer(&self) -> &Arc<Tracer> {
        &self.tracer
    }

    /// Units permanently excluded from interception, with the reason
    pub fn skipped_units(&self) -> Vec<ApplyError> {
        let mut skipped: Vec<_> = self
            .target
            .loaded_units()
            .iter()
            .filter_map(|p| p.skip_reason().cloned())
            .collect();
        skipped.sort_by(|a, b| a.unit().cmp(b.unit()));
        skipped
    }

    fn active_set(&self) -> Arc<ActiveSet> {
        Arc::clone(&self.active.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn publish(
        &self,
        descriptors: Vec<Arc<InstrumentationDescriptor>>,
        state: Arc<EnablementState>,
    ) -> Arc<ActiveSet> {
        let active = Arc::new(ActiveSet {
            generation: self.generation.fetch_add(1, Ordering::AcqRel) + 1,
            descriptors,
            state,
        });
        *self.active.write().unwrap_or_else(PoisonError::into_inner) = Arc::clone(&active);
        active
    }

    fn on_unit_loaded(&self, point: &Arc<InterceptionPoint>) {
        let _pass = self.pass_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let active = self.active_set();
        match self.reconcile_point(point, &active) {
            PointOutcome::Instrumented => {
                debug!(unit = %point.unit().signature(), "Instrumented unit at load time")
            }
            PointOutcome::Failed(e) => warn!("Load-time instrumentation failed: {}", e),
            _ => {}
        }
    }

    fn reconcile(&self, points: Vec<Arc<InterceptionPoint>>, active: &ActiveSet) -> ApplyReport {
        let mut report = ApplyReport::default();
        for point in &points {
            report.record(self.reconcile_point(point, active));
        }
        report
    }

    fn reconcile_point(&self, point: &InterceptionPoint, active: &ActiveSet) -> PointOutcome {
        let unit = point.unit();
        let signature = unit.signature();

        if point.skip_reason().is_some() {
            return PointOutcome::Skipped;
        }

        let version = unit.type_description.format_version;
        if version < MIN_SUPPORTED_FORMAT_VERSION {
            let fault = ApplyError::UnsupportedFormatVersion {
                unit: signature,
                version,
                minimum: MIN_SUPPORTED_FORMAT_VERSION,
            };
            debug!("Skipping unit: {}", fault);
            point.mark_skipped(fault);
            return PointOutcome::Skipped;
        }

        let desired = if active.state.is_excluded(unit.type_name()) {
            Vec::new()
        } else {
            let matched = panic::catch_unwind(AssertUnwindSafe(|| {
                active
                    .descriptors
                    .iter()
                    .filter(|d| matcher::evaluate_unexcluded(d, unit).is_match())
                    .cloned()
                    .collect::<Vec<_>>()
            }));
            match matched {
                Ok(matched) => matched,
                Err(_) => {
                    let fault = ApplyError::Install {
                        unit: signature,
                        reason: "matcher panicked".to_string(),
                    };
                    warn!("{}", fault);
                    return PointOutcome::Failed(fault);
                }
            }
        };

        let installed = point.advice();
        if same_descriptors(&desired, installed.descriptors()) {
            trace!(unit = %signature, "Advice unchanged");
            return PointOutcome::Unchanged;
        }

        let retracting = desired.is_empty();
        let advice = if retracting {
            InstalledAdvice::none(active.generation)
        } else {
            InstalledAdvice::new(active.generation, desired, Arc::clone(&self.tracer))
        };
        let names = advice.names();

        let installed = panic::catch_unwind(AssertUnwindSafe(|| {
            self.target.install(point, Arc::new(advice))
        }))
        .unwrap_or_else(|_| {
            Err(ApplyError::Install {
                unit: signature.clone(),
                reason: "runtime target panicked".to_string(),
            })
        });

        match installed {
            Ok(()) if retracting => {
                debug!(unit = %signature, "Retracted instrumentation");
                PointOutcome::Retracted
            }
            Ok(()) => {
                debug!(unit = %signature, descriptors = ?names, "Installed instrumentation");
                PointOutcome::Instrumented
            }
            Err(fault) => {
                warn!("Failed to apply instrumentation: {}", fault);
                if fault.is_permanent() {
                    point.mark_skipped(fault.clone());
                }
                PointOutcome::Failed(fault)
            }
        }
    }

}

impl std::fmt::Debug for ApplicationController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApplicationController")
            .field("active", &self.active_set().descriptors.len())
            .field("registered", &self.registry.len())
            .finish_non_exhaustive()
    }
}

/// Load-time hook. Holds the controller weakly so the target does not keep it alive.
struct LoadTimeHook {
    controller: Weak<ApplicationController>,
}

impl LoadListener for LoadTimeHook {
    fn on_load(&self, point: &Arc<InterceptionPoint>) {
        if let Some(controller) = self.controller.upgrade() {
            controller.on_unit_loaded(point);
        }
    }
}

fn same_descriptors(a: &[Arc<InstrumentationDescriptor>], b: &[Arc<InstrumentationDescriptor>]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| Arc::ptr_eq(x, y))
}

fn log_report(operation: &str, report: &ApplyReport) {
    info!(
        operation,
        instrumented = report.instrumented,
        retracted = report.retracted,
        unchanged = report.unchanged,
        skipped = report.skipped,
        failures = report.failures.len(),
        "Instrumentation pass complete"
    );
}
