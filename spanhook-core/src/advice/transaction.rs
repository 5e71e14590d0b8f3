//! Generic root-transaction advice.
//!
//! Wraps a unit so each outermost call becomes a transaction: the entry hook
//! starts and activates a root transaction when the thread has nothing
//! active, the exit hook records the result and any failure, deactivates and
//! ends it. Nested calls (something already active) do not start a second
//! root.

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{EntryFrame, EntryHook, ExitFrame, ExitHook, Failure};
use crate::cache::ScopedCache;
use crate::context::ContextRef;
use crate::descriptor::DescriptorBuilder;
use crate::scope::ModuleScope;

type NameFn = Arc<dyn Fn(&[Value]) -> Option<String> + Send + Sync>;
type ResultFn = Arc<dyn Fn(&Value, Option<&Failure>) -> Option<String> + Send + Sync>;
type VersionFn = Arc<dyn Fn(&ModuleScope) -> Option<String> + Send + Sync>;

pub struct TransactionAdvice {
    transaction_type: String,
    framework_name: Option<String>,
    name_from: Option<NameFn>,
    result_from: Option<ResultFn>,
    version_from: Option<VersionFn>,
    versions: ScopedCache<String>,
}

impl TransactionAdvice {
    pub fn new(transaction_type: impl Into<String>) -> Self {
        Self {
            transaction_type: transaction_type.into(),
            framework_name: None,
            name_from: None,
            result_from: None,
            version_from: None,
            versions: ScopedCache::new(),
        }
    }

    pub fn framework(mut self, name: impl Into<String>) -> Self {
        self.framework_name = Some(name.into());
        self
    }

    /// Derive the transaction name from the call arguments
    pub fn name_from<F>(mut self, f: F) -> Self
    where
        F: Fn(&[Value]) -> Option<String> + Send + Sync + 'static,
    {
        self.name_from = Some(Arc::new(f));
        self
    }

    /// Name the transaction after a string argument
    pub fn name_from_arg(self, index: usize) -> Self {
        self.name_from(move |args| {
            args.get(index)
                .and_then(Value::as_str)
                .map(str::to_string)
        })
    }

    /// Derive the transaction result from the return value or failure
    pub fn result_from<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value, Option<&Failure>) -> Option<String> + Send + Sync + 'static,
    {
        self.result_from = Some(Arc::new(f));
        self
    }

    /// Resolve the framework version from the owning scope, once per scope
    pub fn version_from<F>(mut self, f: F) -> Self
    where
        F: Fn(&ModuleScope) -> Option<String> + Send + Sync + 'static,
    {
        self.version_from = Some(Arc::new(f));
        self
    }

    /// Read the framework version from `group:artifact` packaging metadata
    pub fn version_from_packaging(self, group_id: &str, artifact_id: &str) -> Self {
        let group_id = group_id.to_string();
        let artifact_id = artifact_id.to_string();
        self.version_from(move |scope| scope.version_of(&group_id, &artifact_id))
    }

    /// Framework version for `scope`, memoized including "no version found"
    pub fn framework_version(&self, scope: Option<&Arc<ModuleScope>>) -> Option<String> {
        let (resolve, scope) = match (self.version_from.as_ref(), scope) {
            (Some(resolve), Some(scope)) => (resolve, scope),
            _ => return None,
        };
        self.versions.get_or_compute(scope, || {
            let version = resolve(scope);
            debug!(scope = scope.name(), version = ?version, "Resolved framework version");
            version
        })
    }

    /// Hook pair sharing this advice
    pub fn hooks(self: &Arc<Self>) -> (EntryHook, ExitHook) {
        let entry = Arc::clone(self);
        let exit = Arc::clone(self);
        let on_enter: EntryHook = Arc::new(move |frame: &mut EntryFrame<'_>| entry.on_enter(frame));
        let on_exit: ExitHook = Arc::new(move |frame: &mut ExitFrame<'_>| exit.on_exit(frame));
        (on_enter, on_exit)
    }

    /// Attach this advice's hooks to a descriptor
    pub fn apply_to(self, builder: DescriptorBuilder) -> DescriptorBuilder {
        builder.hooks(Arc::new(self).hooks())
    }

    fn on_enter(&self, frame: &mut EntryFrame<'_>) -> anyhow::Result<()> {
        let signature = frame.unit().simple_signature();
        if let Some(active) = frame.tracer().active() {
            debug!(
                "Not creating transaction for method {} because there is already a transaction running ({})",
                signature, active
            );
            return Ok(());
        }

        let name = match &self.name_from {
            Some(name_from) => name_from(frame.args()).unwrap_or_else(|| {
                warn!(
                    "Cannot name transaction for {}: naming argument is absent; using the method signature",
                    signature
                );
                signature.clone()
            }),
            None => signature.clone(),
        };

        let Some(transaction) = frame.tracer().start_root_transaction() else {
            return Ok(());
        };
        transaction
            .with_name(name)
            .with_type(self.transaction_type.clone())
            .set_framework_version(self.framework_version(frame.unit().scope.as_ref()));
        if let Some(framework) = &self.framework_name {
            transaction.set_framework_name(framework.clone());
        }
        transaction.activate();
        debug!(
            span_id = %transaction.span_id(),
            "Created transaction {} for method {}",
            transaction,
            signature
        );
        frame.set_local(transaction);
        Ok(())
    }

    fn on_exit(&self, frame: &mut ExitFrame<'_>) -> anyhow::Result<()> {
        let Some(transaction) = frame.take_local::<ContextRef>() else {
            return Ok(());
        };
        if let Some(result_from) = &self.result_from {
            if let Some(result) = result_from(frame.return_value(), frame.thrown()) {
                transaction.with_result_if_unset(result);
            }
        }
        transaction
            .capture_exception(frame.thrown())
            .deactivate()
            .end();
        Ok(())
    }
}

impl std::fmt::Debug for TransactionAdvice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionAdvice")
            .field("transaction_type", &self.transaction_type)
            .field("framework_name", &self.framework_name)
            .finish_non_exhaustive()
    }
}
