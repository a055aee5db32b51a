//! Data Plane SDK
//!
//! Extension points that plug transfer-technology specific behavior into the
//! generic signaling engine. A deployment either implements
//! [`DataFlowHooks`] (every method has a pass-through default) or sets
//! individual closures on [`DataPlaneSdkBuilder`].
//!
//! Closure hooks are synchronous and run on tokio's blocking pool, so they
//! may block on I/O. Hooks that need to await belong in a [`DataFlowHooks`]
//! impl.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::messages::{DataFlowResponseMessage, DataFlowStartMessage};
use crate::data_flow::{DataFlow, DataFlowStore, SignalingError, StatusFailure, StatusResult};

/// A resource the provision hook declared for a flow
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionResource {
    pub id: String,
    pub resource_type: String,
    /// False while an asynchronous provisioner is still working on it
    pub complete: bool,
    pub properties: BTreeMap<String, String>,
}

impl ProvisionResource {
    pub fn completed(id: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            resource_type: resource_type.into(),
            complete: true,
            properties: BTreeMap::new(),
        }
    }

    pub fn pending(id: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self {
            complete: false,
            ..Self::completed(id, resource_type)
        }
    }
}

/// Callback hooks invoked by the signaling service.
///
/// Hooks may block or perform I/O. They are called while the service holds
/// the flow's lease, so a hook outliving the lease duration lets another
/// instance reclaim the flow.
#[async_trait]
pub trait DataFlowHooks: Send + Sync {
    /// Extra validation after the structural checks pass
    async fn on_validate_start_message(&self, _msg: &DataFlowStartMessage) -> StatusResult<()> {
        Ok(())
    }

    /// Declare (and possibly create) resources the transfer needs.
    /// An empty list means no provisioning.
    async fn on_provision(&self, _flow: &DataFlow) -> StatusResult<Vec<ProvisionResource>> {
        Ok(Vec::new())
    }

    async fn on_start(&self, flow: &DataFlow) -> StatusResult<DataFlowResponseMessage> {
        Ok(DataFlowResponseMessage::started(flow.destination.clone()))
    }

    async fn on_suspend(&self, _flow: &DataFlow) -> StatusResult<()> {
        Ok(())
    }

    async fn on_terminate(&self, _flow: &DataFlow) -> StatusResult<()> {
        Ok(())
    }

    async fn on_recover(&self, _flow: &DataFlow) -> StatusResult<()> {
        Ok(())
    }
}

/// All defaults
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultHooks;

impl DataFlowHooks for DefaultHooks {}

type Hook<I, O> = Arc<dyn Fn(&I) -> StatusResult<O> + Send + Sync>;

/// Run a closure hook on the blocking pool. A panicking hook is Fatal.
async fn run_blocking<I, O>(hook: &Hook<I, O>, input: &I) -> StatusResult<O>
where
    I: Clone + Send + 'static,
    O: Send + 'static,
{
    let hook = Arc::clone(hook);
    let input = input.clone();
    tokio::task::spawn_blocking(move || hook(&input))
        .await
        .unwrap_or_else(|e| Err(StatusFailure::fatal(format!("Hook panicked: {}", e))))
}

/// Closure overrides layered on top of a base hook implementation
struct FnHooks {
    base: Arc<dyn DataFlowHooks>,
    validate: Option<Hook<DataFlowStartMessage, ()>>,
    provision: Option<Hook<DataFlow, Vec<ProvisionResource>>>,
    start: Option<Hook<DataFlow, DataFlowResponseMessage>>,
    suspend: Option<Hook<DataFlow, ()>>,
    terminate: Option<Hook<DataFlow, ()>>,
    recover: Option<Hook<DataFlow, ()>>,
}

impl FnHooks {
    fn new(base: Arc<dyn DataFlowHooks>) -> Self {
        Self {
            base,
            validate: None,
            provision: None,
            start: None,
            suspend: None,
            terminate: None,
            recover: None,
        }
    }

    fn has_overrides(&self) -> bool {
        self.validate.is_some()
            || self.provision.is_some()
            || self.start.is_some()
            || self.suspend.is_some()
            || self.terminate.is_some()
            || self.recover.is_some()
    }
}

#[async_trait]
impl DataFlowHooks for FnHooks {
    async fn on_validate_start_message(&self, msg: &DataFlowStartMessage) -> StatusResult<()> {
        match &self.validate {
            Some(f) => run_blocking(f, msg).await,
            None => self.base.on_validate_start_message(msg).await,
        }
    }

    async fn on_provision(&self, flow: &DataFlow) -> StatusResult<Vec<ProvisionResource>> {
        match &self.provision {
            Some(f) => run_blocking(f, flow).await,
            None => self.base.on_provision(flow).await,
        }
    }

    async fn on_start(&self, flow: &DataFlow) -> StatusResult<DataFlowResponseMessage> {
        match &self.start {
            Some(f) => run_blocking(f, flow).await,
            None => self.base.on_start(flow).await,
        }
    }

    async fn on_suspend(&self, flow: &DataFlow) -> StatusResult<()> {
        match &self.suspend {
            Some(f) => run_blocking(f, flow).await,
            None => self.base.on_suspend(flow).await,
        }
    }

    async fn on_terminate(&self, flow: &DataFlow) -> StatusResult<()> {
        match &self.terminate {
            Some(f) => run_blocking(f, flow).await,
            None => self.base.on_terminate(flow).await,
        }
    }

    async fn on_recover(&self, flow: &DataFlow) -> StatusResult<()> {
        match &self.recover {
            Some(f) => run_blocking(f, flow).await,
            None => self.base.on_recover(flow).await,
        }
    }
}

/// Immutable, configured SDK instance. Cheap to clone.
#[derive(Clone)]
pub struct DataPlaneSdk {
    store: Arc<dyn DataFlowStore>,
    runtime_id: String,
    hooks: Arc<dyn DataFlowHooks>,
    allowed_transfer_types: Arc<Vec<String>>,
}

impl DataPlaneSdk {
    pub fn builder() -> DataPlaneSdkBuilder {
        DataPlaneSdkBuilder::default()
    }

    pub fn store(&self) -> &Arc<dyn DataFlowStore> {
        &self.store
    }

    pub fn runtime_id(&self) -> &str {
        &self.runtime_id
    }

    pub fn hooks(&self) -> &Arc<dyn DataFlowHooks> {
        &self.hooks
    }

    /// `<destinationType>-<FLOWTYPE>` keys; empty means every type is allowed
    pub fn allowed_transfer_types(&self) -> &[String] {
        &self.allowed_transfer_types
    }
}

/// Fluent builder for [`DataPlaneSdk`]
pub struct DataPlaneSdkBuilder {
    store: Option<Arc<dyn DataFlowStore>>,
    runtime_id: Option<String>,
    allowed_transfer_types: Vec<String>,
    hooks: FnHooks,
}

impl Default for DataPlaneSdkBuilder {
    fn default() -> Self {
        Self {
            store: None,
            runtime_id: None,
            allowed_transfer_types: Vec::new(),
            hooks: FnHooks::new(Arc::new(DefaultHooks)),
        }
    }
}

impl DataPlaneSdkBuilder {
    pub fn store(mut self, store: Arc<dyn DataFlowStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn runtime_id(mut self, runtime_id: impl Into<String>) -> Self {
        self.runtime_id = Some(runtime_id.into());
        self
    }

    pub fn allowed_transfer_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_transfer_types = types.into_iter().map(Into::into).collect();
        self
    }

    /// Base implementation; closures set on this builder still take precedence
    pub fn hooks(mut self, hooks: Arc<dyn DataFlowHooks>) -> Self {
        self.hooks.base = hooks;
        self
    }

    pub fn on_validate_start_message<F>(mut self, f: F) -> Self
    where
        F: Fn(&DataFlowStartMessage) -> StatusResult<()> + Send + Sync + 'static,
    {
        self.hooks.validate = Some(Arc::new(f));
        self
    }

    pub fn on_provision<F>(mut self, f: F) -> Self
    where
        F: Fn(&DataFlow) -> StatusResult<Vec<ProvisionResource>> + Send + Sync + 'static,
    {
        self.hooks.provision = Some(Arc::new(f));
        self
    }

    pub fn on_start<F>(mut self, f: F) -> Self
    where
        F: Fn(&DataFlow) -> StatusResult<DataFlowResponseMessage> + Send + Sync + 'static,
    {
        self.hooks.start = Some(Arc::new(f));
        self
    }

    pub fn on_suspend<F>(mut self, f: F) -> Self
    where
        F: Fn(&DataFlow) -> StatusResult<()> + Send + Sync + 'static,
    {
        self.hooks.suspend = Some(Arc::new(f));
        self
    }

    pub fn on_terminate<F>(mut self, f: F) -> Self
    where
        F: Fn(&DataFlow) -> StatusResult<()> + Send + Sync + 'static,
    {
        self.hooks.terminate = Some(Arc::new(f));
        self
    }

    pub fn on_recover<F>(mut self, f: F) -> Self
    where
        F: Fn(&DataFlow) -> StatusResult<()> + Send + Sync + 'static,
    {
        self.hooks.recover = Some(Arc::new(f));
        self
    }

    /// Produce the configured SDK. A store is required; the runtime id
    /// defaults to a random UUID.
    pub fn build(self) -> Result<DataPlaneSdk, SignalingError> {
        let store = self
            .store
            .ok_or_else(|| SignalingError::SystemError("DataPlaneSdk requires a store".into()))?;

        let runtime_id = self
            .runtime_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let hooks: Arc<dyn DataFlowHooks> = if self.hooks.has_overrides() {
            Arc::new(self.hooks)
        } else {
            self.hooks.base
        };

        Ok(DataPlaneSdk {
            store,
            runtime_id,
            hooks,
            allowed_transfer_types: Arc::new(self.allowed_transfer_types),
        })
    }
}
