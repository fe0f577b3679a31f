/// JSON-RPC dispatch engine
/// Resolves `module_method` names against registered handlers and serves
/// exactly one request per codec
use crate::codec::ServerCodec;
use crate::server::jsonrpc::{JsonRpcError, JsonRpcResponse};
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Module exposing server metadata
pub const METADATA_MODULE: &str = "rpc";
/// Version reported for modules registered without one
pub const DEFAULT_MODULE_VERSION: &str = "1.0";

const SERVICE_METHOD_SEPARATOR: char = '_';
const SUBSCRIBE_SUFFIX: &str = "_subscribe";
const UNSUBSCRIBE_SUFFIX: &str = "_unsubscribe";

/// What kind of calls a transport can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationMode {
    /// Plain request/response method calls only
    MethodInvocation,
    /// Method calls plus subscriptions (needs a persistent connection)
    Subscriptions,
}

impl InvocationMode {
    pub fn allows_subscriptions(self) -> bool {
        matches!(self, InvocationMode::Subscriptions)
    }
}

/// The dispatch engine as seen by transports
#[async_trait]
pub trait RpcService: Send + Sync {
    /// Read one request from `codec`, process it and write at most one response
    async fn serve_single_request(&self, codec: &mut dyn ServerCodec, mode: InvocationMode);
}

pub type MethodFuture = BoxFuture<'static, Result<Value, JsonRpcError>>;
type MethodHandler = Arc<dyn Fn(Option<Value>) -> MethodFuture + Send + Sync>;

#[derive(Default)]
struct Module {
    version: String,
    methods: HashMap<String, MethodHandler>,
}

/// Method registry and request processor
#[derive(Default)]
pub struct Server {
    modules: HashMap<String, Module>,
}

impl Server {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module under `name`, creating it if needed
    pub fn register_module(&mut self, name: &str, version: &str) -> &mut Self {
        let module = self.modules.entry(name.to_string()).or_default();
        module.version = version.to_string();
        self
    }

    /// Register `handler` as `<module>_<method>`.
    ///
    /// The module is created with [`DEFAULT_MODULE_VERSION`] if it does not exist yet.
    pub fn register_method<F, Fut>(&mut self, module: &str, method: &str, handler: F) -> &mut Self
    where
        F: Fn(Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, JsonRpcError>> + Send + 'static,
    {
        let entry = self
            .modules
            .entry(module.to_string())
            .or_insert_with(|| Module {
                version: DEFAULT_MODULE_VERSION.to_string(),
                methods: HashMap::new(),
            });
        let handler: MethodHandler = Arc::new(move |params| handler(params).boxed());
        entry.methods.insert(method.to_string(), handler);
        self
    }

    /// Registered modules and their versions, including the metadata module
    pub fn modules(&self) -> BTreeMap<String, String> {
        let mut modules: BTreeMap<String, String> = self
            .modules
            .iter()
            .map(|(name, module)| (name.clone(), module.version.clone()))
            .collect();
        modules.insert(
            METADATA_MODULE.to_string(),
            DEFAULT_MODULE_VERSION.to_string(),
        );
        modules
    }

    fn lookup(&self, method: &str) -> Option<MethodHandler> {
        let (module, name) = method.split_once(SERVICE_METHOD_SEPARATOR)?;
        self.modules.get(module)?.methods.get(name).cloned()
    }

    /// Run a single method call to completion
    pub async fn call(
        &self,
        method: &str,
        params: Option<Value>,
        mode: InvocationMode,
    ) -> Result<Value, JsonRpcError> {
        if is_subscription_method(method) && !mode.allows_subscriptions() {
            return Err(JsonRpcError::notifications_unsupported());
        }

        if method == "rpc_modules" {
            return Ok(json!(self.modules()));
        }

        let handler = self
            .lookup(method)
            .ok_or_else(|| JsonRpcError::method_not_found(method))?;

        match AssertUnwindSafe(handler(params)).catch_unwind().await {
            Ok(result) => result,
            Err(_) => {
                warn!(method, "Method handler panicked");
                Err(JsonRpcError::internal_error("method handler panicked"))
            }
        }
    }
}

fn is_subscription_method(method: &str) -> bool {
    method.ends_with(SUBSCRIBE_SUFFIX) || method.ends_with(UNSUBSCRIBE_SUFFIX)
}

#[async_trait]
impl RpcService for Server {
    #[instrument(skip(self, codec))]
    async fn serve_single_request(&self, codec: &mut dyn ServerCodec, mode: InvocationMode) {
        let response = match codec.read_request().await {
            Ok(request) => {
                debug!(method = %request.method, "Dispatching request");
                let result = self.call(&request.method, request.params, mode).await;
                if request.id.is_none() {
                    debug!("Notification processed, no response written");
                    return;
                }
                match result {
                    Ok(value) => JsonRpcResponse::success(request.id, value),
                    Err(error) => JsonRpcResponse::error(request.id, error),
                }
            }
            Err(invalid) => {
                debug!(code = invalid.error.code, "Invalid request message");
                JsonRpcResponse::error(invalid.id, invalid.error)
            }
        };

        if let Err(e) = codec.write_response(&response).await {
            debug!(error = %e, "Failed to write response");
        }
    }
}
