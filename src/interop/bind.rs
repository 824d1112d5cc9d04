//! Binding entry points
//!
//! A [`Binder`] is the per-engine context: it owns the converter cache, the
//! cache of receiver-less dispatchers and the method descriptions recorded
//! by lookups. Receiver-bound dispatchers are never cached since the cache
//! would keep their receiver alive.

use super::automatic::CustomMarshaler;
use super::cache::ConverterCache;
use super::call::{BoundMethodToken, Dispatcher};
use super::converter::Converter;
use super::marshal::PRIMITIVE_CELL_SIZE;
use super::signature::AUTOMATIC;
use super::types::{ClassHandle, MethodHandle, MethodTarget, ObjectRef, TypeHandle};
use crate::config::BindingConfig;
use crate::error::{BindingError, Result};
use crate::gc::RootRegistry;
use crate::logging;
use crate::runtime::ManagedRuntime;
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;

const NULL_NAME: &str = "<null>";
const RUNTIME_METHOD_PREFIX: &str = "BINDINGS_";

pub struct Binder {
    runtime: Arc<dyn ManagedRuntime>,
    roots: Arc<RootRegistry>,
    converters: ConverterCache,
    bound: DashMap<(MethodHandle, String), Arc<Dispatcher>>,
    descriptions: DashMap<MethodHandle, String>,
    config: BindingConfig,
}

impl Binder {
    pub fn new(runtime: Arc<dyn ManagedRuntime>) -> Self {
        Self::with_config(runtime, RootRegistry::new(), BindingConfig::default())
    }

    /// Share an existing root table, e.g. the one the collector scans
    pub fn with_roots(runtime: Arc<dyn ManagedRuntime>, roots: Arc<RootRegistry>) -> Self {
        Self::with_config(runtime, roots, BindingConfig::default())
    }

    pub fn with_config(
        runtime: Arc<dyn ManagedRuntime>,
        roots: Arc<RootRegistry>,
        mut config: BindingConfig,
    ) -> Self {
        // Literal configs skip `BindingConfig::validate`
        config.unbox_scratch_size = config.unbox_scratch_size.max(PRIMITIVE_CELL_SIZE);
        config.scratch_pool_limit = config.scratch_pool_limit.max(1);
        Self {
            converters: ConverterCache::new(config.warn_legacy_signatures),
            runtime,
            roots,
            bound: DashMap::new(),
            descriptions: DashMap::new(),
            config,
        }
    }

    #[inline]
    pub fn roots(&self) -> &Arc<RootRegistry> {
        &self.roots
    }

    #[inline]
    pub fn config(&self) -> &BindingConfig {
        &self.config
    }

    #[inline]
    pub fn converters(&self) -> &ConverterCache {
        &self.converters
    }

    /// Number of cached receiver-less dispatchers
    pub fn bound_count(&self) -> usize {
        self.bound.len()
    }

    pub fn register_marshaler(&self, type_name: impl Into<String>, marshaler: Arc<dyn CustomMarshaler>) {
        self.converters.register_marshaler(type_name, marshaler);
    }

    /// Look up a method by name, remembering its name for diagnostics
    pub fn find_method(&self, class: ClassHandle, name: &str, arity: i32) -> Option<MethodHandle> {
        let method = self.runtime.find_method(class, name, arity)?;
        self.descriptions.insert(method, name.to_owned());
        Some(method)
    }

    /// Name recorded when `method` was found
    pub fn method_description(&self, method: MethodHandle) -> Option<String> {
        self.descriptions.get(&method).map(|name| name.value().clone())
    }

    /// Method of the engine's runtime class
    pub fn runtime_method(&self, name: &str) -> Result<MethodHandle> {
        self.runtime
            .runtime_class()
            .and_then(|class| self.find_method(class, name, -1))
            .ok_or_else(|| BindingError::MethodNotFound {
                name: name.to_owned(),
            })
    }

    pub fn bind_runtime_method(&self, name: &str, signature: &str) -> Result<Arc<Dispatcher>> {
        let method = self.runtime_method(name)?;
        self.bind(
            method,
            None,
            signature,
            Some(&format!("{}{}", RUNTIME_METHOD_PREFIX, name)),
        )
    }

    /// Converter for `signature`; `method` is required for automatic positions
    pub fn compile(&self, signature: &str, method: Option<MethodHandle>) -> Result<Arc<Converter>> {
        let target = match method {
            Some(method) if signature.contains(AUTOMATIC) => Some(self.resolve_target(None, method)?),
            _ => None,
        };
        self.converters.get_or_compile(&*self.runtime, target, signature)
    }

    /// Bind `method`, optionally to `receiver`, for calls shaped by `signature`
    pub fn bind(
        &self,
        method: MethodHandle,
        receiver: Option<ObjectRef>,
        signature: &str,
        friendly_name: Option<&str>,
    ) -> Result<Arc<Dispatcher>> {
        let cacheable = receiver.is_none() && self.config.cache_static_bindings;
        let key = (method, signature.to_owned());

        if cacheable {
            if let Some(hit) = self.bound.get(&key) {
                logging::log_cache_hit("dispatcher", signature);
                return Ok(Arc::clone(hit.value()));
            }
        }

        let target = self.resolve_target(receiver, method)?;
        let converter = self.converters.get_or_compile(&*self.runtime, Some(target), signature)?;

        let friendly_name = match friendly_name {
            Some(name) if !name.is_empty() => name.to_owned(),
            _ => self.method_description(method).unwrap_or_default(),
        };
        let token = BoundMethodToken::new(
            friendly_name,
            method,
            Some(converter),
            Arc::clone(&self.roots),
            &self.config,
        );
        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&self.runtime), token, receiver));
        logging::log_bind(dispatcher.display_name(), method, signature, cacheable);

        if !cacheable {
            return Ok(dispatcher);
        }
        let cached = Arc::clone(self.bound.entry(key).or_insert(dispatcher).value());
        Ok(cached)
    }

    fn resolve_target(&self, receiver: Option<ObjectRef>, method: MethodHandle) -> Result<MethodTarget> {
        let class = self
            .runtime
            .class_for_bind(receiver, method)
            .filter(|class| !class.is_null())
            .ok_or(BindingError::UnresolvedClass { method, receiver })?;
        Ok(MethodTarget::new(self.runtime.class_type(class), method))
    }

    pub fn type_name(&self, ty: TypeHandle) -> String {
        if ty.is_null() {
            return NULL_NAME.to_owned();
        }
        self.runtime.type_name(ty)
    }

    pub fn type_aqn(&self, ty: TypeHandle) -> String {
        if ty.is_null() {
            return NULL_NAME.to_owned();
        }
        self.runtime.type_aqn(ty)
    }

    pub fn class_name(&self, class: ClassHandle) -> String {
        if class.is_null() {
            return NULL_NAME.to_owned();
        }
        self.type_name(self.runtime.class_type(class))
    }
}

impl fmt::Debug for Binder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binder")
            .field("converters", &self.converters.len())
            .field("bound", &self.bound.len())
            .field("config", &self.config)
            .finish()
    }
}
