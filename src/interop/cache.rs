//! Converter cache
//!
//! Two-level exact-match map: signature text to either one shared converter
//! or, for signatures with automatic positions, a per-method table.
//! Compilation happens outside any map guard; insertion keeps whichever
//! converter landed first so racing initializations agree.

use super::automatic::{CustomMarshaler, MarshalerRegistry, SignatureInfoTable};
use super::converter::Converter;
use super::signature::Signature;
use super::types::{MethodHandle, MethodTarget};
use crate::error::{BindingError, Result};
use crate::logging;
use crate::runtime::ManagedRuntime;
use dashmap::DashMap;
use std::sync::Arc;

#[derive(Debug)]
enum CacheSlot {
    Shared(Arc<Converter>),
    PerMethod(DashMap<MethodHandle, Arc<Converter>>),
}

#[derive(Debug)]
pub struct ConverterCache {
    entries: DashMap<String, CacheSlot>,
    signature_info: SignatureInfoTable,
    marshalers: MarshalerRegistry,
    warn_legacy: bool,
}

impl Default for ConverterCache {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ConverterCache {
    pub fn new(warn_legacy: bool) -> Self {
        Self {
            entries: DashMap::new(),
            signature_info: SignatureInfoTable::new(),
            marshalers: MarshalerRegistry::new(),
            warn_legacy,
        }
    }

    pub fn register_marshaler(&self, type_name: impl Into<String>, marshaler: Arc<dyn CustomMarshaler>) {
        self.marshalers.register(type_name, marshaler);
    }

    #[inline]
    pub fn marshalers(&self) -> &MarshalerRegistry {
        &self.marshalers
    }

    #[inline]
    pub fn signature_info(&self) -> &SignatureInfoTable {
        &self.signature_info
    }

    /// Number of distinct signatures seen
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Cached converter for `signature`, compiling it on a miss
    ///
    /// `target` is only consulted when the signature has automatic positions.
    pub fn get_or_compile(
        &self,
        runtime: &dyn ManagedRuntime,
        target: Option<MethodTarget>,
        signature: &str,
    ) -> Result<Arc<Converter>> {
        if let Some(hit) = self.lookup(signature, target.map(|t| t.method))? {
            logging::log_cache_hit("converter", signature);
            return Ok(hit);
        }

        let parsed = Signature::parse(signature)?;
        let automatic = parsed.has_automatic();
        if automatic && target.is_none() {
            return Err(BindingError::MissingMethodForAutoConversion {
                signature: signature.to_owned(),
            });
        }

        let converter = Arc::new(
            Converter::compile(parsed, target, runtime, &self.signature_info, &self.marshalers)?
                .with_legacy_warnings(self.warn_legacy),
        );

        match target {
            Some(target) if automatic => {
                let slot = self
                    .entries
                    .entry(signature.to_owned())
                    .or_insert_with(|| CacheSlot::PerMethod(DashMap::new()));
                let cached = match &*slot {
                    CacheSlot::PerMethod(methods) => {
                        Arc::clone(methods.entry(target.method).or_insert(converter).value())
                    }
                    CacheSlot::Shared(_) => {
                        return Err(corrupt(signature, "shared entry for a method-dependent signature"))
                    }
                };
                Ok(cached)
            }
            _ => {
                let slot = self
                    .entries
                    .entry(signature.to_owned())
                    .or_insert(CacheSlot::Shared(converter));
                let cached = match &*slot {
                    CacheSlot::Shared(shared) => Arc::clone(shared),
                    CacheSlot::PerMethod(_) => {
                        return Err(corrupt(signature, "per-method entry for a shared signature"))
                    }
                };
                Ok(cached)
            }
        }
    }

    fn lookup(&self, signature: &str, method: Option<MethodHandle>) -> Result<Option<Arc<Converter>>> {
        let Some(slot) = self.entries.get(signature) else {
            return Ok(None);
        };

        let converter = match (&*slot, method) {
            (CacheSlot::Shared(shared), _) => Arc::clone(shared),
            (CacheSlot::PerMethod(methods), Some(method)) => match methods.get(&method) {
                Some(converter) => Arc::clone(converter.value()),
                None => return Ok(None),
            },
            (CacheSlot::PerMethod(_), None) => {
                return Err(BindingError::MissingMethodForAutoConversion {
                    signature: signature.to_owned(),
                })
            }
        };

        if converter.signature().as_str() != signature {
            return Err(corrupt(signature, "cached converter was compiled for another signature"));
        }
        if converter.signature().has_automatic() != matches!(&*slot, CacheSlot::PerMethod(_)) {
            return Err(corrupt(signature, "cache slot kind disagrees with the signature"));
        }
        if let (CacheSlot::PerMethod(_), Some(method)) = (&*slot, method) {
            if converter.method() != Some(method) {
                return Err(corrupt(signature, "cached converter belongs to another method"));
            }
        }

        Ok(Some(converter))
    }
}

fn corrupt(signature: &str, reason: &'static str) -> BindingError {
    BindingError::CorruptCacheEntry {
        signature: signature.to_owned(),
        reason,
    }
}
