//! Bound methods and the per-call lifecycle
//!
//! A [`BoundMethodToken`] owns the reusable scratch state of one binding: the
//! argument buffer, the argument root buffer, the result and exception roots
//! and the unboxing cell. Each call leases one [`CallScratch`] from the token.
//! A call that re-enters the same token while an outer call holds the lease
//! gets a fresh scratch instead of aliasing the outer one.

use super::abi::ArgBuffer;
use super::converter::Converter;
use super::marshal::unmarshal_result;
use super::types::{HostValue, MethodHandle, ObjectRef};
use crate::config::BindingConfig;
use crate::error::{BindingError, Result};
use crate::gc::{Root, RootBuffer, RootRegistry};
use crate::logging;
use crate::runtime::ManagedRuntime;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Scratch state for one in-flight call
#[derive(Debug)]
pub struct CallScratch {
    result_root: Root,
    exception_root: Root,
    args_roots: Option<RootBuffer>,
    buffer: ArgBuffer,
    unbox: Vec<u8>,
}

impl CallScratch {
    fn new(roots: &Arc<RootRegistry>) -> Self {
        Self {
            result_root: roots.new_root(),
            exception_root: roots.new_root(),
            args_roots: None,
            buffer: ArgBuffer::new(),
            unbox: Vec::new(),
        }
    }

    /// Size the lazily allocated parts for `converter`
    fn ready_for(&mut self, converter: &Converter, roots: &Arc<RootRegistry>, unbox_size: usize) {
        let root_count = converter.root_count();
        let too_small = self
            .args_roots
            .as_ref()
            .map_or(true, |buffer| buffer.capacity() < root_count);
        if root_count > 0 && too_small {
            self.args_roots = Some(roots.new_buffer(root_count));
        }
        if self.unbox.len() < unbox_size {
            self.unbox.resize(unbox_size, 0);
        }
    }

    fn release(&mut self) {
        self.result_root.clear();
        self.exception_root.clear();
        if let Some(args_roots) = self.args_roots.as_mut() {
            args_roots.clear();
        }
    }
}

/// Reusable per-binding state
pub struct BoundMethodToken {
    friendly_name: String,
    method: MethodHandle,
    converter: Option<Arc<Converter>>,
    roots: Arc<RootRegistry>,
    idle: Mutex<Vec<CallScratch>>,
    leased: AtomicUsize,
    pool_limit: usize,
    unbox_size: usize,
}

impl BoundMethodToken {
    pub fn new(
        friendly_name: impl Into<String>,
        method: MethodHandle,
        converter: Option<Arc<Converter>>,
        roots: Arc<RootRegistry>,
        config: &BindingConfig,
    ) -> Self {
        // One scratch pair is always ready before the first call
        let idle = vec![CallScratch::new(&roots)];
        Self {
            friendly_name: friendly_name.into(),
            method,
            converter,
            roots,
            idle: Mutex::new(idle),
            leased: AtomicUsize::new(0),
            pool_limit: config.scratch_pool_limit.max(1),
            unbox_size: config.unbox_scratch_size,
        }
    }

    #[inline]
    pub fn friendly_name(&self) -> &str {
        &self.friendly_name
    }

    #[inline]
    pub fn method(&self) -> MethodHandle {
        self.method
    }

    #[inline]
    pub fn converter(&self) -> Option<&Arc<Converter>> {
        self.converter.as_ref()
    }

    /// Calls currently holding a lease
    pub fn active_leases(&self) -> usize {
        self.leased.load(Ordering::Acquire)
    }

    /// Scratch sets waiting for reuse
    pub fn idle_scratch(&self) -> usize {
        self.idle.lock().len()
    }

    fn lease(&self) -> ScratchLease<'_> {
        let pooled = self.idle.lock().pop();
        let scratch = match pooled {
            Some(scratch) => scratch,
            None => {
                let depth = self.leased.load(Ordering::Acquire);
                if depth > 0 {
                    logging::log_reentrant_lease(&self.friendly_name, depth);
                }
                CallScratch::new(&self.roots)
            }
        };
        self.leased.fetch_add(1, Ordering::AcqRel);
        ScratchLease {
            token: self,
            scratch: Some(scratch),
        }
    }
}

impl fmt::Debug for BoundMethodToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundMethodToken")
            .field("friendly_name", &self.friendly_name)
            .field("method", &self.method)
            .field("converter", &self.converter)
            .field("active_leases", &self.active_leases())
            .finish()
    }
}

/// Scratch borrowed for one call; roots are cleared and the scratch handed
/// back on drop, whichever way the call ends
struct ScratchLease<'a> {
    token: &'a BoundMethodToken,
    scratch: Option<CallScratch>,
}

impl ScratchLease<'_> {
    fn scratch(&mut self) -> &mut CallScratch {
        let roots = &self.token.roots;
        self.scratch.get_or_insert_with(|| CallScratch::new(roots))
    }
}

impl Drop for ScratchLease<'_> {
    fn drop(&mut self) {
        let Some(mut scratch) = self.scratch.take() else {
            return;
        };
        scratch.release();
        self.token.leased.fetch_sub(1, Ordering::AcqRel);

        let mut idle = self.token.idle.lock();
        if idle.len() < self.token.pool_limit {
            idle.push(scratch);
        }
    }
}

/// Host-facing name: sanitized friendly name, or `clr_<method>`
pub fn display_name(friendly_name: Option<&str>, method: MethodHandle, receiver: Option<ObjectRef>) -> String {
    let mut name: String = match friendly_name {
        Some(friendly) if !friendly.is_empty() => friendly
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '$' { c } else { '_' })
            .collect(),
        _ => format!("clr_{}", method),
    };
    if let Some(receiver) = receiver {
        name.push_str(&format!("_this{}", receiver));
    }
    name
}

/// Callable produced by binding a method
pub struct Dispatcher {
    display_name: String,
    token: BoundMethodToken,
    receiver: Option<ObjectRef>,
    /// Keeps the receiver alive for as long as the dispatcher exists
    _receiver_root: Option<Root>,
    runtime: Arc<dyn ManagedRuntime>,
}

impl Dispatcher {
    pub fn new(
        runtime: Arc<dyn ManagedRuntime>,
        token: BoundMethodToken,
        receiver: Option<ObjectRef>,
    ) -> Self {
        let display_name = display_name(Some(token.friendly_name()), token.method(), receiver);
        let receiver_root = receiver.map(|obj| {
            let root = token.roots.new_root();
            root.set(obj);
            root
        });
        Self {
            display_name,
            token,
            receiver,
            _receiver_root: receiver_root,
            runtime,
        }
    }

    #[inline]
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    #[inline]
    pub fn token(&self) -> &BoundMethodToken {
        &self.token
    }

    #[inline]
    pub fn receiver(&self) -> Option<ObjectRef> {
        self.receiver
    }

    pub fn converter(&self) -> Option<&Arc<Converter>> {
        self.token.converter()
    }

    /// Marshal `args`, invoke the method and decode its result
    pub fn call(&self, args: &[HostValue]) -> Result<HostValue> {
        let converter = self.token.converter().ok_or_else(|| BindingError::NoConverterAvailable {
            name: self.display_name.clone(),
        })?;

        converter.check_arity(args.len())?;
        let marshal_result = converter.decide_result_marshaled(args.len())?;

        let method = self.token.method();
        let runtime = &*self.runtime;
        let mut lease = self.token.lease();
        let scratch = lease.scratch();
        scratch.ready_for(converter, &self.token.roots, self.token.unbox_size);

        converter.marshal(runtime, method, args, &mut scratch.buffer, scratch.args_roots.as_mut())?;

        logging::log_invoke(&self.display_name, method, args.len());
        let outcome = runtime.invoke(method, self.receiver, &scratch.buffer);

        if !outcome.exception.is_null() {
            scratch.exception_root.set(outcome.exception);
            let message = runtime.exception_message(outcome.exception);
            logging::log_fault(&self.display_name, outcome.exception, &message);
            return Err(BindingError::NativeInvocationFault {
                method_name: self.display_name.clone(),
                exception: outcome.exception,
                message,
            });
        }

        scratch.result_root.set(outcome.result);
        if !marshal_result {
            return Ok(HostValue::Handle(outcome.result));
        }

        unmarshal_result(runtime, &scratch.result_root, &mut scratch.unbox)
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("display_name", &self.display_name)
            .field("receiver", &self.receiver)
            .field("token", &self.token)
            .finish()
    }
}
