//! Collector-visible rooting for the binding layer
//!
//! Every managed reference produced while marshaling a call, plus the call's
//! result and exception, sits in a registry slot from the moment it is
//! produced until the call releases it.

mod roots;


pub use roots::{Root, RootBuffer, RootRegistry};
