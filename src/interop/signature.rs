//! Signature strings and the primitive converter table
//!
//! A signature is one character per parameter, optionally followed by `!`:
//!
//! | code | parameter                         | passed as          | rooted |
//! |------|-----------------------------------|--------------------|--------|
//! | `i`  | int32                             | indirect i32       | no     |
//! | `l`  | int64                             | indirect i64       | no     |
//! | `f`  | float32                           | indirect f32       | no     |
//! | `d`  | float64                           | indirect f64       | no     |
//! | `s`  | string                            | managed string     | yes    |
//! | `S`  | interned string                   | managed string     | yes    |
//! | `o`  | host object, boxed                | managed object     | yes    |
//! | `u`  | uri                               | managed uri        | yes    |
//! | `j`  | enum with int32 underlying type   | indirect i32       | no     |
//! | `k`  | enum with int64 underlying type   | indirect i64       | no     |
//! | `m`  | raw managed handle                | direct             | no     |
//! | `a`  | picked from the callee's declared parameter type            ||
//!
//! A trailing `!` suppresses result marshaling. A trailing `m` is the legacy
//! spelling of the same thing and only applies when the caller omits that
//! last argument.

use super::converter::{ConversionStep, Transform};
use super::types::IndirectMode;
use crate::error::{BindingError, Result};
use smallvec::SmallVec;
use std::fmt;
use std::str::FromStr;

pub const SUPPRESS_RESULT: char = '!';
pub const RAW_HANDLE: char = 'm';
pub const AUTOMATIC: char = 'a';

/// Bytes reserved in the indirect region for each indirect primitive
const INDIRECT_SLOT: usize = 8;

/// Canonical step for a fixed parameter kind
pub fn primitive_step(kind: char) -> Option<ConversionStep> {
    let step = match kind {
        'i' => ConversionStep::indirect(kind, IndirectMode::I32, INDIRECT_SLOT, None),
        'l' => ConversionStep::indirect(kind, IndirectMode::I64, INDIRECT_SLOT, None),
        'f' => ConversionStep::indirect(kind, IndirectMode::F32, INDIRECT_SLOT, None),
        'd' => ConversionStep::indirect(kind, IndirectMode::F64, INDIRECT_SLOT, None),
        'j' => ConversionStep::indirect(kind, IndirectMode::I32, INDIRECT_SLOT, Some(Transform::EnumBox)),
        'k' => ConversionStep::indirect(kind, IndirectMode::I64, INDIRECT_SLOT, Some(Transform::EnumBox)),
        's' => ConversionStep::rooted(kind, Transform::ManagedString),
        'S' => ConversionStep::rooted(kind, Transform::InternedString),
        'o' => ConversionStep::rooted(kind, Transform::ObjectBox),
        'u' => ConversionStep::rooted(kind, Transform::UriBox),
        'm' => ConversionStep::direct(kind),
        _ => return None,
    };
    Some(step)
}

/// How the call's return value reaches the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResultPolicy {
    #[default]
    Marshaled,
    /// Trailing `!`: the raw handle is returned
    Suppressed,
    /// Trailing `m`: raw handle only when called with exactly this many arguments
    LegacyRaw { unmarshaled_if_argc: usize },
}

/// Parsed signature string
///
/// Identity is the exact source text.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature {
    text: String,
    kinds: SmallVec<[char; 8]>,
    policy: ResultPolicy,
}

impl Signature {
    pub fn parse(text: &str) -> Result<Self> {
        let len = text.chars().count();
        let mut kinds = SmallVec::with_capacity(len);
        let mut policy = ResultPolicy::Marshaled;

        for (position, kind) in text.chars().enumerate() {
            let is_last = position + 1 == len;

            if kind == SUPPRESS_RESULT {
                if !is_last {
                    return Err(BindingError::MalformedSignature {
                        signature: text.to_owned(),
                        position,
                    });
                }
                policy = ResultPolicy::Suppressed;
                continue;
            }

            if kind != AUTOMATIC && primitive_step(kind).is_none() {
                return Err(BindingError::UnknownParameterKind {
                    signature: text.to_owned(),
                    kind,
                    position,
                });
            }

            if is_last && kind == RAW_HANDLE {
                policy = ResultPolicy::LegacyRaw {
                    unmarshaled_if_argc: len - 1,
                };
            }

            kinds.push(kind);
        }

        Ok(Self {
            text: text.to_owned(),
            kinds,
            policy,
        })
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Parameter kinds in declaration order, without the `!` marker
    #[inline]
    pub fn kinds(&self) -> &[char] {
        &self.kinds
    }

    #[inline]
    pub fn param_count(&self) -> usize {
        self.kinds.len()
    }

    #[inline]
    pub fn policy(&self) -> ResultPolicy {
        self.policy
    }

    /// Whether any parameter is resolved per callee
    pub fn has_automatic(&self) -> bool {
        self.kinds.contains(&AUTOMATIC)
    }

    /// Stub name: `!` spelled out so it stays a valid identifier
    pub fn stub_name(&self) -> String {
        self.text.replace(SUPPRESS_RESULT, "_result_unmarshaled")
    }
}

impl FromStr for Signature {
    type Err = BindingError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}
