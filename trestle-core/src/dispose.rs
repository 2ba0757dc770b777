//! Explicit resource disposal.
//!
//! Cached objects such as a tenant's connection pool must release their
//! resources at a well-defined moment (cache eviction), not whenever the last
//! `Arc` happens to drop. Types that own such resources implement
//! [`Disposable`]; owners call [`Disposable::dispose`] exactly once, which
//! [`DisposeFlag`] helps implementations enforce.

use std::sync::atomic::{AtomicBool, Ordering};

/// A resource that is released explicitly by its owner.
pub trait Disposable: Send + Sync {
    /// Release the resource. Implementations must tolerate repeated calls.
    fn dispose(&self);
}

/// One-shot guard for idempotent disposal.
#[derive(Debug, Default)]
pub struct DisposeFlag(AtomicBool);

impl DisposeFlag {
    pub fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    /// Returns `true` for the first caller only.
    pub fn try_dispose(&self) -> bool {
        !self.0.swap(true, Ordering::AcqRel)
    }

    pub fn is_disposed(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}
