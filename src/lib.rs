// Trestle - repository and unit-of-work data access for multi-tenant services
//
// This library bundles the request/middleware core with the data access and
// tenancy crates behind feature flags.

// Re-export core functionality
pub use trestle_core::*;

pub use async_trait::async_trait;
pub use trestle_log as log;

#[cfg(feature = "data")]
pub use trestle_data as data;

#[cfg(feature = "tenancy")]
pub use trestle_tenancy as tenancy;

// Prelude for common imports
pub mod prelude {
    pub use crate::{
        CancellationToken, Disposable, Error, FnMiddleware, HttpRequest, HttpResponse,
        Middleware, MiddlewareChain, Next, async_trait, handler_fn,
    };

    #[cfg(feature = "data")]
    pub use trestle_data::prelude::*;

    #[cfg(feature = "tenancy")]
    pub use trestle_tenancy::prelude::*;
}
