// Core types shared by the Trestle data and tenancy crates: the request and
// response pair that flows through middleware, typed request extensions,
// the middleware chain itself and the resource disposal contract.

pub mod dispose;
pub mod error;
pub mod extensions;
pub mod http;
pub mod middleware;

pub use dispose::*;
pub use error::*;
pub use extensions::*;
pub use http::*;
pub use middleware::*;

pub use tokio_util::sync::CancellationToken;
