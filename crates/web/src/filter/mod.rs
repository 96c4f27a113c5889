//! Filters run around a route's handler, or around the whole router when registered globally.
//!
//! A filter either calls `next` or answers on its own and returns [`Value::Handled`].
//!
//! ```
//! use spindle_web::filter::Filter;
//! use spindle_web::pipeline::Handler;
//! use spindle_web::Context;
//! use std::sync::Arc;
//!
//! let powered_by: Arc<dyn Filter> = Arc::new(|ctx: &Context, next: &dyn Handler| {
//!     ctx.set_response_header(http::HeaderName::from_static("x-powered-by"), http::HeaderValue::from_static("spindle"))?;
//!     next.apply(ctx)
//! });
//! ```

mod cors;
mod head;
mod options;

pub use cors::CorsFilter;
pub use head::HeadFilter;
pub use options::OptionsFilter;

use crate::context::Context;
use crate::error::Error;
use crate::pipeline::{Handler, Value};

pub trait Filter: Send + Sync + 'static {
    fn apply(&self, ctx: &Context, next: &dyn Handler) -> Result<Value, Error>;
}

impl<F> Filter for F
where
    F: Fn(&Context, &dyn Handler) -> Result<Value, Error> + Send + Sync + 'static,
{
    fn apply(&self, ctx: &Context, next: &dyn Handler) -> Result<Value, Error> {
        (self)(ctx, next)
    }
}
