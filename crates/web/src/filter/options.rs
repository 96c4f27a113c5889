use crate::context::Context;
use crate::error::Error;
use crate::filter::Filter;
use crate::payload::Payload;
use crate::pipeline::{Handler, Value};
use crate::route::RouteTable;
use http::header::ALLOW;
use http::{HeaderValue, Method, StatusCode};
use std::sync::Arc;

/// Answers an unmatched `OPTIONS` request with the methods the path supports.
///
/// No handler runs. A response that already carries an `Allow` header is left alone.
#[derive(Debug)]
pub struct OptionsFilter {
    table: Arc<RouteTable>,
}

impl OptionsFilter {
    pub fn new(table: Arc<RouteTable>) -> Self {
        Self { table }
    }
}

impl Filter for OptionsFilter {
    fn apply(&self, ctx: &Context, next: &dyn Handler) -> Result<Value, Error> {
        if *ctx.method() != Method::OPTIONS || ctx.response_header(&ALLOW).is_some() {
            return next.apply(ctx);
        }

        let allowed = self.table.allowed_methods(ctx.path(), &[Method::OPTIONS]);
        if allowed.is_empty() {
            return next.apply(ctx);
        }

        let allow = allowed.iter().map(Method::as_str).collect::<Vec<_>>().join(", ");
        ctx.set_response_header(ALLOW, HeaderValue::from_str(&allow).map_err(Error::handler)?)?;
        ctx.set_status(StatusCode::OK);
        ctx.set_response_length(0)?;
        ctx.send(Payload::empty());
        Ok(Value::Handled)
    }
}
