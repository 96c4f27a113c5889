use crate::context::Context;
use crate::error::Error;
use crate::filter::Filter;
use crate::pipeline::{Handler, Value};
use crate::route::{RouteDefinition, RouteTable};
use http::Method;
use std::sync::Arc;
use tracing::debug;

/// Answers an unmatched `HEAD` request with the `GET` route of the same path.
///
/// Glob routes are left out, a catch-all `GET` would otherwise answer every `HEAD`, and so are
/// upgrade routes. The matched handler runs in full, [`Context::send`] drops the body.
#[derive(Debug)]
pub struct HeadFilter {
    table: Arc<RouteTable>,
}

impl HeadFilter {
    pub fn new(table: Arc<RouteTable>) -> Self {
        Self { table }
    }
}

impl Filter for HeadFilter {
    fn apply(&self, ctx: &Context, next: &dyn Handler) -> Result<Value, Error> {
        if *ctx.method() != Method::HEAD {
            return next.apply(ctx);
        }

        let headers = ctx.request().header_map();
        let synthesizable = |definition: &RouteDefinition| !definition.has_glob() && !definition.is_upgrade();
        let Some(route) = self.table.find_where(&Method::GET, ctx.path(), headers, synthesizable)? else {
            return next.apply(ctx);
        };

        debug!(path = ctx.path(), pattern = route.pattern(), "answering HEAD with GET route");
        let definition = Arc::clone(route.definition());
        ctx.set_route(route);
        ctx.set_response_length(0)?;
        definition.pipeline().apply(ctx)
    }
}
