use crate::config::CorsOptions;
use crate::context::Context;
use crate::error::{BuildError, Error};
use crate::filter::Filter;
use crate::payload::Payload;
use crate::pipeline::{Handler, Value};
use http::header::{
    ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_EXPOSE_HEADERS, ACCESS_CONTROL_MAX_AGE, ACCESS_CONTROL_REQUEST_HEADERS,
    ACCESS_CONTROL_REQUEST_METHOD, ORIGIN, VARY,
};
use http::{HeaderValue, Method, StatusCode};
use regex::Regex;
use std::fmt;
use tracing::debug;

const ANY: &str = "*";

/// Answers CORS preflight requests and decorates simple cross-origin requests.
pub struct CorsFilter {
    any_origin: bool,
    origins: Vec<Regex>,
    methods: Vec<Method>,
    any_header: bool,
    headers: Vec<String>,
    allow_methods: HeaderValue,
    allow_headers: Option<HeaderValue>,
    exposed_headers: Option<HeaderValue>,
    credentials: bool,
    max_age_secs: u64,
}

impl CorsFilter {
    pub fn new(options: CorsOptions) -> Result<Self, BuildError> {
        let any_origin = options.origins.iter().any(|origin| origin == ANY);
        let origins = options
            .origins
            .iter()
            .filter(|origin| *origin != ANY)
            .map(|origin| origin_pattern(origin))
            .collect::<Result<Vec<_>, _>>()?;

        let methods = options
            .methods
            .iter()
            .map(|method| {
                Method::from_bytes(method.to_ascii_uppercase().as_bytes())
                    .map_err(|e| BuildError::InvalidOption { name: "cors.methods", reason: e.to_string() })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let allow_methods = header_value("cors.methods", methods.iter().map(Method::as_str))?;

        let any_header = options.headers.iter().any(|header| header == ANY);
        let allow_headers =
            (!any_header).then(|| header_value("cors.headers", options.headers.iter().map(String::as_str))).transpose()?;
        let exposed_headers = (!options.exposed_headers.is_empty())
            .then(|| header_value("cors.exposed_headers", options.exposed_headers.iter().map(String::as_str)))
            .transpose()?;

        Ok(Self {
            any_origin,
            origins,
            methods,
            any_header,
            headers: options.headers.iter().map(|header| header.to_ascii_lowercase()).collect(),
            allow_methods,
            allow_headers,
            exposed_headers,
            credentials: options.credentials,
            max_age_secs: options.max_age_secs,
        })
    }

    pub fn allows_origin(&self, origin: &str) -> bool {
        self.any_origin || self.origins.iter().any(|pattern| pattern.is_match(origin))
    }

    pub fn allows_method(&self, method: &str) -> bool {
        self.methods.iter().any(|allowed| allowed.as_str().eq_ignore_ascii_case(method))
    }

    pub fn allows_headers(&self, headers: &[&str]) -> bool {
        self.any_header || headers.iter().all(|header| self.headers.iter().any(|allowed| allowed.eq_ignore_ascii_case(header)))
    }

    fn preflight(&self, ctx: &Context, origin: &str, method: &str) -> Result<bool, Error> {
        if !self.allows_origin(origin) {
            debug!(origin, "preflight origin is not allowed");
            return Ok(false);
        }
        if !self.allows_method(method) {
            debug!(origin, method, "preflight method is not allowed");
            return Ok(false);
        }
        let requested = ctx
            .header(ACCESS_CONTROL_REQUEST_HEADERS.as_str())
            .map(|headers| headers.split(',').map(str::trim).filter(|header| !header.is_empty()).collect::<Vec<_>>())
            .unwrap_or_default();
        if !self.allows_headers(&requested) {
            debug!(origin, ?requested, "preflight headers are not allowed");
            return Ok(false);
        }

        ctx.set_response_header(ACCESS_CONTROL_ALLOW_METHODS, self.allow_methods.clone())?;
        let allow_headers = match &self.allow_headers {
            Some(configured) => Some(configured.clone()),
            None if !requested.is_empty() => HeaderValue::from_str(&requested.join(", ")).ok(),
            None => None,
        };
        if let Some(allow_headers) = allow_headers {
            ctx.set_response_header(ACCESS_CONTROL_ALLOW_HEADERS, allow_headers)?;
        }
        if self.credentials {
            ctx.set_response_header(ACCESS_CONTROL_ALLOW_CREDENTIALS, HeaderValue::from_static("true"))?;
        }
        if self.max_age_secs > 0 {
            ctx.set_response_header(ACCESS_CONTROL_MAX_AGE, HeaderValue::from(self.max_age_secs))?;
        }
        self.allow_origin(ctx, origin)?;
        ctx.set_status(StatusCode::OK);
        ctx.send(Payload::empty());
        Ok(true)
    }

    fn simple(&self, ctx: &Context, origin: &str) -> Result<(), Error> {
        if !self.allows_origin(origin) {
            debug!(origin, "origin is not allowed");
            return Ok(());
        }
        self.allow_origin(ctx, origin)?;
        if self.credentials {
            ctx.set_response_header(ACCESS_CONTROL_ALLOW_CREDENTIALS, HeaderValue::from_static("true"))?;
        }
        if let Some(exposed) = &self.exposed_headers {
            ctx.set_response_header(ACCESS_CONTROL_EXPOSE_HEADERS, exposed.clone())?;
        }
        Ok(())
    }

    fn allow_origin(&self, ctx: &Context, origin: &str) -> Result<(), Error> {
        if self.any_origin || origin == "null" {
            return ctx.set_response_header(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static(ANY));
        }
        let origin = HeaderValue::from_str(origin).map_err(|e| Error::bad_request(e.to_string()))?;
        ctx.set_response_header(ACCESS_CONTROL_ALLOW_ORIGIN, origin)?;
        ctx.set_response_header(VARY, HeaderValue::from_static("Origin"))
    }
}

impl Filter for CorsFilter {
    fn apply(&self, ctx: &Context, next: &dyn Handler) -> Result<Value, Error> {
        let Some(origin) = ctx.header(ORIGIN.as_str()) else {
            return next.apply(ctx);
        };

        let requested_method = ctx.header(ACCESS_CONTROL_REQUEST_METHOD.as_str());
        match requested_method {
            Some(method) if *ctx.method() == Method::OPTIONS => {
                if self.preflight(ctx, origin, method)? {
                    return Ok(Value::Handled);
                }
            }
            _ => self.simple(ctx, origin)?,
        }
        next.apply(ctx)
    }
}

impl fmt::Debug for CorsFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CorsFilter")
            .field("any_origin", &self.any_origin)
            .field("origins", &self.origins)
            .field("methods", &self.methods)
            .field("headers", &self.headers)
            .field("credentials", &self.credentials)
            .field("max_age_secs", &self.max_age_secs)
            .finish_non_exhaustive()
    }
}

/// `https://*.example.com` becomes `^https://.*\.example\.com$`.
fn origin_pattern(origin: &str) -> Result<Regex, BuildError> {
    let pattern = origin.split('*').map(regex::escape).collect::<Vec<_>>().join(".*");
    Regex::new(&format!("^{pattern}$")).map_err(|e| BuildError::InvalidOption { name: "cors.origins", reason: e.to_string() })
}

fn header_value<'a>(name: &'static str, values: impl Iterator<Item = &'a str>) -> Result<HeaderValue, BuildError> {
    let joined = values.collect::<Vec<_>>().join(", ");
    HeaderValue::from_str(&joined).map_err(|e| BuildError::InvalidOption { name, reason: e.to_string() })
}
