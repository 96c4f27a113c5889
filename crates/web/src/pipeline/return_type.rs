use crate::error::Error;
use crate::payload::{Json, Payload};
use crate::pipeline::{Handled, Value};
use crate::reactive::{Deferred, Flux, Mono};
use bytes::Bytes;
use http::StatusCode;
use serde::Serialize;
use spindle_http::Body;
use std::any::{self, Any};
use std::fmt;

/// The canonical value kinds a pipeline knows how to drive to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Shape {
    /// A value available right away.
    Plain,
    /// A future-like value, see [`Deferred`].
    Deferred,
    /// A single-value reactive source, see [`Mono`].
    Mono,
    /// A multi-value reactive source, see [`Flux`].
    Flux,
}

/// A type a route handler may return.
///
/// A type lists every shape it is assignable to; the pipeline builder picks one of them when the
/// route is assembled and asks for the matching canonical value on every request.
pub trait Reply: Send + 'static {
    fn shapes() -> &'static [Shape];

    fn into_value(self, shape: Shape) -> Result<Value, Error>;
}

fn not_assignable<R>(shape: Shape) -> Error {
    Error::status(StatusCode::INTERNAL_SERVER_ERROR, format!("{} is not assignable to {shape:?}", any::type_name::<R>()))
}

macro_rules! plain_reply {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Reply for $ty {
                fn shapes() -> &'static [Shape] {
                    &[Shape::Plain]
                }

                fn into_value(self, shape: Shape) -> Result<Value, Error> {
                    match shape {
                        Shape::Plain => Ok(Value::Plain(Payload::from(self))),
                        _ => Err(not_assignable::<Self>(shape)),
                    }
                }
            }
        )*
    };
}

plain_reply!((), String, &'static str, Bytes, Vec<u8>, Body, Payload);

impl<T: Serialize + Send + 'static> Reply for Json<T> {
    fn shapes() -> &'static [Shape] {
        &[Shape::Plain]
    }

    fn into_value(self, shape: Shape) -> Result<Value, Error> {
        match shape {
            Shape::Plain => self.into_payload().map(Value::Plain),
            _ => Err(not_assignable::<Self>(shape)),
        }
    }
}

impl Reply for Handled {
    fn shapes() -> &'static [Shape] {
        &[Shape::Plain]
    }

    fn into_value(self, _shape: Shape) -> Result<Value, Error> {
        Ok(Value::Handled)
    }
}

impl<T, E> Reply for Result<T, E>
where
    T: Reply,
    E: Into<Error> + Send + 'static,
{
    fn shapes() -> &'static [Shape] {
        T::shapes()
    }

    fn into_value(self, shape: Shape) -> Result<Value, Error> {
        self.map_err(Into::into)?.into_value(shape)
    }
}

impl<T: Into<Payload> + Send + 'static> Reply for Deferred<T> {
    fn shapes() -> &'static [Shape] {
        &[Shape::Deferred]
    }

    fn into_value(self, shape: Shape) -> Result<Value, Error> {
        match shape {
            Shape::Deferred => Ok(Value::Deferred(self.map(Into::into))),
            _ => Err(not_assignable::<Self>(shape)),
        }
    }
}

impl<T: Into<Payload> + Send + 'static> Reply for Mono<T> {
    fn shapes() -> &'static [Shape] {
        &[Shape::Mono, Shape::Flux]
    }

    fn into_value(self, shape: Shape) -> Result<Value, Error> {
        match shape {
            Shape::Mono => Ok(Value::Mono(self.map(Into::into))),
            Shape::Flux => Ok(Value::Flux(self.map(Into::into).into_flux())),
            _ => Err(not_assignable::<Self>(shape)),
        }
    }
}

impl<T: Into<Payload> + Send + 'static> Reply for Flux<T> {
    fn shapes() -> &'static [Shape] {
        &[Shape::Flux]
    }

    fn into_value(self, shape: Shape) -> Result<Value, Error> {
        match shape {
            Shape::Flux => Ok(Value::Flux(self.map(Into::into))),
            _ => Err(not_assignable::<Self>(shape)),
        }
    }
}

type Convert = fn(Box<dyn Any + Send>, Shape) -> Result<Value, Error>;

/// The static description of what a route handler returns.
#[derive(Clone)]
pub struct ReturnType {
    name: &'static str,
    shapes: &'static [Shape],
    convert: Convert,
}

impl ReturnType {
    pub fn of<R: Reply>() -> Self {
        Self { name: any::type_name::<R>(), shapes: R::shapes(), convert: convert::<R> }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn shapes(&self) -> &'static [Shape] {
        self.shapes
    }

    pub fn is_assignable_to(&self, shape: Shape) -> bool {
        self.shapes.contains(&shape)
    }

    /// Turns a value returned by the handler into the canonical value of `shape`.
    pub fn convert(&self, raw: Box<dyn Any + Send>, shape: Shape) -> Result<Value, Error> {
        (self.convert)(raw, shape)
    }
}

fn convert<R: Reply>(raw: Box<dyn Any + Send>, shape: Shape) -> Result<Value, Error> {
    match raw.downcast::<R>() {
        Ok(reply) => reply.into_value(shape),
        Err(_other) => Err(Error::status(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("handler did not return {}", any::type_name::<R>()),
        )),
    }
}

impl fmt::Debug for ReturnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReturnType").field("name", &self.name).field("shapes", &self.shapes).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declared_shapes() {
        assert_eq!(ReturnType::of::<String>().shapes(), &[Shape::Plain]);
        assert_eq!(ReturnType::of::<Result<&'static str, Error>>().shapes(), &[Shape::Plain]);
        assert_eq!(ReturnType::of::<Deferred<String>>().shapes(), &[Shape::Deferred]);
        assert_eq!(ReturnType::of::<Mono<String>>().shapes(), &[Shape::Mono, Shape::Flux]);
        assert!(ReturnType::of::<Flux<Bytes>>().is_assignable_to(Shape::Flux));
        assert!(!ReturnType::of::<Flux<Bytes>>().is_assignable_to(Shape::Mono));
    }

    #[test]
    fn test_convert() {
        let return_type = ReturnType::of::<Result<String, Error>>();
        assert!(matches!(return_type.convert(Box::new(Ok::<_, Error>("x".to_string())), Shape::Plain), Ok(Value::Plain(_))));
        assert!(matches!(
            return_type.convert(Box::new(Err::<String, _>(Error::bad_request("no"))), Shape::Plain),
            Err(Error::BadRequest(_))
        ));
        assert!(return_type.convert(Box::new(7u8), Shape::Plain).is_err());

        let mono = ReturnType::of::<Mono<String>>();
        assert!(matches!(mono.convert(Box::new(Mono::just("m".to_string())), Shape::Flux), Ok(Value::Flux(_))));
    }
}
