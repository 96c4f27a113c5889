use crate::request::NativeRequest;
use crate::response::NativeResponse;

/// The application entry point a backend calls for every exchange.
///
/// `handle` runs on the backend's thread. An implementation either completes the response
/// before returning, or calls [`NativeResponse::start_async`] and completes it later from any
/// thread.
pub trait ExchangeHandler: Send + Sync + 'static {
    fn handle(&self, request: Box<dyn NativeRequest>, response: Box<dyn NativeResponse>);
}

impl<F> ExchangeHandler for F
where
    F: Fn(Box<dyn NativeRequest>, Box<dyn NativeResponse>) + Send + Sync + 'static,
{
    fn handle(&self, request: Box<dyn NativeRequest>, response: Box<dyn NativeResponse>) {
        (self)(request, response)
    }
}
