use crate::pipeline::{DeferredAdapter, FluxAdapter, Handler, MonoAdapter, ReturnType, Shape};
use std::fmt;
use std::sync::Arc;

/// Wraps the converted chain of a route with an adapter.
pub type AdapterFactory = Arc<dyn Fn(Box<dyn Handler>) -> Box<dyn Handler> + Send + Sync>;

/// The ordered list of asynchronous adapters.
///
/// A route uses the first entry its return type is assignable to, so when a type is assignable to
/// several shapes (a [`Mono`](crate::reactive::Mono) is also a publisher) the registration order
/// decides. The default order is deferred, mono, flux.
#[derive(Clone)]
pub struct AdapterRegistry {
    entries: Vec<(Shape, AdapterFactory)>,
}

impl AdapterRegistry {
    pub fn builder() -> AdapterRegistryBuilder {
        AdapterRegistryBuilder { entries: Vec::new() }
    }

    pub fn shapes(&self) -> impl Iterator<Item = Shape> + '_ {
        self.entries.iter().map(|(shape, _)| *shape)
    }

    pub(crate) fn select(&self, return_type: &ReturnType) -> Option<(Shape, &AdapterFactory)> {
        self.entries.iter().find(|(shape, _)| return_type.is_assignable_to(*shape)).map(|(shape, factory)| (*shape, factory))
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::builder().register_deferred().register_mono().register_flux().build()
    }
}

impl fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.shapes()).finish()
    }
}

#[derive(Default)]
pub struct AdapterRegistryBuilder {
    entries: Vec<(Shape, AdapterFactory)>,
}

impl AdapterRegistryBuilder {
    pub fn register<F>(mut self, shape: Shape, factory: F) -> Self
    where
        F: Fn(Box<dyn Handler>) -> Box<dyn Handler> + Send + Sync + 'static,
    {
        self.entries.push((shape, Arc::new(factory)));
        self
    }

    pub fn register_deferred(self) -> Self {
        self.register(Shape::Deferred, |next| Box::new(DeferredAdapter::new(next)))
    }

    pub fn register_mono(self) -> Self {
        self.register(Shape::Mono, |next| Box::new(MonoAdapter::new(next)))
    }

    pub fn register_flux(self) -> Self {
        self.register(Shape::Flux, |next| Box::new(FluxAdapter::new(next)))
    }

    pub fn build(self) -> AdapterRegistry {
        AdapterRegistry { entries: self.entries }
    }
}

impl fmt::Debug for AdapterRegistryBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.entries.iter().map(|(shape, _)| shape)).finish()
    }
}
