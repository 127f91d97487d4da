//! The three callback shapes a listener can bind.
//!
//! The variant is chosen once at registration. Identity (used for duplicate
//! detection and `ignore`) is the variant, the handler's address and, for
//! the bound shapes, the address of the shared context or object.

use std::fmt;
use std::sync::Arc;

use crate::events::Event;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CallbackKind {
    Function,
    WithContext,
    Method,
}

/// Identity of a callback. A `target` of `None` in a removal request matches
/// any context.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CallbackId {
    pub kind: CallbackKind,
    pub handler: usize,
    pub target: Option<usize>,
}

impl CallbackId {
    pub fn function(handler: fn(Event)) -> Self {
        Self {
            kind: CallbackKind::Function,
            handler: handler as usize,
            target: None,
        }
    }

    pub fn with_context<T>(handler: fn(Event, &T), context: Option<&Arc<T>>) -> Self {
        Self {
            kind: CallbackKind::WithContext,
            handler: handler as usize,
            target: context.map(target_addr),
        }
    }

    pub fn method<T>(object: &Arc<T>, method: fn(&T, Event)) -> Self {
        Self {
            kind: CallbackKind::Method,
            handler: method as usize,
            target: Some(target_addr(object)),
        }
    }

    /// Whether `self` is the callback a removal request `request` names.
    pub fn matches_removal(&self, request: &CallbackId) -> bool {
        self.kind == request.kind
            && self.handler == request.handler
            && request.target.map_or(true, |t| self.target == Some(t))
    }
}

fn target_addr<T>(target: &Arc<T>) -> usize {
    Arc::as_ptr(target) as *const () as usize
}

/// A handler bound to shared state it is called with.
pub struct BoundCallback {
    id: CallbackId,
    call: Box<dyn Fn(Event) + Send + Sync>,
}

pub enum Callback {
    /// `fn(Event)`.
    Function(fn(Event)),
    /// `fn(Event, &T)` with an `Arc<T>` context.
    WithContext(BoundCallback),
    /// `fn(&T, Event)` on an `Arc<T>` object, i.e. a method.
    Method(BoundCallback),
}

impl Callback {
    pub fn function(handler: fn(Event)) -> Self {
        Self::Function(handler)
    }

    pub fn with_context<T: Send + Sync + 'static>(handler: fn(Event, &T), context: Arc<T>) -> Self {
        let id = CallbackId::with_context(handler, Some(&context));
        Self::WithContext(BoundCallback {
            id,
            call: Box::new(move |event| handler(event, &context)),
        })
    }

    pub fn method<T: Send + Sync + 'static>(object: Arc<T>, method: fn(&T, Event)) -> Self {
        let id = CallbackId::method(&object, method);
        Self::Method(BoundCallback {
            id,
            call: Box::new(move |event| method(&object, event)),
        })
    }

    #[inline]
    pub fn invoke(&self, event: Event) {
        match self {
            Self::Function(handler) => handler(event),
            Self::WithContext(bound) | Self::Method(bound) => (bound.call)(event),
        }
    }

    pub fn id(&self) -> CallbackId {
        match self {
            Self::Function(handler) => CallbackId::function(*handler),
            Self::WithContext(bound) | Self::Method(bound) => bound.id,
        }
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let id = self.id();
        f.debug_struct("Callback")
            .field("kind", &id.kind)
            .field("handler", &format_args!("{:#x}", id.handler))
            .field("target", &id.target.map(|t| format!("{t:#x}")))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU16, Ordering};

    #[derive(Default)]
    struct Counter(AtomicU16);

    impl Counter {
        fn on_event(&self, event: Event) {
            self.0.fetch_add(event.value(), Ordering::SeqCst);
        }
    }

    fn add_value(event: Event, counter: &Counter) {
        counter.0.fetch_add(event.value(), Ordering::SeqCst);
    }

    fn nothing(_: Event) {}

    #[test]
    fn bound_shapes_reach_their_state() {
        let counter = Arc::new(Counter::default());
        Callback::with_context(add_value, counter.clone()).invoke(Event::new(1, 2));
        Callback::method(counter.clone(), Counter::on_event).invoke(Event::new(1, 3));
        assert_eq!(counter.0.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn identity_distinguishes_context() {
        let a = Arc::new(Counter::default());
        let b = Arc::new(Counter::default());
        let on_a = Callback::with_context(add_value, a.clone()).id();
        let on_b = Callback::with_context(add_value, b).id();

        assert_ne!(on_a, on_b);
        assert_eq!(on_a, CallbackId::with_context(add_value, Some(&a)));
    }

    #[test]
    fn removal_without_context_matches_any_target() {
        let a = Arc::new(Counter::default());
        let registered = Callback::with_context(add_value, a).id();
        let request = CallbackId::with_context::<Counter>(add_value, None);
        assert!(registered.matches_removal(&request));
    }

    #[test]
    fn kinds_never_match_each_other() {
        let object = Arc::new(Counter::default());
        let method = Callback::method(object, Counter::on_event).id();
        let function = Callback::function(nothing).id();
        assert!(!method.matches_removal(&function));
        assert!(!function.matches_removal(&method));
    }
}
