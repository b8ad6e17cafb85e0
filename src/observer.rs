//! Listeners for parsed messages, keyed by the kind they are interested in.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::chat_log::ChatLog;
use crate::message::{Message, MessageKind};

pub type ObserverError = Box<dyn std::error::Error + Send + Sync>;
pub type ObserverResult = Result<(), ObserverError>;

/// Receives each message a [`ChatLog`] parses.
///
/// Observers run on the tailing task, one after another, so they should
/// return quickly. An error or panic is logged and does not keep the message
/// from the remaining observers.
pub trait Observer: Send + Sync {
    fn notify(&self, chat_log: &ChatLog, message: &Message) -> ObserverResult;
}

impl<F> Observer for F
where
    F: Fn(&ChatLog, &Message) -> ObserverResult + Send + Sync,
{
    fn notify(&self, chat_log: &ChatLog, message: &Message) -> ObserverResult {
        self(chat_log, message)
    }
}

/// A method of `T` that can be bound as an observer.
pub type Selector<T> = fn(&T, &ChatLog, &Message) -> ObserverResult;

/// Binds an object to one or more of its methods, called in order.
pub struct Binding<T> {
    object: Arc<T>,
    selectors: Vec<Selector<T>>,
}

impl<T> Binding<T> {
    pub fn new(object: Arc<T>, selector: Selector<T>) -> Self {
        Binding {
            object,
            selectors: vec![selector],
        }
    }

    /// Adds another method to call after the ones already bound.
    pub fn and(mut self, selector: Selector<T>) -> Self {
        self.selectors.push(selector);
        self
    }

    pub fn object(&self) -> &Arc<T> {
        &self.object
    }
}

impl<T: Send + Sync> Observer for Binding<T> {
    fn notify(&self, chat_log: &ChatLog, message: &Message) -> ObserverResult {
        for selector in &self.selectors {
            selector(&self.object, chat_log, message)?;
        }

        Ok(())
    }
}

/// Which messages an observer is registered for.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Interest {
    Any,
    Kind(MessageKind),
}

impl From<MessageKind> for Interest {
    fn from(kind: MessageKind) -> Self {
        Interest::Kind(kind)
    }
}

/// Handle to a single registration, used to remove it again.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ObserverId(u64);

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "observer#{}", self.0)
    }
}

struct Entry {
    id: ObserverId,
    /// Address of the registered object, for removal by identity.
    object: usize,
    observer: Arc<dyn Observer>,
}

fn address<T: ?Sized>(object: &Arc<T>) -> usize {
    Arc::as_ptr(object).cast::<()>() as usize
}

/// Observers grouped by [`Interest`], each group kept in registration order.
#[derive(Default)]
pub struct ObserverRegistry {
    next_id: u64,
    observers: HashMap<Interest, Vec<Entry>>,
}

impl fmt::Debug for ObserverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts = self
            .observers
            .iter()
            .map(|(interest, entries)| (interest, entries.len()))
            .collect::<HashMap<_, _>>();

        f.debug_struct("ObserverRegistry")
            .field("observers", &counts)
            .finish()
    }
}

impl ObserverRegistry {
    pub fn new() -> Self {
        ObserverRegistry::default()
    }

    fn insert(&mut self, interest: Interest, object: usize, observer: Arc<dyn Observer>) -> ObserverId {
        let id = ObserverId(self.next_id);
        self.next_id += 1;

        self.observers.entry(interest).or_default().push(Entry {
            id,
            object,
            observer,
        });

        id
    }

    pub fn add(&mut self, interest: Interest, observer: Arc<dyn Observer>) -> ObserverId {
        let object = address(&observer);
        self.insert(interest, object, observer)
    }

    /// Registers a binding; its identity is that of the bound object.
    pub fn add_binding<T>(&mut self, interest: Interest, binding: Binding<T>) -> ObserverId
    where
        T: Send + Sync + 'static,
    {
        let object = address(binding.object());
        self.insert(interest, object, Arc::new(binding))
    }

    /// Registers each object with the same selector.
    pub fn add_objects<T, I>(&mut self, interest: Interest, objects: I, selector: Selector<T>) -> Vec<ObserverId>
    where
        T: Send + Sync + 'static,
        I: IntoIterator<Item = Arc<T>>,
    {
        objects
            .into_iter()
            .map(|object| self.add_binding(interest.clone(), Binding::new(object, selector)))
            .collect()
    }

    /// Counts observers for `interest`, or all of them for `None`.
    pub fn count(&self, interest: Option<&Interest>) -> usize {
        match interest {
            Some(interest) => self.observers.get(interest).map_or(0, Vec::len),
            None => self.observers.values().map(Vec::len).sum(),
        }
    }

    pub fn remove(&mut self, id: ObserverId) -> bool {
        for entries in self.observers.values_mut() {
            if let Some(pos) = entries.iter().position(|entry| entry.id == id) {
                entries.remove(pos);
                return true;
            }
        }

        false
    }

    /// Removes every registration of `object`, optionally only for
    /// `interest`. Returns how many were removed.
    pub fn remove_object<T: ?Sized>(&mut self, object: &Arc<T>, interest: Option<&Interest>) -> usize {
        let object = address(object);
        let mut removed = 0;

        for (key, entries) in self.observers.iter_mut() {
            if interest.map_or(true, |interest| interest == key) {
                let before = entries.len();
                entries.retain(|entry| entry.object != object);
                removed += before - entries.len();
            }
        }

        removed
    }

    /// Removes all observers for `interest`, or every observer for `None`.
    pub fn clear(&mut self, interest: Option<&Interest>) {
        match interest {
            Some(interest) => {
                self.observers.remove(interest);
            }
            None => self.observers.clear(),
        }
    }

    /// Observers to notify of a message of `kind`: those interested in any
    /// kind first, then those interested in `kind`.
    pub fn snapshot(&self, kind: &MessageKind) -> Vec<(ObserverId, Arc<dyn Observer>)> {
        let any = self.observers.get(&Interest::Any).into_iter().flatten();
        let specific = self
            .observers
            .get(&Interest::Kind(kind.clone()))
            .into_iter()
            .flatten();

        any.chain(specific)
            .map(|entry| (entry.id, Arc::clone(&entry.observer)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter;

    impl Counter {
        fn first(&self, _: &ChatLog, _: &Message) -> ObserverResult {
            Ok(())
        }

        fn second(&self, _: &ChatLog, _: &Message) -> ObserverResult {
            Ok(())
        }
    }

    fn noop() -> Arc<dyn Observer> {
        Arc::new(|_: &ChatLog, _: &Message| -> ObserverResult { Ok(()) })
    }

    fn ids(registry: &ObserverRegistry, kind: MessageKind) -> Vec<ObserverId> {
        registry.snapshot(&kind).into_iter().map(|(id, _)| id).collect()
    }

    #[test]
    fn test_any_before_kind() {
        let mut registry = ObserverRegistry::new();

        let pub1 = registry.add(MessageKind::Pub.into(), noop());
        let any1 = registry.add(Interest::Any, noop());
        let pub2 = registry.add(MessageKind::Pub.into(), noop());
        let any2 = registry.add(Interest::Any, noop());
        let _kill = registry.add(MessageKind::Kill.into(), noop());

        assert_eq!(ids(&registry, MessageKind::Pub), vec![any1, any2, pub1, pub2]);
        assert_eq!(ids(&registry, MessageKind::Team), vec![any1, any2]);
    }

    #[test]
    fn test_count() {
        let mut registry = ObserverRegistry::new();
        registry.add(Interest::Any, noop());
        registry.add(MessageKind::Chat.into(), noop());
        registry.add(MessageKind::Chat.into(), noop());

        assert_eq!(registry.count(None), 3);
        assert_eq!(registry.count(Some(&Interest::Any)), 1);
        assert_eq!(registry.count(Some(&MessageKind::Chat.into())), 2);
        assert_eq!(registry.count(Some(&MessageKind::Kill.into())), 0);
    }

    #[test]
    fn test_remove_by_id() {
        let mut registry = ObserverRegistry::new();
        let a = registry.add(Interest::Any, noop());
        let b = registry.add(Interest::Any, noop());

        assert!(registry.remove(a));
        assert!(!registry.remove(a));
        assert_eq!(ids(&registry, MessageKind::Pub), vec![b]);
    }

    #[test]
    fn test_remove_by_object() {
        let mut registry = ObserverRegistry::new();
        let counter = Arc::new(Counter);
        let other = Arc::new(Counter);

        registry.add_binding(
            Interest::Any,
            Binding::new(Arc::clone(&counter), Counter::first).and(Counter::second),
        );
        registry.add_binding(MessageKind::Pub.into(), Binding::new(Arc::clone(&counter), Counter::first));
        let kept = registry.add_binding(MessageKind::Pub.into(), Binding::new(other, Counter::first));

        assert_eq!(registry.remove_object(&counter, Some(&MessageKind::Pub.into())), 1);
        assert_eq!(registry.count(None), 2);

        assert_eq!(registry.remove_object(&counter, None), 1);
        assert_eq!(ids(&registry, MessageKind::Pub), vec![kept]);
    }

    #[test]
    fn test_add_objects() {
        let mut registry = ObserverRegistry::new();
        let objects = vec![Arc::new(Counter), Arc::new(Counter), Arc::new(Counter)];

        let added = registry.add_objects(MessageKind::Freq.into(), objects.clone(), Counter::first);
        assert_eq!(added.len(), 3);
        assert_eq!(ids(&registry, MessageKind::Freq), added);

        assert_eq!(registry.remove_object(&objects[1], None), 1);
        assert_eq!(registry.count(None), 2);
    }

    #[test]
    fn test_clear() {
        let mut registry = ObserverRegistry::new();
        registry.add(Interest::Any, noop());
        registry.add(MessageKind::Chat.into(), noop());

        registry.clear(Some(&Interest::Any));
        assert_eq!(registry.count(None), 1);

        registry.clear(None);
        assert_eq!(registry.count(None), 0);
    }
}
