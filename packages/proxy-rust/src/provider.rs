//! Provider-side members that inbound requests resolve to.
//!
//! An attribute is a single [`ProviderAttribute`] whose capability set
//! (readable, writable, notifiable) is decided by which capabilities it is
//! constructed with. Getters, setters and operations are small async traits;
//! closures of the matching shape implement them directly.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use conduit_core::Version;
use parking_lot::Mutex;
use serde_json::Value;

use crate::error::ProviderError;

// ---------------------------------------------------------------------------
// Member traits
// ---------------------------------------------------------------------------

#[async_trait]
pub trait AttributeGetter: Send + Sync {
    async fn get(&self) -> Result<Value, ProviderError>;
}

#[async_trait]
pub trait AttributeSetter: Send + Sync {
    async fn set(&self, value: Value) -> Result<(), ProviderError>;
}

/// A named operation of a provider interface.
#[async_trait]
pub trait ProviderOperation: Send + Sync {
    /// Invokes the operation. The returned values become the reply's
    /// `response` array (empty for operations without output).
    async fn invoke(
        &self,
        params: Vec<Value>,
        param_datatypes: Vec<String>,
    ) -> Result<Vec<Value>, ProviderError>;
}

#[async_trait]
impl<F, Fut> AttributeGetter for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ProviderError>> + Send + 'static,
{
    async fn get(&self) -> Result<Value, ProviderError> {
        (self)().await
    }
}

#[async_trait]
impl<F, Fut> AttributeSetter for F
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), ProviderError>> + Send + 'static,
{
    async fn set(&self, value: Value) -> Result<(), ProviderError> {
        (self)(value).await
    }
}

#[async_trait]
impl<F, Fut> ProviderOperation for F
where
    F: Fn(Vec<Value>, Vec<String>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<Value>, ProviderError>> + Send + 'static,
{
    async fn invoke(
        &self,
        params: Vec<Value>,
        param_datatypes: Vec<String>,
    ) -> Result<Vec<Value>, ProviderError> {
        (self)(params, param_datatypes).await
    }
}

// ---------------------------------------------------------------------------
// ProviderAttribute
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Readable,
    Writable,
    Notifiable,
}

/// Callback invoked with the new value of a notifiable attribute.
pub type AttributeListener = Arc<dyn Fn(&Value) + Send + Sync>;

/// Identifier returned by [`ProviderAttribute::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

pub struct ProviderAttribute {
    name: String,
    type_name: String,
    getter: Option<Arc<dyn AttributeGetter>>,
    setter: Option<Arc<dyn AttributeSetter>>,
    /// Present iff the attribute is notifiable.
    listeners: Option<Mutex<Vec<(ListenerId, AttributeListener)>>>,
    next_listener_id: AtomicU64,
}

impl std::fmt::Debug for ProviderAttribute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderAttribute")
            .field("name", &self.name)
            .field("type_name", &self.type_name)
            .field("capabilities", &self.capabilities())
            .finish_non_exhaustive()
    }
}

impl ProviderAttribute {
    fn with_members(
        name: impl Into<String>,
        type_name: impl Into<String>,
        getter: Option<Arc<dyn AttributeGetter>>,
        setter: Option<Arc<dyn AttributeSetter>>,
    ) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            getter,
            setter,
            listeners: None,
            next_listener_id: AtomicU64::new(1),
        }
    }

    #[must_use]
    pub fn read_only(
        name: impl Into<String>,
        type_name: impl Into<String>,
        getter: impl AttributeGetter + 'static,
    ) -> Self {
        Self::with_members(name, type_name, Some(Arc::new(getter)), None)
    }

    #[must_use]
    pub fn write_only(
        name: impl Into<String>,
        type_name: impl Into<String>,
        setter: impl AttributeSetter + 'static,
    ) -> Self {
        Self::with_members(name, type_name, None, Some(Arc::new(setter)))
    }

    #[must_use]
    pub fn read_write(
        name: impl Into<String>,
        type_name: impl Into<String>,
        getter: impl AttributeGetter + 'static,
        setter: impl AttributeSetter + 'static,
    ) -> Self {
        Self::with_members(
            name,
            type_name,
            Some(Arc::new(getter)),
            Some(Arc::new(setter)),
        )
    }

    /// Adds the notifiable capability.
    #[must_use]
    pub fn notifiable(mut self) -> Self {
        self.listeners.get_or_insert_with(|| Mutex::new(Vec::new()));
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    #[must_use]
    pub fn has(&self, capability: Capability) -> bool {
        match capability {
            Capability::Readable => self.getter.is_some(),
            Capability::Writable => self.setter.is_some(),
            Capability::Notifiable => self.listeners.is_some(),
        }
    }

    #[must_use]
    pub fn capabilities(&self) -> Vec<Capability> {
        [
            Capability::Readable,
            Capability::Writable,
            Capability::Notifiable,
        ]
        .into_iter()
        .filter(|capability| self.has(*capability))
        .collect()
    }

    #[must_use]
    pub fn getter(&self) -> Option<Arc<dyn AttributeGetter>> {
        self.getter.clone()
    }

    #[must_use]
    pub fn setter(&self) -> Option<Arc<dyn AttributeSetter>> {
        self.setter.clone()
    }

    /// Registers a change listener. Returns `None` unless the attribute is
    /// notifiable.
    pub fn add_listener(&self, listener: AttributeListener) -> Option<ListenerId> {
        let listeners = self.listeners.as_ref()?;
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::Relaxed));
        listeners.lock().push((id, listener));
        Some(id)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let Some(listeners) = self.listeners.as_ref() else {
            return false;
        };
        let mut listeners = listeners.lock();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Notifies every listener of a new value. Returns the number notified.
    pub fn value_changed(&self, value: &Value) -> usize {
        let Some(listeners) = self.listeners.as_ref() else {
            return 0;
        };
        // Listeners may add or remove listeners; call them on a snapshot.
        let snapshot: Vec<AttributeListener> = listeners
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in &snapshot {
            listener(value);
        }
        snapshot.len()
    }
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// Local implementation of a provider interface.
pub struct Provider {
    interface_name: String,
    version: Version,
    attributes: HashMap<String, ProviderAttribute>,
    operations: HashMap<String, Arc<dyn ProviderOperation>>,
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut operations: Vec<&String> = self.operations.keys().collect();
        operations.sort();
        f.debug_struct("Provider")
            .field("interface_name", &self.interface_name)
            .field("version", &self.version)
            .field("attributes", &self.attributes)
            .field("operations", &operations)
            .finish()
    }
}

impl Provider {
    #[must_use]
    pub fn new(interface_name: impl Into<String>, version: Version) -> Self {
        Self {
            interface_name: interface_name.into(),
            version,
            attributes: HashMap::new(),
            operations: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_attribute(mut self, attribute: ProviderAttribute) -> Self {
        self.attributes.insert(attribute.name.clone(), attribute);
        self
    }

    #[must_use]
    pub fn with_operation(
        mut self,
        name: impl Into<String>,
        operation: impl ProviderOperation + 'static,
    ) -> Self {
        self.operations.insert(name.into(), Arc::new(operation));
        self
    }

    #[must_use]
    pub fn interface_name(&self) -> &str {
        &self.interface_name
    }

    #[must_use]
    pub fn version(&self) -> Version {
        self.version
    }

    #[must_use]
    pub fn operation(&self, name: &str) -> Option<Arc<dyn ProviderOperation>> {
        self.operations.get(name).cloned()
    }

    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&ProviderAttribute> {
        self.attributes.get(name)
    }

    /// Attribute addressed by the remainder of a `get`/`set` method name:
    /// `"Volume"` finds `volume`, falling back to an exact match.
    #[must_use]
    pub fn accessor_attribute(&self, suffix: &str) -> Option<&ProviderAttribute> {
        if suffix.is_empty() {
            return None;
        }
        self.attributes
            .get(&decapitalize(suffix))
            .or_else(|| self.attributes.get(suffix))
    }
}

/// Lower-cases the first character: `"Volume"` becomes `"volume"`.
pub(crate) fn decapitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use serde_json::json;

    use super::*;

    fn volume() -> ProviderAttribute {
        ProviderAttribute::read_write(
            "volume",
            "Integer",
            || async { Ok::<_, ProviderError>(json!(7)) },
            |_value: Value| async { Ok::<_, ProviderError>(()) },
        )
    }

    #[test]
    fn capabilities_follow_construction() {
        let read_only = ProviderAttribute::read_only("a", "String", || async { Ok::<_, ProviderError>(json!("x")) });
        assert_eq!(read_only.capabilities(), vec![Capability::Readable]);

        let write_only = ProviderAttribute::write_only("b", "String", |_v: Value| async { Ok::<_, ProviderError>(()) });
        assert_eq!(write_only.capabilities(), vec![Capability::Writable]);

        let all = volume().notifiable();
        assert_eq!(
            all.capabilities(),
            vec![
                Capability::Readable,
                Capability::Writable,
                Capability::Notifiable
            ]
        );
    }

    #[tokio::test]
    async fn closures_act_as_members() {
        let attribute = volume();
        let getter = attribute.getter().unwrap();
        assert_eq!(getter.get().await.unwrap(), json!(7));

        let provider = Provider::new("vehicle/Radio", Version::new(1, 0)).with_operation(
            "echo",
            |params: Vec<Value>, _types: Vec<String>| async move { Ok::<_, ProviderError>(params) },
        );
        let echo = provider.operation("echo").unwrap();
        assert_eq!(
            echo.invoke(vec![json!("hi")], vec!["String".into()]).await.unwrap(),
            vec![json!("hi")]
        );
    }

    #[test]
    fn listeners_only_on_notifiable_attributes() {
        assert!(volume().add_listener(Arc::new(|_| {})).is_none());

        let attribute = volume().notifiable();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let id = attribute
            .add_listener(Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();

        assert_eq!(attribute.value_changed(&json!(3)), 1);
        assert!(attribute.remove_listener(id));
        assert!(!attribute.remove_listener(id));
        assert_eq!(attribute.value_changed(&json!(4)), 0);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn accessor_lookup_decapitalizes() {
        let provider = Provider::new("vehicle/Radio", Version::default())
            .with_attribute(volume())
            .with_attribute(ProviderAttribute::read_only("URL", "String", || async { Ok::<_, ProviderError>(json!("u")) }));
        assert_eq!(provider.accessor_attribute("Volume").unwrap().name(), "volume");
        assert_eq!(provider.accessor_attribute("URL").unwrap().name(), "URL");
        assert!(provider.accessor_attribute("").is_none());
        assert!(provider.accessor_attribute("Missing").is_none());
    }
}
