//! Base Controller trait.

/// Base trait for components that react to bus events.
///
/// A controller names the events it wants and handles each one by
/// recomputing whatever state it owns. Handlers take `&self`, so
/// controllers keep their mutable state behind locks.
///
/// # Lifecycle
///
/// 1. Construction: the controller receives the shared stores it reads
/// 2. Registration: [`EventBus::register_controller`](crate::EventBus::register_controller)
///    subscribes it to every name in [`subscriptions`](Self::subscriptions)
/// 3. Dispatch: [`handle`](Self::handle) runs for each delivered event
///
/// # Thread Safety
///
/// Controllers must be `Send + Sync`. The bus serialises dispatch, but
/// feeds may trigger events from several threads.
pub trait Controller<E>: Send + Sync {
    /// Returns the name of this controller (for logging and debugging).
    fn name(&self) -> &str;

    /// Event names this controller subscribes to.
    fn subscriptions(&self) -> &'static [&'static str];

    /// Handles one event. Errors are logged by the bus.
    fn handle(&self, event: &E) -> anyhow::Result<()>;
}
