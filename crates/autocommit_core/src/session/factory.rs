//! Session factory.

use super::{Listeners, Session};
use crate::config::SessionOptions;
use crate::engine::Bind;
use crate::events::SessionEvents;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

#[derive(Default)]
struct FactoryInner {
    options: RwLock<SessionOptions>,
    listeners: RwLock<Vec<Arc<dyn SessionEvents>>>,
}

/// Creates sessions sharing one set of options and event listeners.
///
/// Cloning is cheap; clones share configuration. Reconfiguring affects
/// sessions created afterwards, never existing ones.
#[derive(Clone, Default)]
pub struct SessionFactory {
    inner: Arc<FactoryInner>,
}

impl SessionFactory {
    /// Creates a factory with the given options and no listeners.
    #[must_use]
    pub fn new(options: SessionOptions) -> Self {
        Self {
            inner: Arc::new(FactoryInner {
                options: RwLock::new(options),
                listeners: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Registers a listener for sessions created from now on.
    pub fn listen(&self, listener: Arc<dyn SessionEvents>) {
        self.inner.listeners.write().push(listener);
    }

    /// Returns the number of registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.read().len()
    }

    /// Returns a copy of the current options.
    #[must_use]
    pub fn options(&self) -> SessionOptions {
        self.inner.options.read().clone()
    }

    /// Replaces the options with `update(current)`.
    ///
    /// # Example
    ///
    /// ```rust
    /// use autocommit_core::SessionFactory;
    ///
    /// let factory = SessionFactory::default();
    /// factory.configure(|o| o.autoflush(true));
    /// assert!(factory.options().autoflush);
    /// ```
    pub fn configure(&self, update: impl FnOnce(SessionOptions) -> SessionOptions) {
        let mut options = self.inner.options.write();
        let current = std::mem::take(&mut *options);
        *options = update(current);
    }

    /// Creates a session with the current options.
    #[must_use]
    pub fn create(&self) -> Session {
        self.create_with_options(self.options())
    }

    /// Creates a session with the current options but a different bind.
    #[must_use]
    pub fn create_with_bind(&self, bind: impl Into<Bind>) -> Session {
        self.create_with_options(self.options().bind(bind))
    }

    /// Creates a session with explicit options and this factory's listeners.
    #[must_use]
    pub fn create_with_options(&self, options: SessionOptions) -> Session {
        Session::new(options, self.listeners())
    }

    fn listeners(&self) -> Listeners {
        self.inner.listeners.read().iter().cloned().collect()
    }
}

impl fmt::Debug for SessionFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionFactory")
            .field("options", &*self.inner.options.read())
            .field("listeners", &self.listener_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreResult;
    use crate::types::TransactionHandle;
    use crate::Connection;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingListener {
        begins: AtomicUsize,
    }

    impl SessionEvents for CountingListener {
        fn after_begin(
            &self,
            _session: &mut Session,
            _transaction: &TransactionHandle,
            _connection: &Connection,
        ) -> CoreResult<()> {
            self.begins.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn configure_affects_new_sessions_only() {
        let factory = SessionFactory::default();
        let before = factory.create();
        factory.configure(|o| o.autocommit(false));
        let after = factory.create();

        assert!(before.autocommit());
        assert!(!after.autocommit());
    }

    #[test]
    fn sessions_snapshot_listeners() {
        let factory = SessionFactory::default();
        let early = factory.create();
        factory.listen(Arc::new(CountingListener::default()));
        let late = factory.create();

        assert_eq!(factory.listener_count(), 1);
        assert!(format!("{early:?}").contains("listeners: 0"));
        assert!(format!("{late:?}").contains("listeners: 1"));
    }

    #[test]
    fn clones_share_configuration() {
        let factory = SessionFactory::default();
        let clone = factory.clone();
        clone.configure(|o| o.fake_root_transaction(true));
        assert!(factory.options().fake_root_transaction);
    }
}
