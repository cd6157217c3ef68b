//! In-process domain events
//!
//! Single-threaded synchronous dispatch. Handlers are registered per event
//! type and invoked in registration order; a failing handler is logged and
//! skipped so publishing never propagates handler errors to the caller.

use rust_decimal::Decimal;
use tracing::warn;
use uuid::Uuid;

use crate::error::Result;
use crate::models::ImportSource;

/// Events fired at statement lifecycle boundaries.
#[derive(Debug, Clone)]
pub enum DomainEvent {
    /// A statement file was imported as a completed batch.
    StatementImported {
        batch_id: Uuid,
        source: ImportSource,
        entries_count: usize,
        file_sha256: String,
    },
    /// A statement entry received a suggested account from a rule.
    StatementMatched {
        entry_id: Uuid,
        batch_id: Uuid,
        account_id: Uuid,
        rule_pattern: String,
    },
    /// A statement entry was converted into a balanced transaction.
    StatementPosted {
        entry_id: Uuid,
        batch_id: Uuid,
        transaction_id: Uuid,
        account_id: Uuid,
        amount: Decimal,
        currency: String,
    },
    /// An import aborted before completing.
    StatementImportFailed {
        source: ImportSource,
        filename: String,
        error_message: String,
    },
}

impl DomainEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::StatementImported { .. } => "statement.imported",
            Self::StatementMatched { .. } => "statement.matched",
            Self::StatementPosted { .. } => "statement.posted",
            Self::StatementImportFailed { .. } => "statement.import_failed",
        }
    }
}

type Handler = Box<dyn Fn(&DomainEvent) -> Result<()>>;

/// Synchronous in-process event bus.
///
/// Not thread-safe; one bus per process, used from the composition root.
#[derive(Default)]
pub struct EventBus {
    handlers: Vec<(String, Handler)>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for one event type.
    pub fn subscribe<F>(&mut self, event_type: &str, handler: F)
    where
        F: Fn(&DomainEvent) -> Result<()> + 'static,
    {
        self.handlers
            .push((event_type.to_string(), Box::new(handler)));
    }

    /// Invoke all handlers registered for the event's type, in registration
    /// order. Handler failures are logged and do not stop dispatch.
    pub fn publish(&self, event: &DomainEvent) {
        for (event_type, handler) in &self.handlers {
            if event_type != event.event_type() {
                continue;
            }
            if let Err(err) = handler(event) {
                warn!("event handler failed for {}: {}", event.event_type(), err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn imported_event() -> DomainEvent {
        DomainEvent::StatementImported {
            batch_id: Uuid::new_v4(),
            source: ImportSource::NubankCsv,
            entries_count: 2,
            file_sha256: "00".repeat(32),
        }
    }

    #[test]
    fn test_handlers_run_in_registration_order() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut bus = EventBus::new();

        for label in ["first", "second"] {
            let seen = Rc::clone(&seen);
            bus.subscribe("statement.imported", move |_| {
                seen.borrow_mut().push(label);
                Ok(())
            });
        }

        bus.publish(&imported_event());
        assert_eq!(*seen.borrow(), vec!["first", "second"]);
    }

    #[test]
    fn test_failing_handler_does_not_stop_dispatch() {
        let seen = Rc::new(RefCell::new(0));
        let mut bus = EventBus::new();

        bus.subscribe("statement.imported", |_| {
            Err(crate::error::Error::StorageUnavailable("boom".to_string()))
        });
        let seen_inner = Rc::clone(&seen);
        bus.subscribe("statement.imported", move |_| {
            *seen_inner.borrow_mut() += 1;
            Ok(())
        });

        bus.publish(&imported_event());
        assert_eq!(*seen.borrow(), 1);
    }

    #[test]
    fn test_other_event_types_are_not_invoked() {
        let seen = Rc::new(RefCell::new(0));
        let mut bus = EventBus::new();
        let seen_inner = Rc::clone(&seen);
        bus.subscribe("statement.posted", move |_| {
            *seen_inner.borrow_mut() += 1;
            Ok(())
        });

        bus.publish(&imported_event());
        assert_eq!(*seen.borrow(), 0);
    }
}
