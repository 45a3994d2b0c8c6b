//! Minimal widget surface the sync layer binds to: a value, a setter and an
//! ordered list of change observers.

use std::sync::{Arc, Mutex, PoisonError};

use shared::domain::StateValue;

/// Who caused a widget change. Sync-originated changes must not be written back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOrigin {
    User,
    Sync,
}

pub type WidgetObserver = Arc<dyn Fn(&StateValue, ChangeOrigin) + Send + Sync>;

pub trait Widget: Send + Sync {
    fn value(&self) -> StateValue;

    /// Replaces the displayed value and notifies observers in registration order.
    fn set_value(&self, value: StateValue, origin: ChangeOrigin);

    fn observe(&self, observer: WidgetObserver);
}

/// In-process widget, used by headless hosts and tests.
pub struct MemoryWidget {
    value: Mutex<StateValue>,
    observers: Mutex<Vec<WidgetObserver>>,
}

impl MemoryWidget {
    pub fn new(initial: StateValue) -> Arc<Self> {
        Arc::new(Self {
            value: Mutex::new(initial),
            observers: Mutex::new(Vec::new()),
        })
    }

    /// Simulates an edit made through the UI.
    pub fn user_edit(&self, value: StateValue) {
        self.set_value(value, ChangeOrigin::User);
    }
}

impl Widget for MemoryWidget {
    fn value(&self) -> StateValue {
        self.value
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_value(&self, value: StateValue, origin: ChangeOrigin) {
        *self.value.lock().unwrap_or_else(PoisonError::into_inner) = value.clone();
        // Snapshot so observers may register further observers.
        let observers = self
            .observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for observer in observers {
            observer(&value, origin);
        }
    }

    fn observe(&self, observer: WidgetObserver) {
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observers_run_in_registration_order() {
        let widget = MemoryWidget::new(StateValue::Counter(0));
        let seen = Arc::new(Mutex::new(Vec::new()));
        for tag in ["first", "second", "third"] {
            let seen = Arc::clone(&seen);
            widget.observe(Arc::new(move |value: &StateValue, origin: ChangeOrigin| {
                seen.lock().expect("lock").push((tag, value.clone(), origin));
            }));
        }

        widget.user_edit(StateValue::Counter(4));

        let seen = seen.lock().expect("lock");
        let tags = seen.iter().map(|(tag, _, _)| *tag).collect::<Vec<_>>();
        assert_eq!(tags, ["first", "second", "third"]);
        assert!(seen
            .iter()
            .all(|(_, value, origin)| *value == StateValue::Counter(4)
                && *origin == ChangeOrigin::User));
        assert_eq!(widget.value(), StateValue::Counter(4));
    }

    #[test]
    fn sync_changes_carry_their_origin() {
        let widget = MemoryWidget::new(StateValue::Text(String::new()));
        let origins = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&origins);
        widget.observe(Arc::new(move |_: &StateValue, origin: ChangeOrigin| {
            sink.lock().expect("lock").push(origin);
        }));

        widget.set_value(StateValue::Text("hi".into()), ChangeOrigin::Sync);

        assert_eq!(*origins.lock().expect("lock"), vec![ChangeOrigin::Sync]);
    }
}
