//! Page-initialization callbacks replayed after every load.

use crate::fetcher::NavigationId;
use sn_core::NavError;
use sn_core::NavResult;
use sn_dom::Document;
use sn_net::NavUrl;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::panic::catch_unwind;

/// What a load callback can see during a replay.
pub struct LoadContext<'a> {
    pub document: &'a mut Document,
    pub location: &'a NavUrl,
    /// `None` for the replay at setup, otherwise the navigation that just patched.
    pub navigation: Option<NavigationId>,
}

pub type LoadCallback = Box<dyn FnMut(&mut LoadContext<'_>) -> NavResult<()>>;

struct CallbackEntry {
    label: String,
    callback: LoadCallback,
}

/// Ordered, append-only list of load callbacks.
#[derive(Default)]
pub struct LoadQueue {
    entries: Vec<CallbackEntry>,
}

impl std::fmt::Debug for LoadQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadQueue")
            .field(
                "entries",
                &self.entries.iter().map(|entry| &entry.label).collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackFailure {
    pub index: usize,
    pub label: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayReport {
    pub invoked: usize,
    pub failed: usize,
    pub failures: Vec<CallbackFailure>,
}

impl ReplayReport {
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

impl LoadQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `callback`. The same closure type may be registered any number of times.
    pub fn register<F>(&mut self, callback: F)
    where
        F: FnMut(&mut LoadContext<'_>) -> NavResult<()> + 'static,
    {
        self.register_named(std::any::type_name::<F>(), callback);
    }

    pub fn register_named<F>(&mut self, label: impl Into<String>, callback: F)
    where
        F: FnMut(&mut LoadContext<'_>) -> NavResult<()> + 'static,
    {
        let label = label.into();
        tracing::debug!(%label, position = self.entries.len(), "registered load callback");
        self.entries.push(CallbackEntry {
            label,
            callback: Box::new(callback),
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Runs every callback in registration order.
    ///
    /// An `Err` or a panic in one callback is logged and recorded; the rest still run.
    pub fn replay(&mut self, context: &mut LoadContext<'_>) -> ReplayReport {
        let mut report = ReplayReport::default();

        for (index, entry) in self.entries.iter_mut().enumerate() {
            report.invoked += 1;
            let callback = &mut entry.callback;
            let outcome = catch_unwind(AssertUnwindSafe(|| callback(context)));
            let message = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(error)) => error.to_string(),
                Err(payload) => NavError::new("nav.load.callback_panicked", panic_message(&*payload, "callback panicked"))
                    .to_string(),
            };

            tracing::error!(
                index,
                label = %entry.label,
                navigation = ?context.navigation,
                %message,
                "load callback failed"
            );
            report.failed += 1;
            report.failures.push(CallbackFailure {
                index,
                label: entry.label.clone(),
                message,
            });
        }

        tracing::debug!(
            invoked = report.invoked,
            failed = report.failed,
            "replayed load queue"
        );
        report
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send), fallback: &str) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        fallback.to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::LoadContext;
    use super::LoadQueue;
    use sn_core::NavError;
    use sn_dom::Document;
    use sn_net::NavUrl;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn location() -> NavUrl {
        match NavUrl::parse("https://site.test/") {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        }
    }

    fn replay(queue: &mut LoadQueue) -> super::ReplayReport {
        let mut document = Document::new();
        let location = location();
        let mut context = LoadContext {
            document: &mut document,
            location: &location,
            navigation: None,
        };
        queue.replay(&mut context)
    }

    #[test]
    fn same_callback_registered_twice_runs_twice_in_order() {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let mut queue = LoadQueue::new();

        for tag in ["a", "b", "a"] {
            let calls = Rc::clone(&calls);
            queue.register(move |_context: &mut LoadContext<'_>| {
                calls.borrow_mut().push(tag);
                Ok(())
            });
        }

        let report = replay(&mut queue);
        assert_eq!(report.invoked, 3);
        assert!(report.is_clean());
        assert_eq!(*calls.borrow(), vec!["a", "b", "a"]);
    }

    #[test]
    fn failures_and_panics_do_not_stop_later_callbacks() {
        let ran = Rc::new(RefCell::new(0_u32));
        let mut queue = LoadQueue::new();
        queue.register_named("broken-widget", |_context: &mut LoadContext<'_>| {
            Err(NavError::new("test.widget", "init failed"))
        });
        queue.register_named("panicking-widget", |_context: &mut LoadContext<'_>| {
            panic!("widget exploded")
        });
        {
            let ran = Rc::clone(&ran);
            queue.register_named("healthy-widget", move |_context: &mut LoadContext<'_>| {
                *ran.borrow_mut() += 1;
                Ok(())
            });
        }

        let report = replay(&mut queue);
        assert_eq!(report.invoked, 3);
        assert_eq!(report.failed, 2);
        assert_eq!(report.failures[0].label, "broken-widget");
        assert!(report.failures[0].message.contains("init failed"));
        assert_eq!(report.failures[1].index, 1);
        assert!(report.failures[1].message.contains("widget exploded"));
        assert_eq!(*ran.borrow(), 1);
    }

    #[test]
    fn callbacks_can_edit_the_document() {
        let mut queue = LoadQueue::new();
        queue.register(|context: &mut LoadContext<'_>| {
            let root = context.document.root();
            let marker = context.document.create_element("div");
            context.document.append_child(root, marker)
        });

        let mut document = Document::new();
        let location = location();
        let mut context = LoadContext {
            document: &mut document,
            location: &location,
            navigation: None,
        };
        let report = queue.replay(&mut context);
        assert!(report.is_clean());
        assert_eq!(document.children(document.root()).len(), 1);
    }
}
