use std::sync::Arc;

use miniquery_core::{QueryObserver, QueryState, QueryStatus, Subscription};
use parking_lot::Mutex;

use crate::devices::Devices;

pub fn render(state: &QueryState<Devices>) -> String {
    match state.status() {
        QueryStatus::Pending => "loading...".to_string(),
        QueryStatus::Error => "We were unable to access your media devices".to_string(),
        QueryStatus::Success => {
            let count = state.data().map_or(0, |devices| devices.len());
            format!("You have {count} media devices")
        }
    }
}

/// One use-site of the media device query, printing a line whenever what it
/// would show changes.
#[derive(Clone)]
pub struct DeviceView {
    label: Option<String>,
    observer: QueryObserver<Devices>,
    shown: Arc<Mutex<Option<String>>>,
}

impl DeviceView {
    pub fn new(label: Option<String>, observer: QueryObserver<Devices>) -> Self {
        Self {
            label,
            observer,
            shown: Arc::new(Mutex::new(None)),
        }
    }

    /// Renders the current snapshot, then re-renders on every change until
    /// the returned subscription is dropped.
    pub fn mount(&self) -> Subscription {
        self.refresh();

        let view = self.clone();
        self.observer.subscribe(move || view.refresh())
    }

    #[cfg(test)]
    pub fn shown(&self) -> Option<String> {
        self.shown.lock().clone()
    }

    fn refresh(&self) {
        let line = render(&self.observer.get_snapshot());

        let mut shown = self.shown.lock();
        if shown.as_deref() == Some(line.as_str()) {
            return;
        }

        match &self.label {
            Some(label) => println!("[{label}] {line}"),
            None => println!("{line}"),
        }
        *shown = Some(line);
    }
}
