use std::sync::{Mutex, PoisonError};
use std::thread::JoinHandle;

use crate::server::Reloader;

struct Service {
    name: String,
    handle: JoinHandle<anyhow::Result<()>>,
}

/// Long-lived listeners started by tasks (dev server, watcher), plus the
/// live reload broadcaster shared between them.
///
/// Tasks that start a listener return right away; whoever drives the run
/// decides whether to [`wait`](Services::wait) on them afterwards.
#[derive(Default)]
pub struct Services {
    running: Mutex<Vec<Service>>,
    reloader: Mutex<Option<Reloader>>,
}

impl Services {
    pub fn spawn(&self, name: impl Into<String>, handle: JoinHandle<anyhow::Result<()>>) {
        let name = name.into();
        tracing::debug!(service = %name, "service started");

        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Service { name, handle });
    }

    pub fn is_empty(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }

    /// Block until every running service has stopped. Errors are logged,
    /// the first one is returned.
    pub fn wait(&self) -> anyhow::Result<()> {
        let services: Vec<_> = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();

        let mut first = None;
        for Service { name, handle } in services {
            let result = match handle.join() {
                Ok(result) => result,
                Err(_) => Err(anyhow::anyhow!("service '{name}' panicked")),
            };

            if let Err(err) = result {
                tracing::error!(service = %name, "{err:#}");
                first.get_or_insert(err);
            }
        }

        first.map_or(Ok(()), Err)
    }

    /// The live reload broadcaster, started on first use.
    pub fn reloader(&self) -> std::io::Result<Reloader> {
        let mut slot = self.reloader.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(reloader) = slot.as_ref() {
            return Ok(reloader.clone());
        }

        let reloader = Reloader::start()?;
        *slot = Some(reloader.clone());
        Ok(reloader)
    }

    /// Ask connected browsers to reload, if live reload was started.
    pub fn reload(&self) -> bool {
        let slot = self.reloader.lock().unwrap_or_else(PoisonError::into_inner);
        match slot.as_ref() {
            Some(reloader) => reloader.reload(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_joins_and_reports_failures() {
        let services = Services::default();
        services.spawn("ok", std::thread::spawn(|| Ok(())));
        services.spawn(
            "broken",
            std::thread::spawn(|| Err(anyhow::anyhow!("listener died"))),
        );

        assert!(!services.is_empty());
        let err = services.wait().unwrap_err();
        assert_eq!(err.to_string(), "listener died");
        assert!(services.is_empty());
    }

    #[test]
    fn reload_without_reloader_is_a_noop() {
        assert!(!Services::default().reload());
    }
}
