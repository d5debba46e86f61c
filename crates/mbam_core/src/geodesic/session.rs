use std::io::{BufRead, BufReader, Write};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::detector::{DetectorStatus, IndexLimitMap, LimitDetector};
use super::{GeodesicSample, GeodesicStatus};
use crate::error::ReductionError;
use crate::model::ModelDocument;
use crate::settings::{GeodesicSettings, IntegratorCommand};
use crate::store::Store;

/// Shared abort flag, checked by the session at every poll.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RelayMessage {
    Done { done: GeodesicStatus },
    Sample(GeodesicSample),
}

/// A running integrator, the relay thread copying its samples into the
/// store, and the handles needed to stop both.
pub struct GeodesicSession {
    geodesic_id: String,
    store: Arc<dyn Store>,
    settings: GeodesicSettings,
    cancel: CancelToken,
    child: Option<Child>,
    relay: Option<JoinHandle<()>>,
    relay_stop: Arc<AtomicBool>,
}

impl GeodesicSession {
    /// Spawns the integrator with the model document on its stdin, creates
    /// the geodesic record and starts relaying its stdout.
    pub fn start(
        command: &IntegratorCommand,
        model: &ModelDocument,
        store: Arc<dyn Store>,
        settings: GeodesicSettings,
        cancel: CancelToken,
    ) -> Result<Self> {
        let payload = serde_json::to_vec(model)?;
        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("failed to spawn integrator '{}'", command.program))?;
        // Created only once there is a process to feed it.
        let geodesic_id = match store.init_geodesic() {
            Ok(id) => id,
            Err(err) => {
                reap(&mut child, "-");
                return Err(err.into());
            }
        };

        if let Some(mut stdin) = child.stdin.take() {
            // An integrator that ignores its input may already have exited.
            if let Err(err) = stdin.write_all(&payload).and_then(|_| stdin.write_all(b"\n")) {
                warn!(error = %err, "could not send model to integrator");
            }
        }
        let Some(stdout) = child.stdout.take() else {
            reap(&mut child, &geodesic_id);
            finish(store.as_ref(), &geodesic_id, GeodesicStatus::Exception);
            anyhow::bail!("integrator stdout was not captured");
        };

        let relay_stop = Arc::new(AtomicBool::new(false));
        let spawned = {
            let store = Arc::clone(&store);
            let id = geodesic_id.clone();
            let stop = Arc::clone(&relay_stop);
            thread::Builder::new()
                .name(format!("geodesic-relay-{id}"))
                .spawn(move || relay(BufReader::new(stdout), store.as_ref(), &id, &stop))
        };
        let relay = match spawned {
            Ok(handle) => handle,
            Err(err) => {
                reap(&mut child, &geodesic_id);
                finish(store.as_ref(), &geodesic_id, GeodesicStatus::Exception);
                return Err(err).context("failed to spawn relay thread");
            }
        };
        info!(geodesic = %geodesic_id, program = %command.program, "geodesic started");

        Ok(Self {
            geodesic_id,
            store,
            settings,
            cancel,
            child: Some(child),
            relay: Some(relay),
            relay_stop,
        })
    }

    pub fn geodesic_id(&self) -> &str {
        &self.geodesic_id
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn is_running(&self) -> bool {
        self.child.is_some()
    }

    /// Polls the stored geodesic until a limit is confirmed, the geodesic
    /// ends, the poll budget runs out or the session is cancelled. The
    /// integrator is killed in every case.
    pub fn run_until_limit(&mut self) -> Result<IndexLimitMap, ReductionError> {
        let result = self.poll_until_limit();
        self.kill();
        result
    }

    fn poll_until_limit(&mut self) -> Result<IndexLimitMap, ReductionError> {
        let mut detector = LimitDetector::new(self.settings);
        let interval = Duration::from_millis(self.settings.poll_interval_ms);
        let no_limit = |reason: &str| ReductionError::NoLimitReached {
            geodesic: self.geodesic_id.clone(),
            reason: reason.to_string(),
        };
        let mut polls = 0;
        loop {
            if self.cancel.is_cancelled() {
                return Err(no_limit("cancelled"));
            }
            let record = self.store.query_geodesic(&self.geodesic_id)?;
            match detector.poll(&record) {
                DetectorStatus::Confirmed(limits) => return Ok(limits),
                DetectorStatus::NoLimit => {
                    return Err(no_limit(&format!(
                        "geodesic ended ({:?}) after {} samples without a limit",
                        record.done,
                        record.len()
                    )))
                }
                DetectorStatus::Pending => {}
            }
            polls += 1;
            if self.settings.max_polls.is_some_and(|max| polls >= max) {
                return Err(no_limit(&format!("no limit after {polls} polls")));
            }
            thread::sleep(interval);
        }
    }

    /// Stops the integrator and the relay. Safe to call more than once.
    pub fn kill(&mut self) {
        self.relay_stop.store(true, Ordering::SeqCst);
        if let Some(mut child) = self.child.take() {
            reap(&mut child, &self.geodesic_id);
        }
        if let Some(relay) = self.relay.take() {
            // A relay still blocked on a read exits at its next line or EOF.
            if relay.is_finished() && relay.join().is_err() {
                warn!(geodesic = %self.geodesic_id, "relay thread panicked");
            }
        }
    }
}

impl Drop for GeodesicSession {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Kills the child unless it already exited, then waits for it.
fn reap(child: &mut Child, geodesic: &str) {
    match child.try_wait() {
        Ok(Some(status)) => debug!(%geodesic, %status, "integrator already exited"),
        _ => {
            if let Err(err) = child.kill() {
                warn!(%geodesic, error = %err, "failed to kill integrator");
            }
            match child.wait() {
                Ok(status) => info!(%geodesic, %status, "integrator killed"),
                Err(err) => warn!(%geodesic, error = %err, "failed to reap integrator"),
            }
        }
    }
}

fn relay(reader: impl BufRead, store: &dyn Store, id: &str, stop: &AtomicBool) {
    for line in reader.lines() {
        if stop.load(Ordering::SeqCst) {
            return;
        }
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                warn!(geodesic = %id, error = %err, "integrator output unreadable");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<RelayMessage>(&line) {
            Ok(RelayMessage::Sample(sample)) => {
                if let Err(err) = store.push_geodesic(id, &sample) {
                    warn!(geodesic = %id, error = %err, "dropping geodesic sample");
                }
            }
            Ok(RelayMessage::Done { done }) => {
                finish(store, id, done);
                return;
            }
            Err(err) => warn!(geodesic = %id, error = %err, line = %line, "skipping malformed integrator line"),
        }
    }
    if !stop.load(Ordering::SeqCst) {
        finish(store, id, GeodesicStatus::Exception);
    }
}

fn finish(store: &dyn Store, id: &str, status: GeodesicStatus) {
    debug!(geodesic = %id, ?status, "geodesic finished");
    if let Err(err) = store.finish_geodesic(id, status) {
        warn!(geodesic = %id, error = %err, "could not mark geodesic finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn relay_stores_samples_until_terminator() {
        let store = MemoryStore::new();
        let id = store.init_geodesic().unwrap();
        let output = concat!(
            "{\"t\": [0.0], \"tau\": [0.0], \"v\": [0.9, 0.1], \"x\": [1.0, 1.0]}\n",
            "not json\n",
            "\n",
            "{\"t\": [0.1], \"tau\": [0.1], \"v\": [0.95, 0.02], \"x\": [1.1, 0.9]}\n",
            "{\"done\": \"done\"}\n",
            "{\"t\": [0.2], \"tau\": [0.2], \"v\": [0.0, 0.0], \"x\": [0.0, 0.0]}\n",
        );
        relay(output.as_bytes(), &store, &id, &AtomicBool::new(false));
        let record = store.query_geodesic(&id).unwrap();
        assert_eq!(record.len(), 2);
        assert_eq!(record.done, Some(GeodesicStatus::Done));
        assert_eq!(record.latest_velocity(), Some(&[0.95, 0.02][..]));
    }

    #[test]
    fn failed_spawn_leaves_no_geodesic() {
        let store = Arc::new(MemoryStore::new());
        let document: ModelDocument = serde_json::from_value(serde_json::json!({
            "type": "dae",
            "name": "empty"
        }))
        .unwrap();
        let command = IntegratorCommand {
            program: "/nonexistent/mbam-integrator".to_string(),
            args: Vec::new(),
        };
        let result = GeodesicSession::start(
            &command,
            &document,
            store.clone(),
            GeodesicSettings::default(),
            CancelToken::new(),
        );
        let err = result.err().expect("spawn should fail");
        assert!(format!("{err:#}").contains("failed to spawn integrator"));
        assert!(store.geodesic_ids().is_empty());
    }

    #[test]
    fn eof_without_terminator_is_an_exception() {
        let store = MemoryStore::new();
        let id = store.init_geodesic().unwrap();
        relay(&b"{\"v\": [0.5]}\n"[..], &store, &id, &AtomicBool::new(false));
        let record = store.query_geodesic(&id).unwrap();
        assert_eq!(record.len(), 1);
        assert_eq!(record.done, Some(GeodesicStatus::Exception));
    }
}
