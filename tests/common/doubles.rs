//! Collaborator doubles shared by the integration suites.
//!
//! Every double appends to one [`Timeline`] so scenarios can assert the
//! relative order of provider calls, remote commands and notifications.
//! Reuse via:
//!
//! ```rust
//! #[path = "common/doubles.rs"]
//! mod doubles;
//! ```

#![allow(dead_code, reason = "each suite uses a different subset of the doubles")]

use std::collections::HashMap;
use std::future::ready;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use slipway::ProvisionError;
use slipway::backend::{Backend, BackendFuture, MachineHandle, MachineNetworking, MachineRequest};
use slipway::channel::{ChannelError, ChannelFactory, CommandOutput, ControlChannel};
use slipway::job::JobId;
use slipway::notify::{Notification, Notifier, NotifyError};
use slipway::signal::{SignalHub, SignalReport};

/// Ordered log shared by every double.
#[derive(Clone, Debug, Default)]
pub struct Timeline(Arc<Mutex<Vec<String>>>);

impl Timeline {
    fn lock(&self) -> MutexGuard<'_, Vec<String>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record(&self, entry: impl Into<String>) {
        self.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.lock().clone()
    }

    /// Index of the first entry containing `needle`.
    pub fn position(&self, needle: &str) -> Option<usize> {
        self.lock().iter().position(|entry| entry.contains(needle))
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.lock()
            .iter()
            .filter(|entry| entry.starts_with(prefix))
            .count()
    }
}

/// Address every scripted machine reports.
pub const MACHINE_IP: Ipv4Addr = Ipv4Addr::new(198, 51, 100, 7);

/// Backend that always succeeds and records each call.
#[derive(Clone, Debug)]
pub struct ScriptedBackend {
    timeline: Timeline,
}

impl ScriptedBackend {
    pub const fn new(timeline: Timeline) -> Self {
        Self { timeline }
    }
}

impl Backend for ScriptedBackend {
    type Error = ProvisionError;

    fn create<'a>(
        &'a self,
        request: &'a MachineRequest,
    ) -> BackendFuture<'a, MachineHandle, Self::Error> {
        self.timeline
            .record(format!("create {} {}", request.name, request.commercial_type));
        Box::pin(ready(Ok(MachineHandle {
            id: format!("srv-{}", request.name),
            zone: request.zone.clone(),
            name: request.name.clone(),
        })))
    }

    fn wait_for_ready<'a>(
        &'a self,
        handle: &'a MachineHandle,
    ) -> BackendFuture<'a, MachineNetworking, Self::Error> {
        self.timeline.record(format!("ready {}", handle.id));
        Box::pin(ready(Ok(MachineNetworking {
            public_ip: IpAddr::V4(MACHINE_IP),
            ssh_port: 22,
        })))
    }

    fn destroy(&self, handle: MachineHandle) -> BackendFuture<'_, (), Self::Error> {
        self.timeline.record(format!("destroy {}", handle.id));
        Box::pin(ready(Ok(())))
    }
}

/// How the simulated machine answers a detached action.
#[derive(Clone, Debug)]
pub enum RemoteOutcome {
    /// Calls back with success.
    Succeed,
    /// Calls back with a failure body.
    Fail(String),
    /// Never calls back.
    Silent,
}

/// Control channel factory standing in for a machine.
///
/// Commands succeed with exit 0 unless a failure is scripted. Detached
/// actions that report through a signal URL call back into the hub right
/// away, the way the remote shell wrapper would.
#[derive(Clone)]
pub struct SimulatedMachine {
    timeline: Timeline,
    signals: Arc<SignalHub>,
    outcomes: Arc<Mutex<HashMap<String, RemoteOutcome>>>,
    failures: Arc<Mutex<Vec<(String, CommandOutput)>>>,
}

impl SimulatedMachine {
    pub fn new(timeline: Timeline, signals: Arc<SignalHub>) -> Self {
        Self {
            timeline,
            signals,
            outcomes: Arc::default(),
            failures: Arc::default(),
        }
    }

    /// Overrides the outcome reported for `signal`. Signals default to
    /// [`RemoteOutcome::Succeed`].
    pub fn on_signal(&self, signal: &str, outcome: RemoteOutcome) {
        self.outcomes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(signal.to_owned(), outcome);
    }

    /// Every command containing `needle` exits with `code`.
    pub fn fail_commands(&self, needle: &str, code: i32, stderr: &str) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((
                needle.to_owned(),
                CommandOutput {
                    code: Some(code),
                    stdout: String::new(),
                    stderr: stderr.to_owned(),
                },
            ));
    }

    fn respond(&self, command: &str) -> CommandOutput {
        self.timeline.record(format!("exec {command}"));
        if let Some((job, signal)) = signal_target(command) {
            self.call_back(job, &signal);
        }
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|(needle, _)| command.contains(needle.as_str()))
            .map(|(_, output)| output.clone())
            .unwrap_or_else(|| CommandOutput {
                code: Some(0),
                ..CommandOutput::default()
            })
    }

    fn call_back(&self, job: JobId, signal: &str) {
        let outcome = self
            .outcomes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(signal)
            .cloned()
            .unwrap_or(RemoteOutcome::Succeed);
        let report = match outcome {
            RemoteOutcome::Succeed => SignalReport::success(),
            RemoteOutcome::Fail(body) => SignalReport::from_callback(false, &body),
            RemoteOutcome::Silent => return,
        };
        if !self.signals.deliver(job, signal, report) {
            self.timeline.record(format!("dropped {signal}"));
        }
    }
}

/// Extracts the job and signal from a command carrying a callback URL.
fn signal_target(command: &str) -> Option<(JobId, String)> {
    let (_, after_jobs) = command.split_once("/jobs/")?;
    let (raw_job, after_signals) = after_jobs.split_once("/signals/")?;
    let (signal, _) = after_signals.split_once("?status=")?;
    Some((raw_job.parse().ok()?, signal.to_owned()))
}

struct SimulatedChannel {
    machine: SimulatedMachine,
}

impl ControlChannel for SimulatedChannel {
    fn execute<'a>(
        &'a mut self,
        command: &'a str,
    ) -> BackendFuture<'a, CommandOutput, ChannelError> {
        Box::pin(ready(Ok(self.machine.respond(command))))
    }

    fn close(&mut self) {
        self.machine.timeline.record("close");
    }
}

impl ChannelFactory for SimulatedMachine {
    fn connect<'a>(
        &'a self,
        networking: &'a MachineNetworking,
    ) -> BackendFuture<'a, Box<dyn ControlChannel>, ChannelError> {
        self.timeline
            .record(format!("connect {}", networking.public_ip));
        let channel: Box<dyn ControlChannel> = Box::new(SimulatedChannel {
            machine: self.clone(),
        });
        Box::pin(ready(Ok(channel)))
    }
}

/// Notifier that records what it was asked to send.
#[derive(Clone, Debug)]
pub struct RecordingNotifier {
    timeline: Timeline,
}

impl RecordingNotifier {
    pub const fn new(timeline: Timeline) -> Self {
        Self { timeline }
    }
}

impl Notifier for RecordingNotifier {
    fn notify<'a>(&'a self, notification: &'a Notification) -> BackendFuture<'a, (), NotifyError> {
        self.timeline.record(format!(
            "notify {:?} {}: {}",
            notification.kind, notification.instance, notification.text
        ));
        Box::pin(ready(Ok(())))
    }
}
