//! Fixtures shared by unit tests.

use std::collections::VecDeque;
use std::future::ready;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;

use uuid::Uuid;

use crate::backend::{
    Backend, BackendFuture, MachineHandle, MachineNetworking, MachineRequest, MachineTemplate,
};
use crate::blueprint::{Blueprint, BlueprintFactory, Deployment, PlanCatalog};
use crate::channel::{ChannelError, ChannelFactory, CommandOutput, ControlChannel};
use crate::error::ProvisionError;
use crate::http::{HttpError, HttpExecutor, HttpResponse};
use crate::instruction::HttpCall;
use crate::job::JobId;
use crate::signal::SignalHub;
use crate::stage::StageContext;
use crate::state::{ExecutionLimits, StateServices};
use crate::store::{Instance, InstanceKind};

/// Compose file publishing port 8080.
pub const WEB_COMPOSE: &str = "services:\n  web:\n    image: nginx\n    ports:\n      - \"8080:80\"\n";
/// Callback base URL used by every fixture.
pub const CALLBACK_BASE: &str = "http://orchestrator.test";

/// Unprovisioned row on the `2gb` plan.
pub fn instance(name: &str, kind: InstanceKind) -> Instance {
    Instance {
        name: name.to_owned(),
        plan_id: String::from("2gb"),
        kind,
        expires_at_utc: None,
        is_provisioned: false,
        cluster_id: Uuid::nil(),
    }
}

/// Deployment of a single compose file.
pub fn deployment(compose: &str) -> Deployment {
    Deployment::new(vec![compose.to_owned()], Vec::new(), Vec::new()).expect("valid deployment")
}

/// Machine template in `fr-par-1`.
pub fn template() -> MachineTemplate {
    MachineTemplate {
        image_label: String::from("Ubuntu 24.04 Noble Numbat"),
        zone: String::from("fr-par-1"),
        project_id: String::from("project"),
        organisation_id: None,
        architecture: String::from("x86_64"),
        cloud_init: None,
    }
}

/// Factory over the default plans.
pub fn factory() -> BlueprintFactory {
    BlueprintFactory::new(PlanCatalog::default(), template(), CALLBACK_BASE)
}

/// Blueprint for `web-1` running [`WEB_COMPOSE`].
pub fn blueprint() -> Blueprint {
    factory()
        .create(
            "2gb",
            instance("web-1", InstanceKind::Compose),
            deployment(WEB_COMPOSE),
        )
        .expect("blueprint")
}

/// Stage context for `web-1` without a registration URL.
pub fn stage_context(deployment: Deployment) -> StageContext {
    let plan = PlanCatalog::default().resolve("2gb").expect("known plan");
    StageContext {
        job_id: JobId::new(),
        plan,
        instance: instance("web-1", InstanceKind::Compose),
        deployment,
        callback_base_url: String::from(CALLBACK_BASE),
        registration_url: None,
    }
}

/// Control channel double: commands succeed unless a scripted output matches.
#[derive(Clone, Default)]
pub struct ScriptedChannels {
    script: Arc<StdMutex<ChannelScript>>,
}

#[derive(Default)]
struct ChannelScript {
    connect_failures: u32,
    rules: Vec<(String, VecDeque<CommandOutput>)>,
    delays: Vec<(String, Duration)>,
    executed: Vec<String>,
    connects: u32,
    closes: u32,
}

impl ScriptedChannels {
    fn lock(&self) -> MutexGuard<'_, ChannelScript> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fails the next `count` connects.
    pub fn fail_connects(&self, count: u32) {
        self.lock().connect_failures = count;
    }

    /// Commands containing `needle` consume `outputs` in order.
    pub fn script(&self, needle: &str, outputs: Vec<CommandOutput>) {
        self.lock()
            .rules
            .push((needle.to_owned(), outputs.into_iter().collect()));
    }

    /// Commands containing `needle` take `delay` before answering.
    pub fn delay(&self, needle: &str, delay: Duration) {
        self.lock().delays.push((needle.to_owned(), delay));
    }

    /// Commands run so far, in order.
    pub fn executed(&self) -> Vec<String> {
        self.lock().executed.clone()
    }

    /// Connect attempts so far.
    pub fn connects(&self) -> u32 {
        self.lock().connects
    }

    /// Channels closed so far.
    pub fn closes(&self) -> u32 {
        self.lock().closes
    }
}

/// Command output with `code` and `stderr`.
pub fn exit(code: i32, stderr: &str) -> CommandOutput {
    CommandOutput {
        code: Some(code),
        stdout: String::new(),
        stderr: stderr.to_owned(),
    }
}

struct ScriptedChannel {
    script: ScriptedChannels,
}

impl ControlChannel for ScriptedChannel {
    fn execute<'a>(
        &'a mut self,
        command: &'a str,
    ) -> BackendFuture<'a, CommandOutput, ChannelError> {
        let mut script = self.script.lock();
        script.executed.push(command.to_owned());
        let scripted = script
            .rules
            .iter_mut()
            .find(|(needle, outputs)| command.contains(needle.as_str()) && !outputs.is_empty())
            .and_then(|(_, outputs)| outputs.pop_front());
        let delay = script
            .delays
            .iter()
            .find(|(needle, _)| command.contains(needle.as_str()))
            .map(|(_, delay)| *delay);
        drop(script);
        Box::pin(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            Ok(scripted.unwrap_or_else(|| exit(0, "")))
        })
    }

    fn close(&mut self) {
        self.script.lock().closes += 1;
    }
}

impl ChannelFactory for ScriptedChannels {
    fn connect<'a>(
        &'a self,
        networking: &'a MachineNetworking,
    ) -> BackendFuture<'a, Box<dyn ControlChannel>, ChannelError> {
        let mut script = self.lock();
        script.connects += 1;
        let result: Result<Box<dyn ControlChannel>, ChannelError> = if script.connect_failures > 0 {
            script.connect_failures -= 1;
            Err(ChannelError::Connect {
                host: networking.public_ip.to_string(),
                message: String::from("connection refused"),
            })
        } else {
            Ok(Box::new(ScriptedChannel {
                script: self.clone(),
            }))
        };
        Box::pin(ready(result))
    }
}

/// HTTP double answering with scripted statuses, then 200.
#[derive(Clone, Default)]
pub struct RecordingHttp {
    statuses: Arc<StdMutex<VecDeque<u16>>>,
    calls: Arc<StdMutex<Vec<HttpCall>>>,
}

impl RecordingHttp {
    /// Queues statuses for the next calls.
    pub fn respond_with(&self, statuses: &[u16]) {
        self.statuses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(statuses);
    }

    /// Calls sent so far.
    pub fn calls(&self) -> Vec<HttpCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl HttpExecutor for RecordingHttp {
    fn send<'a>(&'a self, call: &'a HttpCall) -> BackendFuture<'a, HttpResponse, HttpError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call.clone());
        let status = self
            .statuses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or(200);
        Box::pin(ready(Ok(HttpResponse {
            status,
            body: String::from("registry says no"),
        })))
    }
}

/// Networking of every fake machine.
pub fn networking() -> MachineNetworking {
    MachineNetworking {
        public_ip: IpAddr::V4(Ipv4Addr::new(203, 0, 113, 10)),
        ssh_port: 22,
    }
}

/// Services over the given doubles with a short signal timeout.
pub fn state_services(
    channels: &ScriptedChannels,
    http: &RecordingHttp,
    signals: &Arc<SignalHub>,
) -> StateServices {
    StateServices {
        channels: Arc::new(channels.clone()),
        http: Arc::new(http.clone()),
        signals: Arc::clone(signals),
        limits: ExecutionLimits {
            command_timeout: Duration::from_secs(5),
            signal_timeout: Duration::from_millis(50),
        },
    }
}

/// Backend double that always succeeds and logs its calls.
#[derive(Clone, Default)]
pub struct FakeBackend {
    log: Arc<StdMutex<Vec<String>>>,
    create_delay: Option<Duration>,
}

impl FakeBackend {
    /// Backend whose creates take `delay` after logging.
    pub fn with_create_delay(delay: Duration) -> Self {
        Self {
            create_delay: Some(delay),
            ..Self::default()
        }
    }

    /// Calls made so far, in order.
    pub fn log(&self) -> Vec<String> {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn push(&self, entry: String) {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
    }
}

impl Backend for FakeBackend {
    type Error = ProvisionError;

    fn create<'a>(
        &'a self,
        request: &'a MachineRequest,
    ) -> BackendFuture<'a, MachineHandle, Self::Error> {
        self.push(format!("create {}", request.name));
        let delay = self.create_delay;
        Box::pin(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            Ok(MachineHandle {
                id: format!("srv-{}", request.name),
                zone: request.zone.clone(),
                name: request.name.clone(),
            })
        })
    }

    fn wait_for_ready<'a>(
        &'a self,
        _handle: &'a MachineHandle,
    ) -> BackendFuture<'a, MachineNetworking, Self::Error> {
        Box::pin(ready(Ok(networking())))
    }

    fn destroy(&self, handle: MachineHandle) -> BackendFuture<'_, (), Self::Error> {
        self.push(format!("destroy {}", handle.id));
        Box::pin(ready(Ok(())))
    }
}
