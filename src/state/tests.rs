//! Unit tests for provisioning states.

use std::future::ready;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use rstest::{fixture, rstest};

use super::*;
use crate::backend::{Backend, BackendFuture, MachineHandle, MachineNetworking, MachineRequest};
use crate::instruction::{HttpCall, HttpVerb, Instruction, InstructionCollector, InstructionGroup};
use crate::job::JobId;
use crate::signal::SignalReport;
use crate::stage::StageKind;
use crate::store::{InstanceKind, InstanceStore, MemoryInstanceStore};
use crate::test_helpers::{
    RecordingHttp, ScriptedChannels, exit, instance, networking, state_services, template,
};

struct Harness {
    channels: ScriptedChannels,
    http: RecordingHttp,
    signals: Arc<SignalHub>,
    job_id: JobId,
}

impl Harness {
    fn services(&self) -> StateServices {
        state_services(&self.channels, &self.http, &self.signals)
    }

    fn state(&self, group: &InstructionGroup) -> SshStageState {
        SshStageState::new(
            StageKind::InstallSoftware,
            self.job_id,
            group,
            networking(),
            self.services(),
        )
    }
}

#[fixture]
fn harness() -> Harness {
    Harness {
        channels: ScriptedChannels::default(),
        http: RecordingHttp::default(),
        signals: Arc::new(SignalHub::new()),
        job_id: JobId::new(),
    }
}

fn group_of(instructions: Vec<Instruction>) -> InstructionGroup {
    let mut collector = InstructionCollector::new("root");
    {
        let mut work = collector.collect_group("Work");
        for instruction in instructions {
            work.collect_instruction(instruction);
        }
    }
    collector.into_group()
}

#[rstest]
#[tokio::test]
async fn runs_instructions_in_order_and_closes_on_dispose(harness: Harness) {
    let group = group_of(vec![Instruction::shell("first"), Instruction::shell("second")]);
    let mut state = harness.state(&group);

    state.initialize().await.expect("connect");
    assert_eq!(state.update().await, StateOutcome::Succeeded);
    state.dispose();
    state.dispose();

    assert_eq!(harness.channels.executed(), ["first", "second"]);
    assert_eq!(harness.channels.closes(), 1);
    assert_eq!(state.description(), "Installing software");
}

#[rstest]
#[tokio::test]
async fn retryable_failure_resumes_at_the_failing_instruction(harness: Harness) {
    harness.channels.script("flaky", vec![exit(1, "temporary failure")]);
    let group = group_of(vec![
        Instruction::shell("setup"),
        Instruction::shell("flaky step").allow_retries(),
        Instruction::shell("finish"),
    ]);
    let mut state = harness.state(&group);
    state.initialize().await.expect("connect");

    let outcome = state.update().await;
    let StateOutcome::Retry { error, step } = outcome else {
        panic!("expected retry, got {outcome:?}");
    };
    assert_eq!(step, 1);
    assert!(matches!(
        error,
        ProvisionError::RemoteCommand { ref group, ref output, .. }
            if group == "Work" && output.as_deref() == Some("temporary failure")
    ));
    assert_eq!(state.completed(), 1);

    assert_eq!(state.update().await, StateOutcome::Succeeded);
    assert_eq!(
        harness.channels.executed(),
        ["setup", "flaky step", "flaky step", "finish"]
    );
}

#[rstest]
#[tokio::test]
async fn failure_without_retry_policy_is_terminal(harness: Harness) {
    harness.channels.script("apt-get", vec![exit(100, "E: broken packages")]);
    let group = group_of(vec![Instruction::shell("apt-get install -y curl")]);
    let mut state = harness.state(&group);
    state.initialize().await.expect("connect");

    let outcome = state.update().await;
    assert!(
        matches!(outcome, StateOutcome::Failed(ProvisionError::RemoteCommand { ref message, .. }) if message == "exited with status 100"),
        "{outcome:?}"
    );
}

#[rstest]
#[tokio::test]
async fn early_signal_is_consumed_and_failure_is_terminal(harness: Harness) {
    harness.signals.open_job(harness.job_id);
    let accepted = harness.signals.deliver(
        harness.job_id,
        "docker-compose",
        SignalReport::from_callback(false, "pull access denied\n--- files ---\ndocker-compose.yml\n"),
    );
    assert!(accepted);
    let group = group_of(vec![Instruction::signal("docker-compose")]);
    let mut state = harness.state(&group);
    state.initialize().await.expect("connect");

    let outcome = state.update().await;
    let StateOutcome::Failed(ProvisionError::RemoteCommand { output, files, .. }) = outcome else {
        panic!("expected terminal remote failure, got {outcome:?}");
    };
    assert_eq!(output.as_deref(), Some("pull access denied"));
    assert_eq!(files, ["docker-compose.yml"]);
}

#[rstest]
#[tokio::test]
async fn missing_signal_times_out(harness: Harness) {
    let group = group_of(vec![Instruction::signal("open-firewall")]);
    let mut state = harness.state(&group);
    state.initialize().await.expect("connect");

    let outcome = state.update().await;
    assert!(
        matches!(outcome, StateOutcome::Failed(ProvisionError::SignalTimeout { ref signal, .. }) if signal == "open-firewall"),
        "{outcome:?}"
    );
}

#[rstest]
#[tokio::test]
async fn connection_failures_surface_as_retryable_errors(harness: Harness) {
    harness.channels.fail_connects(1);
    let group = group_of(vec![Instruction::shell("true")]);
    let mut state = harness.state(&group);

    let err = state.initialize().await.expect_err("first connect fails");
    assert!(err.is_retryable());
    state.initialize().await.expect("second connect");
    state.initialize().await.expect("already connected");
    assert_eq!(harness.channels.connects(), 2);
}

#[rstest]
#[tokio::test]
async fn rejected_http_call_is_retryable_under_policy(harness: Harness) {
    harness.http.respond_with(&[503]);
    let call = HttpCall {
        verb: HttpVerb::Post,
        url: String::from("http://registry.test/instances"),
        headers: Vec::new(),
        body: None,
    };
    let group = group_of(vec![Instruction::http(call).allow_retries()]);
    let mut state = harness.state(&group);
    state.initialize().await.expect("connect");

    let outcome = state.update().await;
    assert!(matches!(outcome, StateOutcome::Retry { step: 0, .. }), "{outcome:?}");
    assert_eq!(state.update().await, StateOutcome::Succeeded);
    assert_eq!(harness.http.calls().len(), 2);
}

#[rstest]
#[tokio::test]
async fn complete_setup_marks_the_instance_provisioned(harness: Harness) {
    let store = MemoryInstanceStore::new();
    store.insert_instance(instance("web-1", InstanceKind::Compose));
    let group = group_of(vec![Instruction::shell("docker compose ps")]);
    let mut state = CompleteInstanceSetupState::new(
        harness.state(&group),
        Arc::new(store.clone()),
        "web-1",
    );

    state.initialize().await.expect("connect");
    assert_eq!(state.update().await, StateOutcome::Succeeded);
    state.dispose();

    let row = store.find_instance("web-1").await.expect("lookup");
    assert!(row.is_some_and(|found| found.is_provisioned));
    assert_eq!(harness.channels.closes(), 1);
}

#[rstest]
#[tokio::test]
async fn complete_setup_fails_when_the_row_vanished(harness: Harness) {
    let group = group_of(Vec::new());
    let mut state = CompleteInstanceSetupState::new(
        harness.state(&group),
        Arc::new(MemoryInstanceStore::new()),
        "web-1",
    );
    state.initialize().await.expect("connect");

    let outcome = state.update().await;
    assert!(
        matches!(outcome, StateOutcome::Failed(ProvisionError::NotFound { .. })),
        "{outcome:?}"
    );
}

#[derive(Default)]
struct FlakyBackend {
    creates: StdMutex<u32>,
    ready_failures: StdMutex<u32>,
    create_failure: Option<ProvisionError>,
}

impl Backend for FlakyBackend {
    type Error = ProvisionError;

    fn create<'a>(
        &'a self,
        request: &'a MachineRequest,
    ) -> BackendFuture<'a, MachineHandle, Self::Error> {
        *self.creates.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        let result = self.create_failure.clone().map_or_else(
            || {
                Ok(MachineHandle {
                    id: String::from("srv-1"),
                    zone: request.zone.clone(),
                    name: request.name.clone(),
                })
            },
            Err,
        );
        Box::pin(ready(result))
    }

    fn wait_for_ready<'a>(
        &'a self,
        _handle: &'a MachineHandle,
    ) -> BackendFuture<'a, MachineNetworking, Self::Error> {
        let mut failures = self
            .ready_failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let result = if *failures > 0 {
            *failures -= 1;
            Err(ProvisionError::Connection {
                host: String::from("203.0.113.10"),
                message: String::from("ssh not ready"),
            })
        } else {
            Ok(networking())
        };
        Box::pin(ready(result))
    }

    fn destroy(&self, _handle: MachineHandle) -> BackendFuture<'_, (), Self::Error> {
        Box::pin(ready(Ok(())))
    }
}

fn machine_request() -> MachineRequest {
    template().request_for("web-1", "DEV1-S").expect("request")
}

#[tokio::test]
async fn create_machine_retries_readiness_without_recreating() {
    let backend = Arc::new(FlakyBackend {
        ready_failures: StdMutex::new(1),
        ..FlakyBackend::default()
    });
    let mut state = CreateMachineState::new(Arc::clone(&backend), machine_request());

    state.initialize().await.expect("machine created");
    assert_eq!(state.handle().map(|handle| handle.id.as_str()), Some("srv-1"));
    let outcome = state.update().await;
    assert!(matches!(outcome, StateOutcome::Retry { step: 1, .. }), "{outcome:?}");
    assert_eq!(state.handle().map(|handle| handle.id.as_str()), Some("srv-1"));
    assert!(state.networking().is_none());

    assert_eq!(state.update().await, StateOutcome::Succeeded);
    assert_eq!(state.networking(), Some(networking()));
    state.initialize().await.expect("already created");
    assert_eq!(
        *backend.creates.lock().unwrap_or_else(PoisonError::into_inner),
        1
    );
}

#[rstest]
#[case::provider(ProvisionError::Provider { message: String::from("quota exceeded") })]
#[case::connection(ProvisionError::Connection {
    host: String::from("api.scaleway.com"),
    message: String::from("connection reset"),
})]
#[tokio::test]
async fn create_machine_failure_is_terminal(#[case] failure: ProvisionError) {
    let backend = Arc::new(FlakyBackend {
        create_failure: Some(failure),
        ..FlakyBackend::default()
    });
    let mut state = CreateMachineState::new(backend, machine_request());

    let err = state.initialize().await.expect_err("create fails");
    assert!(!err.is_retryable(), "{err:?}");
    assert!(matches!(err, ProvisionError::Provider { .. }), "{err:?}");
    assert!(state.handle().is_none());
    let outcome = state.update().await;
    assert!(
        matches!(outcome, StateOutcome::Failed(ProvisionError::Provider { ref message }) if message == "machine was not created"),
        "{outcome:?}"
    );
}

#[test]
fn phases_render_lower_case() {
    assert_eq!(StatePhase::Retrying.to_string(), "retrying");
    assert_eq!(StatePhase::Created.as_str(), "created");
}
