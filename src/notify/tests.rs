//! Unit tests for events and compensation.

use std::future::ready;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use super::*;
use crate::backend::MachineRequest;
use crate::error::ProvisionError;
use crate::store::{InstanceKind, MemoryInstanceStore};
use crate::test_helpers::{blueprint, instance, networking};

type Timeline = Arc<StdMutex<Vec<String>>>;

fn record(timeline: &Timeline, entry: String) {
    timeline
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .push(entry);
}

fn entries(timeline: &Timeline) -> Vec<String> {
    timeline
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

struct TimelineBackend {
    timeline: Timeline,
    destroy_fails: bool,
}

impl Backend for TimelineBackend {
    type Error = ProvisionError;

    fn create<'a>(
        &'a self,
        _request: &'a MachineRequest,
    ) -> BackendFuture<'a, MachineHandle, Self::Error> {
        Box::pin(ready(Err(ProvisionError::Provider {
            message: String::from("not used"),
        })))
    }

    fn wait_for_ready<'a>(
        &'a self,
        _handle: &'a MachineHandle,
    ) -> BackendFuture<'a, MachineNetworking, Self::Error> {
        Box::pin(ready(Ok(networking())))
    }

    fn destroy(&self, handle: MachineHandle) -> BackendFuture<'_, (), Self::Error> {
        record(&self.timeline, format!("destroy {}", handle.id));
        let result = if self.destroy_fails {
            Err(ProvisionError::Provider {
                message: String::from("api unavailable"),
            })
        } else {
            Ok(())
        };
        Box::pin(ready(result))
    }
}

struct TimelineNotifier {
    timeline: Timeline,
    fails: bool,
}

impl Notifier for TimelineNotifier {
    fn notify<'a>(&'a self, notification: &'a Notification) -> BackendFuture<'a, (), NotifyError> {
        record(
            &self.timeline,
            format!("notify {:?}: {}", notification.kind, notification.text),
        );
        let result = if self.fails {
            Err(NotifyError::Rejected(500))
        } else {
            Ok(())
        };
        Box::pin(ready(result))
    }
}

struct TimelineCommenter {
    timeline: Timeline,
}

impl PullRequestCommenter for TimelineCommenter {
    fn comment<'a>(
        &'a self,
        pull_request: &'a PullRequestRef,
        body: &'a str,
    ) -> BackendFuture<'a, (), NotifyError> {
        let first_line = body.lines().next().unwrap_or_default();
        record(&self.timeline, format!("comment {pull_request}: {first_line}"));
        Box::pin(ready(Ok(())))
    }
}

fn handle() -> MachineHandle {
    MachineHandle {
        id: String::from("srv-1"),
        zone: String::from("fr-par-1"),
        name: String::from("web-1"),
    }
}

fn failure() -> TerminalFailure {
    TerminalFailure {
        remote_output: Some(String::from("pull access denied for nginx")),
        diagnostic_files: vec![String::from("docker-compose.yml")],
        ..TerminalFailure::new("signal 'docker-compose' was not received within 900 seconds")
    }
}

struct Fixture {
    timeline: Timeline,
    store: MemoryInstanceStore,
    events: ProvisioningEvents<TimelineBackend>,
}

fn fixture(destroy_fails: bool, notify_fails: bool) -> Fixture {
    let timeline = Timeline::default();
    let store = MemoryInstanceStore::new();
    store.insert_instance(instance("web-1", InstanceKind::Compose));
    let backend = Arc::new(TimelineBackend {
        timeline: Arc::clone(&timeline),
        destroy_fails,
    });
    let events = ProvisioningEvents::new(Compensator::new(backend, Arc::new(store.clone())))
        .with_notifier(Arc::new(TimelineNotifier {
            timeline: Arc::clone(&timeline),
            fails: notify_fails,
        }))
        .with_commenter(Arc::new(TimelineCommenter {
            timeline: Arc::clone(&timeline),
        }));
    Fixture {
        timeline,
        store,
        events,
    }
}

#[tokio::test]
async fn failure_destroys_before_notifying_once() {
    let fixture = fixture(false, false);

    fixture
        .events
        .failed(&blueprint(), Some(handle()), &failure())
        .await;

    let timeline = entries(&fixture.timeline);
    let [destroy, notify] = timeline.as_slice() else {
        panic!("unexpected timeline {timeline:?}");
    };
    assert_eq!(destroy, "destroy srv-1");
    assert!(notify.starts_with("notify Failed: Provisioning web-1 failed"), "{notify}");
    assert!(notify.contains("pull access denied for nginx"), "{notify}");
    assert!(notify.contains("- docker-compose.yml"), "{notify}");
    assert_eq!(fixture.store.instance_count(), 0);
}

#[tokio::test]
async fn failed_destroy_still_deletes_and_notifies() {
    let fixture = fixture(true, true);

    fixture.events.failed(&blueprint(), Some(handle()), &failure()).await;

    let timeline = entries(&fixture.timeline);
    assert_eq!(timeline.len(), 2, "{timeline:?}");
    assert_eq!(fixture.store.instance_count(), 0);
}

#[tokio::test]
async fn failure_before_creation_skips_destroy() {
    let fixture = fixture(false, false);

    fixture.events.failed(&blueprint(), None, &failure()).await;

    let timeline = entries(&fixture.timeline);
    assert!(timeline.iter().all(|entry| !entry.starts_with("destroy")));
    assert_eq!(timeline.len(), 1);
}

#[tokio::test]
async fn completion_announces_ports_and_comments_on_pull_request() {
    let fixture = fixture(false, false);
    let linked = blueprint()
        .with_pull_request(Some(PullRequestRef {
            repository: String::from("acme/shop"),
            number: 42,
        }))
        .with_hostname(Some(String::from("pr-42.preview.test")));

    fixture.events.started(&linked).await;
    fixture.events.completed(&linked, networking()).await;

    let timeline = entries(&fixture.timeline);
    let [started, ready_notice, ready_comment] = timeline.as_slice() else {
        panic!("unexpected timeline {timeline:?}");
    };
    assert_eq!(started, "comment acme/shop#42: Provisioning web-1 on plan 2gb.");
    assert!(ready_notice.contains("8080/tcp"), "{ready_notice}");
    assert!(ready_notice.contains("22/tcp"), "{ready_notice}");
    assert!(ready_notice.contains("DNS: pr-42.preview.test"), "{ready_notice}");
    assert!(ready_comment.starts_with("comment acme/shop#42: web-1 is ready at 203.0.113.10"));
}

#[test]
fn failure_text_without_remote_output_is_one_line() {
    let text = render_failure("web-1", &TerminalFailure::new("provider error: quota"));
    assert_eq!(text, "Provisioning web-1 failed: provider error: quota");
}
