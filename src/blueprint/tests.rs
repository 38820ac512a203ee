//! Unit tests for blueprint assembly and deployment validation.

use camino::Utf8PathBuf;
use rstest::rstest;

use super::*;
use crate::store::InstanceKind;
use crate::test_helpers::{WEB_COMPOSE, blueprint, deployment, factory, instance};

#[test]
fn stage_groups_follow_the_pipeline() {
    let built = blueprint();

    let kinds: Vec<_> = built.stage_groups().map(|(kind, _)| kind).collect();

    assert_eq!(kinds, StageKind::PIPELINE);
    assert_eq!(built.root().title(), "web-1");
}

#[test]
fn machine_request_uses_the_plan_commercial_type() {
    let built = blueprint();

    let request = built.machine_request();

    assert_eq!(request.name, "web-1");
    assert_eq!(request.commercial_type, "DEV1-S");
    assert_eq!(built.plan().id, "2gb");
}

#[rstest]
#[case::compose(InstanceKind::Compose, &["22/tcp", "8080/tcp"])]
#[case::worker(
    InstanceKind::KubernetesWorker,
    &["22/tcp", "8080/tcp", "10250/tcp", "30000-32767/tcp"]
)]
fn firewall_ports_combine_kind_and_published_ports(
    #[case] kind: InstanceKind,
    #[case] expected: &[&str],
) {
    let built = factory()
        .create("2gb", instance("web-1", kind), deployment(WEB_COMPOSE))
        .expect("blueprint");

    let mut rules: Vec<String> = built.firewall_ports().iter().map(ToString::to_string).collect();
    let mut wanted: Vec<String> = expected.iter().map(|rule| (*rule).to_owned()).collect();
    rules.sort();
    wanted.sort();

    assert_eq!(rules, wanted);
}

#[test]
fn every_blueprint_gets_a_fresh_job() {
    assert_ne!(blueprint().job_id(), blueprint().job_id());
}

#[test]
fn unknown_plan_is_a_validation_error() {
    let err = factory()
        .create(
            "64gb",
            instance("web-1", InstanceKind::Compose),
            deployment(WEB_COMPOSE),
        )
        .expect_err("unknown plan");

    assert!(matches!(err, ProvisionError::Validation(ref message) if message.contains("64gb")));
}

#[test]
fn unregistered_stage_fails_creation() {
    let err = factory()
        .with_registry(StageRegistry::new())
        .create(
            "2gb",
            instance("web-1", InstanceKind::Compose),
            deployment(WEB_COMPOSE),
        )
        .expect_err("empty registry");

    assert!(matches!(err, ProvisionError::Validation(_)), "{err:?}");
}

#[test]
fn pull_request_and_hostname_are_carried() {
    let built = blueprint()
        .with_pull_request(Some(PullRequestRef {
            repository: String::from("acme/shop"),
            number: 3,
        }))
        .with_hostname(Some(String::from("pr-3.preview.test")));

    assert_eq!(built.pull_request().map(|pr| pr.number), Some(3));
    assert_eq!(built.hostname(), Some("pr-3.preview.test"));
}

#[rstest]
#[case::parent_dir("../etc/passwd")]
#[case::absolute("/etc/passwd")]
#[case::nested_escape("config/../../secret")]
fn deployment_rejects_escaping_paths(#[case] path: &str) {
    let files = vec![DeploymentFile {
        path: Utf8PathBuf::from(path),
        contents: String::from("x"),
    }];

    let err = Deployment::new(vec![WEB_COMPOSE.to_owned()], files, Vec::new())
        .expect_err("escaping path");

    assert!(matches!(err, ProvisionError::Validation(_)), "{err:?}");
}

#[rstest]
#[case::first("docker-compose.yml")]
#[case::current_dir("./docker-compose.yml")]
#[case::numbered("docker-compose.2.yml")]
fn deployment_rejects_files_named_like_compose_files(#[case] path: &str) {
    let files = vec![DeploymentFile {
        path: Utf8PathBuf::from(path),
        contents: String::from("services: {}"),
    }];

    let err = Deployment::new(vec![WEB_COMPOSE.to_owned()], files, Vec::new())
        .expect_err("reserved name");

    assert!(
        matches!(err, ProvisionError::Validation(ref message) if message.contains("reserved")),
        "{err:?}"
    );
}

#[rstest]
#[case::nested("config/docker-compose.yml")]
#[case::override_file("docker-compose.override.yml")]
#[case::yaml_extension("docker-compose.yaml")]
fn deployment_accepts_names_that_do_not_collide(#[case] path: &str) {
    let files = vec![DeploymentFile {
        path: Utf8PathBuf::from(path),
        contents: String::from("x"),
    }];

    assert!(Deployment::new(vec![WEB_COMPOSE.to_owned()], files, Vec::new()).is_ok());
}

#[test]
fn deployment_requires_complete_registry_credentials() {
    let auth = vec![DockerAuth {
        registry: String::from("ghcr.io"),
        username: String::new(),
        password: String::from("token"),
    }];

    let err = Deployment::new(vec![WEB_COMPOSE.to_owned()], Vec::new(), auth)
        .expect_err("missing username");

    assert!(matches!(err, ProvisionError::Validation(_)), "{err:?}");
}

#[test]
fn deployment_merges_ports_across_compose_files() {
    let second = "services:\n  api:\n    image: api\n    ports:\n      - \"9000:9000/udp\"\n";

    let merged = Deployment::new(
        vec![WEB_COMPOSE.to_owned(), second.to_owned()],
        Vec::new(),
        Vec::new(),
    )
    .expect("valid deployment");

    let rules: Vec<String> = merged.published_ports().iter().map(ToString::to_string).collect();
    assert_eq!(rules.len(), 2, "{rules:?}");
    assert!(rules.contains(&String::from("9000/udp")));
}

#[test]
fn docker_auth_debug_hides_the_password() {
    let auth = DockerAuth {
        registry: String::from("ghcr.io"),
        username: String::from("ci"),
        password: String::from("s3cret"),
    };

    assert!(!format!("{auth:?}").contains("s3cret"));
}
