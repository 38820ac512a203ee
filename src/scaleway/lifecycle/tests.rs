//! Unit tests for Scaleway lifecycle helpers.

use std::cell::Cell;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::rc::Rc;

use rstest::rstest;
use scaleway_rs::ScalewayImage;

use super::image::{filter_images, resolve_with, select_newest};
use super::{PowerOn, ServerSnapshot, ServerState};
use crate::backend::MachineRequest;
use crate::scaleway::ScalewayBackendError;

fn snapshot(state: &str, allowed: &[&str], public_ip: Option<&str>) -> ServerSnapshot {
    ServerSnapshot {
        id: String::from("server-1"),
        state: ServerState::from(state),
        allowed_actions: allowed.iter().map(|action| (*action).to_owned()).collect(),
        public_ip: public_ip.map(str::to_owned),
    }
}

fn image(id: &str, arch: &str, state: &str, creation_date: &str) -> ScalewayImage {
    ScalewayImage {
        id: id.to_owned(),
        name: String::new(),
        arch: arch.to_owned(),
        creation_date: creation_date.to_owned(),
        modification_date: String::new(),
        from_server: None,
        organization: String::new(),
        public: true,
        state: state.to_owned(),
        project: String::new(),
        tags: vec![],
        zone: String::new(),
        root_volume: scaleway_rs::ScalewayImageRootVolume {
            id: String::new(),
            name: String::new(),
            size: 0,
            volume_type: String::new(),
        },
        default_bootscript: None,
        extra_volumes: scaleway_rs::ScalewayImageExtraVolumes {
            volumes: HashMap::new(),
        },
    }
}

fn request() -> MachineRequest {
    MachineRequest::builder()
        .name("web-1")
        .image_label("Ubuntu 24.04 Noble Numbat")
        .commercial_type("DEV1-S")
        .zone("fr-par-1")
        .project_id("project")
        .architecture("x86_64")
        .build()
        .expect("valid request")
}

#[rstest]
#[case("running", &[], PowerOn::AlreadyRunning)]
#[case("stopped", &["poweron", "backup"], PowerOn::Required)]
#[case("stopped", &[], PowerOn::NotAllowed)]
#[case("locked", &["terminate"], PowerOn::NotAllowed)]
fn decides_whether_to_power_on(
    #[case] state: &str,
    #[case] allowed: &[&str],
    #[case] expected: PowerOn,
) {
    assert_eq!(snapshot(state, allowed, None).power_on(), expected);
}

#[rstest]
#[case("running", Some("51.15.1.2"), Some(IpAddr::V4(Ipv4Addr::new(51, 15, 1, 2))))]
#[case("running", None, None)]
#[case("running", Some("not-an-ip"), None)]
#[case("starting", Some("51.15.1.2"), None)]
fn reports_ready_address_only_when_running(
    #[case] state: &str,
    #[case] public_ip: Option<&str>,
    #[case] expected: Option<IpAddr>,
) {
    assert_eq!(snapshot(state, &[], public_ip).ready_address(), expected);
}

#[test]
fn filters_wrong_arch_or_state() {
    let images = vec![
        image("keep", "x86_64", "available", "2025-01-01T00:00:00Z"),
        image("wrong-arch", "arm64", "available", "2025-01-01T00:00:00Z"),
        image("wrong-state", "x86_64", "failed", "2025-01-01T00:00:00Z"),
    ];
    let filtered = filter_images(images, &request());
    assert_eq!(
        filtered.iter().map(|img| img.id.as_str()).collect::<Vec<_>>(),
        vec!["keep"]
    );
}

#[test]
fn selects_newest_image() {
    let images = vec![
        image("oldest", "x86_64", "available", "2024-12-01T00:00:00Z"),
        image("newest", "x86_64", "available", "2025-02-01T00:00:00Z"),
    ];
    assert_eq!(
        select_newest(images, &request()).expect("image selected"),
        "newest"
    );
}

#[test]
fn reports_missing_image() {
    let err = select_newest(Vec::new(), &request()).expect_err("no candidates");
    assert!(matches!(err, ScalewayBackendError::ImageNotFound { .. }));
}

#[tokio::test]
async fn prefers_project_images_over_public_catalogue() {
    let public_called = Rc::new(Cell::new(false));
    let flag = Rc::clone(&public_called);
    let id = resolve_with(
        &request(),
        || async { Ok(vec![image("project-img", "x86_64", "available", "2025-02-01")]) },
        move || {
            flag.set(true);
            async { Ok(vec![image("public-img", "x86_64", "available", "2025-03-01")]) }
        },
    )
    .await
    .expect("image resolved");

    assert_eq!(id, "project-img");
    assert!(!public_called.get(), "public catalogue should not be queried");
}

#[tokio::test]
async fn falls_back_when_project_images_are_unusable() {
    let id = resolve_with(
        &request(),
        || async { Ok(vec![image("project-arm", "arm64", "available", "2025-02-01")]) },
        || async { Ok(vec![image("public-img", "x86_64", "available", "2025-01-01")]) },
    )
    .await
    .expect("image resolved");
    assert_eq!(id, "public-img");
}
