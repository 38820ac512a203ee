//! Boot image resolution for the Scaleway backend.

use std::future::Future;

use scaleway_rs::{ScalewayImage, ScalewayListInstanceImagesBuilder};

use crate::backend::MachineRequest;

use super::super::{ScalewayBackend, ScalewayBackendError};

impl ScalewayBackend {
    pub(in crate::scaleway) async fn resolve_image_id(
        &self,
        request: &MachineRequest,
    ) -> Result<String, ScalewayBackendError> {
        let project_listing = || async move {
            let mut scoped = ScalewayListInstanceImagesBuilder::new(self.api.clone(), &request.zone)
                .public(true)
                .project(&request.project_id)
                .name(&request.image_label)
                .arch(&request.architecture);
            if let Some(org) = &request.organisation_id {
                scoped = scoped.organization(org);
            }
            scoped.run_async().await.map_err(ScalewayBackendError::from)
        };
        let public_listing = || async move {
            ScalewayListInstanceImagesBuilder::new(self.api.clone(), &request.zone)
                .public(true)
                .name(&request.image_label)
                .arch(&request.architecture)
                .run_async()
                .await
                .map_err(ScalewayBackendError::from)
        };
        resolve_with(request, project_listing, public_listing).await
    }
}

/// Prefers project-scoped images and falls back to the public catalogue.
pub(super) async fn resolve_with<FutA, FutB, FetchA, FetchB>(
    request: &MachineRequest,
    project_fetch: FetchA,
    public_fetch: FetchB,
) -> Result<String, ScalewayBackendError>
where
    FetchA: FnOnce() -> FutA,
    FetchB: FnOnce() -> FutB,
    FutA: Future<Output = Result<Vec<ScalewayImage>, ScalewayBackendError>>,
    FutB: Future<Output = Result<Vec<ScalewayImage>, ScalewayBackendError>>,
{
    let project_images = filter_images(project_fetch().await?, request);
    let candidates = if project_images.is_empty() {
        filter_images(public_fetch().await?, request)
    } else {
        project_images
    };
    select_newest(candidates, request)
}

pub(super) fn filter_images(images: Vec<ScalewayImage>, request: &MachineRequest) -> Vec<ScalewayImage> {
    images
        .into_iter()
        .filter(|image| image.arch == request.architecture && image.state == "available")
        .collect()
}

pub(super) fn select_newest(
    candidates: Vec<ScalewayImage>,
    request: &MachineRequest,
) -> Result<String, ScalewayBackendError> {
    candidates
        .into_iter()
        .max_by(|lhs, rhs| lhs.creation_date.cmp(&rhs.creation_date))
        .map(|image| image.id)
        .ok_or_else(|| ScalewayBackendError::ImageNotFound {
            label: request.image_label.clone(),
            arch: request.architecture.clone(),
            zone: request.zone.clone(),
        })
}
