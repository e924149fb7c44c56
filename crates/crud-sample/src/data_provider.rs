use crate::model::{Sample, SampleDto};
use crud_framework::harness::DataProvider;
use crud_framework::{CrudService, User};
use json_patch::Patch;
use serde_json::json;
use std::sync::Arc;

pub const NEW_NAME: &str = "sample-new";
pub const MANDATORY_NAME: &str = "sample-mandatory";
pub const UPDATED_DESCRIPTION: &str = "updated description";
pub const UPDATED_TAG: &str = "updated";

/// Test data for [`Sample`], backed by the service of a running system.
#[derive(Clone)]
pub struct SampleDataProvider {
    service: Arc<dyn CrudService<Sample>>,
    user: Option<User>,
}

impl SampleDataProvider {
    pub fn new(service: Arc<dyn CrudService<Sample>>) -> Self {
        Self {
            service,
            user: None,
        }
    }

    /// Acts as `user` when arranging data through the service.
    pub fn with_user(mut self, user: User) -> Self {
        self.user = Some(user);
        self
    }
}

impl DataProvider<Sample> for SampleDataProvider {
    fn service(&self) -> Arc<dyn CrudService<Sample>> {
        Arc::clone(&self.service)
    }

    fn sample_user(&self) -> Option<User> {
        self.user.clone()
    }

    fn new_dto(&self) -> SampleDto {
        SampleDto::new(NEW_NAME)
            .with_description("a fully populated sample")
            .with_tags(["alpha", "beta"])
    }

    fn mandatory_new_dto(&self) -> SampleDto {
        SampleDto::new(MANDATORY_NAME)
    }

    fn update_dto(&self, dto: &mut SampleDto) {
        dto.description = Some(UPDATED_DESCRIPTION.to_string());
        dto.tags.push(UPDATED_TAG.to_string());
    }

    // `add` on an object member replaces it, so this works for null descriptions too.
    fn json_patch(&self) -> Patch {
        serde_json::from_value(json!([
            {"op": "add", "path": "/description", "value": UPDATED_DESCRIPTION},
            {"op": "add", "path": "/tags/-", "value": UPDATED_TAG},
        ]))
        .unwrap_or_else(|_| Patch(Vec::new()))
    }
}
