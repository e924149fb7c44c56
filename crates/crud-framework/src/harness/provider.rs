use crate::entity::{CrudEntity, Dto};
use crate::error::CrudError;
use crate::service::CrudService;
use crate::user::User;
use async_trait::async_trait;
use json_patch::Patch;
use std::sync::Arc;

/// Test data of one entity type plus direct access to its service.
///
/// The arrange and assert halves of every resource scenario go through the provider, so
/// they never depend on the transport under test.
#[async_trait]
pub trait DataProvider<E: CrudEntity>: Send + Sync {
    fn service(&self) -> Arc<dyn CrudService<E>>;

    fn sample_user(&self) -> Option<User> {
        None
    }

    /// A DTO with every field populated.
    fn new_dto(&self) -> E::Dto;

    /// A DTO with only the required fields populated.
    fn mandatory_new_dto(&self) -> E::Dto;

    /// Changes fields of a saved DTO in place.
    fn update_dto(&self, dto: &mut E::Dto);

    fn mandatory_update_dto(&self, dto: &mut E::Dto) {
        self.update_dto(dto)
    }

    /// A patch that performs the same change as [`DataProvider::update_dto`].
    fn json_patch(&self) -> Patch;

    fn mandatory_json_patch(&self) -> Patch {
        self.json_patch()
    }

    async fn cleanups(&self) -> Result<(), CrudError> {
        self.service().delete_all(self.sample_user()).await?;
        Ok(())
    }

    async fn count_db(&self) -> Result<u64, CrudError> {
        self.service().count_all(self.sample_user()).await
    }

    async fn save_new(&self) -> Result<E::Dto, CrudError> {
        self.service().save(self.new_dto(), self.sample_user()).await
    }

    async fn save_new_mandatory(&self) -> Result<E::Dto, CrudError> {
        self.service()
            .save(self.mandatory_new_dto(), self.sample_user())
            .await
    }

    /// `before` is the DTO that was sent, `after` the one that came back.
    fn assert_save(&self, before: &E::Dto, after: &E::Dto) {
        let mut expected = before.clone();
        if let Some(id) = after.id() {
            expected.set_id(id.clone());
        }
        assert_eq!(&expected, after, "saved dto differs from the one sent");
    }

    /// `before` already carries the intended change.
    fn assert_update(&self, before: &E::Dto, after: &E::Dto) {
        assert_eq!(before, after, "updated dto differs from the intended change");
    }

    fn assert_get(&self, before: &E::Dto, after: &E::Dto) {
        assert_eq!(before, after, "fetched dto differs from the stored one");
    }
}
