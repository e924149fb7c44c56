use crate::entity::CrudEntity;
use crate::error::CrudError;
use crate::page::{Page, Pageable};
use async_trait::async_trait;

/// Persistence seam consumed by the service. Reads are addressed by criteria, and
/// lookups by ID go through [`crate::criteria::id_criteria`].
///
/// Every batch write is atomic: either all items are stored or the store is unchanged.
/// Uniqueness ([`CrudEntity::unique_criteria`]) is enforced by the repository in the same
/// step as the write.
#[async_trait]
pub trait Repository<E: CrudEntity>: Send + Sync + 'static {
    /// Stores new entities, assigning an ID to those without one.
    async fn insert_many(&self, domains: Vec<E>) -> Result<Vec<E>, CrudError>;

    /// Replaces the stored entities with the same IDs.
    async fn update_many(&self, domains: Vec<E>) -> Result<Vec<E>, CrudError>;

    /// Removes the entities with the given IDs and returns them.
    async fn remove_many(&self, ids: Vec<E::Id>) -> Result<Vec<E>, CrudError>;

    async fn get_one(&self, criteria: E::Criteria) -> Result<Option<E>, CrudError>;

    async fn get_many(&self, criteria: E::Criteria) -> Result<Vec<E>, CrudError>;

    async fn get_page(
        &self,
        criteria: E::Criteria,
        pageable: Pageable,
    ) -> Result<Page<E>, CrudError>;

    async fn count(&self, criteria: E::Criteria) -> Result<u64, CrudError>;

    async fn insert_one(&self, domain: E) -> Result<E, CrudError> {
        single(self.insert_many(vec![domain]).await?)
    }

    async fn update_one(&self, domain: E) -> Result<E, CrudError> {
        single(self.update_many(vec![domain]).await?)
    }

    async fn remove_one(&self, id: E::Id) -> Result<E, CrudError> {
        single(self.remove_many(vec![id]).await?)
    }
}

fn single<E: CrudEntity>(written: Vec<E>) -> Result<E, CrudError> {
    written
        .into_iter()
        .next()
        .ok_or_else(|| CrudError::DomainNotFound(format!("{} write returned nothing", E::DOMAIN_NAME)))
}
