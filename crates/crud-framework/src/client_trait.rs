//! # CrudClient Trait
//!
//! One calling surface for every transport. Implementors only provide [`CrudClient::request`],
//! which ships a [`CrudRequest`] over their transport; the eighteen typed operations are
//! provided on top of it, so tests and callers never care which transport they talk to.
use crate::dispatch::{invoke, CrudRequest, CrudResponse, Transport};
use crate::entity::CrudEntity;
use crate::error::CrudError;
use crate::page::{Page, Pageable};
use crate::service::CrudService;
use crate::user::User;
use async_trait::async_trait;
use json_patch::Patch;
use std::sync::Arc;

/// Typed CRUD operations over some transport.
///
/// # Example
///
/// ```rust,ignore
/// async fn rename(client: &dyn CrudClient<Sample>, id: u64) -> Result<SampleDto, CrudError> {
///     let mut dto = client.get_by_id(id, None).await?;
///     dto.name = "renamed".into();
///     client.update_by_id(id, dto, None).await
/// }
/// ```
#[async_trait]
pub trait CrudClient<E: CrudEntity>: Send + Sync {
    fn transport(&self) -> Transport;

    /// Sends one request and waits for its result.
    async fn request(
        &self,
        request: CrudRequest<E>,
        user: Option<User>,
    ) -> Result<CrudResponse<E>, CrudError>;

    #[tracing::instrument(skip(self, user), fields(domain = E::DOMAIN_NAME))]
    async fn save(&self, dto: E::Dto, user: Option<User>) -> Result<E::Dto, CrudError> {
        tracing::debug!("Sending request");
        self.request(CrudRequest::Save { dto }, user).await?.into_dto()
    }

    #[tracing::instrument(skip(self, user), fields(domain = E::DOMAIN_NAME))]
    async fn save_many(
        &self,
        dtos: Vec<E::Dto>,
        user: Option<User>,
    ) -> Result<Vec<E::Dto>, CrudError> {
        tracing::debug!("Sending request");
        self.request(CrudRequest::SaveMany { dtos }, user)
            .await?
            .into_dtos()
    }

    #[tracing::instrument(skip(self, user), fields(domain = E::DOMAIN_NAME))]
    async fn update(&self, dto: E::Dto, user: Option<User>) -> Result<E::Dto, CrudError> {
        tracing::debug!("Sending request");
        self.request(CrudRequest::Update { dto }, user)
            .await?
            .into_dto()
    }

    #[tracing::instrument(skip(self, user), fields(domain = E::DOMAIN_NAME))]
    async fn update_by_id(
        &self,
        id: E::Id,
        dto: E::Dto,
        user: Option<User>,
    ) -> Result<E::Dto, CrudError> {
        tracing::debug!("Sending request");
        self.request(CrudRequest::UpdateById { id, dto }, user)
            .await?
            .into_dto()
    }

    #[tracing::instrument(skip(self, user), fields(domain = E::DOMAIN_NAME))]
    async fn update_many(
        &self,
        dtos: Vec<E::Dto>,
        user: Option<User>,
    ) -> Result<Vec<E::Dto>, CrudError> {
        tracing::debug!("Sending request");
        self.request(CrudRequest::UpdateMany { dtos }, user)
            .await?
            .into_dtos()
    }

    #[tracing::instrument(skip(self, user), fields(domain = E::DOMAIN_NAME))]
    async fn delete(&self, criteria: E::Criteria, user: Option<User>) -> Result<E::Id, CrudError> {
        tracing::debug!("Sending request");
        self.request(CrudRequest::Delete { criteria }, user)
            .await?
            .into_id()
    }

    #[tracing::instrument(skip(self, user), fields(domain = E::DOMAIN_NAME))]
    async fn delete_by_id(&self, id: E::Id, user: Option<User>) -> Result<E::Id, CrudError> {
        tracing::debug!("Sending request");
        self.request(CrudRequest::DeleteById { id }, user)
            .await?
            .into_id()
    }

    #[tracing::instrument(skip(self, user), fields(domain = E::DOMAIN_NAME))]
    async fn delete_many(
        &self,
        criteria: E::Criteria,
        user: Option<User>,
    ) -> Result<Vec<E::Id>, CrudError> {
        tracing::debug!("Sending request");
        self.request(CrudRequest::DeleteMany { criteria }, user)
            .await?
            .into_ids()
    }

    #[tracing::instrument(skip(self, user), fields(domain = E::DOMAIN_NAME))]
    async fn delete_all(&self, user: Option<User>) -> Result<Vec<E::Id>, CrudError> {
        tracing::debug!("Sending request");
        self.request(CrudRequest::DeleteAll, user).await?.into_ids()
    }

    #[tracing::instrument(skip(self, user), fields(domain = E::DOMAIN_NAME))]
    async fn edit(
        &self,
        criteria: E::Criteria,
        patch: Patch,
        user: Option<User>,
    ) -> Result<E::Dto, CrudError> {
        tracing::debug!("Sending request");
        self.request(CrudRequest::Edit { criteria, patch }, user)
            .await?
            .into_dto()
    }

    #[tracing::instrument(skip(self, user), fields(domain = E::DOMAIN_NAME))]
    async fn edit_by_id(
        &self,
        id: E::Id,
        patch: Patch,
        user: Option<User>,
    ) -> Result<E::Dto, CrudError> {
        tracing::debug!("Sending request");
        self.request(CrudRequest::EditById { id, patch }, user)
            .await?
            .into_dto()
    }

    #[tracing::instrument(skip(self, user), fields(domain = E::DOMAIN_NAME))]
    async fn edit_many(
        &self,
        criteria: E::Criteria,
        patch: Patch,
        user: Option<User>,
    ) -> Result<Vec<E::Dto>, CrudError> {
        tracing::debug!("Sending request");
        self.request(CrudRequest::EditMany { criteria, patch }, user)
            .await?
            .into_dtos()
    }

    #[tracing::instrument(skip(self, user), fields(domain = E::DOMAIN_NAME))]
    async fn get_one(&self, criteria: E::Criteria, user: Option<User>) -> Result<E::Dto, CrudError> {
        tracing::debug!("Sending request");
        self.request(CrudRequest::GetOne { criteria }, user)
            .await?
            .into_dto()
    }

    #[tracing::instrument(skip(self, user), fields(domain = E::DOMAIN_NAME))]
    async fn get_by_id(&self, id: E::Id, user: Option<User>) -> Result<E::Dto, CrudError> {
        tracing::debug!("Sending request");
        self.request(CrudRequest::GetById { id }, user)
            .await?
            .into_dto()
    }

    #[tracing::instrument(skip(self, user), fields(domain = E::DOMAIN_NAME))]
    async fn get_many(
        &self,
        criteria: E::Criteria,
        user: Option<User>,
    ) -> Result<Vec<E::Dto>, CrudError> {
        tracing::debug!("Sending request");
        self.request(CrudRequest::GetMany { criteria }, user)
            .await?
            .into_dtos()
    }

    #[tracing::instrument(skip(self, user), fields(domain = E::DOMAIN_NAME))]
    async fn get_page(
        &self,
        criteria: E::Criteria,
        pageable: Pageable,
        user: Option<User>,
    ) -> Result<Page<E::Dto>, CrudError> {
        tracing::debug!("Sending request");
        self.request(CrudRequest::GetPage { criteria, pageable }, user)
            .await?
            .into_page()
    }

    #[tracing::instrument(skip(self, user), fields(domain = E::DOMAIN_NAME))]
    async fn count(&self, criteria: E::Criteria, user: Option<User>) -> Result<u64, CrudError> {
        tracing::debug!("Sending request");
        self.request(CrudRequest::Count { criteria }, user)
            .await?
            .into_count()
    }

    #[tracing::instrument(skip(self, user), fields(domain = E::DOMAIN_NAME))]
    async fn count_all(&self, user: Option<User>) -> Result<u64, CrudError> {
        tracing::debug!("Sending request");
        self.request(CrudRequest::CountAll, user).await?.into_count()
    }
}

/// Calls the service in-process, bypassing every transport.
pub struct ServiceClient<E: CrudEntity> {
    service: Arc<dyn CrudService<E>>,
}

impl<E: CrudEntity> ServiceClient<E> {
    pub fn new(service: Arc<dyn CrudService<E>>) -> Self {
        Self { service }
    }
}

impl<E: CrudEntity> Clone for ServiceClient<E> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
        }
    }
}

#[async_trait]
impl<E: CrudEntity> CrudClient<E> for ServiceClient<E> {
    fn transport(&self) -> Transport {
        Transport::Direct
    }

    async fn request(
        &self,
        request: CrudRequest<E>,
        user: Option<User>,
    ) -> Result<CrudResponse<E>, CrudError> {
        invoke(self.service.as_ref(), request, user).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockService;
    use crate::operation::Operation;
    use crate::testing::{Note, NoteDto};

    #[tokio::test]
    async fn provided_methods_unwrap_the_matching_result() {
        let mock = MockService::<Note>::new();
        mock.expect(Operation::CountAll)
            .return_ok(CrudResponse::Count(3));
        mock.expect(Operation::Save)
            .return_ok(CrudResponse::Dto(NoteDto::new("a")));
        let client = ServiceClient::new(mock.service());

        assert_eq!(client.count_all(None).await.unwrap(), 3);
        assert_eq!(client.save(NoteDto::new("a"), None).await.unwrap().title, "a");
        mock.verify();
    }

    #[tokio::test]
    async fn mismatched_results_are_transport_errors() {
        let mock = MockService::<Note>::new();
        mock.expect(Operation::GetById)
            .return_ok(CrudResponse::Count(1));
        let client = ServiceClient::new(mock.service());

        let result = client.get_by_id(1, None).await;
        assert!(matches!(result, Err(CrudError::Transport(_))));
    }
}
