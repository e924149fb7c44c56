use crate::entity::CrudEntity;
use crate::error::CrudError;
use crate::message::{RepositoryRequest, Response};
use crate::page::{Page, Pageable};
use crate::repository::Repository;
use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

/// Handle to a running [`crate::actor::RepositoryActor`].
///
/// It holds only a sender, so cloning is cheap and clones can be shared across tasks. The
/// actor stops once every clone is dropped.
pub struct RepositoryClient<E: CrudEntity> {
    sender: mpsc::Sender<RepositoryRequest<E>>,
}

impl<E: CrudEntity> Clone for RepositoryClient<E> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<E: CrudEntity> RepositoryClient<E> {
    pub fn new(sender: mpsc::Sender<RepositoryRequest<E>>) -> Self {
        Self { sender }
    }

    async fn call<T>(
        &self,
        request: impl FnOnce(Response<T>) -> RepositoryRequest<E>,
    ) -> Result<T, CrudError> {
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(request(respond_to))
            .await
            .map_err(|_| CrudError::RepositoryClosed)?;
        response.await.map_err(|_| CrudError::RepositoryDropped)?
    }
}

#[async_trait]
impl<E: CrudEntity> Repository<E> for RepositoryClient<E> {
    async fn insert_many(&self, domains: Vec<E>) -> Result<Vec<E>, CrudError> {
        self.call(|respond_to| RepositoryRequest::Insert {
            domains,
            respond_to,
        })
        .await
    }

    async fn update_many(&self, domains: Vec<E>) -> Result<Vec<E>, CrudError> {
        self.call(|respond_to| RepositoryRequest::Update {
            domains,
            respond_to,
        })
        .await
    }

    async fn remove_many(&self, ids: Vec<E::Id>) -> Result<Vec<E>, CrudError> {
        self.call(|respond_to| RepositoryRequest::Remove { ids, respond_to })
            .await
    }

    async fn get_one(&self, criteria: E::Criteria) -> Result<Option<E>, CrudError> {
        self.call(|respond_to| RepositoryRequest::GetOne {
            criteria,
            respond_to,
        })
        .await
    }

    async fn get_many(&self, criteria: E::Criteria) -> Result<Vec<E>, CrudError> {
        self.call(|respond_to| RepositoryRequest::GetMany {
            criteria,
            respond_to,
        })
        .await
    }

    async fn get_page(
        &self,
        criteria: E::Criteria,
        pageable: Pageable,
    ) -> Result<Page<E>, CrudError> {
        self.call(|respond_to| RepositoryRequest::GetPage {
            criteria,
            pageable,
            respond_to,
        })
        .await
    }

    async fn count(&self, criteria: E::Criteria) -> Result<u64, CrudError> {
        self.call(|respond_to| RepositoryRequest::Count {
            criteria,
            respond_to,
        })
        .await
    }
}
