//! # Mocks for unit tests
//!
//! Two levels are covered:
//!
//! | Mock | Replaces | Use it to test |
//! |------|----------|----------------|
//! | [`MockService`] | the whole [`CrudService`] | transports, dispatch, interceptors |
//! | [`create_mock_repository`] | the repository actor | service flows message by message |
//!
//! ## MockService
//!
//! Expectations are consumed in order. A call that does not match the next expectation
//! panics, and [`MockService::verify`] panics if expectations are left over.
//!
//! ```rust,ignore
//! let mock = MockService::<Sample>::new();
//! mock.expect(Operation::GetById).return_ok(CrudResponse::Dto(dto));
//! mock.expect(Operation::DeleteById).return_err(CrudError::DomainNotFound("7".into()));
//!
//! let dispatcher = Dispatcher::new(mock.service());
//! // drive a transport...
//! mock.verify();
//! ```
//!
//! ## Mock repository
//!
//! The repository half hands out a real [`RepositoryClient`] whose messages land on a
//! receiver the test owns. The test answers each message itself:
//!
//! ```rust,ignore
//! let (client, mut requests) = create_mock_repository::<Sample>(8);
//! let service = ResourceService::new(client);
//! let call = tokio::spawn(async move { service.get_by_id(1, None).await });
//!
//! let (_criteria, respond_to) = expect_get_one(&mut requests).await.unwrap();
//! respond_to.send(Ok(None)).unwrap();
//! assert!(matches!(call.await.unwrap(), Err(CrudError::DomainNotFound(_))));
//! ```

use crate::client::RepositoryClient;
use crate::dispatch::CrudResponse;
use crate::entity::CrudEntity;
use crate::error::CrudError;
use crate::message::{RepositoryRequest, Response};
use crate::operation::Operation;
use crate::page::{Page, Pageable};
use crate::service::{CrudService, DtoStream};
use crate::user::User;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use json_patch::Patch;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

// =============================================================================
// EXPECTATION BUILDER API
// =============================================================================

struct Expectation<E: CrudEntity> {
    operation: Operation,
    response: Result<CrudResponse<E>, CrudError>,
}

type Expectations<E> = Arc<Mutex<VecDeque<Expectation<E>>>>;

/// A service with expectation tracking for fluent testing.
pub struct MockService<E: CrudEntity> {
    expectations: Expectations<E>,
    calls: Arc<Mutex<Vec<(Operation, Option<User>)>>>,
}

impl<E: CrudEntity> Clone for MockService<E> {
    fn clone(&self) -> Self {
        Self {
            expectations: self.expectations.clone(),
            calls: self.calls.clone(),
        }
    }
}

impl<E: CrudEntity> Default for MockService<E> {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<E: CrudEntity> MockService<E> {
    pub fn new() -> Self {
        Self {
            expectations: Arc::new(Mutex::new(VecDeque::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// The mock as a shareable service. Clones share expectations and recorded calls.
    pub fn service(&self) -> Arc<dyn CrudService<E>> {
        Arc::new(self.clone())
    }

    /// Expects the next call to be `operation`.
    pub fn expect(&self, operation: Operation) -> ExpectationBuilder<E> {
        ExpectationBuilder {
            operation,
            expectations: self.expectations.clone(),
        }
    }

    /// Every call received so far with the user it carried.
    pub fn calls(&self) -> Vec<(Operation, Option<User>)> {
        lock(&self.calls).clone()
    }

    /// Verifies that all expectations were met.
    pub fn verify(&self) {
        let remaining = lock(&self.expectations).len();
        if remaining > 0 {
            panic!("Not all expectations were met. {remaining} remaining");
        }
    }

    fn next(&self, operation: Operation, user: Option<User>) -> Result<CrudResponse<E>, CrudError> {
        lock(&self.calls).push((operation, user));
        let expectation = lock(&self.expectations).pop_front();
        match expectation {
            Some(expectation) if expectation.operation == operation => expectation.response,
            Some(expectation) => panic!(
                "Expected a {} call, got {operation}",
                expectation.operation
            ),
            None => panic!("Unexpected {operation} call"),
        }
    }
}

/// Builder for one expectation.
pub struct ExpectationBuilder<E: CrudEntity> {
    operation: Operation,
    expectations: Expectations<E>,
}

impl<E: CrudEntity> ExpectationBuilder<E> {
    /// Sets the expectation to return a successful result.
    pub fn return_ok(self, response: CrudResponse<E>) {
        lock(&self.expectations).push_back(Expectation {
            operation: self.operation,
            response: Ok(response),
        });
    }

    /// Sets the expectation to return an error.
    pub fn return_err(self, error: CrudError) {
        lock(&self.expectations).push_back(Expectation {
            operation: self.operation,
            response: Err(error),
        });
    }
}

#[async_trait]
impl<E: CrudEntity> CrudService<E> for MockService<E> {
    async fn save(&self, _dto: E::Dto, user: Option<User>) -> Result<E::Dto, CrudError> {
        self.next(Operation::Save, user)?.into_dto()
    }

    async fn save_many(
        &self,
        _dtos: Vec<E::Dto>,
        user: Option<User>,
    ) -> Result<Vec<E::Dto>, CrudError> {
        self.next(Operation::SaveMany, user)?.into_dtos()
    }

    async fn update(&self, _dto: E::Dto, user: Option<User>) -> Result<E::Dto, CrudError> {
        self.next(Operation::Update, user)?.into_dto()
    }

    async fn update_by_id(
        &self,
        _id: E::Id,
        _dto: E::Dto,
        user: Option<User>,
    ) -> Result<E::Dto, CrudError> {
        self.next(Operation::UpdateById, user)?.into_dto()
    }

    async fn update_many(
        &self,
        _dtos: Vec<E::Dto>,
        user: Option<User>,
    ) -> Result<Vec<E::Dto>, CrudError> {
        self.next(Operation::UpdateMany, user)?.into_dtos()
    }

    async fn delete(&self, _criteria: E::Criteria, user: Option<User>) -> Result<E::Id, CrudError> {
        self.next(Operation::Delete, user)?.into_id()
    }

    async fn delete_by_id(&self, _id: E::Id, user: Option<User>) -> Result<E::Id, CrudError> {
        self.next(Operation::DeleteById, user)?.into_id()
    }

    async fn delete_many(
        &self,
        _criteria: E::Criteria,
        user: Option<User>,
    ) -> Result<Vec<E::Id>, CrudError> {
        self.next(Operation::DeleteMany, user)?.into_ids()
    }

    async fn delete_all(&self, user: Option<User>) -> Result<Vec<E::Id>, CrudError> {
        self.next(Operation::DeleteAll, user)?.into_ids()
    }

    async fn edit(
        &self,
        _criteria: E::Criteria,
        _patch: Patch,
        user: Option<User>,
    ) -> Result<E::Dto, CrudError> {
        self.next(Operation::Edit, user)?.into_dto()
    }

    async fn edit_by_id(
        &self,
        _id: E::Id,
        _patch: Patch,
        user: Option<User>,
    ) -> Result<E::Dto, CrudError> {
        self.next(Operation::EditById, user)?.into_dto()
    }

    async fn edit_many(
        &self,
        _criteria: E::Criteria,
        _patch: Patch,
        user: Option<User>,
    ) -> Result<Vec<E::Dto>, CrudError> {
        self.next(Operation::EditMany, user)?.into_dtos()
    }

    async fn get_one(
        &self,
        _criteria: E::Criteria,
        user: Option<User>,
    ) -> Result<E::Dto, CrudError> {
        self.next(Operation::GetOne, user)?.into_dto()
    }

    async fn get_by_id(&self, _id: E::Id, user: Option<User>) -> Result<E::Dto, CrudError> {
        self.next(Operation::GetById, user)?.into_dto()
    }

    async fn get_many(
        &self,
        _criteria: E::Criteria,
        user: Option<User>,
    ) -> Result<Vec<E::Dto>, CrudError> {
        self.next(Operation::GetMany, user)?.into_dtos()
    }

    async fn get_page(
        &self,
        _criteria: E::Criteria,
        _pageable: Pageable,
        user: Option<User>,
    ) -> Result<Page<E::Dto>, CrudError> {
        self.next(Operation::GetPage, user)?.into_page()
    }

    async fn count(&self, _criteria: E::Criteria, user: Option<User>) -> Result<u64, CrudError> {
        self.next(Operation::Count, user)?.into_count()
    }

    async fn count_all(&self, user: Option<User>) -> Result<u64, CrudError> {
        self.next(Operation::CountAll, user)?.into_count()
    }

    async fn get_stream(
        &self,
        _criteria: E::Criteria,
        user: Option<User>,
    ) -> Result<DtoStream<E>, CrudError> {
        let dtos = self.next(Operation::GetStream, user)?.into_dtos()?;
        Ok(stream::iter(dtos.into_iter().map(Ok)).boxed())
    }
}

// =============================================================================
// REPOSITORY HELPERS
// =============================================================================

/// Creates a repository client and the receiver its messages arrive on.
///
/// Nothing answers the messages unless the test does, so a service call under test has to
/// run in its own task while the test plays the actor with the `expect_*` helpers.
pub fn create_mock_repository<E: CrudEntity>(
    buffer_size: usize,
) -> (RepositoryClient<E>, mpsc::Receiver<RepositoryRequest<E>>) {
    let (sender, receiver) = mpsc::channel(buffer_size);
    (RepositoryClient::new(sender), receiver)
}

/// Helper to verify that the next message is an Insert request
pub async fn expect_insert<E: CrudEntity>(
    receiver: &mut mpsc::Receiver<RepositoryRequest<E>>,
) -> Option<(Vec<E>, Response<Vec<E>>)> {
    match receiver.recv().await {
        Some(RepositoryRequest::Insert {
            domains,
            respond_to,
        }) => Some((domains, respond_to)),
        _ => None,
    }
}

/// Helper to verify that the next message is an Update request
pub async fn expect_update<E: CrudEntity>(
    receiver: &mut mpsc::Receiver<RepositoryRequest<E>>,
) -> Option<(Vec<E>, Response<Vec<E>>)> {
    match receiver.recv().await {
        Some(RepositoryRequest::Update {
            domains,
            respond_to,
        }) => Some((domains, respond_to)),
        _ => None,
    }
}

/// Helper to verify that the next message is a GetOne request
pub async fn expect_get_one<E: CrudEntity>(
    receiver: &mut mpsc::Receiver<RepositoryRequest<E>>,
) -> Option<(E::Criteria, Response<Option<E>>)> {
    match receiver.recv().await {
        Some(RepositoryRequest::GetOne {
            criteria,
            respond_to,
        }) => Some((criteria, respond_to)),
        _ => None,
    }
}

/// Helper to verify that the next message is a GetMany request
pub async fn expect_get_many<E: CrudEntity>(
    receiver: &mut mpsc::Receiver<RepositoryRequest<E>>,
) -> Option<(E::Criteria, Response<Vec<E>>)> {
    match receiver.recv().await {
        Some(RepositoryRequest::GetMany {
            criteria,
            respond_to,
        }) => Some((criteria, respond_to)),
        _ => None,
    }
}

/// Helper to verify that the next message is a Remove request
pub async fn expect_remove<E: CrudEntity>(
    receiver: &mut mpsc::Receiver<RepositoryRequest<E>>,
) -> Option<(Vec<E::Id>, Response<Vec<E>>)> {
    match receiver.recv().await {
        Some(RepositoryRequest::Remove { ids, respond_to }) => Some((ids, respond_to)),
        _ => None,
    }
}
