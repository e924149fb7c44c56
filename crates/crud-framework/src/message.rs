use crate::entity::CrudEntity;
use crate::error::CrudError;
use crate::page::{Page, Pageable};
use tokio::sync::oneshot;

/// Type alias for the one-shot response channel used by the repository actor.
pub type Response<T> = oneshot::Sender<Result<T, CrudError>>;

/// Message sent to a [`crate::actor::RepositoryActor`].
///
/// There is one variant per [`crate::repository::Repository`] method. Each carries the
/// typed input from the entity's associated types plus the channel the actor answers on,
/// so a `Sample` repository can never receive another entity's criteria.
///
/// Writes carry a batch and are applied all-or-nothing within one message.
#[derive(Debug)]
pub enum RepositoryRequest<E: CrudEntity> {
    Insert {
        domains: Vec<E>,
        respond_to: Response<Vec<E>>,
    },
    Update {
        domains: Vec<E>,
        respond_to: Response<Vec<E>>,
    },
    Remove {
        ids: Vec<E::Id>,
        respond_to: Response<Vec<E>>,
    },
    GetOne {
        criteria: E::Criteria,
        respond_to: Response<Option<E>>,
    },
    GetMany {
        criteria: E::Criteria,
        respond_to: Response<Vec<E>>,
    },
    GetPage {
        criteria: E::Criteria,
        pageable: Pageable,
        respond_to: Response<Page<E>>,
    },
    Count {
        criteria: E::Criteria,
        respond_to: Response<u64>,
    },
}
