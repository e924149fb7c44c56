use crate::criteria::Criteria;
use crate::error::CrudError;
use crate::user::User;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::{Debug, Display};
use std::hash::Hash;
use std::str::FromStr;

/// Identifier of a managed entity.
///
/// Ordered so the in-memory store pages deterministically, and parseable so REST
/// path segments can be turned back into IDs.
pub trait CrudId:
    Clone + Eq + Ord + Hash + Debug + Display + FromStr + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<T> CrudId for T where
    T: Clone
        + Eq
        + Ord
        + Hash
        + Debug
        + Display
        + FromStr
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

/// Wire representation of an entity.
pub trait Dto: Clone + Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static {
    type Id: CrudId;

    fn id(&self) -> Option<&Self::Id>;

    fn set_id(&mut self, id: Self::Id);
}

/// Trait that any domain type must implement to be served by the CRUD stack.
///
/// # Architecture Note
/// The domain (persistence shape) and the DTO (wire shape) are distinct types. The mapping
/// between them is pure and lives here, so neither the repository nor any transport ever
/// interprets a DTO on its own.
///
/// # Hooks
/// The async lifecycle hooks run inside the service, after validation and before the
/// repository write. Returning an error aborts the write and the error reaches the caller
/// unchanged, typically as a [`CrudError::Conflict`] for business-rule violations.
#[async_trait]
pub trait CrudEntity: Clone + Debug + Send + Sync + 'static {
    type Id: CrudId;

    type Dto: Dto<Id = Self::Id>;

    /// The filter type used by delete, edit, get and count operations.
    type Criteria: Criteria<Id = Self::Id>;

    /// Used for topics, RSocket routes and log fields.
    const DOMAIN_NAME: &'static str;

    fn id(&self) -> Option<&Self::Id>;

    fn set_id(&mut self, id: Self::Id);

    fn to_dto(&self) -> Self::Dto;

    fn from_dto(dto: Self::Dto) -> Result<Self, CrudError>;

    /// Whether this entity satisfies `criteria`.
    ///
    /// The default only honours the ID filter. Entities with filterable fields override
    /// this and combine the ID filter with their own.
    fn matches(&self, criteria: &Self::Criteria) -> bool {
        criteria
            .id_filter()
            .map_or(true, |filter| filter.test(self.id()))
    }

    /// Rejects invalid input before any hook or repository call.
    fn validate(_dto: &Self::Dto) -> Result<(), CrudError> {
        Ok(())
    }

    /// Criteria that must not match any other entity when `dto` is written.
    fn unique_criteria(_dto: &Self::Dto) -> Option<Self::Criteria> {
        None
    }

    // --- Lifecycle Hooks (Async) ---

    async fn on_save(&mut self, _user: Option<&User>) -> Result<(), CrudError> {
        Ok(())
    }

    async fn on_update(&mut self, _previous: &Self, _user: Option<&User>) -> Result<(), CrudError> {
        Ok(())
    }

    async fn on_delete(&self, _user: Option<&User>) -> Result<(), CrudError> {
        Ok(())
    }
}

/// Last path segment of a type name (e.g. `SampleDto` instead of `crud_sample::model::SampleDto`).
pub fn short_type_name<T: ?Sized>() -> &'static str {
    std::any::type_name::<T>()
        .split("::")
        .last()
        .unwrap_or("Unknown")
}
