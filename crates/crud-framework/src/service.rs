//! The single business-logic seam. Every transport ends up calling one method of
//! [`CrudService`] and nothing else.

use crate::criteria::id_criteria;
use crate::entity::{CrudEntity, Dto};
use crate::error::CrudError;
use crate::operation::Operation;
use crate::page::{Page, Pageable};
use crate::repository::Repository;
use crate::user::User;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use json_patch::Patch;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::debug;

/// DTOs produced one at a time by `get-stream`.
pub type DtoStream<E> = BoxStream<'static, Result<<E as CrudEntity>::Dto, CrudError>>;

#[async_trait]
pub trait CrudService<E: CrudEntity>: Send + Sync + 'static {
    async fn save(&self, dto: E::Dto, user: Option<User>) -> Result<E::Dto, CrudError>;

    async fn save_many(
        &self,
        dtos: Vec<E::Dto>,
        user: Option<User>,
    ) -> Result<Vec<E::Dto>, CrudError>;

    async fn update(&self, dto: E::Dto, user: Option<User>) -> Result<E::Dto, CrudError>;

    /// The `id` argument wins over any ID carried in `dto`.
    async fn update_by_id(
        &self,
        id: E::Id,
        dto: E::Dto,
        user: Option<User>,
    ) -> Result<E::Dto, CrudError>;

    async fn update_many(
        &self,
        dtos: Vec<E::Dto>,
        user: Option<User>,
    ) -> Result<Vec<E::Dto>, CrudError>;

    async fn delete(&self, criteria: E::Criteria, user: Option<User>) -> Result<E::Id, CrudError>;

    async fn delete_by_id(&self, id: E::Id, user: Option<User>) -> Result<E::Id, CrudError>;

    async fn delete_many(
        &self,
        criteria: E::Criteria,
        user: Option<User>,
    ) -> Result<Vec<E::Id>, CrudError>;

    async fn delete_all(&self, user: Option<User>) -> Result<Vec<E::Id>, CrudError>;

    async fn edit(
        &self,
        criteria: E::Criteria,
        patch: Patch,
        user: Option<User>,
    ) -> Result<E::Dto, CrudError>;

    async fn edit_by_id(
        &self,
        id: E::Id,
        patch: Patch,
        user: Option<User>,
    ) -> Result<E::Dto, CrudError>;

    async fn edit_many(
        &self,
        criteria: E::Criteria,
        patch: Patch,
        user: Option<User>,
    ) -> Result<Vec<E::Dto>, CrudError>;

    async fn get_one(&self, criteria: E::Criteria, user: Option<User>)
        -> Result<E::Dto, CrudError>;

    async fn get_by_id(&self, id: E::Id, user: Option<User>) -> Result<E::Dto, CrudError>;

    async fn get_many(
        &self,
        criteria: E::Criteria,
        user: Option<User>,
    ) -> Result<Vec<E::Dto>, CrudError>;

    async fn get_page(
        &self,
        criteria: E::Criteria,
        pageable: Pageable,
        user: Option<User>,
    ) -> Result<Page<E::Dto>, CrudError>;

    async fn count(&self, criteria: E::Criteria, user: Option<User>) -> Result<u64, CrudError>;

    async fn count_all(&self, user: Option<User>) -> Result<u64, CrudError>;

    /// The matches of `criteria`, in ID order, as a stream. Errors opening the stream are
    /// returned directly; the stream itself only yields items.
    async fn get_stream(
        &self,
        criteria: E::Criteria,
        user: Option<User>,
    ) -> Result<DtoStream<E>, CrudError>;
}

/// A completed write, as seen by [`ServiceListener`]s.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceEvent<E: CrudEntity> {
    Saved(E::Dto),
    Updated { previous: E::Dto, current: E::Dto },
    Deleted(E::Id),
}

/// Component listener notified around service writes.
#[async_trait]
pub trait ServiceListener<E: CrudEntity>: Send + Sync + 'static {
    /// Runs before a write operation touches the repository. An error aborts it.
    async fn before(&self, _operation: Operation, _user: Option<&User>) -> Result<(), CrudError> {
        Ok(())
    }

    /// Runs after each entity is written.
    async fn after(&self, event: &ServiceEvent<E>, user: Option<&User>);
}

/// [`CrudService`] over any [`Repository`].
pub struct ResourceService<E: CrudEntity, R: Repository<E>> {
    repository: R,
    listeners: Vec<Arc<dyn ServiceListener<E>>>,
    _entity: PhantomData<fn() -> E>,
}

impl<E: CrudEntity, R: Repository<E>> ResourceService<E, R> {
    pub fn new(repository: R) -> Self {
        Self {
            repository,
            listeners: Vec::new(),
            _entity: PhantomData,
        }
    }

    pub fn with_listener(mut self, listener: impl ServiceListener<E>) -> Self {
        self.listeners.push(Arc::new(listener));
        self
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }

    async fn before(&self, operation: Operation, user: Option<&User>) -> Result<(), CrudError> {
        for listener in &self.listeners {
            listener.before(operation, user).await?;
        }
        Ok(())
    }

    async fn notify(&self, event: ServiceEvent<E>, user: Option<&User>) {
        for listener in &self.listeners {
            listener.after(&event, user).await;
        }
    }

    async fn find(&self, criteria: E::Criteria) -> Result<E, CrudError> {
        let message = format!("{} matching {:?}", E::DOMAIN_NAME, criteria);
        self.repository
            .get_one(criteria)
            .await?
            .ok_or(CrudError::DomainNotFound(message))
    }

    async fn find_by_id(&self, id: &E::Id) -> Result<E, CrudError> {
        self.repository
            .get_one(id_criteria(id.clone()))
            .await?
            .ok_or_else(|| CrudError::DomainNotFound(format!("{} with id {id}", E::DOMAIN_NAME)))
    }

    /// Validates `dto` and runs the save hook. Nothing is written yet.
    async fn prepare_save(&self, dto: E::Dto, user: Option<&User>) -> Result<E, CrudError> {
        E::validate(&dto)?;
        let mut domain = E::from_dto(dto)?;
        domain.on_save(user).await?;
        Ok(domain)
    }

    /// Validates `dto` against the stored entity it replaces and runs the update hook.
    /// Returns the stored entity with the replacement.
    async fn prepare_update(
        &self,
        dto: E::Dto,
        user: Option<&User>,
    ) -> Result<(E, E), CrudError> {
        E::validate(&dto)?;
        let id = dto
            .id()
            .cloned()
            .ok_or_else(|| CrudError::BadRequest("id is required for update".to_string()))?;
        let previous = self.find_by_id(&id).await?;
        let mut domain = E::from_dto(dto)?;
        domain.set_id(id);
        domain.on_update(&previous, user).await?;
        Ok((previous, domain))
    }

    /// Applies `patch` to the entity's DTO document.
    fn patched(entity: &E, patch: &Patch) -> Result<E::Dto, CrudError> {
        let previous = entity.to_dto();
        let id = previous
            .id()
            .cloned()
            .ok_or_else(|| CrudError::DomainNotFound(format!("{} without id", E::DOMAIN_NAME)))?;
        let mut document = serde_json::to_value(&previous)?;
        json_patch::patch(&mut document, &patch.0)?;
        let patched: E::Dto = serde_json::from_value(document)?;
        if patched.id() != Some(&id) {
            return Err(CrudError::BadRequest(
                "json patch must not change the id".to_string(),
            ));
        }
        Ok(patched)
    }

    async fn save_all(
        &self,
        dtos: Vec<E::Dto>,
        user: Option<&User>,
    ) -> Result<Vec<E::Dto>, CrudError> {
        let mut domains = Vec::with_capacity(dtos.len());
        for dto in dtos {
            domains.push(self.prepare_save(dto, user).await?);
        }
        let inserted = self.repository.insert_many(domains).await?;
        let mut saved = Vec::with_capacity(inserted.len());
        for domain in inserted {
            let dto = domain.to_dto();
            debug!(domain = E::DOMAIN_NAME, id = ?dto.id(), "Saved");
            self.notify(ServiceEvent::Saved(dto.clone()), user).await;
            saved.push(dto);
        }
        Ok(saved)
    }

    async fn update_all(
        &self,
        dtos: Vec<E::Dto>,
        user: Option<&User>,
    ) -> Result<Vec<E::Dto>, CrudError> {
        let mut previous = Vec::with_capacity(dtos.len());
        let mut domains = Vec::with_capacity(dtos.len());
        for dto in dtos {
            let (stored, domain) = self.prepare_update(dto, user).await?;
            previous.push(stored);
            domains.push(domain);
        }
        let written = self.repository.update_many(domains).await?;
        let mut updated = Vec::with_capacity(written.len());
        for (previous, current) in previous.iter().zip(written) {
            let current = current.to_dto();
            debug!(domain = E::DOMAIN_NAME, id = ?current.id(), "Updated");
            let event = ServiceEvent::Updated {
                previous: previous.to_dto(),
                current: current.clone(),
            };
            self.notify(event, user).await;
            updated.push(current);
        }
        Ok(updated)
    }

    async fn edit_all(
        &self,
        entities: &[E],
        patch: &Patch,
        user: Option<&User>,
    ) -> Result<Vec<E::Dto>, CrudError> {
        let dtos = entities
            .iter()
            .map(|entity| Self::patched(entity, patch))
            .collect::<Result<Vec<_>, _>>()?;
        self.update_all(dtos, user).await
    }

    /// Runs every delete hook, then removes all entities in one write.
    async fn delete_all_of(
        &self,
        entities: Vec<E>,
        user: Option<&User>,
    ) -> Result<Vec<E::Id>, CrudError> {
        let mut ids = Vec::with_capacity(entities.len());
        for entity in &entities {
            let id = entity.id().cloned().ok_or_else(|| {
                CrudError::DomainNotFound(format!("{} without id", E::DOMAIN_NAME))
            })?;
            entity.on_delete(user).await?;
            ids.push(id);
        }
        let removed = self.repository.remove_many(ids.clone()).await?;
        debug!(domain = E::DOMAIN_NAME, count = removed.len(), "Deleted");
        for id in &ids {
            self.notify(ServiceEvent::Deleted(id.clone()), user).await;
        }
        Ok(ids)
    }
}

/// The one item of a single-item write.
fn single<T>(mut items: Vec<T>) -> Result<T, CrudError> {
    items
        .pop()
        .ok_or_else(|| CrudError::DomainNotFound("write returned nothing".to_string()))
}

#[async_trait]
impl<E: CrudEntity, R: Repository<E>> CrudService<E> for ResourceService<E, R> {
    async fn save(&self, dto: E::Dto, user: Option<User>) -> Result<E::Dto, CrudError> {
        self.before(Operation::Save, user.as_ref()).await?;
        single(self.save_all(vec![dto], user.as_ref()).await?)
    }

    async fn save_many(
        &self,
        dtos: Vec<E::Dto>,
        user: Option<User>,
    ) -> Result<Vec<E::Dto>, CrudError> {
        self.before(Operation::SaveMany, user.as_ref()).await?;
        self.save_all(dtos, user.as_ref()).await
    }

    async fn update(&self, dto: E::Dto, user: Option<User>) -> Result<E::Dto, CrudError> {
        self.before(Operation::Update, user.as_ref()).await?;
        single(self.update_all(vec![dto], user.as_ref()).await?)
    }

    async fn update_by_id(
        &self,
        id: E::Id,
        mut dto: E::Dto,
        user: Option<User>,
    ) -> Result<E::Dto, CrudError> {
        self.before(Operation::UpdateById, user.as_ref()).await?;
        dto.set_id(id);
        single(self.update_all(vec![dto], user.as_ref()).await?)
    }

    async fn update_many(
        &self,
        dtos: Vec<E::Dto>,
        user: Option<User>,
    ) -> Result<Vec<E::Dto>, CrudError> {
        self.before(Operation::UpdateMany, user.as_ref()).await?;
        self.update_all(dtos, user.as_ref()).await
    }

    async fn delete(&self, criteria: E::Criteria, user: Option<User>) -> Result<E::Id, CrudError> {
        self.before(Operation::Delete, user.as_ref()).await?;
        let entity = self.find(criteria).await?;
        single(self.delete_all_of(vec![entity], user.as_ref()).await?)
    }

    async fn delete_by_id(&self, id: E::Id, user: Option<User>) -> Result<E::Id, CrudError> {
        self.before(Operation::DeleteById, user.as_ref()).await?;
        let entity = self.find_by_id(&id).await?;
        single(self.delete_all_of(vec![entity], user.as_ref()).await?)
    }

    async fn delete_many(
        &self,
        criteria: E::Criteria,
        user: Option<User>,
    ) -> Result<Vec<E::Id>, CrudError> {
        self.before(Operation::DeleteMany, user.as_ref()).await?;
        let entities = self.repository.get_many(criteria).await?;
        self.delete_all_of(entities, user.as_ref()).await
    }

    async fn delete_all(&self, user: Option<User>) -> Result<Vec<E::Id>, CrudError> {
        self.before(Operation::DeleteAll, user.as_ref()).await?;
        let entities = self.repository.get_many(E::Criteria::default()).await?;
        self.delete_all_of(entities, user.as_ref()).await
    }

    async fn edit(
        &self,
        criteria: E::Criteria,
        patch: Patch,
        user: Option<User>,
    ) -> Result<E::Dto, CrudError> {
        self.before(Operation::Edit, user.as_ref()).await?;
        let entity = self.find(criteria).await?;
        single(self.edit_all(&[entity], &patch, user.as_ref()).await?)
    }

    async fn edit_by_id(
        &self,
        id: E::Id,
        patch: Patch,
        user: Option<User>,
    ) -> Result<E::Dto, CrudError> {
        self.before(Operation::EditById, user.as_ref()).await?;
        let entity = self.find_by_id(&id).await?;
        single(self.edit_all(&[entity], &patch, user.as_ref()).await?)
    }

    /// All matched entities are patched and checked before any of them is written.
    async fn edit_many(
        &self,
        criteria: E::Criteria,
        patch: Patch,
        user: Option<User>,
    ) -> Result<Vec<E::Dto>, CrudError> {
        self.before(Operation::EditMany, user.as_ref()).await?;
        let entities = self.repository.get_many(criteria).await?;
        self.edit_all(&entities, &patch, user.as_ref()).await
    }

    async fn get_one(
        &self,
        criteria: E::Criteria,
        _user: Option<User>,
    ) -> Result<E::Dto, CrudError> {
        Ok(self.find(criteria).await?.to_dto())
    }

    async fn get_by_id(&self, id: E::Id, _user: Option<User>) -> Result<E::Dto, CrudError> {
        Ok(self.find_by_id(&id).await?.to_dto())
    }

    async fn get_many(
        &self,
        criteria: E::Criteria,
        _user: Option<User>,
    ) -> Result<Vec<E::Dto>, CrudError> {
        let entities = self.repository.get_many(criteria).await?;
        Ok(entities.iter().map(CrudEntity::to_dto).collect())
    }

    async fn get_page(
        &self,
        criteria: E::Criteria,
        pageable: Pageable,
        _user: Option<User>,
    ) -> Result<Page<E::Dto>, CrudError> {
        if pageable.size == 0 {
            return Err(CrudError::BadRequest("page size must be positive".to_string()));
        }
        let page = self.repository.get_page(criteria, pageable).await?;
        Ok(page.map(|entity| entity.to_dto()))
    }

    async fn count(&self, criteria: E::Criteria, _user: Option<User>) -> Result<u64, CrudError> {
        self.repository.count(criteria).await
    }

    async fn count_all(&self, _user: Option<User>) -> Result<u64, CrudError> {
        self.repository.count(E::Criteria::default()).await
    }

    async fn get_stream(
        &self,
        criteria: E::Criteria,
        _user: Option<User>,
    ) -> Result<DtoStream<E>, CrudError> {
        let entities = self.repository.get_many(criteria).await?;
        debug!(domain = E::DOMAIN_NAME, count = entities.len(), "Streaming");
        let dtos: Vec<Result<E::Dto, CrudError>> =
            entities.iter().map(|entity| Ok(entity.to_dto())).collect();
        Ok(stream::iter(dtos).boxed())
    }
}
