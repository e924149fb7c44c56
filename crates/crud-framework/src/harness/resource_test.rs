use super::provider::DataProvider;
use crate::client_trait::CrudClient;
use crate::criteria::{id_criteria, ids_criteria};
use crate::entity::{CrudEntity, Dto};
use crate::error::CrudError;
use crate::operation::{Operation, OperationScope};
use crate::page::Pageable;
use json_patch::Patch;
use std::marker::PhantomData;
use tracing::info;

/// The resource scenarios of one entity type, run through one client.
///
/// Every scenario arranges through the provider, acts through the client and asserts
/// through the provider again. Scenarios for operations outside the scope return
/// immediately.
pub struct CrudResourceTest<E, P, C>
where
    E: CrudEntity,
    P: DataProvider<E>,
    C: CrudClient<E>,
{
    provider: P,
    client: C,
    scope: OperationScope,
    _entity: PhantomData<fn() -> E>,
}

fn id_of<E: CrudEntity>(dto: &E::Dto) -> Result<E::Id, CrudError> {
    dto.id()
        .cloned()
        .ok_or_else(|| CrudError::Transport(format!("{} returned without id", E::DOMAIN_NAME)))
}

fn apply_patch<E: CrudEntity>(dto: &E::Dto, patch: &Patch) -> Result<E::Dto, CrudError> {
    let mut document = serde_json::to_value(dto)?;
    json_patch::patch(&mut document, &patch.0)?;
    Ok(serde_json::from_value(document)?)
}

impl<E, P, C> CrudResourceTest<E, P, C>
where
    E: CrudEntity,
    P: DataProvider<E>,
    C: CrudClient<E>,
{
    pub fn new(provider: P, client: C) -> Self {
        Self {
            provider,
            client,
            scope: OperationScope::all(),
            _entity: PhantomData,
        }
    }

    /// Restricts the scenarios to the operations the resource exposes.
    pub fn with_scope(mut self, scope: OperationScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn ignore_test(&self, operation: Operation) -> bool {
        let ignored = !self.scope.contains(operation);
        if ignored {
            info!(
                %operation,
                transport = %self.client.transport(),
                domain = E::DOMAIN_NAME,
                "Test ignored"
            );
        }
        ignored
    }

    async fn assert_count(&self, expected: u64) -> Result<(), CrudError> {
        let current = self.provider.count_db().await?;
        assert_eq!(current, expected, "unexpected number of stored entities");
        Ok(())
    }

    async fn prepare(&self, operation: Operation) -> Result<bool, CrudError> {
        if self.ignore_test(operation) {
            return Ok(false);
        }
        self.provider.cleanups().await?;
        Ok(true)
    }

    pub async fn save(&self) -> Result<(), CrudError> {
        if !self.prepare(Operation::Save).await? {
            return Ok(());
        }
        let count_before = self.provider.count_db().await?;
        let dto = self.provider.new_dto();
        let saved = self
            .client
            .save(dto.clone(), self.provider.sample_user())
            .await?;
        self.provider.assert_save(&dto, &saved);
        self.assert_count(count_before + 1).await
    }

    pub async fn save_mandatory(&self) -> Result<(), CrudError> {
        if !self.prepare(Operation::Save).await? {
            return Ok(());
        }
        let count_before = self.provider.count_db().await?;
        let dto = self.provider.mandatory_new_dto();
        let saved = self
            .client
            .save(dto.clone(), self.provider.sample_user())
            .await?;
        self.provider.assert_save(&dto, &saved);
        self.assert_count(count_before + 1).await
    }

    pub async fn save_many(&self) -> Result<(), CrudError> {
        if !self.prepare(Operation::SaveMany).await? {
            return Ok(());
        }
        let count_before = self.provider.count_db().await?;
        let dtos = vec![self.provider.new_dto(), self.provider.mandatory_new_dto()];
        let saved = self
            .client
            .save_many(dtos.clone(), self.provider.sample_user())
            .await?;
        assert_eq!(saved.len(), dtos.len());
        for (before, after) in dtos.iter().zip(&saved) {
            self.provider.assert_save(before, after);
        }
        self.assert_count(count_before + 2).await
    }

    pub async fn update(&self) -> Result<(), CrudError> {
        if !self.prepare(Operation::Update).await? {
            return Ok(());
        }
        let mut dto = self.provider.save_new().await?;
        self.provider.update_dto(&mut dto);
        let count_before = self.provider.count_db().await?;
        let updated = self
            .client
            .update(dto.clone(), self.provider.sample_user())
            .await?;
        self.provider.assert_update(&dto, &updated);
        self.assert_count(count_before).await
    }

    pub async fn update_by_id(&self) -> Result<(), CrudError> {
        if !self.prepare(Operation::UpdateById).await? {
            return Ok(());
        }
        let mut dto = self.provider.save_new_mandatory().await?;
        self.provider.mandatory_update_dto(&mut dto);
        let id = id_of::<E>(&dto)?;
        let count_before = self.provider.count_db().await?;
        let updated = self
            .client
            .update_by_id(id, dto.clone(), self.provider.sample_user())
            .await?;
        self.provider.assert_update(&dto, &updated);
        self.assert_count(count_before).await
    }

    pub async fn update_many(&self) -> Result<(), CrudError> {
        if !self.prepare(Operation::UpdateMany).await? {
            return Ok(());
        }
        let mut first = self.provider.save_new().await?;
        let mut second = self.provider.save_new_mandatory().await?;
        self.provider.update_dto(&mut first);
        self.provider.mandatory_update_dto(&mut second);
        let dtos = vec![first, second];
        let count_before = self.provider.count_db().await?;
        let updated = self
            .client
            .update_many(dtos.clone(), self.provider.sample_user())
            .await?;
        assert_eq!(updated.len(), dtos.len());
        for (before, after) in dtos.iter().zip(&updated) {
            self.provider.assert_update(before, after);
        }
        self.assert_count(count_before).await
    }

    pub async fn delete(&self) -> Result<(), CrudError> {
        if !self.prepare(Operation::Delete).await? {
            return Ok(());
        }
        let saved = self.provider.save_new().await?;
        let id = id_of::<E>(&saved)?;
        let count_before = self.provider.count_db().await?;
        let deleted = self
            .client
            .delete(id_criteria(id.clone()), self.provider.sample_user())
            .await?;
        assert_eq!(deleted, id);
        self.assert_count(count_before - 1).await
    }

    pub async fn delete_by_id(&self) -> Result<(), CrudError> {
        if !self.prepare(Operation::DeleteById).await? {
            return Ok(());
        }
        let saved = self.provider.save_new().await?;
        let id = id_of::<E>(&saved)?;
        let count_before = self.provider.count_db().await?;
        let deleted = self
            .client
            .delete_by_id(id.clone(), self.provider.sample_user())
            .await?;
        assert_eq!(deleted, id);
        self.assert_count(count_before - 1).await
    }

    pub async fn delete_many(&self) -> Result<(), CrudError> {
        if !self.prepare(Operation::DeleteMany).await? {
            return Ok(());
        }
        let mut ids = vec![
            id_of::<E>(&self.provider.save_new().await?)?,
            id_of::<E>(&self.provider.save_new_mandatory().await?)?,
        ];
        let count_before = self.provider.count_db().await?;
        let mut deleted = self
            .client
            .delete_many(ids_criteria(ids.clone()), self.provider.sample_user())
            .await?;
        ids.sort();
        deleted.sort();
        assert_eq!(deleted, ids);
        self.assert_count(count_before - 2).await
    }

    pub async fn delete_all(&self) -> Result<(), CrudError> {
        if !self.prepare(Operation::DeleteAll).await? {
            return Ok(());
        }
        self.provider.save_new().await?;
        self.provider.save_new_mandatory().await?;
        let count_before = self.provider.count_db().await?;
        let deleted = self
            .client
            .delete_all(self.provider.sample_user())
            .await?;
        assert_eq!(deleted.len() as u64, count_before);
        self.assert_count(0).await
    }

    pub async fn edit(&self) -> Result<(), CrudError> {
        if !self.prepare(Operation::Edit).await? {
            return Ok(());
        }
        let saved = self.provider.save_new().await?;
        let patch = self.provider.json_patch();
        let expected = apply_patch::<E>(&saved, &patch)?;
        let count_before = self.provider.count_db().await?;
        let edited = self
            .client
            .edit(
                id_criteria(id_of::<E>(&saved)?),
                patch,
                self.provider.sample_user(),
            )
            .await?;
        self.provider.assert_update(&expected, &edited);
        self.assert_count(count_before).await
    }

    pub async fn edit_by_id(&self) -> Result<(), CrudError> {
        if !self.prepare(Operation::EditById).await? {
            return Ok(());
        }
        let saved = self.provider.save_new_mandatory().await?;
        let patch = self.provider.mandatory_json_patch();
        let expected = apply_patch::<E>(&saved, &patch)?;
        let count_before = self.provider.count_db().await?;
        let edited = self
            .client
            .edit_by_id(id_of::<E>(&saved)?, patch, self.provider.sample_user())
            .await?;
        self.provider.assert_update(&expected, &edited);
        self.assert_count(count_before).await
    }

    /// An empty patch leaves the stored DTO untouched.
    pub async fn edit_by_id_empty_patch(&self) -> Result<(), CrudError> {
        if !self.prepare(Operation::EditById).await? {
            return Ok(());
        }
        let saved = self.provider.save_new().await?;
        let edited = self
            .client
            .edit_by_id(
                id_of::<E>(&saved)?,
                Patch(Vec::new()),
                self.provider.sample_user(),
            )
            .await?;
        self.provider.assert_update(&saved, &edited);
        Ok(())
    }

    pub async fn edit_many(&self) -> Result<(), CrudError> {
        if !self.prepare(Operation::EditMany).await? {
            return Ok(());
        }
        let saved = vec![
            self.provider.save_new().await?,
            self.provider.save_new_mandatory().await?,
        ];
        let patch = self.provider.mandatory_json_patch();
        let ids = saved
            .iter()
            .map(id_of::<E>)
            .collect::<Result<Vec<_>, _>>()?;
        let count_before = self.provider.count_db().await?;
        let edited = self
            .client
            .edit_many(ids_criteria(ids), patch.clone(), self.provider.sample_user())
            .await?;
        assert_eq!(edited.len(), saved.len());
        for after in &edited {
            let before = saved
                .iter()
                .find(|dto| dto.id() == after.id())
                .ok_or_else(|| CrudError::Transport("edited an unknown entity".to_string()))?;
            self.provider
                .assert_update(&apply_patch::<E>(before, &patch)?, after);
        }
        self.assert_count(count_before).await
    }

    pub async fn get_one(&self) -> Result<(), CrudError> {
        if !self.prepare(Operation::GetOne).await? {
            return Ok(());
        }
        let saved = self.provider.save_new().await?;
        let fetched = self
            .client
            .get_one(id_criteria(id_of::<E>(&saved)?), self.provider.sample_user())
            .await?;
        self.provider.assert_get(&saved, &fetched);
        Ok(())
    }

    pub async fn get_by_id(&self) -> Result<(), CrudError> {
        if !self.prepare(Operation::GetById).await? {
            return Ok(());
        }
        let saved = self.provider.save_new().await?;
        let fetched = self
            .client
            .get_by_id(id_of::<E>(&saved)?, self.provider.sample_user())
            .await?;
        self.provider.assert_get(&saved, &fetched);
        Ok(())
    }

    /// A deleted entity is no longer found.
    pub async fn get_by_id_after_delete(&self) -> Result<(), CrudError> {
        if !self.prepare(Operation::GetById).await? {
            return Ok(());
        }
        let saved = self.provider.save_new().await?;
        let id = id_of::<E>(&saved)?;
        self.provider
            .service()
            .delete_by_id(id.clone(), self.provider.sample_user())
            .await?;
        let result = self
            .client
            .get_by_id(id, self.provider.sample_user())
            .await;
        assert!(
            matches!(result, Err(CrudError::DomainNotFound(_))),
            "expected DomainNotFound, got {result:?}"
        );
        Ok(())
    }

    pub async fn get_many(&self) -> Result<(), CrudError> {
        if !self.prepare(Operation::GetMany).await? {
            return Ok(());
        }
        let saved = vec![
            self.provider.save_new().await?,
            self.provider.save_new_mandatory().await?,
        ];
        let ids = saved
            .iter()
            .map(id_of::<E>)
            .collect::<Result<Vec<_>, _>>()?;
        let fetched = self
            .client
            .get_many(ids_criteria(ids), self.provider.sample_user())
            .await?;
        assert_eq!(fetched.len(), saved.len());
        for before in &saved {
            let after = fetched
                .iter()
                .find(|dto| dto.id() == before.id())
                .ok_or_else(|| CrudError::DomainNotFound("saved dto not returned".to_string()))?;
            self.provider.assert_get(before, after);
        }
        Ok(())
    }

    pub async fn get_page(&self) -> Result<(), CrudError> {
        if !self.prepare(Operation::GetPage).await? {
            return Ok(());
        }
        let first = self.provider.save_new().await?;
        let second = self.provider.save_new_mandatory().await?;
        let ids = vec![id_of::<E>(&first)?, id_of::<E>(&second)?];
        let page = self
            .client
            .get_page(
                ids_criteria(ids),
                Pageable::new(0, 1),
                self.provider.sample_user(),
            )
            .await?;
        assert_eq!(page.total_elements, 2);
        assert_eq!(page.total_pages(), 2);
        assert_eq!(page.content.len(), 1);
        Ok(())
    }

    pub async fn count(&self) -> Result<(), CrudError> {
        if !self.prepare(Operation::Count).await? {
            return Ok(());
        }
        let saved = self.provider.save_new().await?;
        self.provider.save_new_mandatory().await?;
        let count = self
            .client
            .count(id_criteria(id_of::<E>(&saved)?), self.provider.sample_user())
            .await?;
        assert_eq!(count, 1);
        Ok(())
    }

    pub async fn count_all(&self) -> Result<(), CrudError> {
        if !self.prepare(Operation::CountAll).await? {
            return Ok(());
        }
        self.provider.save_new().await?;
        self.provider.save_new_mandatory().await?;
        let count = self
            .client
            .count_all(self.provider.sample_user())
            .await?;
        assert_eq!(count, self.provider.count_db().await?);
        assert_eq!(count, 2);
        Ok(())
    }

    /// Runs every scenario in turn.
    pub async fn run_all(&self) -> Result<(), CrudError> {
        self.save().await?;
        self.save_mandatory().await?;
        self.save_many().await?;
        self.update().await?;
        self.update_by_id().await?;
        self.update_many().await?;
        self.delete().await?;
        self.delete_by_id().await?;
        self.delete_many().await?;
        self.delete_all().await?;
        self.edit().await?;
        self.edit_by_id().await?;
        self.edit_by_id_empty_patch().await?;
        self.edit_many().await?;
        self.get_one().await?;
        self.get_by_id().await?;
        self.get_by_id_after_delete().await?;
        self.get_many().await?;
        self.get_page().await?;
        self.count().await?;
        self.count_all().await
    }
}
