use crate::client::RepositoryClient;
use crate::entity::{short_type_name, CrudEntity};
use crate::error::CrudError;
use crate::message::RepositoryRequest;
use crate::page::Page;
use std::collections::BTreeMap;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// In-memory repository running as an actor.
///
/// The store is owned by a single task and mutated only while handling one message at a
/// time, so there is no locking. Entries are kept ordered by ID, which makes `get_many` and
/// paging deterministic.
pub struct RepositoryActor<E: CrudEntity> {
    receiver: mpsc::Receiver<RepositoryRequest<E>>,
    store: BTreeMap<E::Id, E>,
    next_id: IdGenerator<E>,
}

type IdGenerator<E> = Box<dyn FnMut() -> <E as CrudEntity>::Id + Send>;

impl<E: CrudEntity> RepositoryActor<E> {
    /// Creates the actor and its client. IDs for new entities come from `next_id`.
    pub fn new(
        buffer_size: usize,
        next_id: impl FnMut() -> E::Id + Send + 'static,
    ) -> (Self, RepositoryClient<E>) {
        let (sender, receiver) = mpsc::channel(buffer_size);
        let actor = Self {
            receiver,
            store: BTreeMap::new(),
            next_id: Box::new(next_id),
        };
        (actor, RepositoryClient::new(sender))
    }

    /// Actor with integer IDs counting up from 1.
    pub fn sequential(buffer_size: usize) -> (Self, RepositoryClient<E>)
    where
        E::Id: From<u64>,
    {
        let mut counter = 0u64;
        Self::new(buffer_size, move || {
            counter += 1;
            E::Id::from(counter)
        })
    }

    pub async fn run(mut self) {
        let entity_type = short_type_name::<E>();
        info!(entity_type, "Repository started");

        while let Some(msg) = self.receiver.recv().await {
            match msg {
                RepositoryRequest::Insert {
                    domains,
                    respond_to,
                } => {
                    let result = self.write_all(domains, Write::Insert);
                    match &result {
                        Ok(items) => info!(
                            entity_type,
                            ids = %ids_of(items),
                            size = self.store.len(),
                            "Inserted"
                        ),
                        Err(e) => warn!(entity_type, error = %e, "Insert failed"),
                    }
                    let _ = respond_to.send(result);
                }
                RepositoryRequest::Update {
                    domains,
                    respond_to,
                } => {
                    let result = self.write_all(domains, Write::Update);
                    match &result {
                        Ok(items) => info!(entity_type, ids = %ids_of(items), "Updated"),
                        Err(e) => warn!(entity_type, error = %e, "Update failed"),
                    }
                    let _ = respond_to.send(result);
                }
                RepositoryRequest::Remove { ids, respond_to } => {
                    let result = self.remove_all(&ids);
                    match &result {
                        Ok(items) => info!(
                            entity_type,
                            ids = %ids_of(items),
                            size = self.store.len(),
                            "Removed"
                        ),
                        Err(e) => warn!(entity_type, error = %e, "Remove failed"),
                    }
                    let _ = respond_to.send(result);
                }
                RepositoryRequest::GetOne {
                    criteria,
                    respond_to,
                } => {
                    let item = self.matching(&criteria).next().cloned();
                    debug!(entity_type, ?criteria, found = item.is_some(), "GetOne");
                    let _ = respond_to.send(Ok(item));
                }
                RepositoryRequest::GetMany {
                    criteria,
                    respond_to,
                } => {
                    let items: Vec<E> = self.matching(&criteria).cloned().collect();
                    debug!(entity_type, ?criteria, count = items.len(), "GetMany");
                    let _ = respond_to.send(Ok(items));
                }
                RepositoryRequest::GetPage {
                    criteria,
                    pageable,
                    respond_to,
                } => {
                    let total = self.matching(&criteria).count() as u64;
                    let content: Vec<E> = self
                        .matching(&criteria)
                        .skip(pageable.offset())
                        .take(pageable.size as usize)
                        .cloned()
                        .collect();
                    debug!(entity_type, ?criteria, ?pageable, total, "GetPage");
                    let _ = respond_to.send(Ok(Page::new(content, pageable, total)));
                }
                RepositoryRequest::Count {
                    criteria,
                    respond_to,
                } => {
                    let count = self.matching(&criteria).count() as u64;
                    debug!(entity_type, ?criteria, count, "Count");
                    let _ = respond_to.send(Ok(count));
                }
            }
        }

        info!(entity_type, size = self.store.len(), "Shutdown");
    }

    fn matching<'a>(&'a self, criteria: &'a E::Criteria) -> impl Iterator<Item = &'a E> + 'a {
        self.store.values().filter(move |item| item.matches(criteria))
    }

    /// Applies a batch of writes. A single write checks before touching the store; a
    /// larger batch is staged on a copy that replaces the store only once every item passed.
    fn write_all(&mut self, domains: Vec<E>, kind: Write) -> Result<Vec<E>, CrudError> {
        let mut written = Vec::with_capacity(domains.len());
        if domains.len() == 1 {
            for domain in domains {
                written.push(Self::write(&mut self.store, &mut self.next_id, domain, kind)?);
            }
            return Ok(written);
        }
        let mut staged = self.store.clone();
        for domain in domains {
            written.push(Self::write(&mut staged, &mut self.next_id, domain, kind)?);
        }
        self.store = staged;
        Ok(written)
    }

    fn write(
        store: &mut BTreeMap<E::Id, E>,
        next_id: &mut IdGenerator<E>,
        mut domain: E,
        kind: Write,
    ) -> Result<E, CrudError> {
        let id = match (kind, domain.id()) {
            (Write::Insert, Some(id)) if store.contains_key(id) => {
                return Err(CrudError::Conflict(format!("id {id} already exists")));
            }
            (Write::Insert, Some(id)) => id.clone(),
            (Write::Insert, None) => loop {
                let candidate = next_id();
                if !store.contains_key(&candidate) {
                    break candidate;
                }
            },
            (Write::Update, Some(id)) if store.contains_key(id) => id.clone(),
            (Write::Update, Some(id)) => {
                return Err(CrudError::DomainNotFound(format!(
                    "{} with id {id}",
                    E::DOMAIN_NAME
                )));
            }
            (Write::Update, None) => {
                return Err(CrudError::BadRequest("id is required for update".to_string()));
            }
        };
        domain.set_id(id.clone());
        if let Some(criteria) = E::unique_criteria(&domain.to_dto()) {
            let clash = store
                .values()
                .any(|other| other.id() != Some(&id) && other.matches(&criteria));
            if clash {
                return Err(CrudError::Conflict(format!(
                    "{} already exists",
                    E::DOMAIN_NAME
                )));
            }
        }
        store.insert(id, domain.clone());
        Ok(domain)
    }

    /// Removes every listed ID, or nothing if one of them is missing.
    fn remove_all(&mut self, ids: &[E::Id]) -> Result<Vec<E>, CrudError> {
        if let Some(missing) = ids.iter().find(|id| !self.store.contains_key(*id)) {
            return Err(CrudError::DomainNotFound(format!(
                "{} with id {missing}",
                E::DOMAIN_NAME
            )));
        }
        Ok(ids.iter().filter_map(|id| self.store.remove(id)).collect())
    }
}

#[derive(Debug, Clone, Copy)]
enum Write {
    Insert,
    Update,
}

fn ids_of<E: CrudEntity>(items: &[E]) -> String {
    items
        .iter()
        .filter_map(|item| item.id().map(ToString::to_string))
        .collect::<Vec<_>>()
        .join(",")
}
