use async_trait::async_trait;
use crud_framework::criteria::test_field;
use crud_framework::harness::{CrudResourceTest, DataProvider};
use crud_framework::service::{ServiceEvent, ServiceListener};
use crud_framework::{
    id_criteria, CrudClient, CrudEntity, CrudError, CrudService, Criteria, Dispatcher, Dto,
    Filter, Operation, OperationScope, Pageable, RepositoryActor, ResourceService, ServiceClient,
    User,
};
use futures::TryStreamExt;
use json_patch::Patch;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::{Arc, Mutex};

// --- Test Entity ---

#[derive(Clone, Debug, PartialEq)]
struct Task {
    id: Option<u64>,
    title: String,
    done: bool,
    owner: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct TaskDto {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
    title: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    owner: Option<String>,
}

impl Dto for TaskDto {
    type Id = u64;

    fn id(&self) -> Option<&u64> {
        self.id.as_ref()
    }

    fn set_id(&mut self, id: u64) {
        self.id = Some(id);
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct TaskCriteria {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<Filter<u64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<Filter<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    done: Option<Filter<bool>>,
}

impl Criteria for TaskCriteria {
    type Id = u64;

    fn id_filter(&self) -> Option<&Filter<u64>> {
        self.id.as_ref()
    }

    fn set_id_filter(&mut self, filter: Filter<u64>) {
        self.id = Some(filter);
    }
}

#[async_trait]
impl CrudEntity for Task {
    type Id = u64;
    type Dto = TaskDto;
    type Criteria = TaskCriteria;

    const DOMAIN_NAME: &'static str = "task";

    fn id(&self) -> Option<&u64> {
        self.id.as_ref()
    }

    fn set_id(&mut self, id: u64) {
        self.id = Some(id);
    }

    fn to_dto(&self) -> TaskDto {
        TaskDto {
            id: self.id,
            title: self.title.clone(),
            done: self.done,
            owner: self.owner.clone(),
        }
    }

    fn from_dto(dto: TaskDto) -> Result<Self, CrudError> {
        Ok(Self {
            id: dto.id,
            title: dto.title,
            done: dto.done,
            owner: dto.owner,
        })
    }

    fn matches(&self, criteria: &TaskCriteria) -> bool {
        test_field(criteria.id.as_ref(), self.id.as_ref())
            && test_field(criteria.title.as_ref(), Some(&self.title))
            && test_field(criteria.done.as_ref(), Some(&self.done))
    }

    fn validate(dto: &TaskDto) -> Result<(), CrudError> {
        if dto.title.is_empty() {
            return Err(CrudError::BadRequest("title is required".into()));
        }
        Ok(())
    }

    fn unique_criteria(dto: &TaskDto) -> Option<TaskCriteria> {
        Some(TaskCriteria {
            title: Some(Filter::equals(dto.title.clone())),
            ..TaskCriteria::default()
        })
    }

    async fn on_save(&mut self, user: Option<&User>) -> Result<(), CrudError> {
        if self.owner.is_none() {
            self.owner = user.map(|u| u.username.clone());
        }
        Ok(())
    }

    async fn on_delete(&self, _user: Option<&User>) -> Result<(), CrudError> {
        if self.done {
            return Err(CrudError::Conflict("finished tasks are kept".into()));
        }
        Ok(())
    }
}

// --- Helpers ---

fn start_service() -> Arc<ResourceService<Task, crud_framework::RepositoryClient<Task>>> {
    let (actor, client) = RepositoryActor::<Task>::sequential(16);
    tokio::spawn(actor.run());
    Arc::new(ResourceService::new(client))
}

fn task(title: &str) -> TaskDto {
    TaskDto {
        id: None,
        title: title.into(),
        done: false,
        owner: None,
    }
}

struct TaskDataProvider {
    service: Arc<dyn CrudService<Task>>,
}

impl DataProvider<Task> for TaskDataProvider {
    fn service(&self) -> Arc<dyn CrudService<Task>> {
        Arc::clone(&self.service)
    }

    fn sample_user(&self) -> Option<User> {
        Some(User::new("tester"))
    }

    fn new_dto(&self) -> TaskDto {
        TaskDto {
            owner: Some("tester".into()),
            ..task("write docs")
        }
    }

    fn mandatory_new_dto(&self) -> TaskDto {
        task("ship it")
    }

    fn update_dto(&self, dto: &mut TaskDto) {
        dto.title.push_str(" (revised)");
    }

    fn json_patch(&self) -> Patch {
        serde_json::from_value(json!([{"op": "replace", "path": "/owner", "value": "reviewer"}]))
            .unwrap()
    }

    fn assert_save(&self, before: &TaskDto, after: &TaskDto) {
        assert!(after.id.is_some());
        assert_eq!(before.title, after.title);
        assert_eq!(after.owner.as_deref(), Some("tester"));
    }
}

async fn direct_suite() -> CrudResourceTest<Task, TaskDataProvider, ServiceClient<Task>> {
    let service: Arc<dyn CrudService<Task>> = start_service();
    let provider = TaskDataProvider {
        service: Arc::clone(&service),
    };
    CrudResourceTest::new(provider, ServiceClient::new(service))
}

crud_framework::crud_resource_tests!(direct, direct_suite());

// --- Tests ---

#[tokio::test]
async fn test_service_full_lifecycle() {
    let service = start_service();
    let user = Some(User::new("alice"));

    // 1. Save
    let saved = service.save(task("Alice's task"), user.clone()).await.unwrap();
    assert_eq!(saved.id, Some(1)); // First ID should be 1
    assert_eq!(saved.owner.as_deref(), Some("alice"));

    // 2. Update by id, the path id wins
    let mut changed = saved.clone();
    changed.id = Some(99);
    changed.title = "Renamed".into();
    let updated = service.update_by_id(1, changed, None).await.unwrap();
    assert_eq!(updated.id, Some(1));
    assert_eq!(updated.title, "Renamed");

    // 3. Edit
    let patch: Patch = serde_json::from_value(json!([{"op": "replace", "path": "/done", "value": true}])).unwrap();
    let edited = service.edit_by_id(1, patch, None).await.unwrap();
    assert!(edited.done);

    // 4. Delete is vetoed by the hook
    let vetoed = service.delete_by_id(1, None).await;
    assert!(matches!(vetoed, Err(CrudError::Conflict(_))));
    assert_eq!(service.count_all(None).await.unwrap(), 1);
}

#[tokio::test]
async fn test_uniqueness_and_validation() {
    let service = start_service();
    service.save(task("one"), None).await.unwrap();

    let duplicate = service.save(task("one"), None).await;
    assert!(matches!(duplicate, Err(CrudError::Conflict(_))));

    let blank = service.save(task(""), None).await;
    assert!(matches!(blank, Err(CrudError::BadRequest(_))));

    let missing_id = service.update(task("two"), None).await;
    assert!(matches!(missing_id, Err(CrudError::BadRequest(_))));

    let unknown = service.update_by_id(42, task("two"), None).await;
    assert!(matches!(unknown, Err(CrudError::DomainNotFound(_))));
}

#[tokio::test]
async fn test_patches_must_keep_the_id() {
    let service = start_service();
    let saved = service.save(task("fixed"), None).await.unwrap();
    let patch: Patch = serde_json::from_value(json!([{"op": "replace", "path": "/id", "value": 7}])).unwrap();

    let result = service.edit_by_id(saved.id.unwrap(), patch, None).await;
    assert!(matches!(result, Err(CrudError::BadRequest(_))));
}

#[tokio::test]
async fn test_id_criteria_matches_exactly_one() {
    let service = start_service();
    for title in ["a", "b", "c"] {
        service.save(task(title), None).await.unwrap();
    }
    let matched = service.get_many(id_criteria(2), None).await.unwrap();
    assert_eq!(matched.len(), 1);
    assert_eq!(matched[0].title, "b");

    let page = service
        .get_page(TaskCriteria::default(), Pageable::new(1, 2), None)
        .await
        .unwrap();
    assert_eq!(page.total_elements, 3);
    assert_eq!(page.content.len(), 1);
    assert_eq!(page.content[0].title, "c");

    let empty_page = service
        .get_page(TaskCriteria::default(), Pageable::new(0, 0), None)
        .await;
    assert!(matches!(empty_page, Err(CrudError::BadRequest(_))));
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
}

struct SharedRecorder(Arc<Recorder>);

#[async_trait]
impl ServiceListener<Task> for SharedRecorder {
    async fn before(&self, operation: Operation, _user: Option<&User>) -> Result<(), CrudError> {
        if operation == Operation::DeleteAll {
            return Err(CrudError::Conflict("delete-all is disabled".into()));
        }
        Ok(())
    }

    async fn after(&self, event: &ServiceEvent<Task>, _user: Option<&User>) {
        let entry = match event {
            ServiceEvent::Saved(dto) => format!("saved {}", dto.title),
            ServiceEvent::Updated { previous, current } => {
                format!("updated {} -> {}", previous.title, current.title)
            }
            ServiceEvent::Deleted(id) => format!("deleted {id}"),
        };
        self.0.events.lock().unwrap().push(entry);
    }
}

#[tokio::test]
async fn test_listeners_see_every_write() {
    let (actor, client) = RepositoryActor::<Task>::sequential(16);
    tokio::spawn(actor.run());
    let recorder = Arc::new(Recorder::default());
    let service = ResourceService::new(client).with_listener(SharedRecorder(recorder.clone()));

    let saved = service.save(task("x"), None).await.unwrap();
    let mut renamed = saved.clone();
    renamed.title = "y".into();
    service.update(renamed, None).await.unwrap();
    service.delete_by_id(1, None).await.unwrap();
    let blocked = service.delete_all(None).await;

    assert!(matches!(blocked, Err(CrudError::Conflict(_))));
    assert_eq!(
        *recorder.events.lock().unwrap(),
        vec!["saved x", "updated x -> y", "deleted 1"]
    );
}

#[tokio::test]
async fn test_dispatcher_scope_and_transport_transparency() {
    let service: Arc<dyn CrudService<Task>> = start_service();
    let dispatcher = Dispatcher::new(Arc::clone(&service))
        .with_scope(OperationScope::without([Operation::DeleteAll]));

    let saved = ServiceClient::new(Arc::clone(&service))
        .save(task("via client"), None)
        .await
        .unwrap();
    let fetched = dispatcher
        .dispatch(
            crud_framework::Transport::Direct,
            crud_framework::CrudRequest::GetById {
                id: saved.id.unwrap(),
            },
            None,
        )
        .await
        .unwrap()
        .into_dto()
        .unwrap();
    assert_eq!(fetched, saved);

    let rejected = dispatcher
        .dispatch(
            crud_framework::Transport::Direct,
            crud_framework::CrudRequest::DeleteAll,
            None,
        )
        .await;
    assert_eq!(
        rejected.unwrap_err(),
        CrudError::UnsupportedOperation(Operation::DeleteAll)
    );
}

#[derive(Clone, Default)]
struct StreamLog(Arc<Mutex<Vec<String>>>);

#[async_trait]
impl crud_framework::Interceptor<Task> for StreamLog {
    async fn after_stream(
        &self,
        context: &crud_framework::dispatch::RequestContext,
        result: &Result<(), CrudError>,
    ) {
        self.0
            .lock()
            .unwrap()
            .push(format!("{} {}", context.operation, result.is_ok()));
    }
}

#[tokio::test]
async fn test_get_stream_yields_the_matches_in_order() {
    let service: Arc<dyn CrudService<Task>> = start_service();
    service
        .save_many(vec![task("a"), task("b"), task("c")], None)
        .await
        .unwrap();
    let log = StreamLog::default();
    let dispatcher = Dispatcher::new(Arc::clone(&service)).with_interceptor(log.clone());

    let criteria = TaskCriteria {
        title: Some(Filter {
            nin: Some(vec!["b".into()]),
            ..Filter::default()
        }),
        ..TaskCriteria::default()
    };
    let titles: Vec<String> = dispatcher
        .dispatch_stream(crud_framework::Transport::Direct, criteria, None)
        .await
        .unwrap()
        .map_ok(|dto| dto.title)
        .try_collect()
        .await
        .unwrap();
    assert_eq!(titles, vec!["a", "c"]);
    assert_eq!(*log.0.lock().unwrap(), vec!["get-stream true"]);
}

#[tokio::test]
async fn test_many_writes_are_all_or_nothing() {
    let service = start_service();
    service
        .save_many(vec![task("a"), task("b")], None)
        .await
        .unwrap();

    // 1. The patch only applies to "a", so the batch fails on "b"
    let patch: Patch = serde_json::from_value(json!([
        {"op": "test", "path": "/title", "value": "a"},
        {"op": "replace", "path": "/owner", "value": "X"}
    ]))
    .unwrap();
    let edited = service
        .edit_many(TaskCriteria::default(), patch, None)
        .await;
    assert!(matches!(edited, Err(CrudError::BadRequest(_))));
    let all = service.get_many(TaskCriteria::default(), None).await.unwrap();
    assert!(all.iter().all(|t| t.owner.as_deref() != Some("X")));

    // 2. Second item clashes with an existing title
    let mut renamed = all.clone();
    renamed[0].title = "c".into();
    renamed[1].title = "c".into();
    let updated = service.update_many(renamed, None).await;
    assert!(matches!(updated, Err(CrudError::Conflict(_))));
    assert!(service.get_one(by_title("c"), None).await.is_err());

    // 3. One vetoed delete keeps both
    let done: Patch = serde_json::from_value(json!([{"op": "replace", "path": "/done", "value": true}])).unwrap();
    service.edit_by_id(2, done, None).await.unwrap();
    let deleted = service.delete_many(TaskCriteria::default(), None).await;
    assert!(matches!(deleted, Err(CrudError::Conflict(_))));
    assert_eq!(service.count_all(None).await.unwrap(), 2);

    // 4. A duplicate inside save_many stores nothing
    let saved = service.save_many(vec![task("d"), task("d")], None).await;
    assert!(matches!(saved, Err(CrudError::Conflict(_))));
    assert_eq!(service.count_all(None).await.unwrap(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_saves_keep_titles_unique() {
    let service = start_service();
    for round in 0..20 {
        let title = format!("race-{round}");
        let saves: Vec<_> = (0..16)
            .map(|_| {
                let service = Arc::clone(&service);
                let dto = task(&title);
                tokio::spawn(async move { service.save(dto, None).await })
            })
            .collect();

        let mut stored = 0;
        for save in saves {
            match save.await.unwrap() {
                Ok(_) => stored += 1,
                Err(e) => assert!(matches!(e, CrudError::Conflict(_))),
            }
        }
        assert_eq!(stored, 1);
        assert_eq!(service.count(by_title(&title), None).await.unwrap(), 1);
    }
}

fn by_title(title: &str) -> TaskCriteria {
    TaskCriteria {
        title: Some(Filter::equals(title.to_string())),
        ..TaskCriteria::default()
    }
}
