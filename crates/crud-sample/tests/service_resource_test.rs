mod common;

use crud_framework::harness::{CrudResourceTest, DataProvider};
use crud_framework::{CrudClient, CrudError, ServiceClient, User};
use crud_sample::data_provider::{SampleDataProvider, MANDATORY_NAME};
use crud_sample::model::{Sample, SampleCriteria, SampleDto};

async fn direct_suite() -> CrudResourceTest<Sample, SampleDataProvider, ServiceClient<Sample>> {
    let system = common::start();
    CrudResourceTest::new(system.data_provider(), system.service_client())
}

crud_framework::crud_resource_tests!(direct, direct_suite());

#[tokio::test]
async fn names_are_unique_across_saves_and_updates() {
    let system = common::start();
    let client = system.service_client();

    let first = client.save(SampleDto::new("taken"), None).await.unwrap();
    let clash = client.save(SampleDto::new("taken"), None).await;
    assert!(matches!(clash, Err(CrudError::Conflict(_))));

    let mut second = client.save(SampleDto::new("free"), None).await.unwrap();
    second.name = first.name.clone();
    let renamed = client.update(second, None).await;
    assert!(matches!(renamed, Err(CrudError::Conflict(_))));

    // Re-saving its own name is not a clash.
    let unchanged = client.update(first.clone(), None).await.unwrap();
    assert_eq!(unchanged, first);
}

#[tokio::test]
async fn protected_samples_survive_anonymous_deletes() {
    let system = common::start();
    let client = system.service_client();
    let kept = client
        .save(SampleDto::new("kept").with_tags(["protected"]), None)
        .await
        .unwrap();
    let id = kept.id.unwrap();

    let anonymous = client.delete_by_id(id, None).await;
    assert!(matches!(anonymous, Err(CrudError::Conflict(_))));

    let admin = User::new("root").with_role("admin");
    assert_eq!(client.delete_by_id(id, Some(admin)).await.unwrap(), id);
    assert_eq!(client.count_all(None).await.unwrap(), 0);
}

#[tokio::test]
async fn criteria_select_by_name() {
    let system = common::start();
    let provider = system.data_provider();
    provider.save_new().await.unwrap();
    let mandatory = provider.save_new_mandatory().await.unwrap();

    let found = system
        .service_client()
        .get_one(SampleCriteria::by_name(MANDATORY_NAME), None)
        .await
        .unwrap();
    assert_eq!(found, mandatory);

    let missing = system
        .service_client()
        .get_one(SampleCriteria::by_name("nobody"), None)
        .await;
    assert!(matches!(missing, Err(CrudError::DomainNotFound(_))));
}

#[tokio::test]
async fn shutdown_stops_the_repository() {
    let system = common::start();
    let provider = system.data_provider();
    provider.save_new().await.unwrap();
    drop(provider);

    system.shutdown().await.unwrap();
}
