mod common;

use crud_framework::channel::{DtoMessage, IdMessage};
use crud_framework::harness::{CrudResourceTest, DataProvider};
use crud_framework::transport::grpc::{Code, EmptyMsg, GrpcClient, GrpcRequest};
use crud_framework::user::TokenRegistry;
use crud_framework::{CrudClient, CrudError, Operation, OperationScope, User};
use crud_sample::data_provider::SampleDataProvider;
use crud_sample::lifecycle::SampleSystem;
use crud_sample::model::{Sample, SampleDto};
use serde_json::json;
use std::sync::Arc;

async fn grpc_suite() -> CrudResourceTest<Sample, SampleDataProvider, GrpcClient<Sample>> {
    let system = common::start();
    CrudResourceTest::new(system.data_provider(), system.grpc_client())
}

crud_framework::crud_resource_tests!(grpc, grpc_suite());

#[tokio::test]
async fn typed_rpcs_round_trip() {
    let system = common::start();
    let grpc = system.grpc_resource();

    let saved = grpc
        .save(GrpcRequest::new(DtoMessage {
            dto: SampleDto::new("typed"),
        }))
        .await
        .unwrap()
        .dto;
    let fetched = grpc
        .get_by_id(GrpcRequest::new(IdMessage {
            id: saved.id.unwrap(),
        }))
        .await
        .unwrap()
        .dto;
    assert_eq!(fetched, saved);

    let count = grpc.count_all(GrpcRequest::new(EmptyMsg {})).await.unwrap();
    assert_eq!(count.result, 1);
}

#[tokio::test]
async fn json_calls_answer_with_channel_payloads() {
    let system = common::start();
    system.data_provider().save_new().await.unwrap();
    let grpc = system.grpc_resource();

    let value = grpc
        .call_json(Operation::Count, GrpcRequest::new(json!({"criteria": {"name": {"eq": "sample-new"}}})))
        .await
        .unwrap();
    assert_eq!(value, json!({"result": 1}));

    let malformed = grpc
        .call_json(Operation::GetById, GrpcRequest::new(json!({"id": "one"})))
        .await
        .unwrap_err();
    assert_eq!(malformed.code, Code::InvalidArgument);
}

#[tokio::test]
async fn errors_map_to_canonical_codes() {
    let mut config = common::config();
    config.operations = OperationScope::without([Operation::DeleteAll]);
    let system = SampleSystem::new(config);
    let grpc = system.grpc_resource();

    let missing = grpc
        .get_by_id(GrpcRequest::new(IdMessage { id: 5 }))
        .await
        .unwrap_err();
    assert_eq!(missing.code, Code::NotFound);

    let blank = grpc
        .save(GrpcRequest::new(DtoMessage {
            dto: SampleDto::new(""),
        }))
        .await
        .unwrap_err();
    assert_eq!(blank.code, Code::InvalidArgument);

    let dto = SampleDto::new("dup");
    grpc.save(GrpcRequest::new(DtoMessage { dto: dto.clone() }))
        .await
        .unwrap();
    let clash = grpc
        .save(GrpcRequest::new(DtoMessage { dto }))
        .await
        .unwrap_err();
    assert_eq!(clash.code, Code::Aborted);

    let unsupported = grpc
        .delete_all(GrpcRequest::new(EmptyMsg {}))
        .await
        .unwrap_err();
    assert_eq!(unsupported.code, Code::Unimplemented);
    assert_eq!(
        system.grpc_client().delete_all(None).await.unwrap_err(),
        CrudError::UnsupportedOperation(Operation::DeleteAll)
    );
}

#[tokio::test]
async fn authorization_metadata_resolves_the_user() {
    let registry = TokenRegistry::new().with_token("ops", User::new("ops").with_role("admin"));
    let system = SampleSystem::with_resolver(common::config(), Arc::new(registry));
    let saved = system
        .service_client()
        .save(SampleDto::new("guarded").with_tags(["protected"]), None)
        .await
        .unwrap();
    let id = saved.id.unwrap();

    let anonymous = system.grpc_client().delete_by_id(id, None).await;
    assert!(matches!(anonymous, Err(CrudError::Conflict(_))));

    let deleted = system
        .grpc_resource()
        .delete_by_id(GrpcRequest::new(IdMessage { id }).bearer("ops"))
        .await
        .unwrap();
    assert_eq!(deleted.id, id);
}
