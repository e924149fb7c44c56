//! # System Lifecycle
//!
//! [`SampleSystem`] wires one [`Sample`] resource end to end:
//!
//! 1. **Repository** - a [`RepositoryActor`] task owning the store
//! 2. **Service** - a [`ResourceService`] over the actor's client
//! 3. **Dispatcher** - the operation scope from [`ResourceConfig`] plus a [`TracingInterceptor`]
//! 4. **Bindings** - REST, GraphQL, gRPC and RSocket resources sharing the dispatcher, and
//!    one Kafka listener task per operation topic on an [`InMemoryBroker`]
//!
//! ## Graceful Shutdown
//!
//! [`SampleSystem::shutdown`] closes the broker, which ends every listener, then releases
//! the bindings. The repository actor stops once the last client handle is gone, so
//! clients handed out by the system must be dropped before shutting down.

use crate::data_provider::SampleDataProvider;
use crate::model::Sample;
use axum::Router;
use crud_framework::transport::graphql::{GraphqlClient, GraphqlResource};
use crud_framework::transport::grpc::{GrpcClient, GrpcResource};
use crud_framework::transport::kafka::{ChannelClient, InMemoryBroker, KafkaClient, KafkaListener};
use crud_framework::transport::rest::{RestClient, RestResource};
use crud_framework::transport::rsocket::{RsocketClient, RsocketResource};
use crud_framework::user::AnonymousResolver;
use crud_framework::{
    CrudService, Dispatcher, RepositoryActor, ResourceConfig, ResourceService, ServiceClient,
    TracingInterceptor, UserResolver,
};
use std::sync::Arc;
use tokio::task::{JoinError, JoinHandle};
use tracing::info;

pub struct SampleSystem {
    config: ResourceConfig,
    service: Arc<dyn CrudService<Sample>>,
    dispatcher: Arc<Dispatcher<Sample>>,
    rest: Arc<RestResource<Sample>>,
    graphql: Arc<GraphqlResource<Sample>>,
    grpc: Arc<GrpcResource<Sample>>,
    rsocket: Arc<RsocketResource<Sample>>,
    broker: InMemoryBroker,
    repository: JoinHandle<()>,
    listeners: Vec<JoinHandle<()>>,
}

impl SampleSystem {
    /// Starts a system that treats every caller as anonymous. Must run inside a Tokio runtime.
    pub fn new(config: ResourceConfig) -> Self {
        Self::with_resolver(config, Arc::new(AnonymousResolver))
    }

    pub fn with_resolver(config: ResourceConfig, resolver: Arc<dyn UserResolver>) -> Self {
        let (actor, repository_client) = RepositoryActor::<Sample>::sequential(config.buffer_size);
        let repository = tokio::spawn(actor.run());

        let service: Arc<dyn CrudService<Sample>> =
            Arc::new(ResourceService::new(repository_client));
        let dispatcher = Arc::new(
            Dispatcher::new(Arc::clone(&service))
                .with_scope(config.operations.clone())
                .with_interceptor(TracingInterceptor),
        );

        let rest = Arc::new(RestResource::new(
            &config,
            Arc::clone(&dispatcher),
            Arc::clone(&resolver),
        ));
        let graphql = Arc::new(GraphqlResource::new(
            Arc::clone(&dispatcher),
            Arc::clone(&resolver),
        ));
        let grpc = Arc::new(GrpcResource::new(
            Arc::clone(&dispatcher),
            Arc::clone(&resolver),
        ));
        let rsocket = Arc::new(RsocketResource::new(
            &config,
            Arc::clone(&dispatcher),
            resolver,
        ));

        let broker = InMemoryBroker::new();
        let listener = Arc::new(KafkaListener::new(
            &config,
            Arc::clone(&dispatcher),
            Arc::new(broker.clone()),
        ));
        let listeners = listener.start(&broker);

        info!(
            domain = %config.domain_name,
            base_uri = %config.base_uri,
            listeners = listeners.len(),
            "Sample system started"
        );

        Self {
            config,
            service,
            dispatcher,
            rest,
            graphql,
            grpc,
            rsocket,
            broker,
            repository,
            listeners,
        }
    }

    pub fn config(&self) -> &ResourceConfig {
        &self.config
    }

    pub fn service(&self) -> Arc<dyn CrudService<Sample>> {
        Arc::clone(&self.service)
    }

    pub fn dispatcher(&self) -> Arc<Dispatcher<Sample>> {
        Arc::clone(&self.dispatcher)
    }

    pub fn broker(&self) -> &InMemoryBroker {
        &self.broker
    }

    pub fn data_provider(&self) -> SampleDataProvider {
        SampleDataProvider::new(self.service())
    }

    pub fn rest_resource(&self) -> Arc<RestResource<Sample>> {
        Arc::clone(&self.rest)
    }

    pub fn graphql_resource(&self) -> Arc<GraphqlResource<Sample>> {
        Arc::clone(&self.graphql)
    }

    pub fn grpc_resource(&self) -> Arc<GrpcResource<Sample>> {
        Arc::clone(&self.grpc)
    }

    pub fn rsocket_resource(&self) -> Arc<RsocketResource<Sample>> {
        Arc::clone(&self.rsocket)
    }

    pub fn service_client(&self) -> ServiceClient<Sample> {
        ServiceClient::new(self.service())
    }

    pub fn rest_client(&self) -> RestClient<Sample> {
        RestClient::new(self.rest_resource())
    }

    pub fn graphql_client(&self) -> GraphqlClient<Sample> {
        GraphqlClient::new(self.graphql_resource())
    }

    pub fn grpc_client(&self) -> GrpcClient<Sample> {
        GrpcClient::new(self.grpc_resource())
    }

    pub fn kafka_client(&self) -> KafkaClient<Sample> {
        KafkaClient::new(&self.config, self.broker.clone())
    }

    /// Fire-and-forget publisher on the operation topics.
    pub fn channel_client(&self) -> ChannelClient<Sample> {
        ChannelClient::new(&self.config, Arc::new(self.broker.clone()))
    }

    pub fn rsocket_client(&self) -> RsocketClient<Sample> {
        RsocketClient::new(&self.config, self.rsocket_resource())
    }

    /// REST under the configured base URI, GraphQL at `graphql_path`.
    pub fn router(&self, graphql_path: &str) -> Router {
        self.rest_resource()
            .router()
            .merge(self.graphql_resource().router(graphql_path))
    }

    pub async fn shutdown(self) -> Result<(), JoinError> {
        info!("Shutting down sample system");
        self.broker.close();
        for handle in self.listeners {
            handle.await?;
        }

        // Release every handle on the repository client so the actor's mailbox closes.
        drop(self.rest);
        drop(self.graphql);
        drop(self.grpc);
        drop(self.rsocket);
        drop(self.dispatcher);
        drop(self.service);
        self.repository.await?;

        info!("Sample system stopped");
        Ok(())
    }
}
