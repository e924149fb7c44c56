//! # CRUD Framework
//!
//! Building blocks for exposing one entity type through a uniform set of eighteen CRUD
//! operations over several transports at once: REST, GraphQL, gRPC-style RPC, Kafka-style
//! topics and RSocket-style routes.
//!
//! ## Architecture Overview
//!
//! The framework separates concerns into four layers:
//!
//! 1. **Entity Layer** ([`CrudEntity`]) - the domain type, its DTO, its criteria and hooks
//! 2. **Storage Layer** ([`RepositoryActor`] + [`RepositoryClient`]) - an in-memory store owned
//!    by a single actor task and reached through message passing
//! 3. **Service Layer** ([`CrudService`], [`ResourceService`]) - the CRUD semantics:
//!    validation, uniqueness, lifecycle hooks, JSON Patch edits, paging
//! 4. **Transport Layer** ([`Binding`] implementations under [`transport`]) - decoding native
//!    requests and encoding results and errors
//!
//! Every transport goes through the same [`serve`] function, so the behaviour of an operation
//! does not depend on how it was invoked. Only the wire shape differs.
//!
//! ```text
//!  REST ─┐
//!  GraphQL ─┤                                          ┌──────────────────┐
//!  gRPC ─┼─▶ Binding::decode ─▶ Dispatcher ─▶ CrudService ─▶ RepositoryClient ─▶ │ RepositoryActor │
//!  Kafka ─┤       (scope + interceptors)                                   └──────────────────┘
//!  RSocket ─┘
//! ```
//!
//! ## Concurrency Model
//!
//! - The repository actor runs in its own Tokio task and processes messages sequentially
//! - The service and every binding are `Send + Sync` and shared behind `Arc`
//! - The topic transport runs one consumer task per operation
//!
//! ## Testing
//!
//! - [`mock`] provides [`MockService`](mock::MockService) and a scriptable repository
//! - [`harness`] provides the transport-agnostic resource test suite and the
//!   [`crud_resource_tests!`] macro that turns it into `#[tokio::test]` functions

pub mod actor;
pub mod channel;
pub mod client;
pub mod client_trait;
pub mod config;
pub mod criteria;
pub mod dispatch;
pub mod entity;
pub mod error;
pub mod harness;
pub mod logging;
pub mod message;
pub mod mock;
pub mod operation;
pub mod page;
pub mod repository;
pub mod service;
pub mod transport;
pub mod user;

#[cfg(test)]
mod testing;

#[doc(hidden)]
pub mod __private {
    pub use paste;
}

// Re-export core types for convenience
pub use actor::RepositoryActor;
pub use client::RepositoryClient;
pub use client_trait::{CrudClient, ServiceClient};
pub use config::ResourceConfig;
pub use criteria::{id_criteria, ids_criteria, Criteria, Filter};
pub use dispatch::{
    serve, Binding, CrudRequest, CrudResponse, Dispatcher, Interceptor, TracingInterceptor,
    Transport,
};
pub use entity::{CrudEntity, CrudId, Dto};
pub use error::{CrudError, ErrorBody};
pub use operation::{Operation, OperationScope};
pub use page::{Page, Pageable};
pub use repository::Repository;
pub use service::{CrudService, DtoStream, ResourceService};
pub use user::{User, UserResolver};
