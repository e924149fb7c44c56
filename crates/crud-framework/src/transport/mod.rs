//! Transport bindings. Each one implements [`Binding`](crate::dispatch::Binding) for its
//! native request shape and ships a matching [`CrudClient`](crate::client_trait::CrudClient).

pub mod graphql;
pub mod grpc;
pub mod kafka;
pub mod rest;
pub mod rsocket;
