//! Route-based binding: request/response over routes `api.{version}.{domain}.{operation}`,
//! plus request/stream for `get-stream`.
//!
//! The payload is a JSON [`ChannelMessage`]. The authenticated principal, when the
//! connection carries one, wins over the user named in the envelope. Results are emitted
//! as the bare result JSON; failures as an error frame holding an [`ErrorBody`].

use crate::channel::{ChannelMessage, CriteriaMessage};
use crate::client_trait::CrudClient;
use crate::config::ResourceConfig;
use crate::dispatch::{
    serve, Binding, CrudRequest, CrudResponse, Decoded, Dispatcher, Rejected, Transport,
};
use crate::entity::CrudEntity;
use crate::error::{CrudError, ErrorBody};
use crate::operation::Operation;
use crate::service::DtoStream;
use crate::user::{Jwt, User, UserResolver};
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use serde_json::Value;
use std::sync::Arc;

pub fn route(version: &str, domain: &str, operation: Operation) -> String {
    format!("api.{version}.{domain}.{operation}")
}

#[derive(Debug, Clone, PartialEq)]
pub struct RsocketRequest {
    pub route: String,
    /// JSON text of a `ChannelMessage`.
    pub payload: String,
    pub principal: Option<Jwt>,
}

/// Post-processes a successful result before it is emitted.
pub trait ResponseHook<E: CrudEntity>: Send + Sync + 'static {
    fn on_response(
        &self,
        operation: Operation,
        user: Option<&User>,
        response: CrudResponse<E>,
    ) -> Result<CrudResponse<E>, CrudError>;
}

pub struct RsocketResource<E: CrudEntity> {
    prefix: String,
    dispatcher: Arc<Dispatcher<E>>,
    resolver: Arc<dyn UserResolver>,
    hook: Option<Arc<dyn ResponseHook<E>>>,
}

impl<E: CrudEntity> RsocketResource<E> {
    pub fn new(
        config: &ResourceConfig,
        dispatcher: Arc<Dispatcher<E>>,
        resolver: Arc<dyn UserResolver>,
    ) -> Self {
        Self {
            prefix: format!("api.{}.{}.", config.version, config.domain_name),
            dispatcher,
            resolver,
            hook: None,
        }
    }

    pub fn with_hook(mut self, hook: impl ResponseHook<E>) -> Self {
        self.hook = Some(Arc::new(hook));
        self
    }

    pub async fn request_response(&self, request: RsocketRequest) -> Result<Value, ErrorBody> {
        serve(self, &self.dispatcher, request).await
    }

    /// Serves a request/stream interaction. Each DTO is emitted as its own frame after
    /// passing through the response hook.
    pub async fn request_stream(
        &self,
        request: RsocketRequest,
    ) -> Result<BoxStream<'static, Result<Value, ErrorBody>>, ErrorBody> {
        self.open_stream(request)
            .await
            .map_err(|error| error.to_body())
    }

    async fn open_stream(
        &self,
        request: RsocketRequest,
    ) -> Result<BoxStream<'static, Result<Value, ErrorBody>>, CrudError> {
        let operation = self.operation_of(&request.route)?;
        if !operation.is_streaming() {
            return Err(CrudError::UnsupportedOperation(operation));
        }
        let envelope: ChannelMessage<Value> = serde_json::from_str(&request.payload)?;
        let user = self
            .resolver
            .from_principal(request.principal.as_ref(), envelope.user)?;
        let criteria = serde_json::from_value::<CriteriaMessage<E::Criteria>>(envelope.data)?
            .criteria;
        let dtos = self
            .dispatcher
            .dispatch_stream(Transport::Rsocket, criteria, user.clone())
            .await?;
        let hook = self.hook.clone();
        let frames = dtos.map(move |item| {
            item.and_then(|dto| frame(hook.as_deref(), operation, user.as_ref(), dto))
                .map_err(|error| error.to_body())
        });
        Ok(frames.boxed())
    }

    fn operation_of(&self, route: &str) -> Result<Operation, CrudError> {
        route
            .strip_prefix(&self.prefix)
            .ok_or_else(|| CrudError::RouteNotFound(route.to_string()))?
            .parse()
            .map_err(|_| CrudError::RouteNotFound(route.to_string()))
    }
}

fn frame<E: CrudEntity>(
    hook: Option<&dyn ResponseHook<E>>,
    operation: Operation,
    user: Option<&User>,
    dto: E::Dto,
) -> Result<Value, CrudError> {
    let response = match hook {
        Some(hook) => hook.on_response(operation, user, CrudResponse::Dto(dto))?,
        None => CrudResponse::Dto(dto),
    };
    response.to_json()
}

impl<E: CrudEntity> Binding<E> for RsocketResource<E> {
    type Request = RsocketRequest;
    /// The resolved user, handed to the response hook.
    type Context = Option<User>;
    type Response = Result<Value, ErrorBody>;

    const TRANSPORT: Transport = Transport::Rsocket;

    fn decode(
        &self,
        request: RsocketRequest,
    ) -> Result<Decoded<E, Option<User>>, Rejected<Option<User>>> {
        let operation = self.operation_of(&request.route)?;
        let envelope: ChannelMessage<Value> = serde_json::from_str(&request.payload)
            .map_err(|e| Rejected::new(CrudError::from(e), Some(operation), None))?;
        let user = self
            .resolver
            .from_principal(request.principal.as_ref(), envelope.user)?;
        let crud_request = CrudRequest::from_channel_data(operation, envelope.data)
            .map_err(|error| Rejected::new(error, Some(operation), Some(user.clone())))?;
        Ok(Decoded {
            request: crud_request,
            user: user.clone(),
            context: user,
        })
    }

    fn encode(
        &self,
        operation: Operation,
        user: &Option<User>,
        response: CrudResponse<E>,
    ) -> Result<Self::Response, CrudError> {
        let response = match &self.hook {
            Some(hook) => hook.on_response(operation, user.as_ref(), response)?,
            None => response,
        };
        Ok(Ok(response.to_json()?))
    }

    fn encode_error(
        &self,
        _operation: Option<Operation>,
        _context: Option<&Option<User>>,
        error: CrudError,
    ) -> Self::Response {
        Err(error.to_body())
    }
}

pub struct RsocketClient<E: CrudEntity> {
    resource: Arc<RsocketResource<E>>,
    version: String,
    domain: String,
    principal: Option<Jwt>,
}

impl<E: CrudEntity> RsocketClient<E> {
    pub fn new(config: &ResourceConfig, resource: Arc<RsocketResource<E>>) -> Self {
        Self {
            resource,
            version: config.version.clone(),
            domain: config.domain_name.clone(),
            principal: None,
        }
    }

    /// Authenticates the connection as `principal`.
    pub fn with_principal(mut self, principal: Jwt) -> Self {
        self.principal = Some(principal);
        self
    }

    pub async fn get_stream(
        &self,
        criteria: E::Criteria,
        user: Option<User>,
    ) -> Result<DtoStream<E>, CrudError> {
        let envelope = ChannelMessage::new(CriteriaMessage { criteria }).with_user(user);
        let request = RsocketRequest {
            route: route(&self.version, &self.domain, Operation::GetStream),
            payload: serde_json::to_string(&envelope)?,
            principal: self.principal.clone(),
        };
        let frames = self
            .resource
            .request_stream(request)
            .await
            .map_err(ErrorBody::into_error)?;
        Ok(frames
            .map(|frame| -> Result<E::Dto, CrudError> {
                let value = frame.map_err(ErrorBody::into_error)?;
                Ok(serde_json::from_value(value)?)
            })
            .boxed())
    }
}

#[async_trait]
impl<E: CrudEntity> CrudClient<E> for RsocketClient<E> {
    fn transport(&self) -> Transport {
        Transport::Rsocket
    }

    async fn request(
        &self,
        request: CrudRequest<E>,
        user: Option<User>,
    ) -> Result<CrudResponse<E>, CrudError> {
        let operation = request.operation();
        let envelope = ChannelMessage::new(request.to_channel_data()?).with_user(user);
        let request = RsocketRequest {
            route: route(&self.version, &self.domain, operation),
            payload: serde_json::to_string(&envelope)?,
            principal: self.principal.clone(),
        };
        let value = self
            .resource
            .request_response(request)
            .await
            .map_err(ErrorBody::into_error)?;
        CrudResponse::from_json(operation.result_kind(), value)
    }
}
