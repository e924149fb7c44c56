//! gRPC-style binding: one unary RPC per operation with typed request and response
//! messages. The acting user comes from the `authorization` metadata entry and failures
//! are canonical status codes.

use crate::channel::{
    CriteriaMessage, DtoMessage, DtosMessage, IdDtoMessage, IdJsonPatchMessage, IdMessage,
    IdsMessage, JsonPatchMessage, LongMessage, PageMessage, PageableMessage,
};
use crate::client_trait::CrudClient;
use crate::dispatch::{
    serve, Binding, CrudRequest, CrudResponse, Decoded, Dispatcher, Rejected, Transport,
};
use crate::entity::CrudEntity;
use crate::error::CrudError;
use crate::operation::Operation;
use crate::user::{User, UserResolver};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

pub type IdMsg<Id> = IdMessage<Id>;
pub type IdsMsg<Id> = IdsMessage<Id>;
pub type DtoMsg<Dto> = DtoMessage<Dto>;
pub type DtosMsg<Dto> = DtosMessage<Dto>;
pub type IdDtoMsg<Id, Dto> = IdDtoMessage<Id, Dto>;
pub type CriteriaMsg<C> = CriteriaMessage<C>;
pub type CriteriaPageableMsg<C> = PageableMessage<C>;
pub type CriteriaJsonPatchMsg<C> = JsonPatchMessage<C>;
pub type IdJsonPatchMsg<Id> = IdJsonPatchMessage<Id>;
pub type CountMsg = LongMessage;
pub type PageMsg<Dto> = PageMessage<Dto>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmptyMsg {}

/// Canonical status codes used by the binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Code {
    InvalidArgument,
    NotFound,
    Aborted,
    Unimplemented,
    Unavailable,
    Internal,
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Code::InvalidArgument => "INVALID_ARGUMENT",
            Code::NotFound => "NOT_FOUND",
            Code::Aborted => "ABORTED",
            Code::Unimplemented => "UNIMPLEMENTED",
            Code::Unavailable => "UNAVAILABLE",
            Code::Internal => "INTERNAL",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrpcStatus {
    pub code: Code,
    pub message: String,
}

impl From<CrudError> for GrpcStatus {
    fn from(error: CrudError) -> Self {
        let code = match &error {
            CrudError::BadRequest(_) => Code::InvalidArgument,
            CrudError::DomainNotFound(_) | CrudError::RouteNotFound(_) => Code::NotFound,
            CrudError::Conflict(_) => Code::Aborted,
            CrudError::UnsupportedOperation(_) => Code::Unimplemented,
            CrudError::RepositoryClosed | CrudError::RepositoryDropped => Code::Unavailable,
            CrudError::Transport(_) => Code::Internal,
        };
        Self {
            code,
            message: error.detail(),
        }
    }
}

impl GrpcStatus {
    pub fn into_error(self) -> CrudError {
        match self.code {
            Code::InvalidArgument => CrudError::BadRequest(self.message),
            Code::NotFound => CrudError::DomainNotFound(self.message),
            Code::Aborted => CrudError::Conflict(self.message),
            Code::Unimplemented => match self.message.parse() {
                Ok(operation) => CrudError::UnsupportedOperation(operation),
                Err(_) => CrudError::Transport(self.message),
            },
            Code::Unavailable => CrudError::RepositoryClosed,
            Code::Internal => CrudError::Transport(self.message),
        }
    }
}

impl fmt::Display for GrpcStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// A unary call: metadata plus one message.
#[derive(Debug, Clone, PartialEq)]
pub struct GrpcRequest<M> {
    pub metadata: BTreeMap<String, String>,
    pub message: M,
}

impl<M> GrpcRequest<M> {
    pub fn new(message: M) -> Self {
        Self {
            metadata: BTreeMap::new(),
            message,
        }
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<String>) -> Self {
        self.metadata.insert(key.to_ascii_lowercase(), value.into());
        self
    }

    pub fn bearer(self, token: &str) -> Self {
        self.with_metadata("authorization", format!("Bearer {token}"))
    }
}

/// What reaches the binding: either an already typed message or raw JSON for `operation`.
pub enum GrpcPayload<E: CrudEntity> {
    Typed(CrudRequest<E>),
    Json(Operation, Value),
}

pub struct GrpcCall<E: CrudEntity> {
    pub metadata: BTreeMap<String, String>,
    pub payload: GrpcPayload<E>,
}

/// The service implementation of one entity type.
pub struct GrpcResource<E: CrudEntity> {
    dispatcher: Arc<Dispatcher<E>>,
    resolver: Arc<dyn UserResolver>,
}

impl<E: CrudEntity> GrpcResource<E> {
    pub fn new(dispatcher: Arc<Dispatcher<E>>, resolver: Arc<dyn UserResolver>) -> Self {
        Self {
            dispatcher,
            resolver,
        }
    }

    async fn call(
        &self,
        metadata: BTreeMap<String, String>,
        request: CrudRequest<E>,
    ) -> Result<CrudResponse<E>, GrpcStatus> {
        let call = GrpcCall {
            metadata,
            payload: GrpcPayload::Typed(request),
        };
        serve(self, &self.dispatcher, call).await
    }

    /// Serves a call whose message is still JSON, as it arrives off the wire.
    pub async fn call_json(
        &self,
        operation: Operation,
        request: GrpcRequest<Value>,
    ) -> Result<Value, GrpcStatus> {
        let call = GrpcCall {
            metadata: request.metadata,
            payload: GrpcPayload::Json(operation, request.message),
        };
        serve(self, &self.dispatcher, call)
            .await?
            .to_channel_data()
            .map_err(GrpcStatus::from)
    }

    pub async fn save(
        &self,
        request: GrpcRequest<DtoMsg<E::Dto>>,
    ) -> Result<DtoMsg<E::Dto>, GrpcStatus> {
        let dto = request.message.dto;
        let response = self.call(request.metadata, CrudRequest::Save { dto }).await?;
        Ok(DtoMsg {
            dto: response.into_dto()?,
        })
    }

    pub async fn save_many(
        &self,
        request: GrpcRequest<DtosMsg<E::Dto>>,
    ) -> Result<DtosMsg<E::Dto>, GrpcStatus> {
        let dtos = request.message.dtos;
        let response = self
            .call(request.metadata, CrudRequest::SaveMany { dtos })
            .await?;
        Ok(DtosMsg {
            dtos: response.into_dtos()?,
        })
    }

    pub async fn update(
        &self,
        request: GrpcRequest<DtoMsg<E::Dto>>,
    ) -> Result<DtoMsg<E::Dto>, GrpcStatus> {
        let dto = request.message.dto;
        let response = self.call(request.metadata, CrudRequest::Update { dto }).await?;
        Ok(DtoMsg {
            dto: response.into_dto()?,
        })
    }

    pub async fn update_by_id(
        &self,
        request: GrpcRequest<IdDtoMsg<E::Id, E::Dto>>,
    ) -> Result<DtoMsg<E::Dto>, GrpcStatus> {
        let IdDtoMessage { id, dto } = request.message;
        let response = self
            .call(request.metadata, CrudRequest::UpdateById { id, dto })
            .await?;
        Ok(DtoMsg {
            dto: response.into_dto()?,
        })
    }

    pub async fn update_many(
        &self,
        request: GrpcRequest<DtosMsg<E::Dto>>,
    ) -> Result<DtosMsg<E::Dto>, GrpcStatus> {
        let dtos = request.message.dtos;
        let response = self
            .call(request.metadata, CrudRequest::UpdateMany { dtos })
            .await?;
        Ok(DtosMsg {
            dtos: response.into_dtos()?,
        })
    }

    pub async fn delete(
        &self,
        request: GrpcRequest<CriteriaMsg<E::Criteria>>,
    ) -> Result<IdMsg<E::Id>, GrpcStatus> {
        let criteria = request.message.criteria;
        let response = self
            .call(request.metadata, CrudRequest::Delete { criteria })
            .await?;
        Ok(IdMsg {
            id: response.into_id()?,
        })
    }

    pub async fn delete_by_id(
        &self,
        request: GrpcRequest<IdMsg<E::Id>>,
    ) -> Result<IdMsg<E::Id>, GrpcStatus> {
        let id = request.message.id;
        let response = self
            .call(request.metadata, CrudRequest::DeleteById { id })
            .await?;
        Ok(IdMsg {
            id: response.into_id()?,
        })
    }

    pub async fn delete_many(
        &self,
        request: GrpcRequest<CriteriaMsg<E::Criteria>>,
    ) -> Result<IdsMsg<E::Id>, GrpcStatus> {
        let criteria = request.message.criteria;
        let response = self
            .call(request.metadata, CrudRequest::DeleteMany { criteria })
            .await?;
        Ok(IdsMsg {
            ids: response.into_ids()?,
        })
    }

    pub async fn delete_all(
        &self,
        request: GrpcRequest<EmptyMsg>,
    ) -> Result<IdsMsg<E::Id>, GrpcStatus> {
        let response = self.call(request.metadata, CrudRequest::DeleteAll).await?;
        Ok(IdsMsg {
            ids: response.into_ids()?,
        })
    }

    pub async fn edit(
        &self,
        request: GrpcRequest<CriteriaJsonPatchMsg<E::Criteria>>,
    ) -> Result<DtoMsg<E::Dto>, GrpcStatus> {
        let JsonPatchMessage {
            criteria,
            json_patch,
        } = request.message;
        let response = self
            .call(
                request.metadata,
                CrudRequest::Edit {
                    criteria,
                    patch: json_patch,
                },
            )
            .await?;
        Ok(DtoMsg {
            dto: response.into_dto()?,
        })
    }

    pub async fn edit_by_id(
        &self,
        request: GrpcRequest<IdJsonPatchMsg<E::Id>>,
    ) -> Result<DtoMsg<E::Dto>, GrpcStatus> {
        let IdJsonPatchMessage { id, json_patch } = request.message;
        let response = self
            .call(
                request.metadata,
                CrudRequest::EditById {
                    id,
                    patch: json_patch,
                },
            )
            .await?;
        Ok(DtoMsg {
            dto: response.into_dto()?,
        })
    }

    pub async fn edit_many(
        &self,
        request: GrpcRequest<CriteriaJsonPatchMsg<E::Criteria>>,
    ) -> Result<DtosMsg<E::Dto>, GrpcStatus> {
        let JsonPatchMessage {
            criteria,
            json_patch,
        } = request.message;
        let response = self
            .call(
                request.metadata,
                CrudRequest::EditMany {
                    criteria,
                    patch: json_patch,
                },
            )
            .await?;
        Ok(DtosMsg {
            dtos: response.into_dtos()?,
        })
    }

    pub async fn get_one(
        &self,
        request: GrpcRequest<CriteriaMsg<E::Criteria>>,
    ) -> Result<DtoMsg<E::Dto>, GrpcStatus> {
        let criteria = request.message.criteria;
        let response = self
            .call(request.metadata, CrudRequest::GetOne { criteria })
            .await?;
        Ok(DtoMsg {
            dto: response.into_dto()?,
        })
    }

    pub async fn get_by_id(
        &self,
        request: GrpcRequest<IdMsg<E::Id>>,
    ) -> Result<DtoMsg<E::Dto>, GrpcStatus> {
        let id = request.message.id;
        let response = self.call(request.metadata, CrudRequest::GetById { id }).await?;
        Ok(DtoMsg {
            dto: response.into_dto()?,
        })
    }

    pub async fn get_many(
        &self,
        request: GrpcRequest<CriteriaMsg<E::Criteria>>,
    ) -> Result<DtosMsg<E::Dto>, GrpcStatus> {
        let criteria = request.message.criteria;
        let response = self
            .call(request.metadata, CrudRequest::GetMany { criteria })
            .await?;
        Ok(DtosMsg {
            dtos: response.into_dtos()?,
        })
    }

    pub async fn get_page(
        &self,
        request: GrpcRequest<CriteriaPageableMsg<E::Criteria>>,
    ) -> Result<PageMsg<E::Dto>, GrpcStatus> {
        let PageableMessage { criteria, pageable } = request.message;
        let response = self
            .call(request.metadata, CrudRequest::GetPage { criteria, pageable })
            .await?;
        Ok(PageMsg {
            page: response.into_page()?,
        })
    }

    pub async fn count(
        &self,
        request: GrpcRequest<CriteriaMsg<E::Criteria>>,
    ) -> Result<CountMsg, GrpcStatus> {
        let criteria = request.message.criteria;
        let response = self
            .call(request.metadata, CrudRequest::Count { criteria })
            .await?;
        Ok(CountMsg {
            result: response.into_count()?,
        })
    }

    pub async fn count_all(&self, request: GrpcRequest<EmptyMsg>) -> Result<CountMsg, GrpcStatus> {
        let response = self.call(request.metadata, CrudRequest::CountAll).await?;
        Ok(CountMsg {
            result: response.into_count()?,
        })
    }
}

impl<E: CrudEntity> Binding<E> for GrpcResource<E> {
    type Request = GrpcCall<E>;
    type Context = ();
    type Response = Result<CrudResponse<E>, GrpcStatus>;

    const TRANSPORT: Transport = Transport::Grpc;

    fn decode(&self, call: GrpcCall<E>) -> Result<Decoded<E, ()>, Rejected<()>> {
        let request = match call.payload {
            GrpcPayload::Typed(request) => request,
            GrpcPayload::Json(operation, message) => {
                CrudRequest::from_channel_data(operation, message)
                    .map_err(|error| Rejected::new(error, Some(operation), None))?
            }
        };
        let authorization = call
            .metadata
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case("authorization"))
            .map(|(_, value)| value.as_str());
        let user = self.resolver.from_token(authorization)?;
        Ok(Decoded {
            request,
            user,
            context: (),
        })
    }

    fn encode(
        &self,
        _operation: Operation,
        _context: &(),
        response: CrudResponse<E>,
    ) -> Result<Self::Response, CrudError> {
        Ok(Ok(response))
    }

    fn encode_error(
        &self,
        _operation: Option<Operation>,
        _context: Option<&()>,
        error: CrudError,
    ) -> Self::Response {
        Err(GrpcStatus::from(error))
    }
}

/// Stub-style client calling the typed RPCs of a [`GrpcResource`].
pub struct GrpcClient<E: CrudEntity> {
    resource: Arc<GrpcResource<E>>,
    token: Option<String>,
}

impl<E: CrudEntity> GrpcClient<E> {
    pub fn new(resource: Arc<GrpcResource<E>>) -> Self {
        Self {
            resource,
            token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    fn wrap<M>(&self, message: M) -> GrpcRequest<M> {
        let request = GrpcRequest::new(message);
        match &self.token {
            Some(token) => request.bearer(token),
            None => request,
        }
    }

    async fn rpc(&self, request: CrudRequest<E>) -> Result<CrudResponse<E>, GrpcStatus> {
        let resource = &self.resource;
        let response = match request {
            CrudRequest::Save { dto } => {
                CrudResponse::Dto(resource.save(self.wrap(DtoMsg { dto })).await?.dto)
            }
            CrudRequest::SaveMany { dtos } => {
                CrudResponse::Dtos(resource.save_many(self.wrap(DtosMsg { dtos })).await?.dtos)
            }
            CrudRequest::Update { dto } => {
                CrudResponse::Dto(resource.update(self.wrap(DtoMsg { dto })).await?.dto)
            }
            CrudRequest::UpdateById { id, dto } => CrudResponse::Dto(
                resource
                    .update_by_id(self.wrap(IdDtoMsg { id, dto }))
                    .await?
                    .dto,
            ),
            CrudRequest::UpdateMany { dtos } => CrudResponse::Dtos(
                resource
                    .update_many(self.wrap(DtosMsg { dtos }))
                    .await?
                    .dtos,
            ),
            CrudRequest::Delete { criteria } => {
                CrudResponse::Id(resource.delete(self.wrap(CriteriaMsg { criteria })).await?.id)
            }
            CrudRequest::DeleteById { id } => {
                CrudResponse::Id(resource.delete_by_id(self.wrap(IdMsg { id })).await?.id)
            }
            CrudRequest::DeleteMany { criteria } => CrudResponse::Ids(
                resource
                    .delete_many(self.wrap(CriteriaMsg { criteria }))
                    .await?
                    .ids,
            ),
            CrudRequest::DeleteAll => {
                CrudResponse::Ids(resource.delete_all(self.wrap(EmptyMsg {})).await?.ids)
            }
            CrudRequest::Edit { criteria, patch } => CrudResponse::Dto(
                resource
                    .edit(self.wrap(CriteriaJsonPatchMsg {
                        criteria,
                        json_patch: patch,
                    }))
                    .await?
                    .dto,
            ),
            CrudRequest::EditById { id, patch } => CrudResponse::Dto(
                resource
                    .edit_by_id(self.wrap(IdJsonPatchMsg {
                        id,
                        json_patch: patch,
                    }))
                    .await?
                    .dto,
            ),
            CrudRequest::EditMany { criteria, patch } => CrudResponse::Dtos(
                resource
                    .edit_many(self.wrap(CriteriaJsonPatchMsg {
                        criteria,
                        json_patch: patch,
                    }))
                    .await?
                    .dtos,
            ),
            CrudRequest::GetOne { criteria } => {
                CrudResponse::Dto(resource.get_one(self.wrap(CriteriaMsg { criteria })).await?.dto)
            }
            CrudRequest::GetById { id } => {
                CrudResponse::Dto(resource.get_by_id(self.wrap(IdMsg { id })).await?.dto)
            }
            CrudRequest::GetMany { criteria } => CrudResponse::Dtos(
                resource
                    .get_many(self.wrap(CriteriaMsg { criteria }))
                    .await?
                    .dtos,
            ),
            CrudRequest::GetPage { criteria, pageable } => CrudResponse::Page(
                resource
                    .get_page(self.wrap(CriteriaPageableMsg { criteria, pageable }))
                    .await?
                    .page,
            ),
            CrudRequest::Count { criteria } => CrudResponse::Count(
                resource
                    .count(self.wrap(CriteriaMsg { criteria }))
                    .await?
                    .result,
            ),
            CrudRequest::CountAll => {
                CrudResponse::Count(resource.count_all(self.wrap(EmptyMsg {})).await?.result)
            }
        };
        Ok(response)
    }
}

#[async_trait]
impl<E: CrudEntity> CrudClient<E> for GrpcClient<E> {
    fn transport(&self) -> Transport {
        Transport::Grpc
    }

    async fn request(
        &self,
        request: CrudRequest<E>,
        _user: Option<User>,
    ) -> Result<CrudResponse<E>, CrudError> {
        self.rpc(request).await.map_err(GrpcStatus::into_error)
    }
}
