//! The generic dispatch path shared by every transport.
//!
//! A transport only describes how its native request becomes a [`CrudRequest`] and how a
//! [`CrudResponse`] (or [`CrudError`]) becomes its native response, by implementing
//! [`Binding`]. [`serve`] does the rest: decode, scope check, interceptors, exactly one
//! service call through [`invoke`], encode.
//!
//! ```text
//! native request ─ decode ─▶ CrudRequest + user ─ Dispatcher ─▶ CrudService
//!                                                                   │
//! native response ◀─ encode ─ CrudResponse / CrudError ◀────────────┘
//! ```

use crate::channel::{
    CriteriaMessage, DtoMessage, DtosMessage, IdDtoMessage, IdJsonPatchMessage, IdMessage,
    IdsMessage, JsonPatchMessage, LongMessage, PageMessage, PageableMessage,
};
use crate::entity::CrudEntity;
use crate::error::CrudError;
use crate::operation::{Operation, OperationScope, ResultKind};
use crate::page::{Page, Pageable};
use crate::service::{CrudService, DtoStream};
use crate::user::User;
use async_trait::async_trait;
use json_patch::Patch;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Typed input of one operation.
#[derive(Debug, Clone)]
pub enum CrudRequest<E: CrudEntity> {
    Save { dto: E::Dto },
    SaveMany { dtos: Vec<E::Dto> },
    Update { dto: E::Dto },
    UpdateById { id: E::Id, dto: E::Dto },
    UpdateMany { dtos: Vec<E::Dto> },
    Delete { criteria: E::Criteria },
    DeleteById { id: E::Id },
    DeleteMany { criteria: E::Criteria },
    DeleteAll,
    Edit { criteria: E::Criteria, patch: Patch },
    EditById { id: E::Id, patch: Patch },
    EditMany { criteria: E::Criteria, patch: Patch },
    GetOne { criteria: E::Criteria },
    GetById { id: E::Id },
    GetMany { criteria: E::Criteria },
    GetPage { criteria: E::Criteria, pageable: Pageable },
    Count { criteria: E::Criteria },
    CountAll,
}

impl<E: CrudEntity> CrudRequest<E> {
    pub fn operation(&self) -> Operation {
        match self {
            CrudRequest::Save { .. } => Operation::Save,
            CrudRequest::SaveMany { .. } => Operation::SaveMany,
            CrudRequest::Update { .. } => Operation::Update,
            CrudRequest::UpdateById { .. } => Operation::UpdateById,
            CrudRequest::UpdateMany { .. } => Operation::UpdateMany,
            CrudRequest::Delete { .. } => Operation::Delete,
            CrudRequest::DeleteById { .. } => Operation::DeleteById,
            CrudRequest::DeleteMany { .. } => Operation::DeleteMany,
            CrudRequest::DeleteAll => Operation::DeleteAll,
            CrudRequest::Edit { .. } => Operation::Edit,
            CrudRequest::EditById { .. } => Operation::EditById,
            CrudRequest::EditMany { .. } => Operation::EditMany,
            CrudRequest::GetOne { .. } => Operation::GetOne,
            CrudRequest::GetById { .. } => Operation::GetById,
            CrudRequest::GetMany { .. } => Operation::GetMany,
            CrudRequest::GetPage { .. } => Operation::GetPage,
            CrudRequest::Count { .. } => Operation::Count,
            CrudRequest::CountAll => Operation::CountAll,
        }
    }

    /// Decodes the `data` payload of an envelope for `operation`.
    pub fn from_channel_data(operation: Operation, data: Value) -> Result<Self, CrudError> {
        Ok(match operation {
            Operation::Save => CrudRequest::Save {
                dto: payload::<DtoMessage<E::Dto>>(data)?.dto,
            },
            Operation::SaveMany => CrudRequest::SaveMany {
                dtos: payload::<DtosMessage<E::Dto>>(data)?.dtos,
            },
            Operation::Update => CrudRequest::Update {
                dto: payload::<DtoMessage<E::Dto>>(data)?.dto,
            },
            Operation::UpdateById => {
                let message: IdDtoMessage<E::Id, E::Dto> = payload(data)?;
                CrudRequest::UpdateById {
                    id: message.id,
                    dto: message.dto,
                }
            }
            Operation::UpdateMany => CrudRequest::UpdateMany {
                dtos: payload::<DtosMessage<E::Dto>>(data)?.dtos,
            },
            Operation::Delete => CrudRequest::Delete {
                criteria: payload::<CriteriaMessage<E::Criteria>>(data)?.criteria,
            },
            Operation::DeleteById => CrudRequest::DeleteById {
                id: payload::<IdMessage<E::Id>>(data)?.id,
            },
            Operation::DeleteMany => CrudRequest::DeleteMany {
                criteria: payload::<CriteriaMessage<E::Criteria>>(data)?.criteria,
            },
            Operation::DeleteAll => CrudRequest::DeleteAll,
            Operation::Edit => {
                let message: JsonPatchMessage<E::Criteria> = payload(data)?;
                CrudRequest::Edit {
                    criteria: message.criteria,
                    patch: message.json_patch,
                }
            }
            Operation::EditById => {
                let message: IdJsonPatchMessage<E::Id> = payload(data)?;
                CrudRequest::EditById {
                    id: message.id,
                    patch: message.json_patch,
                }
            }
            Operation::EditMany => {
                let message: JsonPatchMessage<E::Criteria> = payload(data)?;
                CrudRequest::EditMany {
                    criteria: message.criteria,
                    patch: message.json_patch,
                }
            }
            Operation::GetOne => CrudRequest::GetOne {
                criteria: payload::<CriteriaMessage<E::Criteria>>(data)?.criteria,
            },
            Operation::GetById => CrudRequest::GetById {
                id: payload::<IdMessage<E::Id>>(data)?.id,
            },
            Operation::GetMany => CrudRequest::GetMany {
                criteria: payload::<CriteriaMessage<E::Criteria>>(data)?.criteria,
            },
            Operation::GetPage => {
                let message: PageableMessage<E::Criteria> = payload(data)?;
                CrudRequest::GetPage {
                    criteria: message.criteria,
                    pageable: message.pageable,
                }
            }
            Operation::Count => CrudRequest::Count {
                criteria: payload::<CriteriaMessage<E::Criteria>>(data)?.criteria,
            },
            Operation::CountAll => CrudRequest::CountAll,
            Operation::GetStream => return Err(CrudError::UnsupportedOperation(operation)),
        })
    }

    /// Encodes the request as an envelope `data` payload.
    pub fn to_channel_data(&self) -> Result<Value, CrudError> {
        let value = match self {
            CrudRequest::Save { dto } | CrudRequest::Update { dto } => {
                serde_json::to_value(DtoMessage { dto })?
            }
            CrudRequest::SaveMany { dtos } | CrudRequest::UpdateMany { dtos } => {
                serde_json::to_value(DtosMessage { dtos: dtos.clone() })?
            }
            CrudRequest::UpdateById { id, dto } => serde_json::to_value(IdDtoMessage { id, dto })?,
            CrudRequest::Delete { criteria }
            | CrudRequest::DeleteMany { criteria }
            | CrudRequest::GetOne { criteria }
            | CrudRequest::GetMany { criteria }
            | CrudRequest::Count { criteria } => serde_json::to_value(CriteriaMessage {
                criteria: criteria.clone(),
            })?,
            CrudRequest::DeleteById { id } | CrudRequest::GetById { id } => {
                serde_json::to_value(IdMessage { id })?
            }
            CrudRequest::Edit { criteria, patch } | CrudRequest::EditMany { criteria, patch } => {
                serde_json::to_value(JsonPatchMessage {
                    criteria: criteria.clone(),
                    json_patch: patch.clone(),
                })?
            }
            CrudRequest::EditById { id, patch } => serde_json::to_value(IdJsonPatchMessage {
                id,
                json_patch: patch.clone(),
            })?,
            CrudRequest::GetPage { criteria, pageable } => {
                serde_json::to_value(PageableMessage {
                    criteria: criteria.clone(),
                    pageable: *pageable,
                })?
            }
            CrudRequest::DeleteAll | CrudRequest::CountAll => Value::Object(Default::default()),
        };
        Ok(value)
    }
}

/// Result of one operation, mirroring the service return type.
#[derive(Debug, Clone)]
pub enum CrudResponse<E: CrudEntity> {
    Dto(E::Dto),
    Dtos(Vec<E::Dto>),
    Id(E::Id),
    Ids(Vec<E::Id>),
    Count(u64),
    Page(Page<E::Dto>),
}

impl<E: CrudEntity> PartialEq for CrudResponse<E> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (CrudResponse::Dto(a), CrudResponse::Dto(b)) => a == b,
            (CrudResponse::Dtos(a), CrudResponse::Dtos(b)) => a == b,
            (CrudResponse::Id(a), CrudResponse::Id(b)) => a == b,
            (CrudResponse::Ids(a), CrudResponse::Ids(b)) => a == b,
            (CrudResponse::Count(a), CrudResponse::Count(b)) => a == b,
            (CrudResponse::Page(a), CrudResponse::Page(b)) => a == b,
            _ => false,
        }
    }
}

impl<E: CrudEntity> CrudResponse<E> {
    pub fn kind(&self) -> ResultKind {
        match self {
            CrudResponse::Dto(_) => ResultKind::Dto,
            CrudResponse::Dtos(_) => ResultKind::Dtos,
            CrudResponse::Id(_) => ResultKind::Id,
            CrudResponse::Ids(_) => ResultKind::Ids,
            CrudResponse::Count(_) => ResultKind::Count,
            CrudResponse::Page(_) => ResultKind::Page,
        }
    }

    pub fn into_dto(self) -> Result<E::Dto, CrudError> {
        match self {
            CrudResponse::Dto(dto) => Ok(dto),
            other => Err(other.mismatch(ResultKind::Dto)),
        }
    }

    pub fn into_dtos(self) -> Result<Vec<E::Dto>, CrudError> {
        match self {
            CrudResponse::Dtos(dtos) => Ok(dtos),
            other => Err(other.mismatch(ResultKind::Dtos)),
        }
    }

    pub fn into_id(self) -> Result<E::Id, CrudError> {
        match self {
            CrudResponse::Id(id) => Ok(id),
            other => Err(other.mismatch(ResultKind::Id)),
        }
    }

    pub fn into_ids(self) -> Result<Vec<E::Id>, CrudError> {
        match self {
            CrudResponse::Ids(ids) => Ok(ids),
            other => Err(other.mismatch(ResultKind::Ids)),
        }
    }

    pub fn into_count(self) -> Result<u64, CrudError> {
        match self {
            CrudResponse::Count(count) => Ok(count),
            other => Err(other.mismatch(ResultKind::Count)),
        }
    }

    pub fn into_page(self) -> Result<Page<E::Dto>, CrudError> {
        match self {
            CrudResponse::Page(page) => Ok(page),
            other => Err(other.mismatch(ResultKind::Page)),
        }
    }

    fn mismatch(&self, expected: ResultKind) -> CrudError {
        CrudError::Transport(format!(
            "expected a {expected:?} result, got {:?}",
            self.kind()
        ))
    }

    /// The bare result value (`{...}`, `[...]`, `7`).
    pub fn to_json(&self) -> Result<Value, CrudError> {
        let value = match self {
            CrudResponse::Dto(dto) => serde_json::to_value(dto)?,
            CrudResponse::Dtos(dtos) => serde_json::to_value(dtos)?,
            CrudResponse::Id(id) => serde_json::to_value(id)?,
            CrudResponse::Ids(ids) => serde_json::to_value(ids)?,
            CrudResponse::Count(count) => Value::from(*count),
            CrudResponse::Page(page) => serde_json::to_value(page)?,
        };
        Ok(value)
    }

    pub fn from_json(kind: ResultKind, value: Value) -> Result<Self, CrudError> {
        Ok(match kind {
            ResultKind::Dto => CrudResponse::Dto(payload(value)?),
            ResultKind::Dtos => CrudResponse::Dtos(payload(value)?),
            ResultKind::Id => CrudResponse::Id(payload(value)?),
            ResultKind::Ids => CrudResponse::Ids(payload(value)?),
            ResultKind::Count => CrudResponse::Count(payload(value)?),
            ResultKind::Page => CrudResponse::Page(payload(value)?),
        })
    }

    /// The result wrapped in its callback message (`{"dto": ...}`, `{"result": 7}`).
    pub fn to_channel_data(&self) -> Result<Value, CrudError> {
        let value = match self {
            CrudResponse::Dto(dto) => serde_json::to_value(DtoMessage { dto })?,
            CrudResponse::Dtos(dtos) => serde_json::to_value(DtosMessage { dtos: dtos.clone() })?,
            CrudResponse::Id(id) => serde_json::to_value(IdMessage { id })?,
            CrudResponse::Ids(ids) => serde_json::to_value(IdsMessage { ids: ids.clone() })?,
            CrudResponse::Count(count) => serde_json::to_value(LongMessage { result: *count })?,
            CrudResponse::Page(page) => serde_json::to_value(PageMessage { page: page.clone() })?,
        };
        Ok(value)
    }

    pub fn from_channel_data(kind: ResultKind, data: Value) -> Result<Self, CrudError> {
        Ok(match kind {
            ResultKind::Dto => CrudResponse::Dto(payload::<DtoMessage<E::Dto>>(data)?.dto),
            ResultKind::Dtos => CrudResponse::Dtos(payload::<DtosMessage<E::Dto>>(data)?.dtos),
            ResultKind::Id => CrudResponse::Id(payload::<IdMessage<E::Id>>(data)?.id),
            ResultKind::Ids => CrudResponse::Ids(payload::<IdsMessage<E::Id>>(data)?.ids),
            ResultKind::Count => CrudResponse::Count(payload::<LongMessage>(data)?.result),
            ResultKind::Page => CrudResponse::Page(payload::<PageMessage<E::Dto>>(data)?.page),
        })
    }
}

fn payload<T: DeserializeOwned>(value: Value) -> Result<T, CrudError> {
    serde_json::from_value(value).map_err(CrudError::from)
}

/// Performs exactly one service call for `request`.
pub async fn invoke<E: CrudEntity>(
    service: &dyn CrudService<E>,
    request: CrudRequest<E>,
    user: Option<User>,
) -> Result<CrudResponse<E>, CrudError> {
    match request {
        CrudRequest::Save { dto } => service.save(dto, user).await.map(CrudResponse::Dto),
        CrudRequest::SaveMany { dtos } => {
            service.save_many(dtos, user).await.map(CrudResponse::Dtos)
        }
        CrudRequest::Update { dto } => service.update(dto, user).await.map(CrudResponse::Dto),
        CrudRequest::UpdateById { id, dto } => service
            .update_by_id(id, dto, user)
            .await
            .map(CrudResponse::Dto),
        CrudRequest::UpdateMany { dtos } => service
            .update_many(dtos, user)
            .await
            .map(CrudResponse::Dtos),
        CrudRequest::Delete { criteria } => {
            service.delete(criteria, user).await.map(CrudResponse::Id)
        }
        CrudRequest::DeleteById { id } => {
            service.delete_by_id(id, user).await.map(CrudResponse::Id)
        }
        CrudRequest::DeleteMany { criteria } => service
            .delete_many(criteria, user)
            .await
            .map(CrudResponse::Ids),
        CrudRequest::DeleteAll => service.delete_all(user).await.map(CrudResponse::Ids),
        CrudRequest::Edit { criteria, patch } => service
            .edit(criteria, patch, user)
            .await
            .map(CrudResponse::Dto),
        CrudRequest::EditById { id, patch } => service
            .edit_by_id(id, patch, user)
            .await
            .map(CrudResponse::Dto),
        CrudRequest::EditMany { criteria, patch } => service
            .edit_many(criteria, patch, user)
            .await
            .map(CrudResponse::Dtos),
        CrudRequest::GetOne { criteria } => {
            service.get_one(criteria, user).await.map(CrudResponse::Dto)
        }
        CrudRequest::GetById { id } => service.get_by_id(id, user).await.map(CrudResponse::Dto),
        CrudRequest::GetMany { criteria } => service
            .get_many(criteria, user)
            .await
            .map(CrudResponse::Dtos),
        CrudRequest::GetPage { criteria, pageable } => service
            .get_page(criteria, pageable, user)
            .await
            .map(CrudResponse::Page),
        CrudRequest::Count { criteria } => {
            service.count(criteria, user).await.map(CrudResponse::Count)
        }
        CrudRequest::CountAll => service.count_all(user).await.map(CrudResponse::Count),
    }
}

/// The transport a request arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    Direct,
    Rest,
    Graphql,
    Grpc,
    Kafka,
    Rsocket,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Transport::Direct => "direct",
            Transport::Rest => "rest",
            Transport::Graphql => "graphql",
            Transport::Grpc => "grpc",
            Transport::Kafka => "kafka",
            Transport::Rsocket => "rsocket",
        };
        f.write_str(name)
    }
}

/// What interceptors see of a request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub operation: Operation,
    pub transport: Transport,
    pub user: Option<User>,
    pub started: Instant,
}

/// Cross-cutting behaviour wrapped around every dispatched call.
///
/// `before` hooks run in registration order and may reject the call; `after` hooks run
/// in reverse order with the outcome.
#[async_trait]
pub trait Interceptor<E: CrudEntity>: Send + Sync + 'static {
    async fn before(&self, _context: &RequestContext) -> Result<(), CrudError> {
        Ok(())
    }

    async fn after(&self, _context: &RequestContext, _result: &Result<CrudResponse<E>, CrudError>) {}

    /// Runs once a streaming call has been opened, or has failed to open.
    async fn after_stream(&self, _context: &RequestContext, _result: &Result<(), CrudError>) {}
}

/// Logs every dispatched call with its outcome and duration.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingInterceptor;

#[async_trait]
impl<E: CrudEntity> Interceptor<E> for TracingInterceptor {
    async fn before(&self, context: &RequestContext) -> Result<(), CrudError> {
        let user = context.user.as_ref().map(|u| u.username.as_str());
        debug!(
            domain = E::DOMAIN_NAME,
            operation = %context.operation,
            transport = %context.transport,
            ?user,
            "Dispatching"
        );
        Ok(())
    }

    async fn after(&self, context: &RequestContext, result: &Result<CrudResponse<E>, CrudError>) {
        let elapsed_ms = context.started.elapsed().as_millis() as u64;
        match result {
            Ok(_) => info!(
                domain = E::DOMAIN_NAME,
                operation = %context.operation,
                transport = %context.transport,
                elapsed_ms,
                "Completed"
            ),
            Err(e) => warn!(
                domain = E::DOMAIN_NAME,
                operation = %context.operation,
                transport = %context.transport,
                elapsed_ms,
                status = e.status(),
                error = %e,
                "Failed"
            ),
        }
    }

    async fn after_stream(&self, context: &RequestContext, result: &Result<(), CrudError>) {
        let elapsed_ms = context.started.elapsed().as_millis() as u64;
        match result {
            Ok(()) => info!(
                domain = E::DOMAIN_NAME,
                operation = %context.operation,
                transport = %context.transport,
                elapsed_ms,
                "Stream opened"
            ),
            Err(e) => warn!(
                domain = E::DOMAIN_NAME,
                operation = %context.operation,
                transport = %context.transport,
                elapsed_ms,
                status = e.status(),
                error = %e,
                "Stream failed"
            ),
        }
    }
}

/// Routes typed requests to the service, honouring the scope and interceptors.
pub struct Dispatcher<E: CrudEntity> {
    service: Arc<dyn CrudService<E>>,
    scope: OperationScope,
    interceptors: Vec<Arc<dyn Interceptor<E>>>,
}

impl<E: CrudEntity> Dispatcher<E> {
    pub fn new(service: Arc<dyn CrudService<E>>) -> Self {
        Self {
            service,
            scope: OperationScope::all(),
            interceptors: Vec::new(),
        }
    }

    pub fn with_scope(mut self, scope: OperationScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_interceptor(mut self, interceptor: impl Interceptor<E>) -> Self {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    pub fn scope(&self) -> &OperationScope {
        &self.scope
    }

    pub fn service(&self) -> &Arc<dyn CrudService<E>> {
        &self.service
    }

    pub async fn dispatch(
        &self,
        transport: Transport,
        request: CrudRequest<E>,
        user: Option<User>,
    ) -> Result<CrudResponse<E>, CrudError> {
        let context = self.admit(request.operation(), transport, &user).await?;
        let result = invoke(self.service.as_ref(), request, user).await;
        for interceptor in self.interceptors.iter().rev() {
            interceptor.after(&context, &result).await;
        }
        result
    }

    /// Opens a `get-stream` call. Items are produced lazily by the returned stream.
    pub async fn dispatch_stream(
        &self,
        transport: Transport,
        criteria: E::Criteria,
        user: Option<User>,
    ) -> Result<DtoStream<E>, CrudError> {
        let context = self.admit(Operation::GetStream, transport, &user).await?;
        let result = self.service.get_stream(criteria, user).await;
        let outcome = result.as_ref().map(|_| ()).map_err(Clone::clone);
        for interceptor in self.interceptors.iter().rev() {
            interceptor.after_stream(&context, &outcome).await;
        }
        result
    }

    /// Scope check and `before` hooks.
    async fn admit(
        &self,
        operation: Operation,
        transport: Transport,
        user: &Option<User>,
    ) -> Result<RequestContext, CrudError> {
        if !self.scope.contains(operation) {
            debug!(domain = E::DOMAIN_NAME, %operation, %transport, "Out of scope");
            return Err(CrudError::UnsupportedOperation(operation));
        }
        let context = RequestContext {
            operation,
            transport,
            user: user.clone(),
            started: Instant::now(),
        };
        for interceptor in &self.interceptors {
            interceptor.before(&context).await?;
        }
        Ok(context)
    }
}

/// A decoded native request.
pub struct Decoded<E: CrudEntity, C> {
    pub request: CrudRequest<E>,
    pub user: Option<User>,
    /// Whatever the transport needs again when encoding the reply.
    pub context: C,
}

/// A native request that could not be decoded.
pub struct Rejected<C> {
    pub error: CrudError,
    pub operation: Option<Operation>,
    pub context: Option<C>,
}

impl<C> Rejected<C> {
    pub fn new(error: CrudError, operation: Option<Operation>, context: Option<C>) -> Self {
        Self {
            error,
            operation,
            context,
        }
    }
}

impl<C> From<CrudError> for Rejected<C> {
    fn from(error: CrudError) -> Self {
        Self::new(error, None, None)
    }
}

/// The per-transport half of the dispatch path.
pub trait Binding<E: CrudEntity>: Send + Sync {
    type Request: Send;
    type Context: Send;
    type Response;

    const TRANSPORT: Transport;

    /// Native request to typed request plus the acting user. Failures must already be
    /// normalized to [`CrudError::BadRequest`].
    fn decode(
        &self,
        request: Self::Request,
    ) -> Result<Decoded<E, Self::Context>, Rejected<Self::Context>>;

    fn encode(
        &self,
        operation: Operation,
        context: &Self::Context,
        response: CrudResponse<E>,
    ) -> Result<Self::Response, CrudError>;

    fn encode_error(
        &self,
        operation: Option<Operation>,
        context: Option<&Self::Context>,
        error: CrudError,
    ) -> Self::Response;
}

/// Serves one native request through `binding`.
pub async fn serve<E, B>(binding: &B, dispatcher: &Dispatcher<E>, request: B::Request) -> B::Response
where
    E: CrudEntity,
    B: Binding<E>,
{
    let Decoded {
        request,
        user,
        context,
    } = match binding.decode(request) {
        Ok(decoded) => decoded,
        Err(rejected) => {
            debug!(transport = %B::TRANSPORT, error = %rejected.error, "Rejected");
            return binding.encode_error(
                rejected.operation,
                rejected.context.as_ref(),
                rejected.error,
            );
        }
    };
    let operation = request.operation();
    let result = dispatcher
        .dispatch(B::TRANSPORT, request, user)
        .await
        .and_then(|response| binding.encode(operation, &context, response));
    match result {
        Ok(response) => response,
        Err(error) => binding.encode_error(Some(operation), Some(&context), error),
    }
}
