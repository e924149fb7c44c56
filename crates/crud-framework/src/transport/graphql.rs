//! GraphQL binding.
//!
//! Each operation is one root field, a mutation for writes and a query for reads:
//!
//! ```graphql
//! query getById($input: IdInput) { getById(input: $input) { dto, classType } }
//! mutation deleteAll { deleteAll { ids, classType } }
//! ```
//!
//! The argument travels in `variables.input` using the same JSON as the channel messages.
//! Results are wrapped in a typed payload (`DtoType`, `IdType`, ...) that also names the
//! class of the value.

use crate::channel::{
    CriteriaMessage, DtoMessage, DtosMessage, IdDtoMessage, IdJsonPatchMessage, IdMessage,
    IdsMessage, JsonPatchMessage, PageableMessage,
};
use crate::client_trait::CrudClient;
use crate::dispatch::{
    serve, Binding, CrudRequest, CrudResponse, Decoded, Dispatcher, Rejected, Transport,
};
use crate::entity::{short_type_name, CrudEntity};
use crate::error::{CrudError, ErrorBody};
use crate::operation::{Operation, ResultKind};
use crate::page::Page;
use crate::user::{User, UserResolver};
use async_trait::async_trait;
use axum::extract::State;
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

pub type IdInput<Id> = IdMessage<Id>;
pub type IdsInput<Id> = IdsMessage<Id>;
pub type CriteriaInput<C> = CriteriaMessage<C>;
pub type DtoInput<Dto> = DtoMessage<Dto>;
pub type DtosInput<Dto> = DtosMessage<Dto>;
pub type IdDtoInput<Id, Dto> = IdDtoMessage<Id, Dto>;
pub type CriteriaPageableInput<C> = PageableMessage<C>;
pub type CriteriaJsonPatchInput<C> = JsonPatchMessage<C>;
pub type IdJsonPatchInput<Id> = IdJsonPatchMessage<Id>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DtoType<Dto> {
    pub dto: Dto,
    pub class_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DtosType<Dto> {
    pub dtos: Vec<Dto>,
    pub class_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdType<Id> {
    pub id: Id,
    pub class_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdsType<Id> {
    pub ids: Vec<Id>,
    pub class_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountType {
    pub count: u64,
    pub class_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageType<Dto> {
    pub page: Page<Dto>,
    pub class_type: String,
}

/// Name of the input type an operation's field takes, if any.
pub fn input_type(operation: Operation) -> Option<&'static str> {
    let name = match operation {
        Operation::Save | Operation::Update => "DtoInput",
        Operation::SaveMany | Operation::UpdateMany => "DtosInput",
        Operation::UpdateById => "IdDtoInput",
        Operation::Delete
        | Operation::DeleteMany
        | Operation::GetOne
        | Operation::GetMany
        | Operation::GetStream
        | Operation::Count => "CriteriaInput",
        Operation::DeleteById | Operation::GetById => "IdInput",
        Operation::Edit | Operation::EditMany => "CriteriaJsonPatchInput",
        Operation::EditById => "IdJsonPatchInput",
        Operation::GetPage => "CriteriaPageableInput",
        Operation::DeleteAll | Operation::CountAll => return None,
    };
    Some(name)
}

/// The fixed document for `operation`.
pub fn document(operation: Operation) -> String {
    let keyword = if operation.is_write() {
        "mutation"
    } else {
        "query"
    };
    let field = operation.graphql_field();
    let result = operation.result_kind().field();
    match input_type(operation) {
        Some(input) => format!(
            "{keyword} {field}($input: {input}){{{field}(input: $input){{{result},classType}}}}"
        ),
        None => format!("{keyword} {field}{{{field}{{{result},classType}}}}"),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphqlRequest {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,
    #[serde(default)]
    pub variables: Map<String, Value>,
    /// The HTTP `Authorization` header the request came with.
    #[serde(skip)]
    pub authorization: Option<String>,
}

impl GraphqlRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            operation_name: None,
            variables: Map::new(),
            authorization: None,
        }
    }

    pub fn input(mut self, input: Value) -> Self {
        self.variables.insert("input".to_string(), input);
        self
    }

    pub fn bearer(mut self, token: &str) -> Self {
        self.authorization = Some(format!("Bearer {token}"));
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphqlErrorExtensions {
    pub code: String,
    pub status: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphqlError {
    pub message: String,
    pub extensions: GraphqlErrorExtensions,
}

impl From<CrudError> for GraphqlError {
    fn from(error: CrudError) -> Self {
        let body = error.to_body();
        Self {
            message: body.message,
            extensions: GraphqlErrorExtensions {
                code: body.error,
                status: body.status,
            },
        }
    }
}

impl GraphqlError {
    pub fn into_error(self) -> CrudError {
        ErrorBody {
            status: self.extensions.status,
            error: self.extensions.code,
            message: self.message,
        }
        .into_error()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphqlResponse {
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<GraphqlError>,
}

/// Reads the keyword and root field of a single-operation document.
fn root_field(query: &str) -> Result<(bool, &str), CrudError> {
    let query = query.trim_start();
    let is_mutation = query.starts_with("mutation");
    if !is_mutation && !query.starts_with("query") && !query.starts_with('{') {
        return Err(CrudError::BadRequest(
            "document must start with query or mutation".to_string(),
        ));
    }
    let body = query
        .find('{')
        .map(|start| query[start + 1..].trim_start())
        .ok_or_else(|| CrudError::BadRequest("document has no selection set".to_string()))?;
    let end = body
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(body.len());
    if end == 0 {
        return Err(CrudError::BadRequest("document has no root field".to_string()));
    }
    Ok((is_mutation, &body[..end]))
}

pub struct GraphqlResource<E: CrudEntity> {
    dispatcher: Arc<Dispatcher<E>>,
    resolver: Arc<dyn UserResolver>,
}

impl<E: CrudEntity> GraphqlResource<E> {
    pub fn new(dispatcher: Arc<Dispatcher<E>>, resolver: Arc<dyn UserResolver>) -> Self {
        Self {
            dispatcher,
            resolver,
        }
    }

    pub async fn execute(&self, request: GraphqlRequest) -> GraphqlResponse {
        serve(self, &self.dispatcher, request).await
    }

    /// Mounts the resource as a `POST` endpoint at `path`.
    pub fn router(self: Arc<Self>, path: &str) -> Router {
        Router::new()
            .route(path, post(handle_http::<E>))
            .with_state(self)
    }

    fn class_type(kind: ResultKind) -> String {
        let name = match kind {
            ResultKind::Dto | ResultKind::Dtos | ResultKind::Page => short_type_name::<E::Dto>(),
            ResultKind::Id | ResultKind::Ids => short_type_name::<E::Id>(),
            ResultKind::Count => short_type_name::<u64>(),
        };
        name.to_string()
    }
}

impl<E: CrudEntity> Binding<E> for GraphqlResource<E> {
    type Request = GraphqlRequest;
    type Context = ();
    type Response = GraphqlResponse;

    const TRANSPORT: Transport = Transport::Graphql;

    fn decode(&self, request: GraphqlRequest) -> Result<Decoded<E, ()>, Rejected<()>> {
        let (is_mutation, field) = root_field(&request.query)?;
        let operation = Operation::from_graphql_field(field)
            .ok_or_else(|| CrudError::RouteNotFound(format!("graphql field {field}")))?;
        if operation.is_write() != is_mutation {
            let expected = if operation.is_write() {
                "mutation"
            } else {
                "query"
            };
            let error = CrudError::BadRequest(format!("{field} must be sent as a {expected}"));
            return Err(Rejected::new(error, Some(operation), None));
        }
        let input = request
            .variables
            .get("input")
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()));
        let crud_request = CrudRequest::from_channel_data(operation, input)
            .map_err(|error| Rejected::new(error, Some(operation), None))?;
        let user = self
            .resolver
            .from_token(request.authorization.as_deref())
            .map_err(|error| Rejected::new(error, Some(operation), None))?;
        Ok(Decoded {
            request: crud_request,
            user,
            context: (),
        })
    }

    fn encode(
        &self,
        operation: Operation,
        _context: &(),
        response: CrudResponse<E>,
    ) -> Result<GraphqlResponse, CrudError> {
        let class_type = Self::class_type(response.kind());
        let payload = match response {
            CrudResponse::Dto(dto) => serde_json::to_value(DtoType { dto, class_type })?,
            CrudResponse::Dtos(dtos) => serde_json::to_value(DtosType { dtos, class_type })?,
            CrudResponse::Id(id) => serde_json::to_value(IdType { id, class_type })?,
            CrudResponse::Ids(ids) => serde_json::to_value(IdsType { ids, class_type })?,
            CrudResponse::Count(count) => serde_json::to_value(CountType { count, class_type })?,
            CrudResponse::Page(page) => serde_json::to_value(PageType { page, class_type })?,
        };
        let mut data = Map::new();
        data.insert(operation.graphql_field().to_string(), payload);
        Ok(GraphqlResponse {
            data: Some(Value::Object(data)),
            errors: Vec::new(),
        })
    }

    fn encode_error(
        &self,
        _operation: Option<Operation>,
        _context: Option<&()>,
        error: CrudError,
    ) -> GraphqlResponse {
        GraphqlResponse {
            data: None,
            errors: vec![GraphqlError::from(error)],
        }
    }
}

async fn handle_http<E: CrudEntity>(
    State(resource): State<Arc<GraphqlResource<E>>>,
    headers: HeaderMap,
    Json(mut request): Json<GraphqlRequest>,
) -> Json<GraphqlResponse> {
    request.authorization = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    Json(resource.execute(request).await)
}

/// Sends the fixed per-operation documents to a [`GraphqlResource`].
pub struct GraphqlClient<E: CrudEntity> {
    resource: Arc<GraphqlResource<E>>,
    token: Option<String>,
}

impl<E: CrudEntity> GraphqlClient<E> {
    pub fn new(resource: Arc<GraphqlResource<E>>) -> Self {
        Self {
            resource,
            token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

#[async_trait]
impl<E: CrudEntity> CrudClient<E> for GraphqlClient<E> {
    fn transport(&self) -> Transport {
        Transport::Graphql
    }

    async fn request(
        &self,
        request: CrudRequest<E>,
        _user: Option<User>,
    ) -> Result<CrudResponse<E>, CrudError> {
        let operation = request.operation();
        let mut graphql = GraphqlRequest::new(document(operation));
        if input_type(operation).is_some() {
            graphql = graphql.input(request.to_channel_data()?);
        }
        if let Some(token) = &self.token {
            graphql = graphql.bearer(token);
        }

        let mut response = self.resource.execute(graphql).await;
        if !response.errors.is_empty() {
            return Err(response.errors.remove(0).into_error());
        }
        let kind = operation.result_kind();
        let value = response
            .data
            .as_mut()
            .and_then(|data| data.get_mut(operation.graphql_field()))
            .and_then(|payload| payload.get_mut(kind.field()))
            .map(Value::take)
            .ok_or_else(|| {
                CrudError::Transport(format!("graphql response without {}", kind.field()))
            })?;
        CrudResponse::from_json(kind, value)
    }
}
