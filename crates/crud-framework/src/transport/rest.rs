//! REST binding.
//!
//! | Method | Path (relative to the base URI) | Operation |
//! |--------|---------------------------------|-----------|
//! | POST   | *(base)*                        | save |
//! | POST   | `/save-many`                    | save-many |
//! | PUT    | `/update`                       | update |
//! | PUT    | `/update-many`                  | update-many |
//! | PUT    | `/{id}`                         | update-by-id |
//! | DELETE | `/delete?{criteria}`            | delete |
//! | DELETE | `/delete-many?{criteria}`       | delete-many |
//! | DELETE | `/delete-all`                   | delete-all |
//! | DELETE | `/{id}`                         | delete-by-id |
//! | PATCH  | `/edit?{criteria}`              | edit |
//! | PATCH  | `/edit-many?{criteria}`         | edit-many |
//! | PATCH  | `/{id}`                         | edit-by-id |
//! | GET    | `/get-one?{criteria}`           | get-one |
//! | GET    | `/get-many?{criteria}`          | get-many |
//! | GET    | *(base)* or `/get-page`, `?page&size&{criteria}` | get-page |
//! | GET    | `/count?{criteria}`             | count |
//! | GET    | `/count-all`                    | count-all |
//! | GET    | `/{id}`                         | get-by-id |
//!
//! Criteria come from query parameters (`id.eq=5`), bodies are JSON, edits take a JSON
//! Patch array. Successful responses carry the operation's status; failures carry the
//! error's status and an [`ErrorBody`](crate::error::ErrorBody).

use crate::client_trait::CrudClient;
use crate::config::ResourceConfig;
use crate::criteria::criteria_from_params;
use crate::dispatch::{
    serve, Binding, CrudRequest, CrudResponse, Decoded, Dispatcher, Rejected, Transport,
};
use crate::entity::CrudEntity;
use crate::error::CrudError;
use crate::operation::Operation;
use crate::page::Pageable;
use crate::user::{User, UserResolver};
use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

impl TryFrom<&axum::http::Method> for Method {
    type Error = CrudError;

    fn try_from(method: &axum::http::Method) -> Result<Self, Self::Error> {
        let method = if method == axum::http::Method::GET {
            Method::Get
        } else if method == axum::http::Method::POST {
            Method::Post
        } else if method == axum::http::Method::PUT {
            Method::Put
        } else if method == axum::http::Method::PATCH {
            Method::Patch
        } else if method == axum::http::Method::DELETE {
            Method::Delete
        } else {
            return Err(CrudError::RouteNotFound(format!("method {method}")));
        };
        Ok(method)
    }
}

/// A framework-neutral HTTP request.
#[derive(Debug, Clone, PartialEq)]
pub struct RestRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub authorization: Option<String>,
    pub body: Option<Value>,
}

impl RestRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            authorization: None,
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::Post, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::Put, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::Patch, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    pub fn bearer(mut self, token: &str) -> Self {
        self.authorization = Some(format!("Bearer {token}"));
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RestResponse {
    pub status: u16,
    pub body: Value,
}

impl IntoResponse for RestResponse {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.body)).into_response()
    }
}

/// The REST resource of one entity type.
pub struct RestResource<E: CrudEntity> {
    base_uri: String,
    id_name: String,
    dispatcher: Arc<Dispatcher<E>>,
    resolver: Arc<dyn UserResolver>,
}

impl<E: CrudEntity> RestResource<E> {
    pub fn new(
        config: &ResourceConfig,
        dispatcher: Arc<Dispatcher<E>>,
        resolver: Arc<dyn UserResolver>,
    ) -> Self {
        Self {
            base_uri: config.base_uri.trim_end_matches('/').to_string(),
            id_name: config.id_name.clone(),
            dispatcher,
            resolver,
        }
    }

    pub fn base_uri(&self) -> &str {
        &self.base_uri
    }

    pub async fn handle(&self, request: RestRequest) -> RestResponse {
        serve(self, &self.dispatcher, request).await
    }

    /// Mounts the resource on `{base}` and `{base}/{*rest}`.
    pub fn router(self: Arc<Self>) -> Router {
        let base = self.base_uri.clone();
        Router::new()
            .route(&base, any(handle_http::<E>))
            .route(&format!("{base}/{{*rest}}"), any(handle_http::<E>))
            .with_state(self)
    }

    fn criteria(&self, query: &[(String, String)]) -> Result<E::Criteria, CrudError> {
        criteria_from_params(query, &self.id_name)
    }

    fn route(&self, request: &RestRequest) -> Result<CrudRequest<E>, CrudError> {
        let not_found = || CrudError::RouteNotFound(format!("{} {}", request.method, request.path));
        let rest = request
            .path
            .strip_prefix(&self.base_uri)
            .ok_or_else(not_found)?;
        let segment = match rest.trim_end_matches('/') {
            "" => None,
            other => Some(other.strip_prefix('/').ok_or_else(not_found)?),
        };
        if segment.is_some_and(|s| s.contains('/')) {
            return Err(not_found());
        }

        let request = match (request.method, segment) {
            (Method::Post, None) => CrudRequest::Save {
                dto: body(request)?,
            },
            (Method::Post, Some("save-many")) => CrudRequest::SaveMany {
                dtos: body(request)?,
            },
            (Method::Put, Some("update")) => CrudRequest::Update {
                dto: body(request)?,
            },
            (Method::Put, Some("update-many")) => CrudRequest::UpdateMany {
                dtos: body(request)?,
            },
            (Method::Put, Some(id)) => CrudRequest::UpdateById {
                id: parse_id::<E>(id)?,
                dto: body(request)?,
            },
            (Method::Delete, Some("delete")) => CrudRequest::Delete {
                criteria: self.criteria(&request.query)?,
            },
            (Method::Delete, Some("delete-many")) => CrudRequest::DeleteMany {
                criteria: self.criteria(&request.query)?,
            },
            (Method::Delete, Some("delete-all")) => CrudRequest::DeleteAll,
            (Method::Delete, Some(id)) => CrudRequest::DeleteById {
                id: parse_id::<E>(id)?,
            },
            (Method::Patch, Some("edit")) => CrudRequest::Edit {
                criteria: self.criteria(&request.query)?,
                patch: body(request)?,
            },
            (Method::Patch, Some("edit-many")) => CrudRequest::EditMany {
                criteria: self.criteria(&request.query)?,
                patch: body(request)?,
            },
            (Method::Patch, Some(id)) => CrudRequest::EditById {
                id: parse_id::<E>(id)?,
                patch: body(request)?,
            },
            (Method::Get, Some("get-one")) => CrudRequest::GetOne {
                criteria: self.criteria(&request.query)?,
            },
            (Method::Get, Some("get-many")) => CrudRequest::GetMany {
                criteria: self.criteria(&request.query)?,
            },
            (Method::Get, None | Some("get-page")) => CrudRequest::GetPage {
                criteria: self.criteria(&request.query)?,
                pageable: pageable(&request.query)?,
            },
            (Method::Get, Some("count")) => CrudRequest::Count {
                criteria: self.criteria(&request.query)?,
            },
            (Method::Get, Some("count-all")) => CrudRequest::CountAll,
            (Method::Get, Some(id)) => CrudRequest::GetById {
                id: parse_id::<E>(id)?,
            },
            _ => return Err(not_found()),
        };
        Ok(request)
    }
}

impl<E: CrudEntity> Binding<E> for RestResource<E> {
    type Request = RestRequest;
    type Context = ();
    type Response = RestResponse;

    const TRANSPORT: Transport = Transport::Rest;

    fn decode(&self, request: RestRequest) -> Result<Decoded<E, ()>, Rejected<()>> {
        let crud_request = self.route(&request)?;
        let user = self.resolver.from_token(request.authorization.as_deref())?;
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
    ) -> Result<RestResponse, CrudError> {
        Ok(RestResponse {
            status: operation.status(),
            body: response.to_json()?,
        })
    }

    fn encode_error(
        &self,
        _operation: Option<Operation>,
        _context: Option<&()>,
        error: CrudError,
    ) -> RestResponse {
        let body = error.to_body();
        RestResponse {
            status: body.status,
            body: serde_json::to_value(&body).unwrap_or(Value::Null),
        }
    }
}

fn body<T: DeserializeOwned>(request: &RestRequest) -> Result<T, CrudError> {
    let body = request
        .body
        .clone()
        .ok_or_else(|| CrudError::BadRequest("request body is required".to_string()))?;
    Ok(serde_json::from_value(body)?)
}

fn parse_id<E: CrudEntity>(raw: &str) -> Result<E::Id, CrudError> {
    raw.parse()
        .map_err(|_| CrudError::BadRequest(format!("invalid id '{raw}'")))
}

fn pageable(query: &[(String, String)]) -> Result<Pageable, CrudError> {
    let mut pageable = Pageable::default();
    for (key, value) in query {
        let target = match key.as_str() {
            "page" => &mut pageable.page,
            "size" => &mut pageable.size,
            _ => continue,
        };
        *target = value
            .parse()
            .map_err(|_| CrudError::BadRequest(format!("invalid {key} '{value}'")))?;
    }
    Ok(pageable)
}

async fn handle_http<E: CrudEntity>(
    State(resource): State<Arc<RestResource<E>>>,
    method: axum::http::Method,
    uri: Uri,
    headers: HeaderMap,
    Query(query): Query<Vec<(String, String)>>,
    bytes: Bytes,
) -> RestResponse {
    let method = match Method::try_from(&method) {
        Ok(method) => method,
        Err(error) => return Binding::<E>::encode_error(resource.as_ref(), None, None, error),
    };
    let body = if bytes.is_empty() {
        None
    } else {
        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                let error = CrudError::from(e);
                return Binding::<E>::encode_error(resource.as_ref(), None, None, error);
            }
        }
    };
    let authorization = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let request = RestRequest {
        method,
        path: uri.path().to_string(),
        query,
        authorization,
        body,
    };
    resource.handle(request).await
}

/// In-process client issuing [`RestRequest`]s against a [`RestResource`].
pub struct RestClient<E: CrudEntity> {
    resource: Arc<RestResource<E>>,
    token: Option<String>,
}

impl<E: CrudEntity> RestClient<E> {
    pub fn new(resource: Arc<RestResource<E>>) -> Self {
        Self {
            resource,
            token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Builds the native request for `request`.
    pub fn build(&self, request: CrudRequest<E>) -> Result<RestRequest, CrudError> {
        let base = self.resource.base_uri();
        let at = |suffix: &str| format!("{base}/{suffix}");
        let rest = match request {
            CrudRequest::Save { dto } => RestRequest::post(base).json(to_value(&dto)?),
            CrudRequest::SaveMany { dtos } => {
                RestRequest::post(at("save-many")).json(to_value(&dtos)?)
            }
            CrudRequest::Update { dto } => RestRequest::put(at("update")).json(to_value(&dto)?),
            CrudRequest::UpdateById { id, dto } => {
                RestRequest::put(at(&id.to_string())).json(to_value(&dto)?)
            }
            CrudRequest::UpdateMany { dtos } => {
                RestRequest::put(at("update-many")).json(to_value(&dtos)?)
            }
            CrudRequest::Delete { criteria } => {
                with_criteria(RestRequest::delete(at("delete")), &criteria)?
            }
            CrudRequest::DeleteById { id } => RestRequest::delete(at(&id.to_string())),
            CrudRequest::DeleteMany { criteria } => {
                with_criteria(RestRequest::delete(at("delete-many")), &criteria)?
            }
            CrudRequest::DeleteAll => RestRequest::delete(at("delete-all")),
            CrudRequest::Edit { criteria, patch } => {
                with_criteria(RestRequest::patch(at("edit")), &criteria)?.json(to_value(&patch)?)
            }
            CrudRequest::EditById { id, patch } => {
                RestRequest::patch(at(&id.to_string())).json(to_value(&patch)?)
            }
            CrudRequest::EditMany { criteria, patch } => {
                with_criteria(RestRequest::patch(at("edit-many")), &criteria)?
                    .json(to_value(&patch)?)
            }
            CrudRequest::GetOne { criteria } => {
                with_criteria(RestRequest::get(at("get-one")), &criteria)?
            }
            CrudRequest::GetById { id } => RestRequest::get(at(&id.to_string())),
            CrudRequest::GetMany { criteria } => {
                with_criteria(RestRequest::get(at("get-many")), &criteria)?
            }
            CrudRequest::GetPage { criteria, pageable } => {
                with_criteria(RestRequest::get(base), &criteria)?
                    .query("page", pageable.page)
                    .query("size", pageable.size)
            }
            CrudRequest::Count { criteria } => {
                with_criteria(RestRequest::get(at("count")), &criteria)?
            }
            CrudRequest::CountAll => RestRequest::get(at("count-all")),
        };
        Ok(match &self.token {
            Some(token) => rest.bearer(token),
            None => rest,
        })
    }
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<Value, CrudError> {
    Ok(serde_json::to_value(value)?)
}

/// Flattens criteria JSON into `{field}.{op}={value}` parameters, repeating list operators
/// once per element. An empty `nin` list is left out since it excludes nothing.
fn with_criteria<C: serde::Serialize>(
    mut request: RestRequest,
    criteria: &C,
) -> Result<RestRequest, CrudError> {
    let Value::Object(fields) = to_value(criteria)? else {
        return Ok(request);
    };
    for (field, filter) in fields {
        let Value::Object(ops) = filter else {
            continue;
        };
        for (op, value) in ops {
            let key = format!("{field}.{op}");
            match value {
                Value::Array(items) => {
                    if items.is_empty() && op == "in" {
                        return Err(CrudError::BadRequest(format!(
                            "'{key}' needs at least one value"
                        )));
                    }
                    for item in &items {
                        request = request.query(key.clone(), scalar_text(item));
                    }
                }
                other => request = request.query(key, scalar_text(&other)),
            }
        }
    }
    Ok(request)
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl<E: CrudEntity> CrudClient<E> for RestClient<E> {
    fn transport(&self) -> Transport {
        Transport::Rest
    }

    async fn request(
        &self,
        request: CrudRequest<E>,
        _user: Option<User>,
    ) -> Result<CrudResponse<E>, CrudError> {
        let operation = request.operation();
        let response = self.resource.handle(self.build(request)?).await;
        if response.status >= 400 {
            let body: crate::error::ErrorBody = serde_json::from_value(response.body)
                .map_err(|e| CrudError::Transport(e.to_string()))?;
            return Err(body.into_error());
        }
        if response.status != operation.status() {
            return Err(CrudError::Transport(format!(
                "unexpected status {} for {operation}",
                response.status
            )));
        }
        CrudResponse::from_json(operation.result_kind(), response.body)
    }
}
