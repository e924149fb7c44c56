//! Envelope and payload shapes used by the asynchronous transports.
//!
//! A request travels as `ChannelMessage { user, data, callback }` where `data` is one of the
//! payload messages below, chosen by the operation. The same payload shapes double as the
//! GraphQL inputs and gRPC messages, so every transport speaks the same JSON.

use crate::error::ErrorBody;
use crate::page::{Page, Pageable};
use crate::user::User;
use json_patch::Patch;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Unit of asynchronous request and callback data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelMessage<D> {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
    pub data: D,
    /// Topic or route the result is delivered to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl<D> ChannelMessage<D> {
    pub fn new(data: D) -> Self {
        Self {
            user: None,
            data,
            callback: None,
            metadata: BTreeMap::new(),
            status: None,
            error: None,
        }
    }

    pub fn with_user(mut self, user: Option<User>) -> Self {
        self.user = user;
        self
    }

    pub fn with_callback(mut self, callback: impl Into<String>) -> Self {
        self.callback = Some(callback.into());
        self
    }

    /// The callback target, ignoring blank values.
    pub fn callback_channel(&self) -> Option<&str> {
        self.callback
            .as_deref()
            .map(str::trim)
            .filter(|callback| !callback.is_empty())
    }
}

impl ChannelMessage<Value> {
    /// Failure callback carrying `error` instead of data.
    pub fn failure(error: ErrorBody) -> Self {
        let mut message = Self::new(Value::Null);
        message.status = Some(error.status);
        message.error = Some(error);
        message
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdMessage<Id> {
    pub id: Id,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdsMessage<Id> {
    pub ids: Vec<Id>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DtoMessage<Dto> {
    pub dto: Dto,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DtosMessage<Dto> {
    pub dtos: Vec<Dto>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdDtoMessage<Id, Dto> {
    pub id: Id,
    pub dto: Dto,
}

/// Criteria payload. A missing `criteria` matches everything.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(
    serialize = "C: Serialize",
    deserialize = "C: DeserializeOwned + Default"
))]
pub struct CriteriaMessage<C> {
    #[serde(default)]
    pub criteria: C,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(
    serialize = "C: Serialize",
    deserialize = "C: DeserializeOwned + Default"
))]
pub struct PageableMessage<C> {
    #[serde(default)]
    pub criteria: C,
    #[serde(default)]
    pub pageable: Pageable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    rename_all = "camelCase",
    bound(
        serialize = "C: Serialize",
        deserialize = "C: DeserializeOwned + Default"
    )
)]
pub struct JsonPatchMessage<C> {
    #[serde(default)]
    pub criteria: C,
    pub json_patch: Patch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdJsonPatchMessage<Id> {
    pub id: Id,
    pub json_patch: Patch,
}

/// Count result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LongMessage {
    pub result: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageMessage<Dto> {
    pub page: Page<Dto>,
}
