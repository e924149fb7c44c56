//! The operation vocabulary shared by every transport.
//!
//! Each transport selects its route, topic, GraphQL field or RPC from an [`Operation`],
//! and the REST binding takes its success status from [`Operation::status`].

use crate::error::CrudError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// A CRUD operation a resource can expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    Save,
    SaveMany,
    Update,
    UpdateById,
    UpdateMany,
    Delete,
    DeleteById,
    DeleteMany,
    DeleteAll,
    Edit,
    EditById,
    EditMany,
    GetOne,
    GetById,
    GetMany,
    GetPage,
    Count,
    CountAll,
    GetStream,
}

/// Shape of the value a service returns for an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultKind {
    Dto,
    Dtos,
    Id,
    Ids,
    Count,
    Page,
}

impl ResultKind {
    /// Field name carrying the value in wrapped payloads (`DtoType.dto`, `IdMessage.id`, ...).
    pub fn field(self) -> &'static str {
        match self {
            ResultKind::Dto => "dto",
            ResultKind::Dtos => "dtos",
            ResultKind::Id => "id",
            ResultKind::Ids => "ids",
            ResultKind::Count => "count",
            ResultKind::Page => "page",
        }
    }
}

impl Operation {
    pub const ALL: [Operation; 19] = [
        Operation::Save,
        Operation::SaveMany,
        Operation::Update,
        Operation::UpdateById,
        Operation::UpdateMany,
        Operation::Delete,
        Operation::DeleteById,
        Operation::DeleteMany,
        Operation::DeleteAll,
        Operation::Edit,
        Operation::EditById,
        Operation::EditMany,
        Operation::GetOne,
        Operation::GetById,
        Operation::GetMany,
        Operation::GetPage,
        Operation::Count,
        Operation::CountAll,
        Operation::GetStream,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Save => "save",
            Operation::SaveMany => "save-many",
            Operation::Update => "update",
            Operation::UpdateById => "update-by-id",
            Operation::UpdateMany => "update-many",
            Operation::Delete => "delete",
            Operation::DeleteById => "delete-by-id",
            Operation::DeleteMany => "delete-many",
            Operation::DeleteAll => "delete-all",
            Operation::Edit => "edit",
            Operation::EditById => "edit-by-id",
            Operation::EditMany => "edit-many",
            Operation::GetOne => "get-one",
            Operation::GetById => "get-by-id",
            Operation::GetMany => "get-many",
            Operation::GetPage => "get-page",
            Operation::Count => "count",
            Operation::CountAll => "count-all",
            Operation::GetStream => "get-stream",
        }
    }

    /// Root field name of the GraphQL query or mutation.
    pub fn graphql_field(self) -> &'static str {
        match self {
            Operation::Save => "save",
            Operation::SaveMany => "saveMany",
            Operation::Update => "update",
            Operation::UpdateById => "updateById",
            Operation::UpdateMany => "updateMany",
            Operation::Delete => "delete",
            Operation::DeleteById => "deleteById",
            Operation::DeleteMany => "deleteMany",
            Operation::DeleteAll => "deleteAll",
            Operation::Edit => "edit",
            Operation::EditById => "editById",
            Operation::EditMany => "editMany",
            Operation::GetOne => "getOne",
            Operation::GetById => "getById",
            Operation::GetMany => "getMany",
            Operation::GetPage => "getPage",
            Operation::Count => "count",
            Operation::CountAll => "countAll",
            Operation::GetStream => "getStream",
        }
    }

    pub fn from_graphql_field(field: &str) -> Option<Operation> {
        Operation::ALL
            .into_iter()
            .find(|op| op.graphql_field() == field)
    }

    /// Success status of the operation on status-code transports.
    pub fn status(self) -> u16 {
        match self {
            Operation::Save | Operation::SaveMany => 201,
            _ => 200,
        }
    }

    pub fn result_kind(self) -> ResultKind {
        match self {
            Operation::Save
            | Operation::Update
            | Operation::UpdateById
            | Operation::Edit
            | Operation::EditById
            | Operation::GetOne
            | Operation::GetById => ResultKind::Dto,
            Operation::SaveMany
            | Operation::UpdateMany
            | Operation::EditMany
            | Operation::GetMany
            | Operation::GetStream => ResultKind::Dtos,
            Operation::Delete | Operation::DeleteById => ResultKind::Id,
            Operation::DeleteMany | Operation::DeleteAll => ResultKind::Ids,
            Operation::GetPage => ResultKind::Page,
            Operation::Count | Operation::CountAll => ResultKind::Count,
        }
    }

    pub fn is_write(self) -> bool {
        !matches!(
            self,
            Operation::GetOne
                | Operation::GetById
                | Operation::GetMany
                | Operation::GetPage
                | Operation::Count
                | Operation::CountAll
                | Operation::GetStream
        )
    }

    /// Streaming operations answer with a sequence of frames and are only bound on
    /// transports that can carry one.
    pub fn is_streaming(self) -> bool {
        self == Operation::GetStream
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = CrudError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operation::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| CrudError::BadRequest(format!("unknown operation '{s}'")))
    }
}

/// The set of operations a resource exposes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationScope(BTreeSet<Operation>);

impl OperationScope {
    pub fn all() -> Self {
        Self(Operation::ALL.into_iter().collect())
    }

    pub fn only(operations: impl IntoIterator<Item = Operation>) -> Self {
        Self(operations.into_iter().collect())
    }

    pub fn without(operations: impl IntoIterator<Item = Operation>) -> Self {
        let mut scope = Self::all();
        for op in operations {
            scope.0.remove(&op);
        }
        scope
    }

    pub fn contains(&self, operation: Operation) -> bool {
        self.0.contains(&operation)
    }

    pub fn iter(&self) -> impl Iterator<Item = Operation> + '_ {
        self.0.iter().copied()
    }
}

impl Default for OperationScope {
    fn default() -> Self {
        Self::all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip_through_from_str() {
        for op in Operation::ALL {
            assert_eq!(op.as_str().parse::<Operation>().unwrap(), op);
            assert_eq!(Operation::from_graphql_field(op.graphql_field()), Some(op));
        }
        assert!(matches!(
            "launch".parse::<Operation>(),
            Err(CrudError::BadRequest(_))
        ));
    }

    #[test]
    fn serde_uses_kebab_case() {
        let json = serde_json::to_string(&Operation::UpdateById).unwrap();
        assert_eq!(json, "\"update-by-id\"");
    }

    #[test]
    fn saves_are_created_everything_else_ok() {
        assert_eq!(Operation::Save.status(), 201);
        assert_eq!(Operation::SaveMany.status(), 201);
        assert_eq!(Operation::DeleteById.status(), 200);
        assert_eq!(Operation::CountAll.status(), 200);
    }

    #[test]
    fn scope_without_removes_operations() {
        let scope = OperationScope::without([Operation::DeleteAll, Operation::EditMany]);
        assert!(scope.contains(Operation::Save));
        assert!(!scope.contains(Operation::DeleteAll));
        assert!(!scope.contains(Operation::EditMany));
        assert_eq!(scope.iter().count(), Operation::ALL.len() - 2);
    }

    #[test]
    fn reads_are_not_writes() {
        assert!(Operation::EditById.is_write());
        assert!(!Operation::GetPage.is_write());
        assert_eq!(Operation::GetPage.result_kind(), ResultKind::Page);
        assert_eq!(Operation::DeleteAll.result_kind().field(), "ids");
    }

    #[test]
    fn only_get_stream_streams() {
        let streaming: Vec<_> = Operation::ALL
            .into_iter()
            .filter(|op| op.is_streaming())
            .collect();
        assert_eq!(streaming, vec![Operation::GetStream]);
        assert!(!Operation::GetStream.is_write());
        assert_eq!(Operation::GetStream.status(), 200);
    }
}
