//! Structured filters shared by every criteria-based operation.
//!
//! A criteria type is a plain serde struct whose fields are [`Filter`]s, for example:
//!
//! ```rust,ignore
//! #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
//! #[serde(default)]
//! struct SampleCriteria {
//!     id: Option<Filter<u64>>,
//!     name: Option<Filter<String>>,
//! }
//! ```
//!
//! On the wire it is the same JSON everywhere (`{"id": {"in": [1, 2]}}`), and REST
//! builds it from query parameters such as `id.eq=1` or `name.in=a&name.in=b`.

use crate::entity::CrudId;
use crate::error::CrudError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt::Debug;

/// Query parameters consumed by paging rather than by criteria.
pub const RESERVED_PARAMS: [&str; 3] = ["page", "size", "sort"];

const FILTER_OPS: [&str; 9] = ["eq", "ne", "in", "nin", "gt", "gte", "lt", "lte", "exists"];

/// Operators taking a list, one query parameter per element.
const LIST_OPS: [&str; 2] = ["in", "nin"];

/// A filter predicate object. Every criteria can at least express "match by ID(s)".
///
/// Implementors must deserialize from a JSON object that names only some of their fields
/// (`#[serde(default)]` on the struct).
pub trait Criteria:
    Clone + Debug + Default + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    type Id: CrudId;

    fn id_filter(&self) -> Option<&Filter<Self::Id>>;

    fn set_id_filter(&mut self, filter: Filter<Self::Id>);
}

/// Comparison predicates over one field. Every present predicate must hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter<T> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eq: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ne: Option<T>,
    #[serde(rename = "in", skip_serializing_if = "Option::is_none")]
    pub in_: Option<Vec<T>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nin: Option<Vec<T>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gt: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gte: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lt: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lte: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exists: Option<bool>,
}

impl<T> Default for Filter<T> {
    fn default() -> Self {
        Self {
            eq: None,
            ne: None,
            in_: None,
            nin: None,
            gt: None,
            gte: None,
            lt: None,
            lte: None,
            exists: None,
        }
    }
}

impl<T: PartialOrd> Filter<T> {
    pub fn equals(value: T) -> Self {
        Self {
            eq: Some(value),
            ..Self::default()
        }
    }

    pub fn one_of(values: Vec<T>) -> Self {
        Self {
            in_: Some(values),
            ..Self::default()
        }
    }

    /// Tests a field value; `None` is an absent field.
    ///
    /// An absent field fails every positive predicate (`eq`, `in`, ranges) and passes the
    /// negative ones (`ne`, `nin`).
    pub fn test(&self, value: Option<&T>) -> bool {
        if let Some(exists) = self.exists {
            if exists != value.is_some() {
                return false;
            }
        }
        let Some(v) = value else {
            return self.eq.is_none()
                && self.in_.is_none()
                && self.gt.is_none()
                && self.gte.is_none()
                && self.lt.is_none()
                && self.lte.is_none();
        };
        self.eq.as_ref().map_or(true, |e| v == e)
            && self.ne.as_ref().map_or(true, |n| v != n)
            && self.in_.as_ref().map_or(true, |set| set.contains(v))
            && self.nin.as_ref().map_or(true, |set| !set.contains(v))
            && self.gt.as_ref().map_or(true, |g| v > g)
            && self.gte.as_ref().map_or(true, |g| v >= g)
            && self.lt.as_ref().map_or(true, |l| v < l)
            && self.lte.as_ref().map_or(true, |l| v <= l)
    }
}

/// Helper for optional filter fields on criteria structs.
pub fn test_field<T: PartialOrd>(filter: Option<&Filter<T>>, value: Option<&T>) -> bool {
    filter.map_or(true, |f| f.test(value))
}

/// Criteria matching exactly the entity with `id`.
pub fn id_criteria<C: Criteria>(id: C::Id) -> C {
    let mut criteria = C::default();
    criteria.set_id_filter(Filter::equals(id));
    criteria
}

/// Criteria matching exactly the entities whose ID is in `ids`.
pub fn ids_criteria<C: Criteria>(ids: impl IntoIterator<Item = C::Id>) -> C {
    let mut criteria = C::default();
    criteria.set_id_filter(Filter::one_of(ids.into_iter().collect()));
    criteria
}

/// Builds criteria from `{field}.{op}={value}` query parameters.
///
/// A key without an operator means `eq`. `in` and `nin` collect every repeat of their
/// parameter, any other operator may appear once. Values are tried as JSON scalars first
/// (`5`, `true`) and as plain strings when the field rejects that, so `name.eq=42` still
/// reaches a string field.
///
/// `{id_name}` addresses the ID filter whatever the criteria calls its ID field. Any other
/// field must exist in `C`; an unknown one is a `BadRequest` rather than a dropped filter.
pub fn criteria_from_params<C: Criteria>(
    params: &[(String, String)],
    id_name: &str,
) -> Result<C, CrudError> {
    let mut fields: BTreeMap<&str, Vec<(&str, &str)>> = BTreeMap::new();
    for (key, value) in params {
        if RESERVED_PARAMS.contains(&key.as_str()) {
            continue;
        }
        let (field, op) = key.rsplit_once('.').unwrap_or((key.as_str(), "eq"));
        if field.is_empty() || !FILTER_OPS.contains(&op) {
            return Err(CrudError::BadRequest(format!(
                "invalid criteria parameter '{key}'"
            )));
        }
        fields.entry(field).or_default().push((op, value.as_str()));
    }

    let mut criteria = Map::new();
    let mut id_filter = None;
    for (field, ops) in fields {
        if field == id_name {
            id_filter = Some(decode_field(field, &ops, |filter| {
                Ok(serde_json::from_value::<Filter<C::Id>>(filter)?)
            })?);
            continue;
        }
        let filter = decode_field(field, &ops, |filter| {
            let parsed: C = serde_json::from_value(single_field(field, filter.clone()))?;
            if serde_json::to_value(&parsed)?
                .get(field)
                .map_or(true, Value::is_null)
            {
                return Err(CrudError::BadRequest("not a criteria field".to_string()));
            }
            Ok(filter)
        })?;
        criteria.insert(field.to_string(), filter);
    }

    let mut criteria: C = serde_json::from_value(Value::Object(criteria))?;
    if let Some(filter) = id_filter {
        criteria.set_id_filter(filter);
    }
    Ok(criteria)
}

/// Decodes one field's filter from its typed form, falling back to plain strings.
fn decode_field<T>(
    field: &str,
    ops: &[(&str, &str)],
    decode: impl Fn(Value) -> Result<T, CrudError>,
) -> Result<T, CrudError> {
    match decode(filter_object(field, ops, scalar)?) {
        Ok(decoded) => Ok(decoded),
        Err(_) => decode(filter_object(field, ops, |raw| Value::String(raw.to_string()))?)
            .map_err(|e| CrudError::BadRequest(format!("criteria field '{field}': {}", e.detail()))),
    }
}

fn filter_object(
    field: &str,
    ops: &[(&str, &str)],
    convert: impl Fn(&str) -> Value,
) -> Result<Value, CrudError> {
    let mut filter = Map::new();
    for &(op, raw) in ops {
        if LIST_OPS.contains(&op) {
            let list = filter
                .entry(op)
                .or_insert_with(|| Value::Array(Vec::new()));
            if let Value::Array(items) = list {
                items.push(convert(raw));
            }
        } else if filter.insert(op.to_string(), convert(raw)).is_some() {
            return Err(CrudError::BadRequest(format!(
                "repeated criteria parameter '{field}.{op}'"
            )));
        }
    }
    Ok(Value::Object(filter))
}

fn single_field(field: &str, filter: Value) -> Value {
    let mut object = Map::new();
    object.insert(field.to_string(), filter);
    Value::Object(object)
}

fn scalar(raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(value @ (Value::Number(_) | Value::Bool(_))) => value,
        _ => Value::String(raw.to_string()),
    }
}
