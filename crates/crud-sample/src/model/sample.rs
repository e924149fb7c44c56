//! The aggregate served by this application.
//!
//! # CRUD Framework
//! [`Sample`] implements [`CrudEntity`], which makes it servable by a
//! [`RepositoryActor`](crud_framework::RepositoryActor) and every transport binding:
//! - Wire shape: [`SampleDto`]
//! - Filters: [`SampleCriteria`]
//! - Rules: names are required and unique

use async_trait::async_trait;
use crud_framework::criteria::test_field;
use crud_framework::{CrudEntity, CrudError, Criteria, Dto, Filter, User};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub id: Option<u64>,
    pub name: String,
    pub description: Option<String>,
    pub tags: Vec<String>,
}

impl Sample {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            description: None,
            tags: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SampleDto {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl SampleDto {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            description: None,
            tags: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

impl Dto for SampleDto {
    type Id = u64;

    fn id(&self) -> Option<&u64> {
        self.id.as_ref()
    }

    fn set_id(&mut self, id: u64) {
        self.id = Some(id);
    }
}

/// Filters over [`Sample`] fields, e.g. `{"name": {"in": ["a", "b"]}}` or `name.in=a&name.in=b`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SampleCriteria {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Filter<u64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<Filter<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<Filter<String>>,
}

impl SampleCriteria {
    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            name: Some(Filter::equals(name.into())),
            ..Self::default()
        }
    }
}

impl Criteria for SampleCriteria {
    type Id = u64;

    fn id_filter(&self) -> Option<&Filter<u64>> {
        self.id.as_ref()
    }

    fn set_id_filter(&mut self, filter: Filter<u64>) {
        self.id = Some(filter);
    }
}

#[async_trait]
impl CrudEntity for Sample {
    type Id = u64;
    type Dto = SampleDto;
    type Criteria = SampleCriteria;

    const DOMAIN_NAME: &'static str = "sample";

    fn id(&self) -> Option<&u64> {
        self.id.as_ref()
    }

    fn set_id(&mut self, id: u64) {
        self.id = Some(id);
    }

    fn to_dto(&self) -> SampleDto {
        SampleDto {
            id: self.id,
            name: self.name.clone(),
            description: self.description.clone(),
            tags: self.tags.clone(),
        }
    }

    fn from_dto(dto: SampleDto) -> Result<Self, CrudError> {
        Ok(Self {
            id: dto.id,
            name: dto.name,
            description: dto.description,
            tags: dto.tags,
        })
    }

    fn matches(&self, criteria: &SampleCriteria) -> bool {
        test_field(criteria.id.as_ref(), self.id.as_ref())
            && test_field(criteria.name.as_ref(), Some(&self.name))
            && test_field(criteria.description.as_ref(), self.description.as_ref())
    }

    fn validate(dto: &SampleDto) -> Result<(), CrudError> {
        if dto.name.trim().is_empty() {
            return Err(CrudError::BadRequest("sample name must not be blank".into()));
        }
        Ok(())
    }

    fn unique_criteria(dto: &SampleDto) -> Option<SampleCriteria> {
        Some(SampleCriteria::by_name(dto.name.clone()))
    }

    async fn on_save(&mut self, user: Option<&User>) -> Result<(), CrudError> {
        let user = user.map(|u| u.username.as_str()).unwrap_or("anonymous");
        debug!(name = %self.name, user, "Creating sample");
        Ok(())
    }

    async fn on_delete(&self, user: Option<&User>) -> Result<(), CrudError> {
        // Samples tagged "protected" can only be removed by an admin.
        let protected = self.tags.iter().any(|tag| tag == "protected");
        if protected && !user.is_some_and(|u| u.has_role("admin")) {
            return Err(CrudError::Conflict(format!(
                "sample {} is protected",
                self.name
            )));
        }
        Ok(())
    }
}
