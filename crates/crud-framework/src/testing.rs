//! Minimal entity shared by the unit tests.

use crate::criteria::{test_field, Criteria, Filter};
use crate::entity::{CrudEntity, Dto};
use crate::error::CrudError;
use crate::user::User;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq)]
pub struct Note {
    pub id: Option<u64>,
    pub title: String,
    pub locked: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteDto {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub title: String,
    #[serde(default)]
    pub locked: bool,
}

impl NoteDto {
    pub fn new(title: &str) -> Self {
        Self {
            id: None,
            title: title.to_string(),
            locked: false,
        }
    }
}

impl Dto for NoteDto {
    type Id = u64;

    fn id(&self) -> Option<&u64> {
        self.id.as_ref()
    }

    fn set_id(&mut self, id: u64) {
        self.id = Some(id);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoteCriteria {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Filter<u64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<Filter<String>>,
}

impl Criteria for NoteCriteria {
    type Id = u64;

    fn id_filter(&self) -> Option<&Filter<u64>> {
        self.id.as_ref()
    }

    fn set_id_filter(&mut self, filter: Filter<u64>) {
        self.id = Some(filter);
    }
}

#[async_trait]
impl CrudEntity for Note {
    type Id = u64;
    type Dto = NoteDto;
    type Criteria = NoteCriteria;

    const DOMAIN_NAME: &'static str = "note";

    fn id(&self) -> Option<&u64> {
        self.id.as_ref()
    }

    fn set_id(&mut self, id: u64) {
        self.id = Some(id);
    }

    fn to_dto(&self) -> NoteDto {
        NoteDto {
            id: self.id,
            title: self.title.clone(),
            locked: self.locked,
        }
    }

    fn from_dto(dto: NoteDto) -> Result<Self, CrudError> {
        Ok(Self {
            id: dto.id,
            title: dto.title,
            locked: dto.locked,
        })
    }

    fn matches(&self, criteria: &NoteCriteria) -> bool {
        test_field(criteria.id.as_ref(), self.id.as_ref())
            && test_field(criteria.title.as_ref(), Some(&self.title))
    }

    fn validate(dto: &NoteDto) -> Result<(), CrudError> {
        if dto.title.trim().is_empty() {
            return Err(CrudError::BadRequest("title must not be blank".to_string()));
        }
        Ok(())
    }

    fn unique_criteria(dto: &NoteDto) -> Option<NoteCriteria> {
        Some(NoteCriteria {
            title: Some(Filter::equals(dto.title.clone())),
            ..NoteCriteria::default()
        })
    }

    async fn on_update(&mut self, previous: &Self, _user: Option<&User>) -> Result<(), CrudError> {
        if previous.locked {
            return Err(CrudError::Conflict(format!("note {:?} is locked", previous.id)));
        }
        Ok(())
    }
}
