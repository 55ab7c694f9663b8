use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use person_store_core::{Person, PersonId, PersonStore};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const API_CONTRACT_VERSION: &str = "api.v1";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct IdRequest {
    pub id: PersonId,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreatePersonRequest {
    #[serde(default)]
    pub person: Option<Person>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpdatePersonRequest {
    pub id: PersonId,
    #[serde(default)]
    pub person: Option<Person>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobTitleRequest {
    #[serde(default)]
    pub query: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SexRequest {
    #[serde(default)]
    pub sex: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgeRequest {
    pub age: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PersonList {
    pub count: usize,
    pub persons: Vec<Person>,
}

impl From<Vec<Person>> for PersonList {
    fn from(persons: Vec<Person>) -> Self {
        Self { count: persons.len(), persons }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PersonLookup {
    pub found: bool,
    pub person: Option<Person>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct MutationResult {
    pub id: PersonId,
    pub applied: bool,
}

pub type ToolHandler = fn(&PersonStoreApi, Value) -> Result<Value>;

/// One entry of the operation table handed to tool-calling clients.
#[derive(Clone, Copy)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub handler: ToolHandler,
}

impl std::fmt::Debug for ToolSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolSpec")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
}

pub const TOOLS: &[ToolSpec] = &[
    ToolSpec {
        name: "get_all_persons",
        description: "Get a list of all persons in the repository.",
        handler: tool_get_all_persons,
    },
    ToolSpec {
        name: "get_person_by_id",
        description: "Get a person by their id. Arguments: {\"id\": number}.",
        handler: tool_get_person_by_id,
    },
    ToolSpec {
        name: "create_person",
        description: "Create a new person. The id is assigned by the repository. \
                      Arguments: {\"person\": Person}.",
        handler: tool_create_person,
    },
    ToolSpec {
        name: "update_person",
        description: "Replace every field of an existing person except the id. \
                      Arguments: {\"id\": number, \"person\": Person}.",
        handler: tool_update_person,
    },
    ToolSpec {
        name: "delete_person",
        description: "Delete a person by their id. Arguments: {\"id\": number}.",
        handler: tool_delete_person,
    },
    ToolSpec {
        name: "search_by_job_title",
        description: "Search persons whose job title contains the query, ignoring case. \
                      Arguments: {\"query\": string}.",
        handler: tool_search_by_job_title,
    },
    ToolSpec {
        name: "filter_by_sex",
        description: "Filter persons by sex, ignoring case. Arguments: {\"sex\": string}.",
        handler: tool_filter_by_sex,
    },
    ToolSpec {
        name: "filter_by_age",
        description: "Filter persons by exact age. Arguments: {\"age\": number}.",
        handler: tool_filter_by_age,
    },
];

#[must_use]
pub fn find_tool(name: &str) -> Option<&'static ToolSpec> {
    TOOLS.iter().find(|tool| tool.name == name)
}

#[derive(Debug, Clone)]
pub struct PersonStoreApi {
    store: Arc<PersonStore>,
}

impl PersonStoreApi {
    #[must_use]
    pub fn new(store: Arc<PersonStore>) -> Self {
        Self { store }
    }

    #[must_use]
    pub fn get_all_persons(&self) -> PersonList {
        self.store.get_all().into()
    }

    #[must_use]
    pub fn get_person_by_id(&self, id: PersonId) -> PersonLookup {
        let person = self.store.get_by_id(id);
        PersonLookup { found: person.is_some(), person }
    }

    /// Create one person; the stored record carries the allocated id.
    ///
    /// # Errors
    /// Returns an error when the request carries no person or the store is not
    /// initialized.
    pub fn create_person(&self, input: CreatePersonRequest) -> Result<Person> {
        Ok(self.store.create(input.person)?)
    }

    /// Replace an existing person. `applied` is `false` when the id is unknown.
    ///
    /// # Errors
    /// Returns an error when the request carries no person or the store is not
    /// initialized.
    pub fn update_person(&self, input: UpdatePersonRequest) -> Result<MutationResult> {
        let applied = self.store.update(input.id, input.person)?;
        Ok(MutationResult { id: input.id, applied })
    }

    /// Delete one person. `applied` is `false` when the id is unknown.
    ///
    /// # Errors
    /// Returns an error when the store is not initialized.
    pub fn delete_person(&self, input: IdRequest) -> Result<MutationResult> {
        let applied = self.store.delete(input.id)?;
        Ok(MutationResult { id: input.id, applied })
    }

    #[must_use]
    pub fn search_by_job_title(&self, input: &JobTitleRequest) -> PersonList {
        self.store.search_by_job_title(input.query.as_deref()).into()
    }

    #[must_use]
    pub fn filter_by_sex(&self, input: &SexRequest) -> PersonList {
        self.store.filter_by_sex(input.sex.as_deref()).into()
    }

    #[must_use]
    pub fn filter_by_age(&self, input: AgeRequest) -> PersonList {
        self.store.filter_by_age(input.age).into()
    }

    #[must_use]
    pub fn tools() -> Vec<ToolDescriptor> {
        TOOLS
            .iter()
            .map(|tool| ToolDescriptor {
                name: tool.name.to_string(),
                description: tool.description.to_string(),
            })
            .collect()
    }

    /// Dispatch one tool call by name with JSON arguments.
    ///
    /// `null` arguments are treated as an empty object.
    ///
    /// # Errors
    /// Returns an error for unknown tool names, arguments that do not match the
    /// tool's request shape, and any store failure.
    pub fn invoke(&self, name: &str, arguments: Value) -> Result<Value> {
        let tool = find_tool(name).ok_or_else(|| anyhow!("unknown tool: {name}"))?;
        tracing::debug!(tool = tool.name, "invoking tool");
        (tool.handler)(self, arguments)
    }
}

fn decode_args<T: DeserializeOwned>(tool: &str, arguments: Value) -> Result<T> {
    let arguments =
        if arguments.is_null() { Value::Object(serde_json::Map::new()) } else { arguments };
    serde_json::from_value(arguments)
        .with_context(|| format!("invalid arguments for tool {tool}"))
}

fn to_value<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).context("failed to serialize tool result")
}

fn tool_get_all_persons(api: &PersonStoreApi, _arguments: Value) -> Result<Value> {
    to_value(&api.get_all_persons())
}

fn tool_get_person_by_id(api: &PersonStoreApi, arguments: Value) -> Result<Value> {
    let input: IdRequest = decode_args("get_person_by_id", arguments)?;
    to_value(&api.get_person_by_id(input.id))
}

fn tool_create_person(api: &PersonStoreApi, arguments: Value) -> Result<Value> {
    let input = decode_args("create_person", arguments)?;
    to_value(&api.create_person(input)?)
}

fn tool_update_person(api: &PersonStoreApi, arguments: Value) -> Result<Value> {
    let input = decode_args("update_person", arguments)?;
    to_value(&api.update_person(input)?)
}

fn tool_delete_person(api: &PersonStoreApi, arguments: Value) -> Result<Value> {
    let input = decode_args("delete_person", arguments)?;
    to_value(&api.delete_person(input)?)
}

fn tool_search_by_job_title(api: &PersonStoreApi, arguments: Value) -> Result<Value> {
    let input: JobTitleRequest = decode_args("search_by_job_title", arguments)?;
    to_value(&api.search_by_job_title(&input))
}

fn tool_filter_by_sex(api: &PersonStoreApi, arguments: Value) -> Result<Value> {
    let input: SexRequest = decode_args("filter_by_sex", arguments)?;
    to_value(&api.filter_by_sex(&input))
}

fn tool_filter_by_age(api: &PersonStoreApi, arguments: Value) -> Result<Value> {
    let input = decode_args("filter_by_age", arguments)?;
    to_value(&api.filter_by_age(input))
}
