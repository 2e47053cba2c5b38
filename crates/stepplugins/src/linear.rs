//! Linear issues over the GraphQL API
//!
//! Both actions authenticate with `LINEAR_API_KEY`. Ticket creation targets
//! `LINEAR_TEAM_ID` when set and the workspace's first team otherwise.

use crate::common::{json_response, optional_str, require_credential, require_str, transport, trim_base};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use stepcore::{Action, ActionError, ActionResult, ConfigField, Credentials, FieldType, Fields, Value};
use stepruntime::{ActionDescriptor, IntegrationInfo};
use tracing::{debug, info};

pub const CREATE_TICKET: &str = "linear/create-ticket";
pub const FIND_ISSUES: &str = "linear/find-issues";

const API_KEY: &str = "LINEAR_API_KEY";
const TEAM_ID: &str = "LINEAR_TEAM_ID";

const TEAMS_QUERY: &str = "query { teams(first: 1) { nodes { id } } }";

const CREATE_ISSUE: &str = "mutation IssueCreate($input: IssueCreateInput!) { \
    issueCreate(input: $input) { success issue { id identifier title url } } }";

const FIND_ISSUES_QUERY: &str = "query Issues($filter: IssueFilter) { \
    issues(filter: $filter, first: 50) { nodes { id identifier title url priority state { name } } } }";

#[derive(Clone)]
struct LinearClient {
    http: reqwest::Client,
    endpoint: String,
}

impl LinearClient {
    fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: format!("{}/graphql", trim_base(base_url)),
        }
    }

    async fn query(
        &self,
        api_key: &str,
        query: &str,
        variables: serde_json::Value,
    ) -> Result<serde_json::Value, ActionError> {
        let response = self
            .http
            .post(&self.endpoint)
            .header(reqwest::header::AUTHORIZATION, api_key)
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await
            .map_err(transport)?;
        let mut body = json_response(response).await?;

        if let Some(message) = body
            .pointer("/errors/0/message")
            .and_then(|m| m.as_str())
        {
            return Err(ActionError::Failed(format!("Linear API error: {}", message)));
        }
        Ok(body.get_mut("data").map(serde_json::Value::take).unwrap_or_default())
    }

    async fn first_team(&self, api_key: &str) -> Result<String, ActionError> {
        let data = self.query(api_key, TEAMS_QUERY, json!({})).await?;
        data.pointer("/teams/nodes/0/id")
            .and_then(|id| id.as_str())
            .map(str::to_string)
            .ok_or_else(|| ActionError::Failed("No teams found in Linear workspace".to_string()))
    }
}

/// Priority as Linear numbers it: 0 none, 1 urgent through 4 low.
fn priority(config: &Fields) -> Result<Option<i64>, ActionError> {
    let Some(raw) = optional_str(config, "ticketPriority") else {
        return Ok(None);
    };
    match raw.trim().parse::<i64>() {
        Ok(p) if (0..=4).contains(&p) => Ok(Some(p)),
        _ => Err(ActionError::InvalidConfig {
            field: "ticketPriority".to_string(),
            reason: format!("expected 0-4, got '{}'", raw),
        }),
    }
}

pub struct CreateTicketAction {
    client: LinearClient,
}

impl CreateTicketAction {
    pub fn new() -> Self {
        Self::with_base_url("https://api.linear.app")
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client: LinearClient::new(base_url),
        }
    }
}

impl Default for CreateTicketAction {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Action for CreateTicketAction {
    async fn execute(&self, config: &Fields, credentials: &Credentials) -> ActionResult {
        let api_key = require_credential(credentials, API_KEY)?;
        let title = require_str(config, "ticketTitle")?;
        let description = optional_str(config, "ticketDescription").unwrap_or_default();
        let priority = priority(config)?;

        let team_id = match credentials.get(TEAM_ID).filter(|t| !t.is_empty()) {
            Some(team) => team.clone(),
            None => {
                debug!("{} not set, using first team", TEAM_ID);
                self.client.first_team(api_key).await?
            }
        };

        let mut input = json!({ "title": title, "description": description, "teamId": team_id });
        if let Some(p) = priority {
            input["priority"] = json!(p);
        }

        let data = self
            .client
            .query(api_key, CREATE_ISSUE, json!({ "input": input }))
            .await?;
        let issue = data
            .pointer("/issueCreate/issue")
            .filter(|issue| !issue.is_null())
            .ok_or_else(|| ActionError::Failed("Failed to create issue".to_string()))?;

        let field = |name: &str| Value::from(issue.get(name).and_then(|v| v.as_str()).unwrap_or_default());
        info!("Created Linear issue {}", issue.get("identifier").and_then(|v| v.as_str()).unwrap_or("?"));

        Ok(Fields::from([
            ("id".to_string(), field("id")),
            ("url".to_string(), field("url")),
            ("title".to_string(), field("title")),
        ]))
    }
}

pub struct FindIssuesAction {
    client: LinearClient,
}

impl FindIssuesAction {
    pub fn new() -> Self {
        Self::with_base_url("https://api.linear.app")
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client: LinearClient::new(base_url),
        }
    }
}

impl Default for FindIssuesAction {
    fn default() -> Self {
        Self::new()
    }
}

/// Status names accepted in config, as Linear state types.
fn state_type(status: &str) -> Option<&'static str> {
    match status.trim().to_lowercase().replace([' ', '-'], "_").as_str() {
        "backlog" => Some("backlog"),
        "todo" | "unstarted" => Some("unstarted"),
        "in_progress" | "started" => Some("started"),
        "done" | "completed" => Some("completed"),
        "canceled" | "cancelled" => Some("canceled"),
        _ => None,
    }
}

fn issue_filter(config: &Fields, team_id: Option<&String>) -> Result<serde_json::Value, ActionError> {
    let mut filter = serde_json::Map::new();
    if let Some(status) = optional_str(config, "linearStatus") {
        if status != "any" {
            let kind = state_type(&status).ok_or_else(|| ActionError::InvalidConfig {
                field: "linearStatus".to_string(),
                reason: format!("unknown status '{}'", status),
            })?;
            filter.insert("state".into(), json!({ "type": { "eq": kind } }));
        }
    }
    if let Some(assignee) = optional_str(config, "linearAssigneeId") {
        filter.insert("assignee".into(), json!({ "id": { "eq": assignee } }));
    }
    if let Some(label) = optional_str(config, "linearLabel") {
        filter.insert("labels".into(), json!({ "name": { "eq": label } }));
    }
    let team = optional_str(config, "linearTeamId").or_else(|| team_id.filter(|t| !t.is_empty()).cloned());
    if let Some(team) = team {
        filter.insert("team".into(), json!({ "id": { "eq": team } }));
    }
    Ok(serde_json::Value::Object(filter))
}

#[async_trait]
impl Action for FindIssuesAction {
    async fn execute(&self, config: &Fields, credentials: &Credentials) -> ActionResult {
        let api_key = require_credential(credentials, API_KEY)?;
        let filter = issue_filter(config, credentials.get(TEAM_ID))?;

        let data = self
            .client
            .query(api_key, FIND_ISSUES_QUERY, json!({ "filter": filter }))
            .await?;
        let issues: Vec<Value> = data
            .pointer("/issues/nodes")
            .and_then(|nodes| nodes.as_array())
            .map(|nodes| nodes.iter().cloned().map(Value::from).collect())
            .unwrap_or_default();

        debug!("Found {} Linear issues", issues.len());
        Ok(Fields::from([
            ("count".to_string(), Value::from(issues.len() as i64)),
            ("issues".to_string(), Value::Array(issues)),
        ]))
    }
}

pub(crate) fn integration() -> IntegrationInfo {
    IntegrationInfo::new("linear", "Linear")
        .with_description("Create and manage issues in Linear")
        .with_dependency("@linear/sdk", "^63.2.0")
        .with_env_var(API_KEY, "Linear API key")
        .with_env_var(TEAM_ID, "Linear team ID (optional)")
}

pub(crate) fn actions() -> Vec<ActionDescriptor> {
    vec![
        ActionDescriptor::new(CREATE_TICKET, "Create Ticket", Arc::new(CreateTicketAction::new()))
            .with_description("Create an issue in Linear")
            .with_field(ConfigField::required("ticketTitle", FieldType::String))
            .with_field(ConfigField::optional("ticketDescription", FieldType::String))
            .with_field(ConfigField::optional("ticketPriority", FieldType::String))
            .with_credential(API_KEY)
            .with_credential(TEAM_ID)
            .with_outputs(["id", "url", "title"])
            .with_source("createTicketStep", include_str!("../templates/create-ticket.ts")),
        ActionDescriptor::new(FIND_ISSUES, "Find Issues", Arc::new(FindIssuesAction::new()))
            .with_description("Search for issues in Linear")
            .with_field(ConfigField::optional("linearStatus", FieldType::String))
            .with_field(ConfigField::optional("linearAssigneeId", FieldType::String))
            .with_field(ConfigField::optional("linearTeamId", FieldType::String))
            .with_field(ConfigField::optional("linearLabel", FieldType::String))
            .with_credential(API_KEY)
            .with_credential(TEAM_ID)
            .with_outputs(["issues", "count"])
            .with_source("findIssuesStep", include_str!("../templates/find-issues.ts")),
    ]
}
