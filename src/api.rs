//! Catalog/registry service client.
//!
//! External collaborator: find-by-query over the op and workflow
//! collections, and issue/revoke of ephemeral single-operation registry
//! credentials. All calls carry the persisted bearer token.

use serde::Deserialize;

use crate::error::{EngineError, Result};
use crate::manifest::{Op, Workflow};
use crate::settings::Settings;

/// Short-lived credentials for exactly one pull or push, revoked right
/// after the operation completes.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryCredentials {
    pub username: String,
    pub password: String,
    pub server_address: String,
    pub correlation_id: String,
}

#[derive(Debug, Deserialize)]
struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    data: RegistryCredentials,
}

pub struct CatalogClient {
    http: reqwest::Client,
    endpoint: String,
    token: Option<String>,
    team_id: Option<String>,
}

impl CatalogClient {
    pub fn new(settings: &Settings) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: settings.api_endpoint(),
            token: settings.access_token.clone(),
            team_id: settings.team_id.clone(),
        }
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Search the op collection for the active team.
    pub async fn find_ops(&self, search: &str) -> Result<Vec<Op>> {
        self.find("ops", search).await
    }

    /// Search the workflow collection for the active team.
    pub async fn find_workflows(&self, search: &str) -> Result<Vec<Workflow>> {
        self.find("workflows", search).await
    }

    async fn find<T: serde::de::DeserializeOwned>(
        &self,
        collection: &str,
        search: &str,
    ) -> Result<Vec<T>> {
        let mut query: Vec<(&str, &str)> = vec![("search", search)];
        if let Some(team_id) = &self.team_id {
            query.push(("team_id", team_id));
        }

        let response = self
            .authorized(self.http.get(format!("{}/{}", self.endpoint, collection)))
            .query(&query)
            .send()
            .await?;
        let response = check_auth(response)?;
        let body: ListResponse<T> = response.error_for_status()?.json().await?;
        Ok(body.data)
    }

    /// Obtain ephemeral registry credentials for a single pull.
    pub async fn registry_token(&self) -> Result<RegistryCredentials> {
        let response = self
            .authorized(self.http.post(format!("{}/registry/token", self.endpoint)))
            .send()
            .await?;
        let response = check_auth(response)?;
        let body: TokenResponse = response.error_for_status()?.json().await?;
        Ok(body.data)
    }

    /// Revoke previously issued registry credentials. Called on every exit
    /// path of a pull, success or failure.
    pub async fn revoke_registry_token(&self, correlation_id: &str) -> Result<()> {
        let response = self
            .authorized(self.http.delete(format!(
                "{}/registry/token/{}",
                self.endpoint, correlation_id
            )))
            .send()
            .await?;
        check_auth(response)?.error_for_status()?;
        Ok(())
    }
}

fn check_auth(response: reqwest::Response) -> Result<reqwest::Response> {
    if response.status() == reqwest::StatusCode::UNAUTHORIZED
        || response.status() == reqwest::StatusCode::FORBIDDEN
    {
        return Err(EngineError::Auth(format!(
            "catalog rejected credentials (HTTP {}); sign in again",
            response.status()
        )));
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_credentials_parse_camel_case() {
        let payload = r#"{
            "data": {
                "username": "robot",
                "password": "secret",
                "serverAddress": "registry.opsctl.dev",
                "correlationId": "c-123"
            }
        }"#;
        let parsed: TokenResponse = serde_json::from_str(payload).unwrap();
        assert_eq!(parsed.data.username, "robot");
        assert_eq!(parsed.data.server_address, "registry.opsctl.dev");
        assert_eq!(parsed.data.correlation_id, "c-123");
    }

    #[test]
    fn list_response_defaults_to_empty() {
        let parsed: ListResponse<Op> = serde_json::from_str("{}").unwrap();
        assert!(parsed.data.is_empty());
    }
}
