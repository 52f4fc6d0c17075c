use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::ControlPlane;
use crate::config::ControlPlaneConfig;
use crate::error::{DriverError, Result};
use crate::model::{DriverAction, DriverRecord, DriverState, NewSchema, SchemaDefinition, SchemaDocument};

const USER_AGENT: &str = concat!("machine-driver-agent/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Deserialize)]
struct Collection<T> {
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireDriver {
    id: String,
    name: String,
    uri: Option<String>,
    #[serde(rename = "md5checksum")]
    md5_checksum: Option<String>,
    #[serde(default)]
    builtin: bool,
    state: DriverState,
    schema_version: Option<String>,
}

impl From<WireDriver> for DriverRecord {
    fn from(wire: WireDriver) -> Self {
        DriverRecord {
            id: Some(wire.id),
            name: wire.name,
            source_uri: wire.uri.unwrap_or_default(),
            checksum: wire.md5_checksum.unwrap_or_default(),
            builtin: wire.builtin,
            state: wire.state,
            schema_version: wire.schema_version.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireSchema {
    id: String,
    name: String,
    parent: Option<String>,
    roles: Option<Vec<String>>,
    /// The field map travels as an embedded JSON string.
    definition: Option<String>,
    transitioning: Option<String>,
    state: Option<String>,
    removed: Option<String>,
}

impl WireSchema {
    fn into_document(self) -> Result<SchemaDocument> {
        let definition = match self.definition.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => serde_json::from_str(raw)?,
            _ => SchemaDefinition::default(),
        };
        let removed = self.removed.is_some()
            || matches!(self.state.as_deref(), Some("removed") | Some("purged"));

        Ok(SchemaDocument {
            id: self.id,
            name: self.name,
            parent_name: self.parent.unwrap_or_default(),
            roles: self.roles.unwrap_or_default().into_iter().collect(),
            definition,
            transitioning: self.transitioning.as_deref() == Some("yes"),
            removed,
        })
    }
}

#[derive(Debug, Serialize)]
struct CreateSchemaBody<'a> {
    name: &'a str,
    parent: &'a str,
    roles: Vec<&'a str>,
    definition: String,
}

#[derive(Debug, Deserialize)]
struct WireSetting {
    value: Option<String>,
}

/// JSON-over-HTTP client for the control plane's driver, schema and
/// setting collections.
pub struct RestControlPlane {
    client: reqwest::Client,
    base_url: String,
    credentials: Option<(String, String)>,
}

impl RestControlPlane {
    pub fn new(config: &ControlPlaneConfig) -> Result<Self> {
        let base_url = config.url.trim().trim_end_matches('/').to_string();
        Url::parse(&base_url)
            .map_err(|e| DriverError::Config(format!("invalid control plane url '{}': {}", config.url, e)))?;

        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| DriverError::network("building HTTP client", e))?;

        let credentials = match (&config.access_key, &config.secret_key) {
            (Some(access), Some(secret)) => Some((access.clone(), secret.clone())),
            _ => None,
        };

        Ok(Self {
            client,
            base_url,
            credentials,
        })
    }

    fn url(&self, path: &str) -> Result<Url> {
        Url::parse(&format!("{}/{}", self.base_url, path))
            .map_err(|e| DriverError::Config(format!("invalid request path '{}': {}", path, e)))
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.credentials {
            Some((access, secret)) => builder.basic_auth(access, Some(secret)),
            None => builder,
        }
    }

    /// Sends a request and decodes the body; 404 maps to `None`.
    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder, description: &str) -> Result<Option<T>> {
        tracing::trace!(request = %description, "Control plane request");
        let response = builder
            .send()
            .await
            .map_err(|e| DriverError::network(description, e))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(DriverError::ControlPlane {
                request: description.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response
            .json::<T>()
            .await
            .map_err(|e| DriverError::network(description, e))?;
        Ok(Some(body))
    }

    async fn send_required<T: DeserializeOwned>(&self, builder: RequestBuilder, description: &str) -> Result<T> {
        self.send(builder, description).await?.ok_or_else(|| DriverError::ControlPlane {
            request: description.to_string(),
            status: StatusCode::NOT_FOUND.as_u16(),
        })
    }
}

#[async_trait]
impl ControlPlane for RestControlPlane {
    async fn list_drivers(&self) -> Result<Vec<DriverRecord>> {
        let url = self.url("machinedrivers")?;
        let collection: Collection<WireDriver> = self
            .send_required(self.request(Method::GET, url), "GET machinedrivers")
            .await?;
        Ok(collection.data.into_iter().map(DriverRecord::from).collect())
    }

    async fn get_driver(&self, id: &str) -> Result<Option<DriverRecord>> {
        let url = self.url(&format!("machinedrivers/{id}"))?;
        let description = format!("GET machinedrivers/{id}");
        let driver: Option<WireDriver> = self.send(self.request(Method::GET, url), &description).await?;
        Ok(driver.map(DriverRecord::from))
    }

    async fn driver_action(&self, id: &str, action: DriverAction) -> Result<DriverRecord> {
        let mut url = self.url(&format!("machinedrivers/{id}"))?;
        url.query_pairs_mut().append_pair("action", action.name());
        let description = format!("POST machinedrivers/{id}?action={}", action.name());

        let body = match &action {
            DriverAction::Error { message } => serde_json::json!({ "errorMessage": message }),
            _ => serde_json::json!({}),
        };

        let driver: WireDriver = self
            .send_required(self.request(Method::POST, url).json(&body), &description)
            .await?;
        Ok(driver.into())
    }

    async fn find_schemas(&self, name: &str) -> Result<Vec<SchemaDocument>> {
        let mut url = self.url("dynamicschemas")?;
        url.query_pairs_mut()
            .append_pair("name", name)
            .append_pair("removed_null", "1");
        let description = format!("GET dynamicschemas?name={name}");

        let collection: Collection<WireSchema> = self
            .send_required(self.request(Method::GET, url), &description)
            .await?;
        collection
            .data
            .into_iter()
            .map(WireSchema::into_document)
            .filter(|doc| !matches!(doc, Ok(d) if d.removed))
            .collect()
    }

    async fn get_schema(&self, id: &str) -> Result<Option<SchemaDocument>> {
        let url = self.url(&format!("dynamicschemas/{id}"))?;
        let description = format!("GET dynamicschemas/{id}");
        let schema: Option<WireSchema> = self.send(self.request(Method::GET, url), &description).await?;
        schema.map(WireSchema::into_document).transpose()
    }

    async fn create_schema(&self, schema: &NewSchema) -> Result<SchemaDocument> {
        let url = self.url("dynamicschemas")?;
        let description = format!("POST dynamicschemas ({})", schema.name);
        let body = CreateSchemaBody {
            name: &schema.name,
            parent: &schema.parent_name,
            roles: schema.roles.iter().map(String::as_str).collect(),
            definition: serde_json::to_string(&schema.definition)?,
        };

        let created: WireSchema = self
            .send_required(self.request(Method::POST, url).json(&body), &description)
            .await?;
        created.into_document()
    }

    async fn delete_schema(&self, id: &str) -> Result<()> {
        let url = self.url(&format!("dynamicschemas/{id}"))?;
        let description = format!("DELETE dynamicschemas/{id}");
        let response = self
            .request(Method::DELETE, url)
            .send()
            .await
            .map_err(|e| DriverError::network(&description, e))?;

        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(DriverError::ControlPlane {
                request: description,
                status: status.as_u16(),
            })
        }
    }

    async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let url = self.url(&format!("settings/{key}"))?;
        let description = format!("GET settings/{key}");
        let setting: Option<WireSetting> = self.send(self.request(Method::GET, url), &description).await?;
        Ok(setting.and_then(|s| s.value))
    }
}
