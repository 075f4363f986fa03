//! HTTP File Storage Backend
//!
//! Talks to the file storage service's JSON REST API. Responses are mapped
//! onto the provisioner's error taxonomy:
//! - 404 -> `NotFound`
//! - 409 / 412 -> `Conflict`
//! - 429, 5xx and transport failures -> `BackendUnavailable`

use crate::domain::ports::{CreateExportRequest, Export, FileStorageBackend, MountTarget};
use crate::domain::tags::Tags;
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info};

const BACKEND_NAME: &str = "fss";
const RETRY_TOKEN_HEADER: &str = "opc-retry-token";

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the HTTP backend
#[derive(Debug, Clone)]
pub struct HttpBackendConfig {
    /// Base URL of the file storage API (e.g. `https://filestorage.us-phoenix-1.example.com/20171215`)
    pub endpoint: String,
    /// Compartment resources are created in
    pub compartment_id: String,
    /// Bearer token for the API, if required
    pub auth_token: Option<String>,
    /// Per-request timeout enforced by the HTTP client
    pub request_timeout: Duration,
}

impl Default for HttpBackendConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://fss-api:8080/20171215".to_string(),
            compartment_id: String::new(),
            auth_token: None,
            request_timeout: Duration::from_secs(30),
        }
    }
}

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AvailabilityDomainResource {
    name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateMountTargetDetails<'a> {
    availability_domain: &'a str,
    subnet_id: &'a str,
    compartment_id: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MountTargetResource {
    id: String,
    availability_domain: String,
    subnet_id: String,
    export_set_id: String,
    private_ip: String,
}

impl From<MountTargetResource> for MountTarget {
    fn from(mt: MountTargetResource) -> Self {
        MountTarget {
            id: mt.id,
            availability_domain: mt.availability_domain,
            subnet_id: mt.subnet_id,
            endpoint: mt.private_ip,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateFileSystemDetails<'a> {
    availability_domain: &'a str,
    compartment_id: &'a str,
    display_name: &'a str,
    freeform_tags: &'a BTreeMap<String, String>,
    defined_tags: &'a BTreeMap<String, BTreeMap<String, String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileSystemResource {
    id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateExportDetails<'a> {
    export_set_id: &'a str,
    file_system_id: &'a str,
    path: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExportResource {
    id: String,
    file_system_id: String,
    path: String,
}

// =============================================================================
// HTTP Backend
// =============================================================================

/// Adapter for the file storage REST API
#[derive(Debug)]
pub struct HttpBackend {
    config: HttpBackendConfig,
    client: Client,
}

impl HttpBackend {
    /// Create a new HTTP backend
    pub fn new(config: HttpBackendConfig) -> Result<Self> {
        if config.compartment_id.is_empty() {
            return Err(Error::Configuration(
                "FSS backend requires a compartment id".into(),
            ));
        }

        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::Configuration(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.endpoint.trim_end_matches('/'), path)
    }

    fn resource_url(&self, collection: &str, id: &str) -> String {
        self.url(&format!("{}/{}", collection, urlencoding::encode(id)))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Send a request and map the response status onto the error taxonomy
    async fn send(&self, request: RequestBuilder, kind: &str, id: &str) -> Result<Response> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| Error::unavailable(BACKEND_NAME, e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(map_status(status, kind, id, body))
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        kind: &str,
        id: &str,
    ) -> Result<T> {
        let response = self.send(request, kind, id).await?;
        Ok(response.json::<T>().await?)
    }

    async fn get_mount_target_resource(&self, id: &str) -> Result<MountTargetResource> {
        let request = self.client.get(self.resource_url("mountTargets", id));
        self.send_json(request, "MountTarget", id).await
    }

    async fn create_file_system(
        &self,
        availability_domain: &str,
        display_name: &str,
        tags: &Tags,
        token: &str,
    ) -> Result<FileSystemResource> {
        let details = CreateFileSystemDetails {
            availability_domain,
            compartment_id: &self.config.compartment_id,
            display_name,
            freeform_tags: &tags.freeform,
            defined_tags: &tags.defined,
        };
        let request = self
            .client
            .post(self.url("fileSystems"))
            .header(RETRY_TOKEN_HEADER, retry_token(token, "fs"))
            .json(&details);
        self.send_json(request, "FileSystem", display_name).await
    }
}

/// Map a non-success HTTP status to a provisioner error
fn map_status(status: StatusCode, kind: &str, id: &str, body: String) -> Error {
    match status {
        StatusCode::NOT_FOUND => Error::not_found(kind, id),
        StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => Error::conflict(kind, id, body),
        StatusCode::TOO_MANY_REQUESTS => Error::unavailable(BACKEND_NAME, "rate limited"),
        s if s.is_server_error() => Error::unavailable(BACKEND_NAME, format!("{}: {}", s, body)),
        s => Error::Internal(format!("{} {} rejected with {}: {}", kind, id, s, body)),
    }
}

/// Retry tokens are limited in length by the API
fn retry_token(token: &str, suffix: &str) -> String {
    let token = format!("{}/{}", token, suffix);
    if token.len() <= 64 {
        return token;
    }
    format!("{:016x}", seahash::hash(token.as_bytes()))
}

#[async_trait]
impl FileStorageBackend for HttpBackend {
    fn backend_name(&self) -> &str {
        BACKEND_NAME
    }

    async fn list_availability_domains(&self) -> Result<Vec<String>> {
        let request = self
            .client
            .get(self.url("availabilityDomains"))
            .query(&[("compartmentId", self.config.compartment_id.as_str())]);
        let domains: Vec<AvailabilityDomainResource> = self
            .send_json(request, "AvailabilityDomain", &self.config.compartment_id)
            .await?;
        Ok(domains.into_iter().map(|d| d.name).collect())
    }

    async fn create_mount_target(
        &self,
        availability_domain: &str,
        subnet_id: &str,
        token: &str,
    ) -> Result<MountTarget> {
        let details = CreateMountTargetDetails {
            availability_domain,
            subnet_id,
            compartment_id: &self.config.compartment_id,
        };
        let request = self
            .client
            .post(self.url("mountTargets"))
            .header(RETRY_TOKEN_HEADER, retry_token(token, "mt"))
            .json(&details);

        let mount_target: MountTargetResource =
            self.send_json(request, "MountTarget", subnet_id).await?;
        info!(id = %mount_target.id, availability_domain, subnet_id, "Created mount target");
        Ok(mount_target.into())
    }

    async fn get_mount_target(&self, id: &str) -> Result<MountTarget> {
        Ok(self.get_mount_target_resource(id).await?.into())
    }

    async fn create_export(
        &self,
        mount_target_id: &str,
        request: &CreateExportRequest,
        token: &str,
    ) -> Result<Export> {
        let mount_target = self.get_mount_target_resource(mount_target_id).await?;
        let file_system = self
            .create_file_system(
                &request.availability_domain,
                &request.display_name,
                &request.tags,
                token,
            )
            .await?;
        debug!(file_system_id = %file_system.id, "Created file system");

        let path = format!("/{}", request.display_name);
        let details = CreateExportDetails {
            export_set_id: &mount_target.export_set_id,
            file_system_id: &file_system.id,
            path: &path,
        };
        let http_request = self
            .client
            .post(self.url("exports"))
            .header(RETRY_TOKEN_HEADER, retry_token(token, "export"))
            .json(&details);

        let export: ExportResource = self.send_json(http_request, "Export", &path).await?;
        info!(id = %export.id, mount_target_id, path = %export.path, "Created export");

        Ok(Export {
            id: export.id,
            file_system_id: export.file_system_id,
            mount_target_id: mount_target_id.to_string(),
            path: export.path,
        })
    }

    async fn delete_export(&self, id: &str) -> Result<()> {
        self.send(
            self.client.delete(self.resource_url("exports", id)),
            "Export",
            id,
        )
        .await?;
        info!(id, "Deleted export");
        Ok(())
    }

    async fn delete_file_system(&self, id: &str) -> Result<()> {
        self.send(
            self.client.delete(self.resource_url("fileSystems", id)),
            "FileSystem",
            id,
        )
        .await?;
        info!(id, "Deleted file system");
        Ok(())
    }

    async fn delete_mount_target(&self, id: &str) -> Result<()> {
        self.send(
            self.client.delete(self.resource_url("mountTargets", id)),
            "MountTarget",
            id,
        )
        .await?;
        info!(id, "Deleted mount target");
        Ok(())
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(self.list_availability_domains().await.is_ok())
    }
}
