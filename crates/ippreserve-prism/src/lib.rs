// # Prism Central Platform Client
//
// This crate implements `PlatformDirectory` and `VmSpecApi` against a Prism
// Central style v3 REST API.
//
// ## Behavior
//
// - One logical API operation per trait call (VM listing pages count as one)
// - Every request carries basic credentials and a per-request timeout
// - Response status codes are classified into `ippreserve_core::Error` kinds
//   here; no `reqwest::Error` escapes this crate
// - No retry, backoff, caching or background tasks: those belong to the
//   `Orchestrator`
//
// ## Trust Level: Untrusted
//
// **Allowed Capabilities**:
// - ✅ Perform HTTP/HTTPS API calls to the configured endpoint only
// - ✅ Parse platform-specific responses
//
// **Forbidden Capabilities** (enforced by code review):
// - ❌ Spawn tasks or threads
// - ❌ Implement retry logic (owned by Orchestrator)
// - ❌ Decide whether a write should happen (owned by VmSpecMutator)
//
// ## Security Requirements
//
// - The password NEVER appears in logs or `Debug` output
// - Certificate validation is only disabled when the operator asks for it
//
// ## API Reference
//
// - List VMs: POST `/vms/list`
// - List Subnets: POST `/subnets/list` with `filter: name==<name>` (FIQL;
//   reserved characters in the name are percent-encoded)
// - Get VM: GET `/vms/:uuid`
// - Update VM: PUT `/vms/:uuid` (202 Accepted, applied asynchronously)

use async_trait::async_trait;
use ippreserve_core::config::PlatformConfig;
use ippreserve_core::traits::{
    PlatformDirectory, SubnetHandle, UpdateAccepted, VmHandle, VmSpecApi,
};
use ippreserve_core::vm_spec::{VmSpecification, VmUpdatePayload};
use ippreserve_core::{Error, Result};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};

/// Platform name used in logs
const PLATFORM_NAME: &str = "prism";

/// One page of a `*/list` response
#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    entities: Vec<Value>,
    #[serde(default)]
    metadata: ListMetadata,
}

#[derive(Debug, Default, Deserialize)]
struct ListMetadata {
    total_matches: Option<u64>,
}

/// Name of a listed entity, as observed by the platform
fn entity_name(entity: &Value) -> Option<&str> {
    entity["status"]["name"]
        .as_str()
        .or_else(|| entity["spec"]["name"].as_str())
}

fn entity_uuid(entity: &Value) -> Option<&str> {
    entity["metadata"]["uuid"].as_str()
}

/// Percent-encode the characters that delimit FIQL filter expressions
fn filter_value(value: &str) -> String {
    let mut encoded = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '%' | ',' | ';' | '=' | '(' | ')' => {
                encoded.push_str(&format!("%{:02X}", c as u32));
            }
            _ => encoded.push(c),
        }
    }
    encoded
}

/// Map a non-success response to an error kind
///
/// 404 is not handled here: whether it means "not found" depends on the call.
fn classify(status: StatusCode, body: String, operation: &str) -> Error {
    match status.as_u16() {
        401 | 403 => Error::auth(format!(
            "{} refused credentials or permissions. Status: {}",
            operation, status
        )),
        409 => Error::conflict(format!(
            "{}: VM was modified since it was read. Status: {} - {}",
            operation, status, body
        )),
        429 => Error::platform_unavailable(format!(
            "{}: rate limit exceeded. Status: {}",
            operation, status
        )),
        500..=599 => Error::platform_unavailable(format!(
            "{}: server error (transient): {} - {}",
            operation, status, body
        )),
        code => Error::rejected(code, body),
    }
}

/// Client for the platform control API
///
/// # Example
///
/// ```rust,no_run
/// use ippreserve_core::config::PlatformConfig;
/// use ippreserve_core::traits::PlatformDirectory;
/// use ippreserve_prism::PrismClient;
///
/// # async fn example() -> ippreserve_core::Result<()> {
/// let config = PlatformConfig::new("https://10.0.0.10:9440/api/nutanix/v3", "admin", "secret");
/// let client = PrismClient::new(&config)?;
///
/// if let Some(subnet) = client.find_subnet_by_name("Subnet1").await? {
///     println!("{} -> {}", subnet.name, subnet.id);
/// }
/// # Ok(())
/// # }
/// ```
pub struct PrismClient {
    /// API base URL without trailing slash
    base_url: String,

    username: String,

    /// ⚠️ NEVER log this value
    password: String,

    /// VM listing page size
    page_size: u32,

    /// Add `use_categories_mapping=true` to VM reads and writes
    use_categories_mapping: bool,

    /// HTTP client for API requests
    client: reqwest::Client,
}

// Custom Debug implementation that hides the password
impl std::fmt::Debug for PrismClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrismClient")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("password", &"<REDACTED>")
            .field("page_size", &self.page_size)
            .field("use_categories_mapping", &self.use_categories_mapping)
            .finish()
    }
}

impl PrismClient {
    /// Create a client from validated platform settings
    ///
    /// # Errors
    ///
    /// - `Error::Config` if the settings are invalid or the HTTP client
    ///   cannot be built
    pub fn new(config: &PlatformConfig) -> Result<Self> {
        config.validate()?;

        if config.accept_invalid_certs {
            tracing::warn!(
                "TLS certificate validation is disabled for {}",
                config.endpoint
            );
        }

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: config.endpoint.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
            page_size: config.page_size,
            use_categories_mapping: config.use_categories_mapping,
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn vm_url(&self, vm_id: &str) -> String {
        let url = self.url(&format!("vms/{}", vm_id));
        if self.use_categories_mapping {
            format!("{}?use_categories_mapping=true", url)
        } else {
            url
        }
    }

    /// Attach credentials, send, and turn transport failures into errors
    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        operation: &str,
    ) -> Result<reqwest::Response> {
        request
            .basic_auth(&self.username, Some(&self.password))
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::platform_unavailable(format!("{} timed out: {}", operation, e))
                } else {
                    Error::platform_unavailable(format!("{} request failed: {}", operation, e))
                }
            })
    }

    /// Read the body of a failed response for diagnostics
    async fn error_body(response: reqwest::Response) -> String {
        response
            .text()
            .await
            .unwrap_or_else(|_| "Unable to read error response".to_string())
    }

    /// POST a `*/list` request and parse one page
    async fn list(&self, path: &str, body: &Value, operation: &str) -> Result<ListResponse> {
        let url = self.url(path);
        tracing::debug!("POST {} {}", url, body);

        let response = self
            .send(self.client.post(&url).json(body), operation)
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = Self::error_body(response).await;
            return Err(classify(status, body, operation));
        }

        response
            .json::<ListResponse>()
            .await
            .map_err(|e| Error::Other(format!("{}: failed to parse response: {}", operation, e)))
    }
}

#[async_trait]
impl PlatformDirectory for PrismClient {
    /// Scan every page of the VM listing for exact name matches
    ///
    /// # API Call
    ///
    /// ```http
    /// POST /vms/list
    /// {"kind": "vm", "sort_attribute": "name", "sort_order": "ASCENDING",
    ///  "length": <page_size>, "offset": <offset>}
    /// ```
    async fn find_vms_by_name(&self, name: &str) -> Result<Vec<VmHandle>> {
        let mut matches = Vec::new();
        let mut offset: u64 = 0;

        loop {
            let body = json!({
                "kind": "vm",
                "sort_attribute": "name",
                "sort_order": "ASCENDING",
                "length": self.page_size,
                "offset": offset,
            });
            let page = self.list("vms/list", &body, "List VMs").await?;
            let fetched = page.entities.len() as u64;

            for entity in &page.entities {
                if entity_name(entity) != Some(name) {
                    continue;
                }
                match entity_uuid(entity) {
                    Some(uuid) => matches.push(VmHandle::new(uuid, name)),
                    None => tracing::warn!("VM {} listed without metadata.uuid, ignoring", name),
                }
            }

            offset += fetched;
            let exhausted = match page.metadata.total_matches {
                Some(total) => offset >= total,
                None => fetched < u64::from(self.page_size),
            };
            if fetched == 0 || exhausted {
                break;
            }
        }

        tracing::debug!(
            "Found {} VM(s) named {} after scanning {} entities",
            matches.len(),
            name,
            offset
        );
        Ok(matches)
    }

    /// # API Call
    ///
    /// ```http
    /// POST /subnets/list
    /// {"kind": "subnet", "filter": "name==<name>"}
    /// ```
    async fn find_subnet_by_name(&self, name: &str) -> Result<Option<SubnetHandle>> {
        let body = json!({
            "kind": "subnet",
            "filter": format!("name=={}", filter_value(name)),
        });
        let page = self.list("subnets/list", &body, "List subnets").await?;

        let Some(entity) = page.entities.first() else {
            tracing::debug!("No subnet named {}", name);
            return Ok(None);
        };

        let uuid = entity_uuid(entity).ok_or_else(|| {
            Error::Other(format!("Subnet {} listed without metadata.uuid", name))
        })?;
        let subnet_name = entity_name(entity).unwrap_or(name);

        Ok(Some(SubnetHandle::new(uuid, subnet_name)))
    }
}

#[async_trait]
impl VmSpecApi for PrismClient {
    /// # API Call
    ///
    /// ```http
    /// GET /vms/:uuid
    /// ```
    async fn get_vm(&self, vm_id: &str) -> Result<VmSpecification> {
        let url = self.vm_url(vm_id);
        tracing::debug!("GET {}", url);

        let response = self.send(self.client.get(&url), "Get VM").await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(Error::VmNotFound(vm_id.to_string()));
        }
        if !status.is_success() {
            let body = Self::error_body(response).await;
            return Err(classify(status, body, "Get VM"));
        }

        let document: Value = response.json().await.map_err(|e| {
            Error::invalid_spec(format!("VM {} response is not JSON: {}", vm_id, e))
        })?;
        VmSpecification::from_value(document)
    }

    /// Submit a full VM representation
    ///
    /// Only `202 Accepted` counts as success; the platform applies the update
    /// asynchronously. Any other status, including other 2xx codes, is an
    /// error carrying the response body.
    ///
    /// # API Call
    ///
    /// ```http
    /// PUT /vms/:uuid
    /// {"metadata": {...}, "spec": {...}}
    /// ```
    async fn update_vm(&self, vm_id: &str, payload: &VmUpdatePayload) -> Result<UpdateAccepted> {
        let url = self.vm_url(vm_id);
        tracing::debug!("PUT {}", url);

        let response = self
            .send(self.client.put(&url).json(payload), "Update VM")
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(Error::VmNotFound(vm_id.to_string()));
        }
        if status != StatusCode::ACCEPTED {
            let body = Self::error_body(response).await;
            return Err(classify(status, body, "Update VM"));
        }

        // The task reference is informational; a body we cannot parse does
        // not undo the acceptance
        let task_id = response
            .json::<Value>()
            .await
            .ok()
            .and_then(|body| {
                body["status"]["execution_context"]["task_uuid"]
                    .as_str()
                    .map(str::to_string)
            });

        tracing::debug!(
            "Update of VM {} accepted (task: {})",
            vm_id,
            task_id.as_deref().unwrap_or("none")
        );
        Ok(UpdateAccepted { task_id })
    }

    fn platform_name(&self) -> &'static str {
        PLATFORM_NAME
    }
}
