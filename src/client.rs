use bytes::Bytes;
use reqwest::{multipart, Body, Client, RequestBuilder, Response, StatusCode};
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use crate::errors::{AppError, AppResult};
use crate::models::{ApiKeyResponse, FlowFile, ImportPackage, ImportProgress, ImportResult};

const API_KEY_SCHEME: &str = "X-Agora-Api-Key";

/// Server operations the upload engine depends on.
pub trait ImportApi: Send + Sync + 'static {
    /// `POST /api/v1/import/`, expects 201.
    fn create_import(&self) -> impl Future<Output = AppResult<ImportPackage>> + Send;

    /// `POST /api/v1/import/{id}/upload/` with one multipart chunk, expects 200.
    fn upload_chunk(
        &self,
        import_id: i64,
        chunk: &ChunkRequest,
    ) -> impl Future<Output = AppResult<()>> + Send;

    /// `GET /api/v1/flowfile/{transfer_id}/`, expects 200.
    fn flow_file(&self, transfer_id: &str) -> impl Future<Output = AppResult<FlowFile>> + Send;

    /// `POST /api/v1/import/{id}/complete/`, expects 204.
    fn complete_import(
        &self,
        import_id: i64,
        params: &CompleteParams,
    ) -> impl Future<Output = AppResult<()>> + Send;

    /// `GET /api/v1/import/{id}/progress/`, expects 200.
    fn import_progress(
        &self,
        import_id: i64,
    ) -> impl Future<Output = AppResult<ImportProgress>> + Send;

    /// `GET /api/v1/import/{id}/result/`, expects 200.
    fn import_result(
        &self,
        import_id: i64,
    ) -> impl Future<Output = AppResult<Vec<ImportResult>>> + Send;
}

/// One chunk of a unit's transfer, with the flow metadata the server needs
/// to reassemble it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRequest {
    pub file_name: String,
    /// Shared between retries of the same chunk.
    pub data: Bytes,
    pub chunk_number: u64,
    pub chunk_size: u64,
    pub total_size: u64,
    pub identifier: String,
    pub target_path: String,
    pub total_chunks: u64,
}

impl ChunkRequest {
    pub fn current_chunk_size(&self) -> u64 {
        self.data.len() as u64
    }

    /// Text fields sent next to the `file` part.
    pub fn form_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("description", String::new()),
            ("flowChunkNumber", self.chunk_number.to_string()),
            ("flowChunkSize", self.chunk_size.to_string()),
            ("flowCurrentChunkSize", self.current_chunk_size().to_string()),
            ("flowTotalSize", self.total_size.to_string()),
            ("flowIdentifier", self.identifier.clone()),
            ("flowFilename", self.target_path.clone()),
            ("flowRelativePath", self.target_path.clone()),
            ("flowTotalChunks", self.total_chunks.to_string()),
        ]
    }

    pub fn build_form(&self) -> AppResult<multipart::Form> {
        let mut form = multipart::Form::new();

        for (key, value) in self.form_fields() {
            form = form.text(key, value);
        }

        let part = multipart::Part::stream_with_length(
            Body::from(self.data.clone()),
            self.current_chunk_size(),
        )
            .file_name(self.file_name.clone())
            .mime_str("application/octet-stream")?;

        Ok(form.part("file", part))
    }
}

/// Optional parameters of the "complete" action.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompleteParams {
    pub target_folder_id: i64,
    pub exam_id: i64,
    pub series_id: i64,
    pub task_definition_id: i64,
    pub import_file: Option<String>,
    pub extract_zip: bool,
}

impl CompleteParams {
    /// JSON body; ids are sent only when positive, the import file only when
    /// non-empty and the flag only when set.
    pub fn to_body(&self) -> BTreeMap<&'static str, String> {
        let mut data = BTreeMap::new();

        if let Some(import_file) = self.import_file.as_deref().filter(|s| !s.is_empty()) {
            data.insert("import_file", import_file.to_string());
        }
        for (key, id) in [
            ("folder", self.target_folder_id),
            ("exam", self.exam_id),
            ("series", self.series_id),
            ("task_definition", self.task_definition_id),
        ] {
            if id > 0 {
                data.insert(key, id.to_string());
            }
        }
        if self.extract_zip {
            data.insert("extract_zip_files", "true".to_string());
        }

        data
    }
}

#[derive(Debug, Clone)]
pub enum Credentials {
    Anonymous,
    ApiKey(String),
    Basic { user: String, password: String },
}

/// Per-client transport settings.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub accept_invalid_certs: bool,
    pub timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            accept_invalid_certs: false,
            timeout: Duration::from_secs(600),
        }
    }
}

/// Agora REST client
pub struct AgoraClient {
    client: Client,
    base_url: String,
    credentials: Credentials,
}

impl AgoraClient {
    pub fn new(
        base_url: &str,
        credentials: Credentials,
        transport: &TransportConfig,
    ) -> AppResult<Self> {
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(AppError::validation(
                "url",
                "The server URL must start with http:// or https://",
            ));
        }

        if transport.accept_invalid_certs {
            log::warn!("Server certificate verification is disabled");
        }

        let client = Client::builder()
            .timeout(transport.timeout)
            .danger_accept_invalid_certs(transport.accept_invalid_certs)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    /// Replace the credentials, e.g. after exchanging basic auth for a key.
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}/",
            self.base_url,
            path.trim_start_matches('/').trim_end_matches('/')
        )
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.credentials {
            Credentials::Anonymous => request,
            Credentials::ApiKey(key) => request.header(
                reqwest::header::AUTHORIZATION,
                format!("{} {}", API_KEY_SCHEME, key),
            ),
            Credentials::Basic { user, password } => request.basic_auth(user, Some(password)),
        }
    }

    async fn get(&self, url: &str) -> AppResult<Response> {
        log::debug!("GET {}", url);
        Ok(self.authorize(self.client.get(url)).send().await?)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> AppResult<T> {
        let response = self.get(url).await?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(AppError::bad_status(url, status));
        }
        Ok(response.json::<T>().await?)
    }

    /// Liveness check against the version endpoint.
    pub async fn ping(&self) -> AppResult<()> {
        let url = self.url("/api/v1/version/");
        log::debug!("GET {}", url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| AppError::connection(&self.base_url, e))?;

        if response.status() != StatusCode::OK {
            return Err(AppError::connection(
                &self.base_url,
                format!("http status = {}", response.status().as_u16()),
            ));
        }
        Ok(())
    }

    /// Validate the configured credentials.
    pub async fn check_connection(&self) -> AppResult<()> {
        let url = self.url("/api/v1/user/current/");
        let response = self
            .get(&url)
            .await
            .map_err(|e| AppError::connection(&self.base_url, e))?;

        if response.status() != StatusCode::OK {
            return Err(AppError::authentication(&format!(
                "Cannot connect to the Agora server with the api-key (http status = {})",
                response.status().as_u16()
            )));
        }
        Ok(())
    }

    /// Exchange basic credentials for the user's API key.
    pub async fn fetch_api_key(&self) -> AppResult<String> {
        if !matches!(self.credentials, Credentials::Basic { .. }) {
            return Err(AppError::authentication(
                "Username and password are required to request an api-key",
            ));
        }

        let url = self.url("/api/v1/apikey/");
        let response = self.get(&url).await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Err(AppError::authentication(
                "No api-key found. Please create an api-key in your Agora user profile",
            ));
        }
        if !status.is_success() {
            return Err(AppError::authentication(&format!(
                "Could not get the api-key. http status = {}",
                status.as_u16()
            )));
        }

        let target: ApiKeyResponse = response.json().await?;
        Ok(target.key)
    }

    fn import_url(&self, import_id: i64, action: &str) -> String {
        self.url(&format!("/api/v1/import/{}/{}/", import_id, action))
    }
}

impl ImportApi for AgoraClient {
    async fn create_import(&self) -> AppResult<ImportPackage> {
        let url = self.url("/api/v1/import/");
        log::debug!("POST {}", url);
        let response = self
            .authorize(self.client.post(&url))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::CREATED {
            return Err(AppError::import_session(format!(
                "could not get the import session. http status = {}",
                status.as_u16()
            )));
        }

        Ok(response.json::<ImportPackage>().await?)
    }

    async fn upload_chunk(&self, import_id: i64, chunk: &ChunkRequest) -> AppResult<()> {
        let url = self.import_url(import_id, "upload");
        let form = chunk.build_form()?;

        let response = self
            .authorize(self.client.post(&url))
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            log::debug!(
                "Chunk upload rejected with {}: {}",
                status,
                error_text.chars().take(300).collect::<String>()
            );
            return Err(AppError::bad_status(&url, status));
        }

        Ok(())
    }

    async fn flow_file(&self, transfer_id: &str) -> AppResult<FlowFile> {
        let url = self.url(&format!("/api/v1/flowfile/{}/", transfer_id));
        self.get_json(&url).await
    }

    async fn complete_import(&self, import_id: i64, params: &CompleteParams) -> AppResult<()> {
        let url = self.import_url(import_id, "complete");
        log::debug!("POST {}", url);
        let response = self
            .authorize(self.client.post(&url))
            .json(&params.to_body())
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::NO_CONTENT {
            return Err(AppError::import_session(format!(
                "the \"complete\" request was invalid. http status = {}. make sure the target folder does exist",
                status.as_u16()
            )));
        }

        Ok(())
    }

    async fn import_progress(&self, import_id: i64) -> AppResult<ImportProgress> {
        let url = self.import_url(import_id, "progress");
        self.get_json(&url).await
    }

    async fn import_result(&self, import_id: i64) -> AppResult<Vec<ImportResult>> {
        let url = self.import_url(import_id, "result");
        self.get_json(&url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk() -> ChunkRequest {
        ChunkRequest {
            file_name: "scan.raw".to_string(),
            data: Bytes::from(vec![7u8; 50]),
            chunk_number: 2,
            chunk_size: 100,
            total_size: 250,
            identifier: "3f0e".to_string(),
            target_path: "exam/scan.raw".to_string(),
            total_chunks: 3,
        }
    }

    #[test]
    fn test_chunk_form_fields() {
        let fields: BTreeMap<_, _> = chunk().form_fields().into_iter().collect();
        assert_eq!(fields["flowChunkNumber"], "2");
        assert_eq!(fields["flowChunkSize"], "100");
        assert_eq!(fields["flowCurrentChunkSize"], "50");
        assert_eq!(fields["flowTotalSize"], "250");
        assert_eq!(fields["flowIdentifier"], "3f0e");
        assert_eq!(fields["flowFilename"], "exam/scan.raw");
        assert_eq!(fields["flowRelativePath"], "exam/scan.raw");
        assert_eq!(fields["flowTotalChunks"], "3");
        assert_eq!(fields["description"], "");
    }

    #[test]
    fn test_chunk_form_builds() {
        assert!(chunk().build_form().is_ok());
    }

    #[test]
    fn test_retried_chunk_shares_its_payload() {
        let original = chunk();
        let retry = original.clone();
        assert_eq!(original.data.as_ptr(), retry.data.as_ptr());

        assert!(original.build_form().is_ok());
        assert!(original.build_form().is_ok());
        assert_eq!(original.data.len(), 50);
    }

    #[test]
    fn test_complete_body_includes_only_set_values() {
        let params = CompleteParams {
            target_folder_id: 12,
            exam_id: -1,
            series_id: 0,
            task_definition_id: 3,
            import_file: Some(String::new()),
            extract_zip: false,
        };
        let body = params.to_body();
        assert_eq!(body.len(), 2);
        assert_eq!(body["folder"], "12");
        assert_eq!(body["task_definition"], "3");

        let params = CompleteParams {
            import_file: Some(r#"{"import": []}"#.to_string()),
            extract_zip: true,
            ..CompleteParams::default()
        };
        let body = params.to_body();
        assert_eq!(body["import_file"], r#"{"import": []}"#);
        assert_eq!(body["extract_zip_files"], "true");
        assert!(!body.contains_key("folder"));
    }

    #[test]
    fn test_url_joining() {
        let client = AgoraClient::new(
            "https://agora.example.com/",
            Credentials::Anonymous,
            &TransportConfig::default(),
        )
        .unwrap();
        assert_eq!(
            client.url("/api/v1/version/"),
            "https://agora.example.com/api/v1/version/"
        );
        assert_eq!(
            client.import_url(7, "upload"),
            "https://agora.example.com/api/v1/import/7/upload/"
        );
    }

    #[test]
    fn test_rejects_url_without_scheme() {
        let result = AgoraClient::new(
            "agora.example.com",
            Credentials::Anonymous,
            &TransportConfig::default(),
        );
        assert!(matches!(result, Err(AppError::Validation { .. })));
    }

    #[tokio::test]
    async fn test_api_key_exchange_requires_basic_credentials() {
        let client = AgoraClient::new(
            "http://127.0.0.1:9",
            Credentials::ApiKey("k".to_string()),
            &TransportConfig::default(),
        )
        .unwrap();
        assert!(matches!(
            client.fetch_api_key().await,
            Err(AppError::Authentication { .. })
        ));
    }
}
