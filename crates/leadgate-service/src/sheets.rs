//! Google Sheets backend for the export pipeline.
//!
//! Implements [`SheetsClient`] over the Sheets REST API using a
//! service-account OAuth flow: an RS256-signed JWT assertion is exchanged at
//! the token endpoint for a short-lived access token, cached until shortly
//! before expiry.
//!
//! The API base and token endpoint are configurable so tests can point the
//! client at a local mock server.

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use leadgate_api::{ExportSettings, GoogleServiceAccount};
use leadgate_core::export::{SheetsClient, SheetsError};
use leadgate_core::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};
use url::Url;

/// Default Sheets API endpoint
const DEFAULT_API_BASE: &str = "https://sheets.googleapis.com";

/// OAuth scope required for reading and writing spreadsheets
const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";

/// Access tokens are refreshed this many seconds before they expire
const TOKEN_REFRESH_MARGIN_SECONDS: i64 = 60;

/// Per-request timeout for every Sheets and token call
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors from client construction
#[derive(Debug, thiserror::Error)]
pub enum SheetsClientError {
    #[error("Export settings incomplete: {message}")]
    Incomplete { message: String },

    #[error("Failed to read private key file: {0}")]
    KeyFile(#[from] std::io::Error),

    #[error("Invalid RSA private key: {0}")]
    InvalidKey(#[from] jsonwebtoken::errors::Error),

    #[error("Failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}

struct CachedToken {
    access_token: String,
    expires_at: Timestamp,
}

/// [`SheetsClient`] implementation backed by the Google Sheets REST API
pub struct GoogleSheetsClient {
    http: reqwest::Client,
    spreadsheet_id: String,
    client_email: String,
    encoding_key: EncodingKey,
    token_uri: String,
    api_base: String,
    token: Mutex<Option<CachedToken>>,
}

impl GoogleSheetsClient {
    /// Build a client from the export settings.
    ///
    /// # Errors
    ///
    /// Returns [`SheetsClientError`] when the settings lack a spreadsheet id
    /// or credentials, or when the private key cannot be parsed.
    pub fn from_settings(settings: &ExportSettings) -> Result<Self, SheetsClientError> {
        let spreadsheet_id =
            settings
                .spreadsheet_id
                .clone()
                .ok_or_else(|| SheetsClientError::Incomplete {
                    message: "export.spreadsheet_id is required".to_string(),
                })?;
        let google = settings
            .google
            .as_ref()
            .ok_or_else(|| SheetsClientError::Incomplete {
                message: "export.google credentials are required".to_string(),
            })?;

        Self::new(spreadsheet_id, google, DEFAULT_API_BASE.to_string())
    }

    /// Build a client with an explicit API base (tests use a mock server)
    pub fn new(
        spreadsheet_id: String,
        google: &GoogleServiceAccount,
        api_base: String,
    ) -> Result<Self, SheetsClientError> {
        let pem = match (&google.private_key_pem, &google.private_key_path) {
            (Some(inline), _) => inline.clone(),
            (None, Some(path)) => std::fs::read_to_string(path)?,
            (None, None) => {
                return Err(SheetsClientError::Incomplete {
                    message: "export.google.private_key_pem or private_key_path is required"
                        .to_string(),
                });
            }
        };

        let encoding_key = EncodingKey::from_rsa_pem(pem.as_bytes())?;

        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            http,
            spreadsheet_id,
            client_email: google.client_email.clone(),
            encoding_key,
            token_uri: google.token_uri.clone(),
            api_base,
            token: Mutex::new(None),
        })
    }

    /// URL for a spreadsheet sub-path, with proper segment encoding
    fn spreadsheet_url(&self, trailing: &[&str]) -> Result<Url, SheetsError> {
        let mut url = Url::parse(&self.api_base).map_err(|e| SheetsError::Transport {
            message: format!("invalid API base: {e}"),
        })?;
        {
            let mut segments = url.path_segments_mut().map_err(|_| SheetsError::Transport {
                message: "API base cannot carry path segments".to_string(),
            })?;
            segments.extend(["v4", "spreadsheets", self.spreadsheet_id.as_str()]);
            segments.extend(trailing);
        }
        Ok(url)
    }

    /// Current access token, refreshed through the JWT assertion flow when
    /// missing or close to expiry.
    async fn access_token(&self) -> Result<String, SheetsError> {
        let mut cached = self.token.lock().await;

        let needs_refresh = match cached.as_ref() {
            Some(token) => {
                Timestamp::now().add_seconds(TOKEN_REFRESH_MARGIN_SECONDS) >= token.expires_at
            }
            None => true,
        };

        if needs_refresh {
            let token = self.fetch_token().await?;
            debug!("Obtained new Sheets access token");
            *cached = Some(token);
        }

        Ok(cached
            .as_ref()
            .map(|t| t.access_token.clone())
            .unwrap_or_default())
    }

    async fn fetch_token(&self) -> Result<CachedToken, SheetsError> {
        #[derive(Serialize)]
        struct Claims<'a> {
            iss: &'a str,
            scope: &'a str,
            aud: &'a str,
            iat: i64,
            exp: i64,
        }

        #[derive(Deserialize)]
        struct TokenResponse {
            access_token: String,
            expires_in: i64,
        }

        let now = Timestamp::now();
        let claims = Claims {
            iss: &self.client_email,
            scope: SHEETS_SCOPE,
            aud: &self.token_uri,
            iat: now.unix_seconds(),
            exp: now.add_seconds(3600).unix_seconds(),
        };

        let assertion = jsonwebtoken::encode(
            &Header::new(Algorithm::RS256),
            &claims,
            &self.encoding_key,
        )
        .map_err(|e| SheetsError::Auth {
            message: format!("failed to sign JWT assertion: {e}"),
        })?;

        let response = self
            .http
            .post(&self.token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await
            .map_err(|e| SheetsError::Transport {
                message: format!("token request failed: {e}"),
            })?;

        if !response.status().is_success() {
            return Err(SheetsError::Auth {
                message: format!("token endpoint returned {}", response.status()),
            });
        }

        let token: TokenResponse =
            response.json().await.map_err(|e| SheetsError::Auth {
                message: format!("malformed token response: {e}"),
            })?;

        Ok(CachedToken {
            access_token: token.access_token,
            expires_at: now.add_seconds(token.expires_in),
        })
    }

    /// POST a batchUpdate request body
    async fn batch_update(
        &self,
        body: serde_json::Value,
    ) -> Result<serde_json::Value, SheetsError> {
        let token = self.access_token().await?;
        let url = self.spreadsheet_url(&[])?;
        // batchUpdate is a custom method: ":batchUpdate" suffixes the id
        // segment rather than adding a path segment.
        let url_string = format!("{}:batchUpdate", url);

        let response = self
            .http
            .post(url_string)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| SheetsError::Transport {
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(SheetsError::Api {
                status: status.as_u16(),
                message,
            });
        }

        response.json().await.map_err(|e| SheetsError::Api {
            status: status.as_u16(),
            message: format!("malformed batchUpdate response: {e}"),
        })
    }
}

#[async_trait]
impl SheetsClient for GoogleSheetsClient {
    async fn list_tabs(&self) -> Result<HashMap<String, i64>, SheetsError> {
        #[derive(Deserialize)]
        struct SpreadsheetResponse {
            #[serde(default)]
            sheets: Vec<Sheet>,
        }
        #[derive(Deserialize)]
        struct Sheet {
            properties: SheetProperties,
        }
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct SheetProperties {
            sheet_id: i64,
            title: String,
        }

        let token = self.access_token().await?;
        let mut url = self.spreadsheet_url(&[])?;
        url.query_pairs_mut()
            .append_pair("fields", "sheets.properties");

        let response = self
            .http
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| SheetsError::Transport {
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(SheetsError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let spreadsheet: SpreadsheetResponse =
            response.json().await.map_err(|e| SheetsError::Api {
                status: status.as_u16(),
                message: format!("malformed spreadsheet response: {e}"),
            })?;

        Ok(spreadsheet
            .sheets
            .into_iter()
            .map(|s| (s.properties.title, s.properties.sheet_id))
            .collect())
    }

    async fn add_tab(&self, title: &str) -> Result<i64, SheetsError> {
        let body = serde_json::json!({
            "requests": [{
                "addSheet": {"properties": {"title": title}}
            }]
        });

        let reply = self.batch_update(body).await?;
        let sheet_id = reply
            .pointer("/replies/0/addSheet/properties/sheetId")
            .and_then(serde_json::Value::as_i64)
            .ok_or_else(|| SheetsError::Api {
                status: 200,
                message: "addSheet reply missing sheetId".to_string(),
            })?;

        info!(tab = title, sheet_id, "Created spreadsheet tab");
        Ok(sheet_id)
    }

    async fn append_row(
        &self,
        tab: &str,
        row: Vec<serde_json::Value>,
    ) -> Result<(), SheetsError> {
        let token = self.access_token().await?;
        let range = format!("{tab}!A1");
        let url = self.spreadsheet_url(&["values", &range])?;
        // The append custom method suffixes the range segment.
        let url_string = format!("{}:append", url);

        let response = self
            .http
            .post(url_string)
            .query(&[("valueInputOption", "USER_ENTERED")])
            .bearer_auth(token)
            .json(&serde_json::json!({"values": [row]}))
            .send()
            .await
            .map_err(|e| SheetsError::Transport {
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(SheetsError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(())
    }

    async fn format_header(&self, sheet_id: i64) -> Result<(), SheetsError> {
        // One-time formatting at tab creation: bold header, frozen first
        // row, basic filter over the header row.
        let body = serde_json::json!({
            "requests": [
                {
                    "repeatCell": {
                        "range": {"sheetId": sheet_id, "startRowIndex": 0, "endRowIndex": 1},
                        "cell": {"userEnteredFormat": {"textFormat": {"bold": true}}},
                        "fields": "userEnteredFormat.textFormat.bold"
                    }
                },
                {
                    "updateSheetProperties": {
                        "properties": {
                            "sheetId": sheet_id,
                            "gridProperties": {"frozenRowCount": 1}
                        },
                        "fields": "gridProperties.frozenRowCount"
                    }
                },
                {
                    "setBasicFilter": {
                        "filter": {"range": {"sheetId": sheet_id, "startRowIndex": 0}}
                    }
                }
            ]
        });

        self.batch_update(body).await.map(|_| ())
    }
}

/// Placeholder backend wired when exporting is disabled.
///
/// The pipeline short-circuits before touching the client, so every call
/// reaching this implementation is a wiring bug worth surfacing loudly.
#[derive(Debug, Default)]
pub struct UnconfiguredSheets;

#[async_trait]
impl SheetsClient for UnconfiguredSheets {
    async fn list_tabs(&self) -> Result<HashMap<String, i64>, SheetsError> {
        Err(unconfigured())
    }

    async fn add_tab(&self, _title: &str) -> Result<i64, SheetsError> {
        Err(unconfigured())
    }

    async fn append_row(
        &self,
        _tab: &str,
        _row: Vec<serde_json::Value>,
    ) -> Result<(), SheetsError> {
        Err(unconfigured())
    }

    async fn format_header(&self, _sheet_id: i64) -> Result<(), SheetsError> {
        Err(unconfigured())
    }
}

fn unconfigured() -> SheetsError {
    SheetsError::Auth {
        message: "Sheets export is not configured".to_string(),
    }
}

#[cfg(test)]
#[path = "sheets_tests.rs"]
mod tests;
