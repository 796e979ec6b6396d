use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::{RequestBuilder, StatusCode};
use serde::Serialize;
use url::Url;

use crate::config::Config;

use super::api_types::{ApiDocumentInsert, ApiDocumentRow, ApiDocumentUpdate};
use super::types::{Document, DocumentPatch, NewDocument};

/// Remote data API for document records.
///
/// Collections are returned newest first.
#[async_trait]
pub trait DocumentApi: Send + Sync {
  /// All non-archived documents owned by the user
  async fn fetch_all(&self, user_id: &str) -> Result<Vec<Document>>;

  /// Archived documents owned by the user
  async fn fetch_archived(&self, user_id: &str) -> Result<Vec<Document>>;

  /// Non-archived documents attached to one pet
  async fn fetch_by_pet(&self, user_id: &str, pet_id: &str) -> Result<Vec<Document>>;

  async fn create(&self, user_id: &str, new: &NewDocument) -> Result<Document>;

  async fn update(&self, id: &str, patch: &DocumentPatch) -> Result<Document>;

  async fn set_favorite(&self, id: &str, favorite: bool) -> Result<Document>;

  /// Archive (`true`) or restore (`false`) a document
  async fn set_archived(&self, id: &str, archived: bool) -> Result<()>;

  /// Permanently delete a document
  async fn delete(&self, id: &str) -> Result<()>;
}

/// HTTP client for the backend's REST table interface
#[derive(Clone)]
pub struct RestDocumentClient {
  http: reqwest::Client,
  table_url: Url,
  api_key: String,
  access_token: String,
}

impl RestDocumentClient {
  pub fn new(config: &Config) -> Result<Self> {
    let api_key = Config::get_api_key()?;
    let access_token = Config::get_access_token().unwrap_or_else(|| api_key.clone());

    let table_url = table_url(&config.api.url)?;

    let http = reqwest::Client::builder()
      .gzip(true)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      http,
      table_url,
      api_key,
      access_token,
    })
  }

  fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
    builder
      .header("apikey", &self.api_key)
      .bearer_auth(&self.access_token)
  }

  async fn select(&self, filters: &[(&str, String)]) -> Result<Vec<Document>> {
    let mut query = vec![
      ("select", "*".to_string()),
      ("order", "created_at.desc".to_string()),
    ];
    query.extend(filters.iter().map(|(k, v)| (*k, v.clone())));

    let request = self.authorized(self.http.get(self.table_url.clone())).query(&query);
    let rows: Vec<ApiDocumentRow> = send(request, "fetch documents").await?;

    Ok(rows.into_iter().map(Document::from).collect())
  }

  async fn patch_one<B: Serialize + Sync>(&self, id: &str, body: &B) -> Result<Document> {
    let request = self
      .authorized(self.http.patch(self.table_url.clone()))
      .query(&[("id", format!("eq.{}", id))])
      .header("Prefer", "return=representation")
      .json(body);

    let rows: Vec<ApiDocumentRow> = send(request, "update document").await?;
    rows
      .into_iter()
      .next()
      .map(Document::from)
      .ok_or_else(|| eyre!("Document {} not found", id))
  }
}

/// Documents table under the API base url, keeping any path prefix.
fn table_url(base: &str) -> Result<Url> {
  let mut base = Url::parse(base).map_err(|e| eyre!("Invalid API url {}: {}", base, e))?;
  // Without a trailing slash `join` replaces the last segment
  if !base.path().ends_with('/') {
    let path = format!("{}/", base.path());
    base.set_path(&path);
  }
  base
    .join("rest/v1/documents")
    .map_err(|e| eyre!("Invalid API url {}: {}", base, e))
}

/// Send a request and decode the JSON body, mapping HTTP failures to errors.
async fn send<T: serde::de::DeserializeOwned>(request: RequestBuilder, action: &str) -> Result<T> {
  let response = request
    .send()
    .await
    .map_err(|e| eyre!("Failed to {}: {}", action, e))?;

  let status = response.status();
  if !status.is_success() {
    let body = response.text().await.unwrap_or_default();
    return Err(match status {
      StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
        eyre!("Failed to {}: not authorized ({})", action, body)
      }
      StatusCode::NOT_FOUND => eyre!("Failed to {}: not found", action),
      _ => eyre!("Failed to {}: HTTP {} {}", action, status, body),
    });
  }

  response
    .json::<T>()
    .await
    .map_err(|e| eyre!("Failed to parse response to {}: {}", action, e))
}

#[async_trait]
impl DocumentApi for RestDocumentClient {
  async fn fetch_all(&self, user_id: &str) -> Result<Vec<Document>> {
    self
      .select(&[
        ("user_id", format!("eq.{}", user_id)),
        ("is_archived", "eq.false".to_string()),
      ])
      .await
  }

  async fn fetch_archived(&self, user_id: &str) -> Result<Vec<Document>> {
    self
      .select(&[
        ("user_id", format!("eq.{}", user_id)),
        ("is_archived", "eq.true".to_string()),
      ])
      .await
  }

  async fn fetch_by_pet(&self, user_id: &str, pet_id: &str) -> Result<Vec<Document>> {
    self
      .select(&[
        ("user_id", format!("eq.{}", user_id)),
        ("pet_id", format!("eq.{}", pet_id)),
        ("is_archived", "eq.false".to_string()),
      ])
      .await
  }

  async fn create(&self, user_id: &str, new: &NewDocument) -> Result<Document> {
    let request = self
      .authorized(self.http.post(self.table_url.clone()))
      .header("Prefer", "return=representation")
      .json(&ApiDocumentInsert::new(new, user_id));

    let rows: Vec<ApiDocumentRow> = send(request, "create document").await?;
    rows
      .into_iter()
      .next()
      .map(Document::from)
      .ok_or_else(|| eyre!("Backend returned no row for created document"))
  }

  async fn update(&self, id: &str, patch: &DocumentPatch) -> Result<Document> {
    self.patch_one(id, &ApiDocumentUpdate::from(patch)).await
  }

  async fn set_favorite(&self, id: &str, favorite: bool) -> Result<Document> {
    let body = ApiDocumentUpdate {
      is_favorite: Some(favorite),
      ..Default::default()
    };
    self.patch_one(id, &body).await
  }

  async fn set_archived(&self, id: &str, archived: bool) -> Result<()> {
    let body = ApiDocumentUpdate {
      is_archived: Some(archived),
      ..Default::default()
    };
    self.patch_one(id, &body).await.map(|_| ())
  }

  async fn delete(&self, id: &str) -> Result<()> {
    let request = self
      .authorized(self.http.delete(self.table_url.clone()))
      .query(&[("id", format!("eq.{}", id))])
      .header("Prefer", "return=representation");

    let rows: Vec<ApiDocumentRow> = send(request, "delete document").await?;
    if rows.is_empty() {
      return Err(eyre!("Document {} not found", id));
    }
    Ok(())
  }
}
