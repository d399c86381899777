use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use google_cloud_storage::client::google_cloud_auth::credentials::CredentialsFile;
use google_cloud_storage::client::{Client, ClientConfig};
use google_cloud_storage::http::objects::delete::DeleteObjectRequest;
use google_cloud_storage::http::objects::download::Range;
use google_cloud_storage::http::objects::get::GetObjectRequest;
use google_cloud_storage::http::objects::upload::{Media, UploadObjectRequest, UploadType};
use google_cloud_storage::http::Error as GcsError;
use log::debug;

use super::{BlobStore, BlobStoreError, Precondition, StoredObject};

/// Blob store backed by a GCS bucket. The bucket may carry a sub path
/// (`bucket/prefix`) under which all keys are placed.
#[derive(Clone)]
pub struct GcsBlobStore {
    bucket: String,
    prefix: String,
    client: Client,
}

impl GcsBlobStore {
    pub async fn new(bucket: &str, credentials_base64: &str) -> anyhow::Result<Self> {
        let credentials_json = general_purpose::STANDARD
            .decode(credentials_base64)
            .map_err(|e| anyhow::anyhow!("Failed to decode base64 credentials: {}", e))?;
        let credentials_str = String::from_utf8(credentials_json)
            .map_err(|e| anyhow::anyhow!("Failed to convert credentials to UTF-8: {}", e))?;

        let credentials = CredentialsFile::new_from_str(&credentials_str)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to parse credentials: {}", e))?;

        let config = ClientConfig::default()
            .with_credentials(credentials)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to configure client: {}", e))?;

        let (bucket, prefix) = Self::split_bucket(bucket);
        Ok(Self {
            bucket,
            prefix,
            client: Client::new(config),
        })
    }

    fn split_bucket(bucket: &str) -> (String, String) {
        if let Some(idx) = bucket.find('/') {
            let (bucket_part, subpath_part) = bucket.split_at(idx);
            (
                bucket_part.to_string(),
                subpath_part.trim_matches('/').to_string(),
            )
        } else {
            (bucket.to_string(), String::new())
        }
    }

    fn object_path(&self, key: &str) -> String {
        let key = key.strip_prefix('/').unwrap_or(key);
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}/{key}", self.prefix)
        }
    }

    fn get_request(&self, key: &str) -> GetObjectRequest {
        GetObjectRequest {
            bucket: self.bucket.clone(),
            object: self.object_path(key),
            ..Default::default()
        }
    }
}

fn map_error(key: &str, err: GcsError) -> BlobStoreError {
    match err {
        GcsError::Response(resp) if resp.code == 404 => BlobStoreError::NotFound(key.to_string()),
        GcsError::Response(resp) if resp.code == 412 => {
            BlobStoreError::PreconditionFailed(key.to_string())
        }
        other => BlobStoreError::Backend(other.to_string()),
    }
}

#[async_trait]
impl BlobStore for GcsBlobStore {
    async fn exists(&self, key: &str) -> Result<bool, BlobStoreError> {
        match self.client.get_object(&self.get_request(key)).await {
            Ok(_) => Ok(true),
            Err(e) => match map_error(key, e) {
                BlobStoreError::NotFound(_) => Ok(false),
                other => Err(other),
            },
        }
    }

    async fn get(&self, key: &str) -> Result<StoredObject, BlobStoreError> {
        let request = self.get_request(key);
        let object = self
            .client
            .get_object(&request)
            .await
            .map_err(|e| map_error(key, e))?;

        // Pin the download to the generation we just read so data and
        // generation always belong together.
        let download = GetObjectRequest {
            generation: Some(object.generation),
            ..request
        };
        let data = self
            .client
            .download_object(&download, &Range::default())
            .await
            .map_err(|e| map_error(key, e))?;

        debug!(
            "Downloaded {} ({} bytes, generation {})",
            key,
            data.len(),
            object.generation
        );
        Ok(StoredObject {
            data,
            generation: object.generation,
        })
    }

    async fn put(
        &self,
        key: &str,
        data: Vec<u8>,
        precondition: Precondition,
    ) -> Result<i64, BlobStoreError> {
        let if_generation_match = match precondition {
            Precondition::None => None,
            // GCS treats generation 0 as "object must not exist"
            Precondition::DoesNotExist => Some(0),
            Precondition::GenerationMatch(generation) => Some(generation),
        };
        let upload_type = UploadType::Simple(Media::new(self.object_path(key)));
        let size = data.len();

        let object = self
            .client
            .upload_object(
                &UploadObjectRequest {
                    bucket: self.bucket.clone(),
                    if_generation_match,
                    ..Default::default()
                },
                data,
                &upload_type,
            )
            .await
            .map_err(|e| map_error(key, e))?;

        debug!(
            "Uploaded {} ({} bytes, generation {})",
            key, size, object.generation
        );
        Ok(object.generation)
    }

    async fn delete(&self, key: &str) -> Result<(), BlobStoreError> {
        self.client
            .delete_object(&DeleteObjectRequest {
                bucket: self.bucket.clone(),
                object: self.object_path(key),
                ..Default::default()
            })
            .await
            .map_err(|e| map_error(key, e))
    }
}
