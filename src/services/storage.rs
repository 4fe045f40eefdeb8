use async_trait::async_trait;
use s3::creds::Credentials;
use s3::error::S3Error;
use s3::{Bucket, Region};

/// Get/put byte blobs by key against a durable object store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn download(&self, key: &str) -> Result<Vec<u8>, StorageError>;
    async fn upload(&self, key: &str, data: &[u8], content_type: &str)
        -> Result<(), StorageError>;
}

/// S3-compatible object store client holding source images and prediction
/// artifacts.
pub struct S3ImageStore {
    bucket: Box<Bucket>,
}

impl S3ImageStore {
    pub fn new(
        bucket_name: &str,
        endpoint: &str,
        region: &str,
        access_key: &str,
        secret_key: &str,
    ) -> Result<Self, StorageError> {
        let region = Region::Custom {
            region: region.to_string(),
            endpoint: endpoint.to_string(),
        };

        let credentials = Credentials::new(Some(access_key), Some(secret_key), None, None, None)
            .map_err(|e| StorageError::Config(e.to_string()))?;

        let bucket = Bucket::new(bucket_name, region, credentials)
            .map_err(|e| StorageError::Config(e.to_string()))?;

        Ok(Self { bucket })
    }
}

#[async_trait]
impl ObjectStore for S3ImageStore {
    async fn download(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let response = match self.bucket.get_object(key).await {
            Ok(r) if r.status_code() == 404 => {
                return Err(StorageError::NotFound(key.to_string()))
            }
            Ok(r) => r,
            Err(S3Error::HttpFailWithBody(404, _)) => {
                return Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => return Err(StorageError::S3(e)),
        };
        Ok(response.to_vec())
    }

    async fn upload(
        &self,
        key: &str,
        data: &[u8],
        content_type: &str,
    ) -> Result<(), StorageError> {
        self.bucket
            .put_object_with_content_type(key, data, content_type)
            .await
            .map_err(StorageError::S3)?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("S3 operation failed: {0}")]
    S3(#[from] S3Error),

    #[error("object not found: {0}")]
    NotFound(String),

    #[error("Storage configuration error: {0}")]
    Config(String),
}
