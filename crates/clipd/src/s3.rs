use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use humansize::{format_size, DECIMAL};
use log::{debug, info};
use crate::config::StorageConfig;
use crate::storage::{join_url, validate_key, ArtifactStore, StorageError, StorageResult};

/// Uploads artifacts to an S3-compatible bucket
#[derive(Clone)]
pub struct S3Store {
    client: Client,
    bucket: String,
    region: String,
    public_base_url: Option<String>,
}

impl S3Store {
    /// Create a client from the `s3` storage section.
    ///
    /// Explicit keys win; otherwise the default AWS provider chain is used
    /// (`AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY`, profiles, instance roles).
    pub async fn from_config(cfg: &StorageConfig) -> StorageResult<Self> {
        let StorageConfig::S3 {
            bucket,
            region,
            endpoint_url,
            public_base_url,
            access_key_id,
            secret_access_key,
        } = cfg
        else {
            return Err(StorageError::config_error("storage backend is not s3"));
        };

        if bucket.is_empty() {
            return Err(StorageError::config_error("S3 bucket name not set"));
        }

        let mut loader = aws_config::defaults(BehaviorVersion::latest()).region(Region::new(region.clone()));
        if let (Some(key), Some(secret)) = (access_key_id, secret_access_key) {
            loader = loader.credentials_provider(Credentials::new(key, secret, None, None, "clipd-config"));
        }
        let sdk_config = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);
        if let Some(endpoint) = endpoint_url {
            // Custom endpoints (R2, MinIO) generally need path-style addressing
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }
        let client = Client::from_conf(builder.build());

        Ok(Self {
            client,
            bucket: bucket.clone(),
            region: region.clone(),
            public_base_url: public_base_url.clone(),
        })
    }

    /// Public address of an object, derived from bucket, region and key
    pub fn public_url(&self, key: &str) -> String {
        public_url(&self.bucket, &self.region, self.public_base_url.as_deref(), key)
    }
}

pub fn public_url(bucket: &str, region: &str, public_base_url: Option<&str>, key: &str) -> String {
    match public_base_url {
        Some(base) => join_url(base, key),
        None => format!("https://{}.s3.{}.amazonaws.com/{}", bucket, region, key),
    }
}

/// `Content-Disposition` header asking browsers to download under `filename`
pub fn attachment_disposition(filename: &str) -> String {
    let safe: String = filename
        .chars()
        .map(|c| if c == '"' || c == '\\' || c.is_control() { '_' } else { c })
        .collect();
    format!("attachment; filename=\"{}\"", safe)
}

#[async_trait]
impl ArtifactStore for S3Store {
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
        disposition_filename: &str,
    ) -> StorageResult<String> {
        validate_key(key)?;
        let size = bytes.len();
        debug!("Uploading {} to s3://{}/{}", format_size(size, DECIMAL), self.bucket, key);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(bytes))
            .content_type(content_type)
            .content_disposition(attachment_disposition(disposition_filename))
            .send()
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;

        info!("Uploaded {} to s3://{}/{}", format_size(size, DECIMAL), self.bucket, key);
        Ok(self.public_url(key))
    }

    fn name(&self) -> &'static str {
        "s3"
    }
}
