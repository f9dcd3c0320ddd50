//! Optional S3-compatible object storage target.
//!
//! Constructed only when a bucket is configured; every remote step in the
//! pipeline treats an absent `RemoteStore` as "skip silently". Credentials
//! come from the standard AWS environment/profile chain.

use crate::archive;
use crate::config::AppConfig;
use anyhow::Context;
use aws_sdk_s3::primitives::ByteStream;
use std::path::Path;

pub struct RemoteStore {
    client: aws_sdk_s3::Client,
    bucket: String,
    prefix: String,
}

impl RemoteStore {
    /// Returns `None` when no bucket is configured — remote upload and
    /// remote retention are then disabled, which is not an error.
    pub async fn from_config(cfg: &AppConfig) -> Option<Self> {
        let bucket = cfg.s3_bucket.clone()?;

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = cfg.s3_region.clone() {
            loader = loader.region(aws_config::Region::new(region));
        }
        if let Some(endpoint) = &cfg.s3_endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let sdk_config = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);
        if cfg.s3_endpoint.is_some() {
            // Custom endpoints (MinIO and friends) need path-style addressing.
            builder = builder.force_path_style(true);
        }
        let client = aws_sdk_s3::Client::from_conf(builder.build());

        tracing::info!(bucket = %bucket, prefix = %cfg.s3_key_prefix, "Remote store enabled");
        Some(Self {
            client,
            bucket,
            prefix: cfg.s3_key_prefix.trim_matches('/').to_string(),
        })
    }

    fn key(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", self.prefix, name)
        }
    }

    /// Upload a local archive. Returns the `s3://` target recorded in the
    /// State Store as provenance.
    pub async fn upload(&self, path: &Path, name: &str) -> anyhow::Result<String> {
        let body = ByteStream::from_path(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        let key = self.key(name);
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(body)
            .send()
            .await
            .with_context(|| format!("uploading s3://{}/{}", self.bucket, key))?;
        Ok(format!("s3://{}/{}", self.bucket, key))
    }

    /// Archive basenames currently present under the configured prefix.
    pub async fn list_archive_names(&self) -> anyhow::Result<Vec<String>> {
        let mut names = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let mut req = self.client.list_objects_v2().bucket(&self.bucket);
            if !self.prefix.is_empty() {
                req = req.prefix(&self.prefix);
            }
            if let Some(t) = &token {
                req = req.continuation_token(t);
            }
            let resp = req
                .send()
                .await
                .with_context(|| format!("listing s3://{}/{}", self.bucket, self.prefix))?;

            for obj in resp.contents() {
                if let Some(name) = obj.key().and_then(|k| k.rsplit('/').next()) {
                    if !name.is_empty() {
                        names.push(name.to_string());
                    }
                }
            }

            if resp.is_truncated() == Some(true) {
                token = resp.next_continuation_token().map(str::to_string);
            } else {
                break;
            }
        }
        Ok(names)
    }

    pub async fn delete(&self, name: &str) -> anyhow::Result<()> {
        let key = self.key(name);
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .with_context(|| format!("deleting s3://{}/{}", self.bucket, key))?;
        Ok(())
    }

    pub async fn download(&self, name: &str, dest: &Path) -> anyhow::Result<()> {
        let key = self.key(name);
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .with_context(|| format!("fetching s3://{}/{}", self.bucket, key))?;

        let mut body = output.body.into_async_read();
        let mut file = tokio::fs::File::create(dest)
            .await
            .with_context(|| format!("creating {}", dest.display()))?;
        tokio::io::copy(&mut body, &mut file)
            .await
            .context("writing downloaded archive")?;
        Ok(())
    }

    /// Name of the most recent archive in the bucket for this deployment.
    pub async fn latest_archive(&self, deployment_id: &str) -> anyhow::Result<Option<String>> {
        let names = self.list_archive_names().await?;
        Ok(archive::latest(&names, deployment_id))
    }
}
