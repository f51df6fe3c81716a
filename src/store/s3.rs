// backuptool/src/store/s3.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_s3 as s3;
use chrono::{DateTime, Utc};
use s3::config::Region;
use s3::presigning::PresigningConfig;
use s3::primitives::ByteStream;
use s3::types::{BucketCannedAcl, BucketLocationConstraint, CreateBucketConfiguration, Delete, ObjectIdentifier};
use std::path::Path;
use std::time::Duration;

use crate::config::S3Settings;
use crate::store::{ObjectMeta, ObjectStore};

// delete_objects accepts at most 1000 keys per request.
const DELETE_CHUNK_SIZE: usize = 1000;

/// Gateway to an S3-compatible object store (AWS, Backblaze B2, DigitalOcean
/// Spaces, MinIO, ...) addressed through a custom endpoint.
pub struct S3Gateway {
    client: s3::Client,
}

impl S3Gateway {
    pub async fn connect(settings: &S3Settings) -> Self {
        let endpoint_url = if settings.endpoint.starts_with("http://")
            || settings.endpoint.starts_with("https://")
        {
            settings.endpoint.clone()
        } else {
            format!("https://{}", settings.endpoint)
        };

        let sdk_config = aws_config::defaults(s3::config::BehaviorVersion::latest())
            .endpoint_url(endpoint_url)
            .region(Region::new(settings.region.clone()))
            .credentials_provider(s3::config::Credentials::new(
                &settings.access_key_id,
                &settings.secret_access_key,
                None,
                None,
                "Static",
            ))
            .load()
            .await;

        Self {
            client: s3::Client::new(&sdk_config),
        }
    }
}

fn to_chrono(dt: &s3::primitives::DateTime) -> DateTime<Utc> {
    DateTime::from_timestamp(dt.secs(), dt.subsec_nanos()).unwrap_or_default()
}

#[async_trait]
impl ObjectStore for S3Gateway {
    async fn put(&self, bucket: &str, key: &str, file_path: &Path) -> Result<()> {
        let body = ByteStream::from_path(file_path).await.with_context(|| {
            format!("Failed to read upload payload: {}", file_path.display())
        })?;

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .with_context(|| {
                format!(
                    "Failed to upload {} to bucket {} with key {}",
                    file_path.display(),
                    bucket,
                    key
                )
            })?;
        Ok(())
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectMeta>> {
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .into_paginator()
            .send();

        let mut objects = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page
                .with_context(|| format!("Failed to list bucket {bucket} under {prefix}"))?;
            for obj in page.contents() {
                let Some(key) = obj.key() else { continue };
                let last_modified = obj
                    .last_modified()
                    .map(to_chrono)
                    .unwrap_or_default();
                objects.push(ObjectMeta {
                    key: key.to_string(),
                    last_modified,
                    size: obj.size().unwrap_or(0),
                });
            }
        }
        Ok(objects)
    }

    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<()> {
        for chunk in keys.chunks(DELETE_CHUNK_SIZE) {
            let identifiers = chunk
                .iter()
                .map(|key| ObjectIdentifier::builder().key(key).build())
                .collect::<Result<Vec<_>, _>>()
                .context("Failed to build delete request")?;
            let delete = Delete::builder()
                .set_objects(Some(identifiers))
                .quiet(true)
                .build()
                .context("Failed to build delete request")?;

            self.client
                .delete_objects()
                .bucket(bucket)
                .delete(delete)
                .send()
                .await
                .with_context(|| {
                    format!("Failed to delete {} object(s) from bucket {bucket}", chunk.len())
                })?;
        }
        Ok(())
    }

    async fn presign(&self, bucket: &str, key: &str, expiration: Duration) -> Result<String> {
        let presigning = PresigningConfig::expires_in(expiration)
            .context("Invalid presign expiration")?;
        let request = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .presigned(presigning)
            .await
            .with_context(|| format!("Failed to presign s3://{bucket}/{key}"))?;
        Ok(request.uri().to_string())
    }

    async fn ensure_bucket(&self, name: &str, region: Option<&str>, public: bool) -> Result<bool> {
        if self.client.head_bucket().bucket(name).send().await.is_ok() {
            println!("Bucket already exists: {name}");
            return Ok(false);
        }

        let mut request = self.client.create_bucket().bucket(name).acl(if public {
            BucketCannedAcl::PublicRead
        } else {
            BucketCannedAcl::Private
        });
        if let Some(region) = region {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(region))
                    .build(),
            );
        }
        request
            .send()
            .await
            .with_context(|| format!("Failed to create bucket '{name}'"))?;
        println!("Bucket created: {name}");
        Ok(true)
    }

    async fn set_bucket_visibility(&self, name: &str, public: bool) -> Result<()> {
        if public {
            let policy = serde_json::json!({
                "Version": "2012-10-17",
                "Statement": [{
                    "Sid": "PublicReadGetObject",
                    "Effect": "Allow",
                    "Principal": "*",
                    "Action": ["s3:GetObject"],
                    "Resource": [format!("arn:aws:s3:::{name}/*")],
                }],
            });
            self.client
                .put_bucket_policy()
                .bucket(name)
                .policy(policy.to_string())
                .send()
                .await
                .with_context(|| format!("Failed to apply public-read policy to '{name}'"))?;
            println!("Bucket policy applied for public read: {name}");
        } else {
            match self.client.delete_bucket_policy().bucket(name).send().await {
                Ok(_) => println!("Bucket policy removed (bucket is private): {name}"),
                Err(_) => println!("Bucket already private or no policy set: {name}"),
            }
        }
        Ok(())
    }

    async fn list_buckets(&self) -> Result<Vec<String>> {
        let response = self
            .client
            .list_buckets()
            .send()
            .await
            .context("Failed to list buckets")?;
        Ok(response
            .buckets()
            .iter()
            .filter_map(|b| b.name())
            .map(|n| n.to_string())
            .collect())
    }
}
