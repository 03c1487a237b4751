use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use uuid::Uuid;

/// Blob store for uploaded reports and remark signatures.
#[async_trait]
pub trait ObjectStorage: Send + Sync + 'static {
    async fn put_object(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: Option<String>,
        content_disposition: Option<String>,
    ) -> Result<()>;

    async fn presign_get_object(&self, key: &str, expires_in: Duration) -> Result<String>;

    async fn get_object(&self, key: &str) -> Result<Vec<u8>>;

    async fn delete_object(&self, key: &str) -> Result<()>;
}

pub fn report_key(file_id: Uuid, file_name: &str) -> String {
    format!("files/{file_id}/{}", sanitize_segment(file_name))
}

pub fn signature_key(para_id: &str, department: &str, extension: Option<&str>) -> String {
    let mut key = format!(
        "signatures/{}/{}-{}",
        sanitize_segment(para_id),
        sanitize_segment(department),
        Uuid::new_v4().simple()
    );
    if let Some(ext) = extension.map(sanitize_segment).filter(|ext| !ext.is_empty()) {
        key.push('.');
        key.push_str(&ext);
    }
    key
}

/// Keeps object keys to a predictable character set.
fn sanitize_segment(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-' | '_') {
                ch
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "unnamed".to_string()
    } else {
        cleaned
    }
}

const FILENAME_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

pub fn inline_content_disposition(file_name: &str) -> String {
    let ascii_fallback: String = file_name
        .chars()
        .map(|ch| {
            if ch.is_ascii() && ch != '"' && ch != '\\' && !ch.is_ascii_control() {
                ch
            } else {
                '_'
            }
        })
        .collect();
    let encoded = utf8_percent_encode(file_name, FILENAME_ENCODE_SET);
    format!("inline; filename=\"{ascii_fallback}\"; filename*=UTF-8''{encoded}")
}

pub struct S3Storage {
    client: S3Client,
    bucket: String,
}

impl S3Storage {
    pub fn new(client: S3Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }
}

#[async_trait]
impl ObjectStorage for S3Storage {
    async fn put_object(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: Option<String>,
        content_disposition: Option<String>,
    ) -> Result<()> {
        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(bytes));

        if let Some(content_type) = content_type {
            request = request.content_type(content_type);
        }
        if let Some(content_disposition) = content_disposition {
            request = request.content_disposition(content_disposition);
        }

        request
            .send()
            .await
            .with_context(|| format!("failed to store object {key}"))?;
        Ok(())
    }

    async fn presign_get_object(&self, key: &str, expires_in: Duration) -> Result<String> {
        let presign_config = PresigningConfig::builder()
            .expires_in(expires_in)
            .build()
            .context("failed to build presigning config")?;

        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presign_config)
            .await
            .context("failed to presign report download")?;

        Ok(presigned.uri().to_string())
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("failed to fetch object {key}"))?;

        let bytes = response
            .body
            .collect()
            .await
            .context("failed to read object stream")?
            .into_bytes()
            .to_vec();
        Ok(bytes)
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("failed to delete object {key}"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_keys_are_scoped_by_file() {
        let id = Uuid::nil();
        assert_eq!(
            report_key(id, "Annual Report 2023.pdf"),
            format!("files/{id}/Annual_Report_2023.pdf")
        );
    }

    #[test]
    fn signature_keys_carry_department_and_extension() {
        let key = signature_key("audit-paraP1", "Finance Dept", Some("png"));
        assert!(key.starts_with("signatures/audit-paraP1/Finance_Dept-"));
        assert!(key.ends_with(".png"));
        assert!(!signature_key("P1", "Stores", None).contains('.'));
    }

    #[test]
    fn content_disposition_encodes_non_ascii() {
        let header = inline_content_disposition("रिपोर्ट.pdf");
        assert!(header.starts_with("inline; filename=\""));
        assert!(header.contains("filename*=UTF-8''%E0%A4"));
    }
}
