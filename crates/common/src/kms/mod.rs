//! Key management abstraction
//!
//! Organization API keys are stored encrypted so an operator can recover
//! them. Decryption is reserved for that admin path; request
//! authentication only ever compares hashes.
//!
//! Providers:
//! - AWS KMS
//! - Mock (hex wrapping, no secrecy; tests and local development)

use crate::config::KmsConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use aws_sdk_kms::error::DisplayErrorContext;
use aws_sdk_kms::primitives::Blob;
use aws_sdk_kms::Client as KmsClient;
use std::sync::Arc;

/// Trait for envelope encryption of secrets
#[async_trait]
pub trait Kms: Send + Sync {
    async fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>>;

    async fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>>;

    /// Provider name for logs
    fn provider(&self) -> &'static str;
}

/// AWS KMS client bound to one key
pub struct AwsKms {
    client: KmsClient,
    key_id: String,
}

impl AwsKms {
    /// Create a client from the default AWS credential chain
    pub async fn new(key_id: String) -> Self {
        let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self {
            client: KmsClient::new(&aws_config),
            key_id,
        }
    }

    /// Create with an existing client
    pub fn with_client(client: KmsClient, key_id: String) -> Self {
        Self { client, key_id }
    }
}

#[async_trait]
impl Kms for AwsKms {
    async fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let output = self
            .client
            .encrypt()
            .key_id(&self.key_id)
            .plaintext(Blob::new(plaintext))
            .send()
            .await
            .map_err(|e| AppError::Kms {
                message: format!("encrypt failed: {}", DisplayErrorContext(&e)),
            })?;

        output
            .ciphertext_blob()
            .map(|blob| blob.as_ref().to_vec())
            .ok_or_else(|| AppError::Kms {
                message: "encrypt returned no ciphertext".to_string(),
            })
    }

    async fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let output = self
            .client
            .decrypt()
            .key_id(&self.key_id)
            .ciphertext_blob(Blob::new(ciphertext))
            .send()
            .await
            .map_err(|e| AppError::Kms {
                message: format!("decrypt failed: {}", DisplayErrorContext(&e)),
            })?;

        output
            .plaintext()
            .map(|blob| blob.as_ref().to_vec())
            .ok_or_else(|| AppError::Kms {
                message: "decrypt returned no plaintext".to_string(),
            })
    }

    fn provider(&self) -> &'static str {
        "aws"
    }
}

/// Reversible stand-in for KMS. Provides no confidentiality.
#[derive(Debug, Default, Clone)]
pub struct MockKms;

impl MockKms {
    const PREFIX: &'static str = "mockkms:";

    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Kms for MockKms {
    async fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        Ok(format!("{}{}", Self::PREFIX, hex::encode(plaintext)).into_bytes())
    }

    async fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let encoded = std::str::from_utf8(ciphertext)
            .ok()
            .and_then(|s| s.strip_prefix(Self::PREFIX))
            .ok_or_else(|| AppError::Kms {
                message: "ciphertext was not produced by the mock provider".to_string(),
            })?;
        hex::decode(encoded).map_err(|e| AppError::Kms {
            message: format!("malformed mock ciphertext: {}", e),
        })
    }

    fn provider(&self) -> &'static str {
        "mock"
    }
}

/// Create a KMS client based on configuration
pub async fn create_kms(config: &KmsConfig) -> Result<Arc<dyn Kms>> {
    match config.provider.as_str() {
        "aws" => {
            let key_id = config.key_id.clone().ok_or_else(|| AppError::Configuration {
                message: "kms.key_id is required for the aws provider".to_string(),
            })?;
            Ok(Arc::new(AwsKms::new(key_id).await))
        }
        "mock" => {
            tracing::warn!("Using mock KMS; stored API keys are not encrypted");
            Ok(Arc::new(MockKms::new()))
        }
        other => Err(AppError::Configuration {
            message: format!("unknown kms provider: {}", other),
        }),
    }
}
