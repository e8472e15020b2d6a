// SPDX-FileCopyrightText: 2025 Maciej Borzecki <maciek.borzecki@gmail.com>
//
// SPDX-License-Identifier: MIT

use aws_config::default_provider::credentials::DefaultCredentialsChain;
use aws_config::Region;
use aws_credential_types::provider::ProvideCredentials;
use log;

use super::AwsError;

/// AWS credentials, handed to docker-machine.
#[derive(Clone, PartialEq)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    /// Set for temporary credentials, eg. from SSO or an assumed role.
    pub session_token: Option<String>,
}

// Keep the secrets out of logs.
impl core::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("temporary", &self.session_token.is_some())
            .finish_non_exhaustive()
    }
}

impl From<aws_credential_types::Credentials> for Credentials {
    fn from(creds: aws_credential_types::Credentials) -> Self {
        Credentials {
            access_key_id: creds.access_key_id().to_string(),
            secret_access_key: creds.secret_access_key().to_string(),
            session_token: creds.session_token().map(|t| t.to_string()),
        }
    }
}

/// Resolves credentials through the default AWS provider chain: environment,
/// shared config and credentials files (profiles, SSO, credential_process,
/// assumed roles), web identity and instance metadata. This is the same chain
/// the aws command line tool uses.
pub fn load(region: &str) -> Result<Credentials, AwsError> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| AwsError::Credentials(format!("cannot start runtime: {}", e)))?;

    let region = Region::new(region.to_string());
    let creds = rt
        .block_on(async {
            let chain = DefaultCredentialsChain::builder()
                .region(region)
                .build()
                .await;
            chain.provide_credentials().await
        })
        .map_err(|e| AwsError::Credentials(e.to_string()))?;

    log::debug!(
        "resolved AWS credentials (expiry: {:?})",
        creds.expiry()
    );
    Ok(creds.into())
}
