use std::sync::Arc;

use russh::{
    client::{Handle, Handler},
    keys::{PrivateKey, PrivateKeyWithHashAlg, decode_secret_key},
};
use tokio::fs;
use tracing::debug;

use crate::{config::HostCredential, error::TunnelError};

// Authentication material for a single hop, ready to be used against its server.
pub(crate) enum AuthMethod {
    PrivateKey(Arc<PrivateKey>),
    Password(String),
}

impl AuthMethod {
    // Load the authentication method for a credential, preferring the private key file.
    pub(crate) async fn load(credential: &HostCredential) -> Result<Self, TunnelError> {
        if let Some(path) = credential.key_file() {
            if credential.password().is_some() {
                debug!(
                    address = %credential.address,
                    "Both a private key file and a password are set. Using the key file."
                );
            }
            let contents =
                fs::read_to_string(path)
                    .await
                    .map_err(|source| TunnelError::KeyFileRead {
                        path: path.clone(),
                        source,
                    })?;
            let key =
                decode_secret_key(&contents, None).map_err(|source| TunnelError::KeyFileParse {
                    path: path.clone(),
                    source,
                })?;
            Ok(AuthMethod::PrivateKey(Arc::new(key)))
        } else if let Some(password) = credential.password() {
            Ok(AuthMethod::Password(password.into()))
        } else {
            Err(TunnelError::NoAuthMethod)
        }
    }

    // Authenticate an established SSH connection as the credential's user.
    pub(crate) async fn authenticate<H>(
        self,
        handle: &mut Handle<H>,
        credential: &HostCredential,
    ) -> Result<(), TunnelError>
    where
        H: Handler<Error = russh::Error>,
    {
        let result = match self {
            AuthMethod::PrivateKey(key) => {
                let hash_alg = handle.best_supported_rsa_hash().await?.flatten();
                handle
                    .authenticate_publickey(
                        credential.user.as_str(),
                        PrivateKeyWithHashAlg::new(key, hash_alg),
                    )
                    .await?
            }
            AuthMethod::Password(password) => {
                handle
                    .authenticate_password(credential.user.as_str(), password)
                    .await?
            }
        };
        if result.success() {
            Ok(())
        } else {
            Err(TunnelError::AuthenticationRejected {
                address: credential.address.clone(),
                user: credential.user.clone(),
            })
        }
    }
}
