use crate::{
    config::{HostCredential, TunnelSpec},
    error::TunnelError,
};

/// Check that a tunnel definition is complete before touching the network.
///
/// Rules are applied in order and the first violation is returned.
pub fn validate(spec: Option<&TunnelSpec>) -> Result<(), TunnelError> {
    let spec = spec.ok_or(TunnelError::ConfigMissing)?;
    if spec.jump_hosts.len() > 1 {
        return Err(TunnelError::TooManyJumpHosts(spec.jump_hosts.len()));
    }
    for jump_host in spec.jump_hosts.iter() {
        validate_credential(Some(jump_host))?;
    }
    validate_credential(spec.end_host.as_ref())?;
    if spec.local_address.is_empty() || spec.remote_address.is_empty() {
        return Err(TunnelError::AddressesUnset);
    }
    // An empty copy buffer reads as an immediate end of stream.
    if spec.buffer_size == 0 {
        return Err(TunnelError::BufferSizeZero);
    }
    Ok(())
}

fn validate_credential(credential: Option<&HostCredential>) -> Result<(), TunnelError> {
    let credential = credential.ok_or(TunnelError::CredentialMissing)?;
    if credential.user.is_empty() {
        return Err(TunnelError::UserEmpty);
    }
    if credential.address.is_empty() {
        return Err(TunnelError::AddressEmpty);
    }
    if credential.key_file().is_none() && credential.password().is_none() {
        return Err(TunnelError::NoAuthMethod);
    }
    Ok(())
}
