//! Privilege checking for host changes.

use nix::unistd::Uid;

use super::InstallerError;

/// Creating accounts and driving system units needs root.
pub(super) fn check_privileges() -> Result<(), InstallerError> {
    if !Uid::effective().is_root() {
        return Err(InstallerError::PermissionDenied);
    }
    Ok(())
}
