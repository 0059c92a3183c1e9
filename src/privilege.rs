//! Which subsystems need an elevated process
//!
//! Elevation is never requested; a run that needs it and does not have it
//! reports the affected subsystems instead of failing op by op.

use declarative::{PrivilegeCheck, Subsystem};
use std::sync::OnceLock;
use winkit::Backend;

/// Whether managing `subsystem` requires Administrator rights.
///
/// User-scoped environment variables, HKCU registry values, ACLs on paths
/// the user owns and per-user startup entries can all be managed without
/// elevation; a document that touches machine-wide ones fails per op with
/// access denied instead.
pub fn requires_admin(subsystem: Subsystem) -> bool {
    matches!(
        subsystem,
        Subsystem::Users | Subsystem::Services | Subsystem::Firewall | Subsystem::Software
    )
}

/// [`PrivilegeCheck`] backed by the host's elevation state
pub struct ElevationCheck<'a> {
    backend: &'a dyn Backend,
    elevated: OnceLock<bool>,
}

impl<'a> ElevationCheck<'a> {
    pub fn new(backend: &'a dyn Backend) -> Self {
        Self {
            backend,
            elevated: OnceLock::new(),
        }
    }

    fn is_elevated(&self) -> bool {
        *self.elevated.get_or_init(|| {
            let elevated = self.backend.is_elevated();
            log::debug!("Process elevated: {elevated}");
            elevated
        })
    }
}

impl PrivilegeCheck for ElevationCheck<'_> {
    fn has_required_privilege(&self, subsystem: Subsystem) -> bool {
        !requires_admin(subsystem) || self.is_elevated()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use winkit::MemoryBackend;

    #[test]
    fn test_elevated_host_has_every_privilege() {
        let host = MemoryBackend::new();
        let check = ElevationCheck::new(&host);
        for subsystem in Subsystem::DEPENDENCY_ORDER {
            assert!(check.has_required_privilege(subsystem));
        }
    }

    #[test]
    fn test_unelevated_host() {
        let host = MemoryBackend::new();
        host.set_elevated(false);
        let check = ElevationCheck::new(&host);
        assert!(!check.has_required_privilege(Subsystem::Firewall));
        assert!(!check.has_required_privilege(Subsystem::Users));
        assert!(check.has_required_privilege(Subsystem::Environment));
        assert!(check.has_required_privilege(Subsystem::Startup));
    }
}
