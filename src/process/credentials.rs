/*!
 * Credentials
 * Real/effective/saved user and group identity plus supplementary groups
 */

use crate::core::types::{Gid, Uid};
use serde::{Deserialize, Serialize};

/// Process credentials.
///
/// Creation copies the requested uid/gid into all three of real, effective
/// and saved; setuid-style transitions are the syscall layer's concern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub uid: Uid,
    pub gid: Gid,
    pub euid: Uid,
    pub egid: Gid,
    pub suid: Uid,
    pub sgid: Gid,
    pub extra_gids: Vec<Gid>,
}

impl Credentials {
    /// Credentials with uid/gid mirrored into effective and saved fields.
    pub fn new(uid: Uid, gid: Gid) -> Self {
        Self {
            uid,
            gid,
            euid: uid,
            egid: gid,
            suid: uid,
            sgid: gid,
            extra_gids: Vec::new(),
        }
    }

    /// Superuser credentials.
    pub fn root() -> Self {
        Self::new(0, 0)
    }

    pub fn with_extra_gids(mut self, gids: &[Gid]) -> Self {
        self.extra_gids = gids.to_vec();
        self
    }

    /// Whether the effective identity belongs to `gid`, directly or through
    /// a supplementary group.
    pub fn in_group(&self, gid: Gid) -> bool {
        self.egid == gid || self.extra_gids.contains(&gid)
    }

    #[inline]
    pub fn is_superuser(&self) -> bool {
        self.euid == 0
    }
}

impl Default for Credentials {
    fn default() -> Self {
        Self::root()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_mirrors_all_fields() {
        let creds = Credentials::new(100, 200);
        assert_eq!(creds.uid, 100);
        assert_eq!(creds.euid, 100);
        assert_eq!(creds.suid, 100);
        assert_eq!(creds.gid, 200);
        assert_eq!(creds.egid, 200);
        assert_eq!(creds.sgid, 200);
    }

    #[test]
    fn test_in_group() {
        let creds = Credentials::new(100, 200).with_extra_gids(&[5, 17]);
        assert!(creds.in_group(200));
        assert!(creds.in_group(17));
        assert!(!creds.in_group(4));
    }

    #[test]
    fn test_superuser() {
        assert!(Credentials::root().is_superuser());
        assert!(!Credentials::new(1000, 1000).is_superuser());
    }
}
