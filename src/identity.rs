//! Host user and group identity.
//!
//! The invoking user's uid/gid are resolved to names through the system
//! user database, and supplementary groups are discovered by scanning the
//! group database for every group listing the user as a member. The kernel's
//! own supplementary group list of the process is deliberately not used: it
//! reflects the login session, not the account.

use std::fs;
use std::path::Path;

use nix::unistd::{self, Gid, Group, Uid, User};

use crate::error::{Error, Result};

/// Default location of the group database.
pub const GROUP_DATABASE: &str = "/etc/group";

/// One group the user is a secondary member of.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMembership {
    pub name: String,
    pub gid: u32,
}

/// Identity of the user invoking `din`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostIdentity {
    pub uid: u32,
    pub username: String,
    pub gid: u32,
    pub groupname: String,
    pub supplementary_groups: Vec<GroupMembership>,
}

impl HostIdentity {
    /// Resolve the identity of the calling process.
    ///
    /// Secondary memberships come from the local `/etc/group` file only.
    /// Groups served by other NSS sources (LDAP, sssd, NIS) are not seen
    /// and so are not provisioned in the container.
    pub fn resolve() -> Result<Self> {
        Self::resolve_with_group_database(Path::new(GROUP_DATABASE))
    }

    /// Resolve the identity, reading secondary memberships from `group_db`.
    ///
    /// `group_db` is parsed as an `/etc/group` formatted file; NSS is not
    /// consulted for memberships. The user and primary group names still go
    /// through NSS.
    pub fn resolve_with_group_database(group_db: &Path) -> Result<Self> {
        let uid = unistd::getuid();
        let gid = unistd::getgid();

        let username = user_name(uid)?;
        let groupname = group_name(gid)?;

        let content = fs::read_to_string(group_db).map_err(|e| Error::Identity {
            reason: format!("cannot read {}: {}", group_db.display(), e),
        })?;
        let supplementary_groups = groups_with_member(&parse_group_database(&content), &username);

        tracing::debug!(
            uid = uid.as_raw(),
            user = %username,
            gid = gid.as_raw(),
            group = %groupname,
            groups = supplementary_groups.len(),
            "Resolved host identity"
        );

        Ok(Self {
            uid: uid.as_raw(),
            username,
            gid: gid.as_raw(),
            groupname,
            supplementary_groups,
        })
    }
}

fn user_name(uid: Uid) -> Result<String> {
    match User::from_uid(uid) {
        Ok(Some(user)) => Ok(user.name),
        Ok(None) => Err(Error::Identity {
            reason: format!("no user entry for uid {}", uid),
        }),
        Err(e) => Err(Error::Identity {
            reason: format!("lookup of uid {} failed: {}", uid, e),
        }),
    }
}

fn group_name(gid: Gid) -> Result<String> {
    match Group::from_gid(gid) {
        Ok(Some(group)) => Ok(group.name),
        Ok(None) => Err(Error::Identity {
            reason: format!("no group entry for gid {}", gid),
        }),
        Err(e) => Err(Error::Identity {
            reason: format!("lookup of gid {} failed: {}", gid, e),
        }),
    }
}

/// A parsed line of the group database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupEntry {
    pub name: String,
    pub gid: u32,
    pub members: Vec<String>,
}

/// Parse `/etc/group` formatted content.
///
/// Comments, blank lines, NIS compat entries (`+`/`-`) and lines with a
/// non-numeric gid are skipped.
pub fn parse_group_database(content: &str) -> Vec<GroupEntry> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter(|line| !line.starts_with('+') && !line.starts_with('-'))
        .filter_map(|line| {
            let mut fields = line.splitn(4, ':');
            let name = fields.next()?;
            let _password = fields.next()?;
            let gid = fields.next()?.parse::<u32>().ok()?;
            let members = fields
                .next()
                .unwrap_or("")
                .split(',')
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .map(String::from)
                .collect();
            Some(GroupEntry {
                name: name.to_string(),
                gid,
                members,
            })
        })
        .collect()
}

/// Groups whose member list contains `username`, in database order.
pub fn groups_with_member(entries: &[GroupEntry], username: &str) -> Vec<GroupMembership> {
    entries
        .iter()
        .filter(|entry| entry.members.iter().any(|m| m == username))
        .map(|entry| GroupMembership {
            name: entry.name.clone(),
            gid: entry.gid,
        })
        .collect()
}
