//! In-container bootstrap.
//!
//! The bootstrap script replaces the image entrypoint. Running as root, it
//! creates a user and groups matching the host identity, writes a wrapper
//! that re-executes the original entrypoint with the requested command, and
//! runs that wrapper as the new user. The script text is constant; it only
//! reads the `DIN_*` variables computed by [`build_bootstrap_env`].

use std::path::PathBuf;

use crate::compose::EnvMap;
use crate::identity::HostIdentity;

/// Bumped whenever the script's environment contract changes.
pub const BOOTSTRAP_VERSION: u32 = 1;

/// Archive path of the bootstrap script (relative to the container root).
pub const BOOTSTRAP_ARCHIVE_PATH: &str = "din_entrypoint.sh";
/// In-container path of the bootstrap script, used as the entrypoint.
pub const BOOTSTRAP_PATH: &str = "/din_entrypoint.sh";
/// Archive path of the privilege-drop helper.
pub const SU_EXEC_ARCHIVE_PATH: &str = "din_su-exec";

pub const ENV_UID: &str = "DIN_UID";
pub const ENV_USER: &str = "DIN_USER";
pub const ENV_GID: &str = "DIN_GID";
pub const ENV_GROUP: &str = "DIN_GROUP";
pub const ENV_GROUPS: &str = "DIN_GROUPS";
pub const ENV_GROUP_NAMES: &str = "DIN_GROUP_NAMES";
pub const ENV_ENTRYPOINT: &str = "DIN_ENTRYPOINT";
pub const ENV_VERBOSE: &str = "DIN_VERBOSE";
pub const ENV_CREATE_HOME: &str = "DIN_CREATE_HOME";

/// Variables owned by the bootstrap; never taken from user input.
pub const RESERVED_ENV: [&str; 9] = [
    ENV_UID,
    ENV_USER,
    ENV_GID,
    ENV_GROUP,
    ENV_GROUPS,
    ENV_GROUP_NAMES,
    ENV_ENTRYPOINT,
    ENV_VERBOSE,
    ENV_CREATE_HOME,
];

/// The bootstrap script.
pub const BOOTSTRAP_SCRIPT: &[u8] = br##"#!/bin/sh
# din-bootstrap v1
#
# Inputs: DIN_UID DIN_USER DIN_GID DIN_GROUP DIN_GROUPS DIN_GROUP_NAMES
#         DIN_ENTRYPOINT DIN_VERBOSE DIN_CREATE_HOME
# Arguments: the command to run.

DIN_SU_EXEC=/din_su-exec
DIN_WRAPPER=/din_exec.sh

log() {
    if [ "${DIN_VERBOSE:-}" = "1" ]; then
        echo "din-bootstrap: $*" >&2
    fi
}

die() {
    echo "din-bootstrap: ERROR: $*" >&2
    exit 1
}

have() {
    command -v "$1" >/dev/null 2>&1
}

# Name field lookups without relying on getent or awk.
entry_exists() {
    while IFS=: read -r e_name e_rest; do
        if [ "$e_name" = "$1" ]; then
            return 0
        fi
    done < "$2"
    return 1
}

gid_owner() {
    while IFS=: read -r g_name g_pw g_gid g_rest; do
        if [ "$g_gid" = "$1" ]; then
            echo "$g_name"
            return 0
        fi
    done < /etc/group
    return 0
}

# Name of the group to use for NAME/GID after ensure_group.
resolve_group() {
    if entry_exists "$1" /etc/group; then
        echo "$1"
    else
        gid_owner "$2"
    fi
}

ensure_group() {
    if entry_exists "$1" /etc/group; then
        log "group $1 exists"
        return 0
    fi
    g_owner=$(gid_owner "$2")
    if [ -n "$g_owner" ]; then
        echo "din-bootstrap: gid $2 belongs to group $g_owner, not creating $1" >&2
        return 0
    fi
    if have groupadd; then
        groupadd -g "$2" "$1" || die "groupadd failed for $1 ($2)"
    elif have addgroup; then
        addgroup -g "$2" "$1" || die "addgroup failed for $1 ($2)"
    else
        die "no tool to create group $1"
    fi
    log "created group $1 ($2)"
}

ensure_user() {
    if entry_exists "$DIN_USER" /etc/passwd; then
        log "user $DIN_USER exists"
        return 0
    fi
    u_group=$(resolve_group "$DIN_GROUP" "$DIN_GID")
    if have useradd; then
        useradd -M -N -o -s /bin/sh -u "$DIN_UID" -g "$DIN_GID" "$DIN_USER" \
            || die "useradd failed for $DIN_USER ($DIN_UID)"
    elif have adduser; then
        adduser -D -H -s /bin/sh -u "$DIN_UID" -G "$u_group" "$DIN_USER" \
            || die "adduser failed for $DIN_USER ($DIN_UID)"
    else
        die "no tool to create user $DIN_USER"
    fi
    log "created user $DIN_USER ($DIN_UID:$DIN_GID)"
}

add_to_group() {
    if id -Gn "$1" 2>/dev/null | tr ' ' '\n' | grep -qx "$2"; then
        log "$1 is already in group $2"
        return 0
    fi
    if have usermod; then
        usermod -a -G "$2" "$1" || die "usermod failed adding $1 to $2"
    elif have gpasswd; then
        gpasswd -a "$1" "$2" >/dev/null || die "gpasswd failed adding $1 to $2"
    elif have addgroup; then
        addgroup "$1" "$2" || die "addgroup failed adding $1 to $2"
    else
        die "no tool to add $1 to group $2"
    fi
    log "added $1 to group $2"
}

# The sentinel keeps trailing newlines from being eaten by $(...).
quote() {
    q_arg=$(printf '%sx' "$1" | sed "s/'/'\\\\''/g")
    printf "'%s'" "${q_arg%x}"
}

write_wrapper() {
    {
        echo '#!/bin/sh'
        printf 'exec'
        if [ -n "${DIN_ENTRYPOINT:-}" ]; then
            printf ' %s' "$DIN_ENTRYPOINT"
        fi
        for arg in "$@"; do
            printf ' %s' "$(quote "$arg")"
        done
        printf '\n'
    } > "$DIN_WRAPPER" || die "cannot write $DIN_WRAPPER"
    chmod 0755 "$DIN_WRAPPER" || die "cannot chmod $DIN_WRAPPER"
    log "wrote $DIN_WRAPPER"
}

for var in DIN_UID DIN_USER DIN_GID DIN_GROUP; do
    eval "val=\${$var:-}"
    [ -n "$val" ] || die "$var is not set"
done

ensure_group "$DIN_GROUP" "$DIN_GID"
ensure_user

while IFS=, read -r s_name s_gid; do
    [ -n "$s_name" ] || continue
    ensure_group "$s_name" "$s_gid"
    s_target=$(resolve_group "$s_name" "$s_gid")
    [ -n "$s_target" ] || die "group $s_name ($s_gid) could not be provisioned"
    add_to_group "$DIN_USER" "$s_target"
done <<EOF
${DIN_GROUPS:-}
EOF

if [ "${DIN_CREATE_HOME:-}" = "1" ]; then
    h_dir="/home/$DIN_USER"
    if [ ! -e "$h_dir" ]; then
        mkdir -p "$h_dir" || die "cannot create $h_dir"
        chown "$DIN_UID:$DIN_GID" "$h_dir" || die "cannot chown $h_dir"
        log "created home $h_dir"
    fi
fi

if [ -z "${DIN_ENTRYPOINT:-}" ] && [ $# -eq 0 ]; then
    set -- /bin/sh
fi

write_wrapper "$@"

if [ -x "$DIN_SU_EXEC" ] && [ "$("$DIN_SU_EXEC" "$DIN_USER" id -u 2>/dev/null)" = "$DIN_UID" ]; then
    log "switching to $DIN_USER with su-exec"
    exec "$DIN_SU_EXEC" "$DIN_USER" "$DIN_WRAPPER"
fi

if have su; then
    log "switching to $DIN_USER with su"
    exec su -s /bin/sh -c "$DIN_WRAPPER" "$DIN_USER"
fi

die "neither su-exec nor su is available"
"##;

/// How the user's home directory is provided inside the container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum HomeStrategy {
    /// Whatever the image has.
    #[default]
    None,
    /// Bind-mount the host home directory.
    MountHome,
    /// Bind-mount another host directory as the home directory.
    HomeDir(PathBuf),
    /// Create an empty home directory inside the container.
    Temporary,
}

impl HomeStrategy {
    /// Container path of the home directory for `username`.
    pub fn container_home(username: &str) -> String {
        format!("/home/{}", username)
    }
}

/// Options that influence the bootstrap environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootstrapOptions {
    pub verbose: bool,
    pub home: HomeStrategy,
}

/// Values of the `DIN_*` variables the bootstrap script reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapEnv {
    pub uid: u32,
    pub user: String,
    pub gid: u32,
    pub group: String,
    /// Newline separated `name,gid` lines.
    pub groups: String,
    /// Comma separated group names.
    pub group_names: String,
    /// Shell-quoted original entrypoint.
    pub entrypoint: Option<String>,
    pub verbose: bool,
    pub create_home: bool,
}

impl BootstrapEnv {
    /// The variables as name/value pairs, optional ones only when set.
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            (ENV_UID, self.uid.to_string()),
            (ENV_USER, self.user.clone()),
            (ENV_GID, self.gid.to_string()),
            (ENV_GROUP, self.group.clone()),
            (ENV_GROUPS, self.groups.clone()),
            (ENV_GROUP_NAMES, self.group_names.clone()),
        ];
        if let Some(entrypoint) = &self.entrypoint {
            pairs.push((ENV_ENTRYPOINT, entrypoint.clone()));
        }
        if self.verbose {
            pairs.push((ENV_VERBOSE, "1".to_string()));
        }
        if self.create_home {
            pairs.push((ENV_CREATE_HOME, "1".to_string()));
        }
        pairs
    }

    /// Add the variables to `env`, replacing reserved entries already there.
    pub fn apply(&self, env: &mut EnvMap) {
        strip_reserved(env);
        for (name, value) in self.to_pairs() {
            env.insert(name.to_string(), value);
        }
    }
}

/// Compute the bootstrap environment.
pub fn build_bootstrap_env(
    identity: &HostIdentity,
    entrypoint: Option<&[String]>,
    options: &BootstrapOptions,
) -> BootstrapEnv {
    let groups = identity
        .supplementary_groups
        .iter()
        .map(|g| format!("{},{}", g.name, g.gid))
        .collect::<Vec<_>>()
        .join("\n");
    let group_names = identity
        .supplementary_groups
        .iter()
        .map(|g| g.name.as_str())
        .collect::<Vec<_>>()
        .join(",");

    BootstrapEnv {
        uid: identity.uid,
        user: identity.username.clone(),
        gid: identity.gid,
        group: identity.groupname.clone(),
        groups,
        group_names,
        entrypoint: entrypoint
            .filter(|e| !e.is_empty())
            .map(|e| e.iter().map(|arg| shell_quote(arg)).collect::<Vec<_>>().join(" ")),
        verbose: options.verbose,
        create_home: options.home == HomeStrategy::Temporary,
    }
}

/// Remove reserved bootstrap variables from user-supplied environment.
pub fn strip_reserved(env: &mut EnvMap) {
    for name in RESERVED_ENV {
        if env.remove(name).is_some() {
            tracing::warn!(variable = name, "Ignoring reserved environment variable");
        }
    }
}

/// Quote `arg` for a POSIX shell.
pub fn shell_quote(arg: &str) -> String {
    format!("'{}'", arg.replace('\'', r"'\''"))
}
