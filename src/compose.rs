//! Composition of container settings from command-line specifications.
//!
//! Volumes, ports, tmpfs mounts, devices and environment variables are given
//! on the command line in Docker's familiar string forms and normalized here
//! into structures the container creation request consumes.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{Error, PathKind, Result};

/// Mode used when a volume specification omits it.
pub const DEFAULT_VOLUME_MODE: &str = "rw";
/// Protocol used when a port specification omits it.
pub const DEFAULT_PROTOCOL: &str = "tcp";
/// Cgroup permissions used when a device specification omits them.
pub const DEFAULT_DEVICE_PERMISSIONS: &str = "rwm";

/// A bind mount `host:container:mode`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeSpec {
    pub host_path: String,
    pub container_path: String,
    pub mode: String,
}

impl VolumeSpec {
    pub fn new(
        host_path: impl Into<String>,
        container_path: impl Into<String>,
        mode: impl Into<String>,
    ) -> Self {
        Self {
            host_path: host_path.into(),
            container_path: container_path.into(),
            mode: mode.into(),
        }
    }

    /// Whether the host side names a path rather than a named volume.
    pub fn is_host_path(&self) -> bool {
        self.host_path.starts_with('/') || self.host_path.starts_with('.')
    }

    /// Docker bind string.
    pub fn to_bind(&self) -> String {
        format!("{}:{}:{}", self.host_path, self.container_path, self.mode)
    }
}

impl fmt::Display for VolumeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_bind())
    }
}

/// Normalize `host[:container[:mode]]`.
///
/// Only the first two colons split; everything after the second colon is
/// kept verbatim as the mode.
pub fn normalize_volume(spec: &str) -> VolumeSpec {
    let mut parts = spec.splitn(3, ':');
    let host = parts.next().unwrap_or("");
    let container = parts.next().unwrap_or(host);
    let mode = parts.next().unwrap_or(DEFAULT_VOLUME_MODE);
    VolumeSpec::new(host, container, mode)
}

/// Normalize a list of volume specifications into Docker bind strings.
pub fn volume_args_to_binds<S: AsRef<str>>(specs: &[S]) -> Vec<String> {
    specs
        .iter()
        .map(|s| normalize_volume(s.as_ref()).to_bind())
        .collect()
}

/// Host side of a port mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostBinding {
    /// Bound on all interfaces.
    Port(u16),
    /// Bound on one address.
    Address(String, u16),
}

impl HostBinding {
    pub fn host_ip(&self) -> Option<&str> {
        match self {
            HostBinding::Port(_) => None,
            HostBinding::Address(ip, _) => Some(ip),
        }
    }

    pub fn host_port(&self) -> u16 {
        match self {
            HostBinding::Port(port) | HostBinding::Address(_, port) => *port,
        }
    }
}

/// Container `port/protocol` to host binding.
pub type PortTable = BTreeMap<String, HostBinding>;

fn parse_port_number(value: &str, spec: &str) -> Result<u16> {
    value
        .trim()
        .parse::<u16>()
        .map_err(|_| Error::invalid_argument("port", format!("'{}' in '{}'", value, spec)))
}

/// Split `port[/protocol]` into its number and protocol.
pub fn split_port(spec: &str) -> Result<(u16, String)> {
    let (port, protocol) = match spec.split_once('/') {
        Some((port, protocol)) if !protocol.is_empty() => (port, protocol),
        Some((port, _)) => (port, DEFAULT_PROTOCOL),
        None => (spec, DEFAULT_PROTOCOL),
    };
    Ok((parse_port_number(port, spec)?, protocol.to_lowercase()))
}

/// Normalize `port[/protocol]` to the `port/protocol` key Docker uses.
pub fn normalize_port(spec: &str) -> Result<String> {
    let (port, protocol) = split_port(spec)?;
    Ok(format!("{}/{}", port, protocol))
}

/// Build the port table from `[[ip:]hostPort:]containerPort[/protocol]` specs.
///
/// A bare container port is published on the same host port.
pub fn build_port_table<S: AsRef<str>>(specs: &[S]) -> Result<PortTable> {
    let mut table = PortTable::new();
    for spec in specs {
        let spec = spec.as_ref();
        let fields: Vec<&str> = spec.split(':').collect();
        let (key, binding) = match fields.as_slice() {
            [container] => {
                let (port, protocol) = split_port(container)?;
                (format!("{}/{}", port, protocol), HostBinding::Port(port))
            }
            [host, container] => (
                normalize_port(container)?,
                HostBinding::Port(parse_port_number(host, spec)?),
            ),
            [ip, host, container] => (
                normalize_port(container)?,
                HostBinding::Address(ip.to_string(), parse_port_number(host, spec)?),
            ),
            _ => {
                return Err(Error::invalid_argument(
                    "port",
                    format!("'{}' has too many fields", spec),
                ));
            }
        };
        table.insert(key, binding);
    }
    Ok(table)
}

/// Parse `path[:options]` tmpfs specifications. Only the first colon splits.
pub fn tmpfs_list_to_map<S: AsRef<str>>(specs: &[S]) -> HashMap<String, String> {
    specs
        .iter()
        .map(|spec| match spec.as_ref().split_once(':') {
            Some((path, options)) => (path.to_string(), options.to_string()),
            None => (spec.as_ref().to_string(), String::new()),
        })
        .collect()
}

/// A device mapping `host[:container[:permissions]]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSpec {
    pub host_path: String,
    pub container_path: String,
    pub permissions: String,
}

pub fn parse_device(spec: &str) -> DeviceSpec {
    let mut parts = spec.splitn(3, ':');
    let host = parts.next().unwrap_or("");
    let container = parts.next().filter(|p| !p.is_empty()).unwrap_or(host);
    let permissions = parts
        .next()
        .filter(|p| !p.is_empty())
        .unwrap_or(DEFAULT_DEVICE_PERMISSIONS);
    DeviceSpec {
        host_path: host.to_string(),
        container_path: container.to_string(),
        permissions: permissions.to_string(),
    }
}

/// Parse a size like `67108864`, `512k`, `64m` or `1g` (suffix `b` optional).
pub fn parse_size(spec: &str) -> Result<i64> {
    let lower = spec.trim().to_lowercase();
    let lower = lower.strip_suffix('b').unwrap_or(&lower);
    let (digits, factor) = match lower.chars().last() {
        Some('k') => (&lower[..lower.len() - 1], 1024),
        Some('m') => (&lower[..lower.len() - 1], 1024 * 1024),
        Some('g') => (&lower[..lower.len() - 1], 1024 * 1024 * 1024),
        _ => (lower, 1),
    };
    let value = digits
        .parse::<i64>()
        .map_err(|_| Error::invalid_argument("size", format!("'{}'", spec)))?;
    value
        .checked_mul(factor)
        .filter(|v| *v > 0)
        .ok_or_else(|| Error::invalid_argument("size", format!("'{}' is out of range", spec)))
}

/// Environment variables, keyed by name.
pub type EnvMap = BTreeMap<String, String>;

/// Resolve `NAME=VALUE` and bare `NAME` arguments against the host environment.
///
/// A bare name is looked up in `host_env` and omitted when unset.
pub fn env_args_to_map<S: AsRef<str>>(
    args_env: &[S],
    host_env: &HashMap<String, String>,
) -> EnvMap {
    let mut env = EnvMap::new();
    for arg in args_env {
        let arg = arg.as_ref();
        match arg.split_once('=') {
            Some((name, value)) => {
                env.insert(name.to_string(), value.to_string());
            }
            None => {
                if let Some(value) = host_env.get(arg) {
                    env.insert(arg.to_string(), value.clone());
                }
            }
        }
    }
    env
}

/// Parse Docker's `KEY=VALUE` list form into a map.
pub fn env_list_to_map<S: AsRef<str>>(list: &[S]) -> EnvMap {
    list.iter()
        .filter_map(|entry| entry.as_ref().split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Merge image defaults with command-line environment; the latter wins.
pub fn merge_env<S: AsRef<str>>(
    args_env: &[S],
    host_env: &HashMap<String, String>,
    image_env: &EnvMap,
) -> EnvMap {
    let mut merged = image_env.clone();
    merged.extend(env_args_to_map(args_env, host_env));
    merged
}

/// Render an environment map in Docker's `KEY=VALUE` list form.
pub fn env_map_to_list(env: &EnvMap) -> Vec<String> {
    env.iter().map(|(k, v)| format!("{}={}", k, v)).collect()
}

/// Make `path` absolute and check it exists with the required kind.
pub fn assert_path_exists(path: impl AsRef<Path>, kind: PathKind) -> Result<PathBuf> {
    let path = path.as_ref();
    let abs_path = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let valid = match kind {
        PathKind::Directory => abs_path.is_dir(),
        PathKind::File => abs_path.is_file(),
        PathKind::Any => abs_path.exists(),
    };
    if valid {
        Ok(abs_path)
    } else {
        Err(Error::InvalidPath {
            path: abs_path,
            kind,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_volume_normalization() {
        assert_eq!(
            normalize_volume("/path:/my/folder:kjshad:sd:ad:"),
            VolumeSpec::new("/path", "/my/folder", "kjshad:sd:ad:")
        );
        assert_eq!(
            normalize_volume("/path:/my/folder:a:b:c:"),
            VolumeSpec::new("/path", "/my/folder", "a:b:c:")
        );
        assert_eq!(normalize_volume("/1/2"), VolumeSpec::new("/1/2", "/1/2", "rw"));
        assert_eq!(normalize_volume("/1:/2"), VolumeSpec::new("/1", "/2", "rw"));
        assert_eq!(normalize_volume("/1:/2:ro"), VolumeSpec::new("/1", "/2", "ro"));
        assert_eq!(normalize_volume(""), VolumeSpec::new("", "", "rw"));
    }

    #[test]
    fn test_volume_args_to_binds() {
        assert_eq!(
            volume_args_to_binds(&["/bla", "/a/b:/c/d", "", "::::::::"]),
            vec!["/bla:/bla:rw", "/a/b:/c/d:rw", "::rw", "::::::::"]
        );
    }

    #[test]
    fn test_volume_is_host_path() {
        assert!(normalize_volume("/data").is_host_path());
        assert!(normalize_volume("./data:/data").is_host_path());
        assert!(!normalize_volume("cache:/cache").is_host_path());
    }

    #[test]
    fn test_ports_normalization() {
        assert_eq!(split_port("9000/udp").unwrap(), (9000, "udp".to_string()));
        assert_eq!(split_port("9001").unwrap(), (9001, "tcp".to_string()));
        assert_eq!(split_port("9002/tcp").unwrap(), (9002, "tcp".to_string()));
        assert_eq!(normalize_port("9000").unwrap(), "9000/tcp");
        assert_eq!(normalize_port("9001/udp").unwrap(), "9001/udp");
        assert!(split_port("http").is_err());
        assert!(split_port("70000").is_err());
    }

    #[test]
    fn test_port_table() {
        let table = build_port_table(&[
            "1.2.3.4:80:8080/udp",
            "5.6.7.8:81:8001/tcp",
            "82:8082",
            "9001",
            "9002/udp",
        ])
        .unwrap();
        let expected: PortTable = [
            ("8080/udp", HostBinding::Address("1.2.3.4".into(), 80)),
            ("8001/tcp", HostBinding::Address("5.6.7.8".into(), 81)),
            ("8082/tcp", HostBinding::Port(82)),
            ("9001/tcp", HostBinding::Port(9001)),
            ("9002/udp", HostBinding::Port(9002)),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        assert_eq!(table, expected);
    }

    #[test]
    fn test_port_table_rejects_extra_fields() {
        let err = build_port_table(&["1:2:3:4"]).unwrap_err();
        assert!(err.to_string().contains("too many fields"));
    }

    #[test]
    fn test_tmpfs_list() {
        let map = tmpfs_list_to_map(&["/dir1:rw,size=1G"]);
        assert_eq!(map.get("/dir1").map(String::as_str), Some("rw,size=1G"));

        let map = tmpfs_list_to_map(&["/dir1", "/dir2:size=1G", "/dir3/bla:::::", "/dir4:"]);
        assert_eq!(map.len(), 4);
        assert_eq!(map["/dir1"], "");
        assert_eq!(map["/dir2"], "size=1G");
        assert_eq!(map["/dir3/bla"], "::::");
        assert_eq!(map["/dir4"], "");
    }

    #[test]
    fn test_parse_device() {
        assert_eq!(
            parse_device("/dev/fuse"),
            DeviceSpec {
                host_path: "/dev/fuse".into(),
                container_path: "/dev/fuse".into(),
                permissions: "rwm".into(),
            }
        );
        let dev = parse_device("/dev/ttyUSB0:/dev/serial:rw");
        assert_eq!(dev.container_path, "/dev/serial");
        assert_eq!(dev.permissions, "rw");
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("1024").unwrap(), 1024);
        assert_eq!(parse_size("512k").unwrap(), 512 * 1024);
        assert_eq!(parse_size("64m").unwrap(), 64 * 1024 * 1024);
        assert_eq!(parse_size("64MB").unwrap(), 64 * 1024 * 1024);
        assert_eq!(parse_size("1g").unwrap(), 1024 * 1024 * 1024);
        assert!(parse_size("lots").is_err());
        assert!(parse_size("0").is_err());
    }

    #[test]
    fn test_env_list_to_dict() {
        let host_env: HashMap<String, String> = [("T1", "Text1"), ("T2", "Text2")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let args_env = ["T3=Text3", "VAR4=Text4", "T2=Different"];
        let env = merge_env(&args_env, &host_env, &EnvMap::new());
        let expected: EnvMap = [("T2", "Different"), ("T3", "Text3"), ("VAR4", "Text4")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        assert_eq!(env, expected);

        let empty: [&str; 0] = [];
        assert!(env_args_to_map(&empty, &host_env).is_empty());
    }

    #[test]
    fn test_bare_names_come_from_host() {
        let host_env: HashMap<String, String> =
            [("EDITOR".to_string(), "vim".to_string())].into_iter().collect();
        let env = env_args_to_map(&["EDITOR", "UNSET_VAR", "EMPTY="], &host_env);
        assert_eq!(env.get("EDITOR").map(String::as_str), Some("vim"));
        assert!(!env.contains_key("UNSET_VAR"));
        assert_eq!(env.get("EMPTY").map(String::as_str), Some(""));
    }

    #[test]
    fn test_image_defaults_are_overridden() {
        let image_env = env_list_to_map(&["PATH=/usr/bin", "LANG=C", "malformed"]);
        assert_eq!(image_env.len(), 2);
        let env = merge_env(&["LANG=C.UTF-8"], &HashMap::new(), &image_env);
        assert_eq!(env["LANG"], "C.UTF-8");
        assert_eq!(env["PATH"], "/usr/bin");
        assert_eq!(
            env_map_to_list(&env),
            vec!["LANG=C.UTF-8".to_string(), "PATH=/usr/bin".to_string()]
        );
    }

    #[test]
    fn test_assert_path_exists() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("file.txt");
        std::fs::write(&file, b"x").unwrap();
        let missing = dir.path().join("thisfiledoesnotexistandwillnever");

        assert!(matches!(
            assert_path_exists(&file, PathKind::Directory),
            Err(Error::InvalidPath { kind: PathKind::Directory, .. })
        ));
        assert!(assert_path_exists(dir.path(), PathKind::File).is_err());
        assert!(assert_path_exists(&missing, PathKind::File).is_err());
        assert!(assert_path_exists(&missing, PathKind::Directory).is_err());
        assert!(assert_path_exists(&missing, PathKind::Any).is_err());

        assert!(assert_path_exists(&file, PathKind::Any).is_ok());
        assert!(assert_path_exists(dir.path(), PathKind::Any).is_ok());
        assert_eq!(assert_path_exists(&file, PathKind::File).unwrap(), file);
        assert!(assert_path_exists(dir.path(), PathKind::Directory).is_ok());
    }
}
