//! Backend configuration
//!
//! The daemon is configured by an XML file (`-f`), with a handful of
//! command-line overrides layered on top. The file is a `<config>` document
//! of option leaves:
//!
//! ```xml
//! <config>
//!   <datastore-dir>/var/lib/trellis</datastore-dir>
//!   <socket-family>UNIX</socket-family>
//!   <socket-path>/var/run/trellis.sock</socket-path>
//!   <startup-mode>startup</startup-mode>
//!   <autolock>true</autolock>
//!   <legacy-framing>false</legacy-framing>
//! </config>
//! ```

use std::path::{Path as FsPath, PathBuf};

use trellis_core::{xml, QName, Result, RpcError};
use trellis_engine::StartupMode;

use crate::proto::FrameMode;

/// Listening socket specification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketSpec {
    /// Unix domain socket at the given path
    Unix(PathBuf),
    /// TCP socket, `addr:port`
    Tcp(String),
}

/// Parsed daemon configuration
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Directory holding the persisted datastores
    pub datastore_dir: PathBuf,
    /// Listening socket
    pub socket: SocketSpec,
    /// Startup mode when `-s` is not given
    pub startup_mode: StartupMode,
    /// Extra XML merged at startup when `-c` is not given
    pub extra_xml: Option<PathBuf>,
    /// Implicit lock handling around edits
    pub autolock: bool,
    /// Wire framing mode
    pub framing: FrameMode,
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig {
            datastore_dir: PathBuf::from("/var/lib/trellis"),
            socket: SocketSpec::Unix(PathBuf::from("/var/run/trellis.sock")),
            startup_mode: StartupMode::Startup,
            extra_xml: None,
            autolock: true,
            framing: FrameMode::Length,
        }
    }
}

impl BackendConfig {
    /// Load a configuration file
    pub fn load(path: &FsPath) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            RpcError::operation_failed(format!("open({}): {}", path.display(), e))
        })?;
        let tree = xml::parse(&text)?;
        let root = tree.root();
        if tree.name(root).local != "config" {
            return Err(RpcError::malformed_message(format!(
                "config file {}: expected <config> root",
                path.display()
            )));
        }
        let leaf = |name: &str| -> Option<String> {
            tree.find_child(root, &QName::local(name))
                .and_then(|c| tree.body(c))
                .map(str::to_string)
        };
        let mut cfg = BackendConfig::default();
        if let Some(dir) = leaf("datastore-dir") {
            cfg.datastore_dir = PathBuf::from(dir);
        }
        if let Some(mode) = leaf("startup-mode") {
            cfg.startup_mode = StartupMode::parse(&mode).ok_or_else(|| {
                RpcError::invalid_value(format!("bad startup-mode: {}", mode))
            })?;
        }
        if let Some(extra) = leaf("extra-xml") {
            cfg.extra_xml = Some(PathBuf::from(extra));
        }
        if let Some(b) = leaf("autolock") {
            cfg.autolock = parse_bool("autolock", &b)?;
        }
        if let Some(b) = leaf("legacy-framing") {
            cfg.framing = if parse_bool("legacy-framing", &b)? {
                FrameMode::Sentinel
            } else {
                FrameMode::Length
            };
        }
        let family = leaf("socket-family").unwrap_or_else(|| "UNIX".to_string());
        cfg.socket = socket_spec(
            &family,
            leaf("socket-path").as_deref(),
            leaf("socket-addr").as_deref(),
        )?;
        Ok(cfg)
    }

    /// Apply a `-a FAMILY` / `-u ADDR` command-line override
    pub fn override_socket(&mut self, family: &str, addr: Option<&str>) -> Result<()> {
        self.socket = socket_spec(family, addr, addr)?;
        Ok(())
    }
}

fn parse_bool(name: &str, s: &str) -> Result<bool> {
    match s {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(RpcError::invalid_value(format!("bad {}: {}", name, s))),
    }
}

fn socket_spec(family: &str, path: Option<&str>, addr: Option<&str>) -> Result<SocketSpec> {
    match family {
        "UNIX" => Ok(SocketSpec::Unix(PathBuf::from(
            path.unwrap_or("/var/run/trellis.sock"),
        ))),
        "IPv4" => Ok(SocketSpec::Tcp(
            addr.unwrap_or("127.0.0.1:4535").to_string(),
        )),
        "IPv6" => Ok(SocketSpec::Tcp(addr.unwrap_or("[::1]:4535").to_string())),
        _ => Err(RpcError::invalid_value(format!(
            "bad socket family: {}",
            family
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_cfg(content: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backend.xml");
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn test_load_full_config() {
        let (_d, path) = write_cfg(
            "<config>\
             <datastore-dir>/tmp/trellis-test</datastore-dir>\
             <socket-family>IPv4</socket-family>\
             <socket-addr>0.0.0.0:9999</socket-addr>\
             <startup-mode>init</startup-mode>\
             <autolock>false</autolock>\
             <legacy-framing>true</legacy-framing>\
             </config>",
        );
        let cfg = BackendConfig::load(&path).unwrap();
        assert_eq!(cfg.datastore_dir, PathBuf::from("/tmp/trellis-test"));
        assert_eq!(cfg.socket, SocketSpec::Tcp("0.0.0.0:9999".to_string()));
        assert_eq!(cfg.startup_mode, StartupMode::Init);
        assert!(!cfg.autolock);
        assert_eq!(cfg.framing, FrameMode::Sentinel);
    }

    #[test]
    fn test_defaults() {
        let (_d, path) = write_cfg("<config/>");
        let cfg = BackendConfig::load(&path).unwrap();
        assert_eq!(cfg.startup_mode, StartupMode::Startup);
        assert!(cfg.autolock);
        assert_eq!(cfg.framing, FrameMode::Length);
        assert!(matches!(cfg.socket, SocketSpec::Unix(_)));
    }

    #[test]
    fn test_bad_values_rejected() {
        let (_d, path) = write_cfg("<config><startup-mode>sideways</startup-mode></config>");
        assert!(BackendConfig::load(&path).is_err());
        let (_d, path) = write_cfg("<config><autolock>yes</autolock></config>");
        assert!(BackendConfig::load(&path).is_err());
    }

    #[test]
    fn test_socket_override() {
        let (_d, path) = write_cfg("<config/>");
        let mut cfg = BackendConfig::load(&path).unwrap();
        cfg.override_socket("IPv6", Some("[::1]:7777")).unwrap();
        assert_eq!(cfg.socket, SocketSpec::Tcp("[::1]:7777".to_string()));
        assert!(cfg.override_socket("AppleTalk", None).is_err());
    }

    #[test]
    fn test_missing_file_is_error() {
        assert!(BackendConfig::load(FsPath::new("/no/such/file.xml")).is_err());
    }
}
