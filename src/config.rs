//! Tool configuration file parser.
//!
//! Parses a `key = value` file: `#` comments, blank lines ignored,
//! case-insensitive keys. See `cimc-cert.conf.sample` for every key.

use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use serde::Serialize;
use url::Url;

use crate::error::{CertError, Result};

const TIMEOUT_SECS: u64 = 30;

/// Environment variables that override the credentials from the file.
pub const ENV_USERNAME: &str = "CIMC_USERNAME";
pub const ENV_PASSWORD: &str = "CIMC_PASSWORD";

/// Which certificate operation is requested from every controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestMode {
    /// Controller generates and installs a self-signed certificate.
    SelfSigned,
    /// Controller produces a CSR for submission to an external CA.
    Csr,
}

impl fmt::Display for RequestMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestMode::SelfSigned => f.write_str("self-signed"),
            RequestMode::Csr        => f.write_str("csr"),
        }
    }
}

/// File-transfer protocol the controller uses to ship the CSR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RemoteProtocol {
    Ftp,
    Sftp,
    Tftp,
    Scp,
    #[default]
    None,
}

impl RemoteProtocol {
    pub fn as_str(self) -> &'static str {
        match self {
            RemoteProtocol::Ftp  => "ftp",
            RemoteProtocol::Sftp => "sftp",
            RemoteProtocol::Tftp => "tftp",
            RemoteProtocol::Scp  => "scp",
            RemoteProtocol::None => "none",
        }
    }
}

impl FromStr for RemoteProtocol {
    type Err = CertError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ftp"  => Ok(RemoteProtocol::Ftp),
            "sftp" => Ok(RemoteProtocol::Sftp),
            "tftp" => Ok(RemoteProtocol::Tftp),
            "scp"  => Ok(RemoteProtocol::Scp),
            "none" => Ok(RemoteProtocol::None),
            other  => Err(CertError::Config(format!(
                "unsupported remote server protocol '{other}' (expected ftp, sftp, tftp, scp or none)"
            ))),
        }
    }
}

/// CSR signature algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignatureAlgorithm {
    Sha1,
    Sha256,
    #[default]
    Sha384,
    Sha512,
}

impl SignatureAlgorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            SignatureAlgorithm::Sha1   => "sha1",
            SignatureAlgorithm::Sha256 => "sha256",
            SignatureAlgorithm::Sha384 => "sha384",
            SignatureAlgorithm::Sha512 => "sha512",
        }
    }
}

impl FromStr for SignatureAlgorithm {
    type Err = CertError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sha1"   => Ok(SignatureAlgorithm::Sha1),
            "sha256" => Ok(SignatureAlgorithm::Sha256),
            "sha384" => Ok(SignatureAlgorithm::Sha384),
            "sha512" => Ok(SignatureAlgorithm::Sha512),
            other    => Err(CertError::Config(format!(
                "unsupported signature algorithm '{other}' (expected sha1, sha256, sha384 or sha512)"
            ))),
        }
    }
}

/// Certificate subject fields shared by both request modes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    pub common_name:         String,
    pub organization:        String,
    pub organizational_unit: String,
    pub locality:            String,
    pub state:               String,
    pub country_code:        String,
}

impl Subject {
    fn defaults(organization: &str) -> Self {
        Self {
            common_name:         "localhost".to_string(),
            organization:        organization.to_string(),
            organizational_unit: "Sales".to_string(),
            locality:            "San Jose".to_string(),
            state:               "California".to_string(),
            country_code:        "United States".to_string(),
        }
    }

    /// Copy of this subject with the common name replaced.
    pub fn with_common_name(&self, common_name: &str) -> Self {
        Self { common_name: common_name.to_string(), ..self.clone() }
    }
}

/// CSR-only settings: contact email, signature and upload destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsrSettings {
    pub email:                 String,
    pub signature_algorithm:   SignatureAlgorithm,
    pub remote_server:         String,
    pub remote_protocol:       RemoteProtocol,
    pub remote_user:           String,
    pub remote_password:       String,
    pub remote_filepath:       String,
    pub remote_file_extension: String,
}

impl Default for CsrSettings {
    fn default() -> Self {
        Self {
            email:                 String::new(),
            signature_algorithm:   SignatureAlgorithm::Sha384,
            remote_server:         String::new(),
            remote_protocol:       RemoteProtocol::None,
            remote_user:           String::new(),
            remote_password:       String::new(),
            remote_filepath:       String::new(),
            remote_file_extension: ".txt".to_string(),
        }
    }
}

/// Full tool configuration. Built once, never mutated while hosts are processed.
#[derive(Clone)]
pub struct ToolConfig {
    /// CIMC hostnames or IP addresses, processed in order.
    pub servers:  Vec<String>,
    pub username: String,
    pub password: String,
    pub mode:     RequestMode,
    /// Use each server entry as the certificate common name.
    pub replace_common_name: bool,
    pub self_signed_subject: Subject,
    pub csr_subject:         Subject,
    pub csr:                 CsrSettings,
    /// Per-request HTTP timeout.
    pub timeout_secs: u64,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            servers:             Vec::new(),
            username:            "admin".to_string(),
            password:            String::new(),
            mode:                RequestMode::SelfSigned,
            replace_common_name: true,
            self_signed_subject: Subject::defaults("Cisco (Self-Signed)"),
            csr_subject:         Subject::defaults("Cisco"),
            csr:                 CsrSettings::default(),
            timeout_secs:        TIMEOUT_SECS,
        }
    }
}

// Hand-written so passwords never reach a log line via `{:?}`.
impl fmt::Debug for ToolConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolConfig")
            .field("servers", &self.servers)
            .field("username", &self.username)
            .field("mode", &self.mode)
            .field("replace_common_name", &self.replace_common_name)
            .field("timeout_secs", &self.timeout_secs)
            .finish_non_exhaustive()
    }
}

impl ToolConfig {
    /// Subject configured for the active request mode.
    pub fn subject(&self) -> &Subject {
        match self.mode {
            RequestMode::SelfSigned => &self.self_signed_subject,
            RequestMode::Csr        => &self.csr_subject,
        }
    }

    /// Subject to request from `server`, honouring the common-name override.
    pub fn subject_for(&self, server: &str) -> Subject {
        if self.replace_common_name {
            self.subject().with_common_name(server)
        } else {
            self.subject().clone()
        }
    }
}

fn parse_bool(key: &str, val: &str) -> Result<bool> {
    match val.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on"  => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(CertError::Config(format!("{key}: expected a boolean, got '{val}'"))),
    }
}

/// Split a comma separated host list, dropping empty entries.
pub fn parse_server_list(val: &str) -> Vec<String> {
    val.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse `path` as a `cimc-cert.conf` key=value configuration file.
pub fn load_config(path: &Path) -> Result<ToolConfig> {
    let content = fs::read_to_string(path)
        .map_err(|e| CertError::Config(format!("cannot read {}: {e}", path.display())))?;
    parse_config(&content)
}

/// Keys whose values are parsed rather than taken verbatim. An empty value
/// for one of these keeps the default; for every other key it is an explicit
/// empty string.
const PARSED_KEYS: &[&str] = &[
    "self_signed",
    "replace_common_name",
    "timeout_secs",
    "csr_remote_server_protocol",
    "csr_signature_algorithm",
];

/// Parse configuration text. Unknown keys are ignored.
pub fn parse_config(content: &str) -> Result<ToolConfig> {
    let mut cfg = ToolConfig::default();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut parts = line.splitn(2, '=');
        let key = match parts.next() {
            Some(k) => k.trim().to_ascii_lowercase(),
            None => continue,
        };
        let val = match parts.next() {
            Some(v) => v.trim().to_string(),
            None => continue,
        };
        if val.is_empty() && PARSED_KEYS.contains(&key.as_str()) {
            continue;
        }

        let ss  = &mut cfg.self_signed_subject;
        let csr = &mut cfg.csr_subject;
        match key.as_str() {
            "servers"  => cfg.servers  = parse_server_list(&val),
            "username" => cfg.username = val,
            "password" => cfg.password = val,
            "self_signed" => {
                cfg.mode = if parse_bool(&key, &val)? {
                    RequestMode::SelfSigned
                } else {
                    RequestMode::Csr
                };
            }
            "replace_common_name" => cfg.replace_common_name = parse_bool(&key, &val)?,
            "timeout_secs" => {
                cfg.timeout_secs = val.parse().map_err(|_| {
                    CertError::Config(format!("timeout_secs: expected seconds, got '{val}'"))
                })?;
            }
            // Self-signed subject
            "self_signed_common_name"         => ss.common_name         = val,
            "self_signed_organization"        => ss.organization        = val,
            "self_signed_organizational_unit" => ss.organizational_unit = val,
            "self_signed_locality"            => ss.locality            = val,
            "self_signed_state"               => ss.state               = val,
            "self_signed_country_code"        => ss.country_code        = val,
            // CSR subject
            "csr_common_name"         => csr.common_name         = val,
            "csr_organization"        => csr.organization        = val,
            "csr_organizational_unit" => csr.organizational_unit = val,
            "csr_locality"            => csr.locality            = val,
            "csr_state"               => csr.state               = val,
            "csr_country_code"        => csr.country_code        = val,
            // CSR extras
            "csr_email"                        => cfg.csr.email                 = val,
            "csr_remote_server"                => cfg.csr.remote_server         = val,
            "csr_remote_server_protocol"       => cfg.csr.remote_protocol       = val.parse()?,
            "csr_remote_server_user"           => cfg.csr.remote_user           = val,
            "csr_remote_server_password"       => cfg.csr.remote_password       = val,
            "csr_remote_server_filepath"       => cfg.csr.remote_filepath       = val,
            "csr_remote_server_file_extension" => cfg.csr.remote_file_extension = val,
            "csr_signature_algorithm"          => cfg.csr.signature_algorithm   = val.parse()?,
            _ => {} // ignore unknown keys
        }
    }

    Ok(cfg)
}

/// Replace credentials with values from `lookup` (normally the process
/// environment) when those are set and non-empty.
pub fn apply_env_overrides<F>(cfg: ToolConfig, lookup: F) -> ToolConfig
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |key: &str| lookup(key).filter(|v| !v.is_empty());
    ToolConfig {
        username: non_empty(ENV_USERNAME).unwrap_or(cfg.username.clone()),
        password: non_empty(ENV_PASSWORD).unwrap_or(cfg.password.clone()),
        ..cfg
    }
}

/// The XML API endpoint for a controller.
pub fn endpoint_url(server: &str) -> Result<Url> {
    Url::parse(&format!("https://{server}/nuova"))
        .map_err(|e| CertError::Config(format!("invalid server entry '{server}': {e}")))
}

/// Validate that required fields are populated and consistent.
pub fn validate_config(cfg: &ToolConfig) -> Result<()> {
    if cfg.username.is_empty() {
        return Err(CertError::Config("username is required".into()));
    }
    if cfg.timeout_secs == 0 {
        return Err(CertError::Config("timeout_secs must be greater than zero".into()));
    }
    for server in &cfg.servers {
        let url = endpoint_url(server)?;
        if url.path() != "/nuova" || url.query().is_some() {
            return Err(CertError::Config(format!(
                "server entry '{server}' must be a bare hostname or address"
            )));
        }
    }
    if cfg.mode == RequestMode::Csr
        && cfg.csr.remote_protocol != RemoteProtocol::None
        && cfg.csr.remote_server.is_empty()
    {
        return Err(CertError::Config(format!(
            "csr_remote_server is required when csr_remote_server_protocol is {}",
            cfg.csr.remote_protocol.as_str()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    const SAMPLE: &str = "\
# General
servers = hx-edge-cimc-01, hx-edge-cimc-02,hx-edge-cimc-03,
username = admin
password = C1sco12345
self_signed = false
replace_common_name = no

csr_common_name = cimc.example.com
csr_organization = Example Corp
csr_email =
csr_remote_server = 198.18.133.94
csr_remote_server_protocol = scp
csr_remote_server_user = root
csr_remote_server_password = C1sco12345
csr_remote_server_filepath = /root/tmp/
CSR_SIGNATURE_ALGORITHM = sha256
some_future_key = whatever
";

    #[test]
    fn defaults_match_tool_defaults() {
        let cfg = ToolConfig::default();
        assert_eq!(cfg.mode, RequestMode::SelfSigned);
        assert!(cfg.replace_common_name);
        assert_eq!(cfg.self_signed_subject.organization, "Cisco (Self-Signed)");
        assert_eq!(cfg.csr_subject.organization, "Cisco");
        assert_eq!(cfg.csr.remote_protocol, RemoteProtocol::None);
        assert_eq!(cfg.csr.signature_algorithm, SignatureAlgorithm::Sha384);
        assert_eq!(cfg.csr.remote_file_extension, ".txt");
    }

    #[test]
    fn parse_sample() {
        let cfg = parse_config(SAMPLE).unwrap();
        assert_eq!(cfg.servers, vec!["hx-edge-cimc-01", "hx-edge-cimc-02", "hx-edge-cimc-03"]);
        assert_eq!(cfg.password, "C1sco12345");
        assert_eq!(cfg.mode, RequestMode::Csr);
        assert!(!cfg.replace_common_name);
        assert_eq!(cfg.csr_subject.common_name, "cimc.example.com");
        assert_eq!(cfg.csr_subject.locality, "San Jose");
        assert_eq!(cfg.csr.email, "");
        assert_eq!(cfg.csr.remote_protocol, RemoteProtocol::Scp);
        assert_eq!(cfg.csr.signature_algorithm, SignatureAlgorithm::Sha256);
        validate_config(&cfg).unwrap();
    }

    #[test]
    fn unknown_protocol_rejected() {
        let err = parse_config("csr_remote_server_protocol = http").unwrap_err();
        assert_eq!(err.kind(), "configuration");
        assert!(err.to_string().contains("http"));
    }

    #[test]
    fn unknown_algorithm_rejected() {
        let err = parse_config("csr_signature_algorithm = md5").unwrap_err();
        assert!(matches!(err, CertError::Config(_)));
    }

    #[test]
    fn empty_extension_is_kept_empty() {
        let cfg = parse_config(
            "self_signed = false\ncsr_remote_server_filepath = /x/\ncsr_remote_server_file_extension =\n",
        )
        .unwrap();
        assert_eq!(cfg.csr.remote_file_extension, "");
        let xml = crate::cimc::xml::csr_command("c", cfg.subject(), &cfg.csr).unwrap();
        assert!(xml.contains(r#"remoteFile="/x/localhost-csr""#), "{xml}");
    }

    #[test]
    fn empty_parsed_values_keep_defaults() {
        let cfg = parse_config(
            "self_signed =\ntimeout_secs =\ncsr_signature_algorithm =\ncsr_remote_server_protocol =\n",
        )
        .unwrap();
        assert_eq!(cfg.mode, RequestMode::SelfSigned);
        assert_eq!(cfg.timeout_secs, TIMEOUT_SECS);
        assert_eq!(cfg.csr.signature_algorithm, SignatureAlgorithm::Sha384);
        assert_eq!(cfg.csr.remote_protocol, RemoteProtocol::None);
    }

    #[test]
    fn bad_boolean_rejected() {
        assert!(parse_config("self_signed = maybe").is_err());
    }

    #[test]
    fn subject_override_uses_server() {
        let cfg = ToolConfig {
            servers: vec!["a".into(), "b".into(), "c".into()],
            ..ToolConfig::default()
        };
        let names: Vec<String> = cfg.servers.iter()
            .map(|s| cfg.subject_for(s).common_name)
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);

        let fixed = ToolConfig { replace_common_name: false, ..cfg };
        assert_eq!(fixed.subject_for("a").common_name, "localhost");
    }

    #[test]
    fn env_overrides_credentials() {
        let cfg = parse_config("username = admin\npassword = from-file").unwrap();
        let cfg = apply_env_overrides(cfg, |key| match key {
            ENV_PASSWORD => Some("from-env".to_string()),
            ENV_USERNAME => Some(String::new()),
            _ => None,
        });
        assert_eq!(cfg.username, "admin");
        assert_eq!(cfg.password, "from-env");
    }

    #[test]
    fn validate_rejects_bad_entries() {
        let cfg = ToolConfig { servers: vec!["cimc-01/extra".into()], ..ToolConfig::default() };
        assert!(validate_config(&cfg).is_err());

        let cfg = ToolConfig { servers: vec!["bad host".into()], ..ToolConfig::default() };
        assert!(validate_config(&cfg).is_err());

        let cfg = ToolConfig { timeout_secs: 0, ..ToolConfig::default() };
        assert!(validate_config(&cfg).is_err());

        let mut cfg = ToolConfig { mode: RequestMode::Csr, ..ToolConfig::default() };
        cfg.csr.remote_protocol = RemoteProtocol::Sftp;
        assert!(validate_config(&cfg).is_err());

        let cfg = ToolConfig { servers: vec!["10.0.0.5:8443".into()], ..ToolConfig::default() };
        validate_config(&cfg).unwrap();
    }

    #[test]
    fn debug_hides_password() {
        let cfg = ToolConfig { password: "s3cret".into(), ..ToolConfig::default() };
        assert!(!format!("{cfg:?}").contains("s3cret"));
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let cfg = load_config(file.path()).unwrap();
        assert_eq!(cfg.servers.len(), 3);

        let missing = load_config(Path::new("/nonexistent/cimc-cert.conf")).unwrap_err();
        assert!(matches!(missing, CertError::Config(_)));
    }
}
