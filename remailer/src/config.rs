use std::{
    net::{IpAddr, Ipv4Addr},
    path::{Path, PathBuf},
};

use remailer_smtp::client::{Credentials, DsnOptions};
use remailer_smtp::TlsContext;
use serde::Deserialize;

/// Everything the relay reads from its TOML configuration file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Ingress bind address.
    pub listener_address: IpAddr,
    /// Ingress bind port.
    pub listener_port: u16,
    /// Secure mode: advertise STARTTLS (with `listener_tls`) and AUTH.
    pub listener_secure: bool,
    /// Speak LMTP on ingress.
    pub listener_lmtp: bool,
    /// Extra text appended to the ESMTP banner.
    pub listener_greeting: String,
    /// Certificate and key for STARTTLS.
    pub listener_tls: Option<TlsContext>,
    /// SIZE limit advertised and enforced on ingress; 0 = unlimited.
    pub max_message_size: usize,

    /// Upstream submission host; unset disables the sender entirely.
    pub sender_smtp_host: Option<String>,
    pub sender_smtp_port: u16,
    /// TLS on connect towards the upstream.
    pub sender_smtp_secure: bool,
    pub sender_ignore_invalid_cert: bool,
    pub sender_auth: Option<Credentials>,
    pub sender_dsn: Option<DsnOptions>,
    /// Speak LMTP towards the upstream.
    pub sender_lmtp: bool,

    /// Spool root; relative paths resolve against the working directory.
    pub eml_storage_folder: PathBuf,
    /// Seconds between dispatches; 0 = direct mode.
    pub timer_interval_sec: u64,
    /// Archive delivered mail instead of unlinking it.
    pub backup_enabled: bool,
    /// Emit transport-level events to the log.
    pub log_enabled: bool,

    pub control: Option<ControlConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ControlConfig {
    #[serde(default = "default_control_address")]
    pub address: IpAddr,
    #[serde(default = "default_control_port")]
    pub port: u16,
    /// Shared secret; the control API only starts when this is non-empty.
    pub api_key: String,
}

fn default_control_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

const fn default_control_port() -> u16 {
    8025
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listener_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            listener_port: 25,
            listener_secure: false,
            listener_lmtp: false,
            listener_greeting: String::new(),
            listener_tls: None,
            max_message_size: 0,
            sender_smtp_host: None,
            sender_smtp_port: 587,
            sender_smtp_secure: false,
            sender_ignore_invalid_cert: false,
            sender_auth: None,
            sender_dsn: None,
            sender_lmtp: false,
            eml_storage_folder: PathBuf::from("eml-storage"),
            timer_interval_sec: 0,
            backup_enabled: false,
            log_enabled: false,
            control: None,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|err| anyhow::anyhow!("unable to read {}: {err}", path.display()))?;
        toml::from_str(&raw)
            .map_err(|err| anyhow::anyhow!("unable to parse {}: {err}", path.display()))
    }

    /// The spool root with relative paths anchored at the working directory.
    pub fn storage_root(&self) -> anyhow::Result<PathBuf> {
        if self.eml_storage_folder.is_absolute() {
            Ok(self.eml_storage_folder.clone())
        } else {
            Ok(std::env::current_dir()?.join(&self.eml_storage_folder))
        }
    }

    /// The upstream sender configuration, when a host is set.
    pub fn sender(&self) -> Option<remailer_relay::SenderConfig> {
        let host = self.sender_smtp_host.clone()?;
        Some(remailer_relay::SenderConfig {
            host,
            port: self.sender_smtp_port,
            secure: self.sender_smtp_secure,
            lmtp: self.sender_lmtp,
            ignore_invalid_cert: self.sender_ignore_invalid_cert,
            auth: self.sender_auth.clone(),
            dsn: self.sender_dsn.clone(),
            log: self.log_enabled,
            helo_name: hostname(),
        })
    }

    /// Control API settings, when usable (Open Question 2: the unsecured
    /// variant is not served).
    pub fn control(&self) -> Option<&ControlConfig> {
        self.control
            .as_ref()
            .filter(|control| !control.api_key.is_empty())
    }
}

/// Hostname for the banner and EHLO, from the environment.
pub fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
}

#[cfg(test)]
mod test {
    use std::path::PathBuf;

    use super::Config;

    #[test]
    fn defaults_match_the_documented_values() {
        let config = Config::default();
        assert_eq!(config.listener_address.to_string(), "0.0.0.0");
        assert_eq!(config.listener_port, 25);
        assert!(!config.listener_secure);
        assert!(!config.listener_lmtp);
        assert_eq!(config.eml_storage_folder, PathBuf::from("eml-storage"));
        assert_eq!(config.timer_interval_sec, 0);
        assert!(!config.backup_enabled);
        assert!(config.sender_smtp_host.is_none());
        assert!(config.sender().is_none());
    }

    #[test]
    fn parses_a_full_config() {
        let config: Config = toml::from_str(
            r#"
                listener_address = "127.0.0.1"
                listener_port = 2525
                listener_greeting = "bulk relay"
                sender_smtp_host = "smtp.example.com"
                sender_smtp_port = 465
                sender_smtp_secure = true
                sender_auth = { user = "relay", pass = "s3cr3t" }
                eml_storage_folder = "/var/spool/remailer"
                timer_interval_sec = 30
                backup_enabled = true

                [control]
                port = 9025
                api_key = "sekrit"
            "#,
        )
        .unwrap();

        assert_eq!(config.listener_port, 2525);
        assert_eq!(config.timer_interval_sec, 30);

        let sender = config.sender().unwrap();
        assert_eq!(sender.host, "smtp.example.com");
        assert_eq!(sender.port, 465);
        assert!(sender.secure);
        assert_eq!(sender.auth.unwrap().user, "relay");

        let control = config.control().unwrap();
        assert_eq!(control.port, 9025);
        assert_eq!(control.address.to_string(), "127.0.0.1");
    }

    #[test]
    fn empty_api_key_disables_the_control_api() {
        let config: Config = toml::from_str(
            r#"
                [control]
                api_key = ""
            "#,
        )
        .unwrap();

        assert!(config.control.is_some());
        assert!(config.control().is_none());
    }

    #[test]
    fn storage_root_resolution() {
        let absolute: Config = toml::from_str(r#"eml_storage_folder = "/var/spool/mx""#).unwrap();
        assert_eq!(
            absolute.storage_root().unwrap(),
            PathBuf::from("/var/spool/mx")
        );

        let relative: Config = toml::from_str(r#"eml_storage_folder = "spool""#).unwrap();
        let resolved = relative.storage_root().unwrap();
        assert!(resolved.is_absolute());
        assert!(resolved.ends_with("spool"));
    }
}
