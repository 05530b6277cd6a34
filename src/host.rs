use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

pub const DEFAULT_PORT: u16 = 22;

/// Groups used to order option lines when a block is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Category {
    Basic,
    Connection,
    Forwarding,
    Authentication,
    Multiplexing,
    KeepAlive,
    Security,
    Command,
    Environment,
    Debug,
}

macro_rules! ssh_options {
    ($( $variant:ident => $name:literal, $category:ident, $multi:literal; )*) => {
        /// Every client option the registry models besides HostName, User,
        /// Port and IdentityFile. Declaration order is write order.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub enum SshOption {
            $($variant,)*
        }

        impl SshOption {
            pub const ALL: &'static [SshOption] = &[$(SshOption::$variant,)*];

            /// Canonical spelling used when writing the config file.
            pub fn name(self) -> &'static str {
                match self {
                    $(SshOption::$variant => $name,)*
                }
            }

            pub fn category(self) -> Category {
                match self {
                    $(SshOption::$variant => Category::$category,)*
                }
            }

            pub fn is_multi(self) -> bool {
                match self {
                    $(SshOption::$variant => $multi,)*
                }
            }
        }
    };
}

ssh_options! {
    ProxyJump => "ProxyJump", Connection, false;
    ProxyCommand => "ProxyCommand", Connection, false;
    ConnectTimeout => "ConnectTimeout", Connection, false;
    ConnectionAttempts => "ConnectionAttempts", Connection, false;
    BindAddress => "BindAddress", Connection, false;
    BindInterface => "BindInterface", Connection, false;
    AddressFamily => "AddressFamily", Connection, false;
    IpQos => "IPQoS", Connection, false;
    CanonicalizeHostname => "CanonicalizeHostname", Connection, false;
    CanonicalDomains => "CanonicalDomains", Connection, false;
    CanonicalizeFallbackLocal => "CanonicalizeFallbackLocal", Connection, false;
    CanonicalizeMaxDots => "CanonicalizeMaxDots", Connection, false;
    CanonicalizePermittedCnames => "CanonicalizePermittedCNAMEs", Connection, false;
    LocalForward => "LocalForward", Forwarding, true;
    RemoteForward => "RemoteForward", Forwarding, true;
    DynamicForward => "DynamicForward", Forwarding, true;
    ClearAllForwardings => "ClearAllForwardings", Forwarding, false;
    ExitOnForwardFailure => "ExitOnForwardFailure", Forwarding, false;
    GatewayPorts => "GatewayPorts", Forwarding, false;
    PubkeyAuthentication => "PubkeyAuthentication", Authentication, false;
    PubkeyAcceptedAlgorithms => "PubkeyAcceptedAlgorithms", Authentication, false;
    HostbasedAcceptedAlgorithms => "HostbasedAcceptedAlgorithms", Authentication, false;
    PasswordAuthentication => "PasswordAuthentication", Authentication, false;
    PreferredAuthentications => "PreferredAuthentications", Authentication, false;
    IdentitiesOnly => "IdentitiesOnly", Authentication, false;
    AddKeysToAgent => "AddKeysToAgent", Authentication, false;
    IdentityAgent => "IdentityAgent", Authentication, false;
    KbdInteractiveAuthentication => "KbdInteractiveAuthentication", Authentication, false;
    NumberOfPasswordPrompts => "NumberOfPasswordPrompts", Authentication, false;
    ForwardAgent => "ForwardAgent", Authentication, false;
    ForwardX11 => "ForwardX11", Authentication, false;
    ForwardX11Trusted => "ForwardX11Trusted", Authentication, false;
    ControlMaster => "ControlMaster", Multiplexing, false;
    ControlPath => "ControlPath", Multiplexing, false;
    ControlPersist => "ControlPersist", Multiplexing, false;
    ServerAliveInterval => "ServerAliveInterval", KeepAlive, false;
    ServerAliveCountMax => "ServerAliveCountMax", KeepAlive, false;
    TcpKeepAlive => "TCPKeepAlive", KeepAlive, false;
    Compression => "Compression", KeepAlive, false;
    StrictHostKeyChecking => "StrictHostKeyChecking", Security, false;
    CheckHostIp => "CheckHostIP", Security, false;
    FingerprintHash => "FingerprintHash", Security, false;
    UserKnownHostsFile => "UserKnownHostsFile", Security, false;
    HostKeyAlgorithms => "HostKeyAlgorithms", Security, false;
    Ciphers => "Ciphers", Security, false;
    Macs => "MACs", Security, false;
    KexAlgorithms => "KexAlgorithms", Security, false;
    VerifyHostKeyDns => "VerifyHostKeyDNS", Security, false;
    UpdateHostKeys => "UpdateHostKeys", Security, false;
    HashKnownHosts => "HashKnownHosts", Security, false;
    VisualHostKey => "VisualHostKey", Security, false;
    RemoteCommand => "RemoteCommand", Command, false;
    RequestTty => "RequestTTY", Command, false;
    SessionType => "SessionType", Command, false;
    LocalCommand => "LocalCommand", Command, false;
    PermitLocalCommand => "PermitLocalCommand", Command, false;
    EscapeChar => "EscapeChar", Command, false;
    SendEnv => "SendEnv", Environment, true;
    SetEnv => "SetEnv", Environment, true;
    LogLevel => "LogLevel", Debug, false;
    BatchMode => "BatchMode", Debug, false;
}

impl SshOption {
    /// Case-insensitive lookup of a config or `-o` key.
    pub fn from_key(key: &str) -> Option<SshOption> {
        SshOption::ALL
            .iter()
            .copied()
            .find(|opt| opt.name().eq_ignore_ascii_case(key))
    }

    /// Options whose value is a file path and may need quoting.
    pub fn is_path(self) -> bool {
        matches!(
            self,
            SshOption::UserKnownHostsFile | SshOption::ControlPath | SshOption::IdentityAgent
        )
    }
}

/// String-valued options keyed by [`SshOption`].
///
/// Single-valued options hold exactly one entry; multi-valued ones keep
/// source order, duplicates included.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Options(BTreeMap<SshOption, Vec<String>>);

impl Options {
    pub fn get(&self, opt: SshOption) -> Option<&str> {
        self.0
            .get(&opt)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    pub fn values(&self, opt: SshOption) -> &[String] {
        self.0.get(&opt).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Replaces the value; an empty value clears the option.
    pub fn set(&mut self, opt: SshOption, value: impl Into<String>) {
        let value = value.into();
        if value.is_empty() {
            self.0.remove(&opt);
        } else {
            self.0.insert(opt, vec![value]);
        }
    }

    /// Appends to a multi-valued option, or replaces a single-valued one.
    pub fn push(&mut self, opt: SshOption, value: impl Into<String>) {
        let value = value.into();
        if value.is_empty() {
            return;
        }
        if opt.is_multi() {
            self.0.entry(opt).or_default().push(value);
        } else {
            self.0.insert(opt, vec![value]);
        }
    }

    pub fn set_values(&mut self, opt: SshOption, values: Vec<String>) {
        let values: Vec<String> = values.into_iter().filter(|v| !v.is_empty()).collect();
        if values.is_empty() {
            self.0.remove(&opt);
        } else {
            self.0.insert(opt, values);
        }
    }

    pub fn remove(&mut self, opt: SshOption) {
        self.0.remove(&opt);
    }

    pub fn contains(&self, opt: SshOption) -> bool {
        self.0.contains_key(&opt)
    }

    /// Iterates in write order.
    pub fn iter(&self) -> impl Iterator<Item = (SshOption, &[String])> {
        self.0.iter().map(|(opt, values)| (*opt, values.as_slice()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A host entry with its sidecar metadata merged in.
#[derive(Debug, Clone, Default)]
pub struct Host {
    pub alias: String,
    /// Further concrete patterns of the same block.
    pub aliases: Vec<String>,
    pub hostname: String,
    pub user: String,
    pub port: Option<u16>,
    pub identity_files: Vec<String>,
    pub options: Options,

    pub tags: Vec<String>,
    pub last_seen: Option<DateTime<Utc>>,
    pub pinned_at: Option<DateTime<Utc>>,
    pub ssh_count: u64,
}

impl Host {
    pub fn new(alias: impl Into<String>) -> Self {
        Host {
            alias: alias.into(),
            ..Default::default()
        }
    }

    pub fn effective_port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PORT)
    }

    /// HostName, or the alias when the block has none.
    pub fn effective_hostname(&self) -> &str {
        if self.hostname.is_empty() {
            &self.alias
        } else {
            &self.hostname
        }
    }

    pub fn is_pinned(&self) -> bool {
        self.pinned_at.is_some()
    }

    pub fn option(&self, opt: SshOption) -> Option<&str> {
        self.options.get(opt)
    }

    /// True when any concrete pattern of this host equals `alias`.
    pub fn answers_to(&self, alias: &str) -> bool {
        self.alias == alias || self.aliases.iter().any(|a| a == alias)
    }

    pub fn clear_metadata(&mut self) {
        self.tags.clear();
        self.last_seen = None;
        self.pinned_at = None;
        self.ssh_count = 0;
    }
}

/// Compares config fields only; metadata is ignored.
impl PartialEq for Host {
    fn eq(&self, other: &Self) -> bool {
        self.alias == other.alias
            && self.aliases == other.aliases
            && self.hostname == other.hostname
            && self.user == other.user
            && self.effective_port() == other.effective_port()
            && self.identity_files == other.identity_files
            && self.options == other.options
    }
}

impl Eq for Host {}

/// True when a pattern contains ssh_config wildcard or negation characters.
pub fn is_wildcard(pattern: &str) -> bool {
    pattern.contains(['!', '*', '?', '[', ']'])
}
