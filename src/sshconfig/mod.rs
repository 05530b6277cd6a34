//! Reading and writing the OpenSSH client config.
//!
//! The file is kept as a [`ConfigDocument`] of raw lines grouped into
//! blocks, so anything the registry does not model (comments, unknown keys,
//! `Match` blocks, wildcard hosts) is written back exactly as it was read.

mod parser;
mod writer;

pub use parser::{Block, BlockKind, ConfigDocument, Line, LineKind, ParseWarning};
pub use writer::tilde_path;

pub(crate) use parser::split_quoted;

use crate::host::Host;

/// Decodes every concrete host in `text`.
pub fn parse_hosts(text: &str) -> (Vec<Host>, Vec<ParseWarning>) {
    let (doc, warnings) = ConfigDocument::parse(text);
    (doc.hosts(), warnings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::SshOption;

    #[test]
    fn reparse_after_rewrite_yields_same_records() {
        let source = "\
Host *
    Compression yes

Host jump
    HostName jump.example.com
    User ops
    ServerAliveInterval 15

Host app app.internal
    HostName 10.1.2.3
    Port 2022
    ProxyJump jump
    RemoteForward 9000 localhost:9000
    SendEnv LANG
    SendEnv LC_*
    SetEnv TERM=xterm-256color
";
        let (mut doc, _) = ConfigDocument::parse(source);
        let hosts = doc.hosts();
        for host in &hosts {
            doc.update_host(&host.alias, host, None);
        }
        let (reparsed, _) = parse_hosts(&doc.render());
        assert_eq!(reparsed, hosts);
        assert_eq!(
            reparsed[1].options.values(SshOption::SendEnv),
            ["LANG".to_string(), "LC_*".to_string()]
        );
    }
}
