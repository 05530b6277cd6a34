//! Renders a [`Host`] as a runnable `ssh` command line.

use crate::host::{Host, SshOption, DEFAULT_PORT};
use crate::invocation::METADATA_PREFIX;

/// The command line for `host`, prefixed by a metadata comment when the
/// host has an alias or tags.
///
/// Co-aliases have no command-line form and are not emitted.
pub fn build_command(host: &Host) -> String {
    let mut out = String::new();
    if let Some(comment) = metadata_comment(host) {
        out.push_str(&comment);
        out.push('\n');
    }
    out.push_str(&build_args(host).join(" "));
    out
}

fn metadata_comment(host: &Host) -> Option<String> {
    if host.alias.is_empty() && host.tags.is_empty() {
        return None;
    }
    let mut comment = format!("# {METADATA_PREFIX}{}", host.alias);
    if !host.tags.is_empty() {
        comment.push_str(" tags:");
        comment.push_str(&host.tags.join(","));
    }
    Some(comment)
}

/// Shell words of the command, already quoted.
pub fn build_args(host: &Host) -> Vec<String> {
    let mut args = vec!["ssh".to_string()];
    let mut trusted_done = false;

    for (opt, values) in host.options.iter() {
        if opt == SshOption::RemoteCommand {
            continue;
        }
        if opt == SshOption::ForwardX11Trusted && trusted_done {
            continue;
        }
        for value in values {
            match flag_for(host, opt, value) {
                Some(Flag::Bare(flag)) => args.push(flag.to_string()),
                Some(Flag::Value(flag)) => {
                    args.push(flag.to_string());
                    args.push(quote(value));
                }
                None if opt == SshOption::ProxyCommand => match jump_target(value) {
                    Some(target) => {
                        args.push("-W".to_string());
                        args.push(quote(target));
                    }
                    None => push_option(&mut args, opt, value),
                },
                None => push_option(&mut args, opt, value),
            }
            if opt == SshOption::ForwardX11 && is_trusted_x11(host) {
                trusted_done = true;
            }
        }
    }

    if host.effective_port() != DEFAULT_PORT {
        args.push("-p".to_string());
        args.push(host.effective_port().to_string());
    }
    for identity in &host.identity_files {
        args.push("-i".to_string());
        args.push(quote(identity));
    }

    let target = host.effective_hostname();
    if host.user.is_empty() {
        args.push(quote(target));
    } else {
        args.push(quote(&format!("{}@{target}", host.user)));
    }

    if let Some(command) = host.option(SshOption::RemoteCommand) {
        args.push(quote(command));
    }
    args
}

enum Flag {
    Bare(&'static str),
    Value(&'static str),
}

fn is_trusted_x11(host: &Host) -> bool {
    is(host.option(SshOption::ForwardX11), "yes") && is(host.option(SshOption::ForwardX11Trusted), "yes")
}

fn is(value: Option<&str>, expected: &str) -> bool {
    value.is_some_and(|v| v.eq_ignore_ascii_case(expected))
}

/// The dedicated flag that parses back to exactly `opt = value`, if any.
fn flag_for(host: &Host, opt: SshOption, value: &str) -> Option<Flag> {
    let v = value.to_ascii_lowercase();
    let flag = match (opt, v.as_str()) {
        (SshOption::ProxyJump, _) => Flag::Value("-J"),
        (SshOption::BindAddress, _) => Flag::Value("-b"),
        (SshOption::BindInterface, _) => Flag::Value("-B"),
        (SshOption::AddressFamily, "inet") => Flag::Bare("-4"),
        (SshOption::AddressFamily, "inet6") => Flag::Bare("-6"),
        (SshOption::LocalForward, _) => Flag::Value("-L"),
        (SshOption::RemoteForward, _) => Flag::Value("-R"),
        (SshOption::DynamicForward, _) => Flag::Value("-D"),
        (SshOption::GatewayPorts, "yes") => Flag::Bare("-g"),
        (SshOption::ForwardAgent, "yes") => Flag::Bare("-A"),
        (SshOption::ForwardAgent, "no") => Flag::Bare("-a"),
        (SshOption::ForwardX11, "yes") if is_trusted_x11(host) => Flag::Bare("-Y"),
        (SshOption::ForwardX11, "yes") => Flag::Bare("-X"),
        (SshOption::ForwardX11, "no") => Flag::Bare("-x"),
        (SshOption::ControlMaster, "yes") => Flag::Bare("-M"),
        (SshOption::ControlMaster, "ask") => Flag::Bare("-MM"),
        (SshOption::ControlPath, _) => Flag::Value("-S"),
        (SshOption::Compression, "yes") => Flag::Bare("-C"),
        (SshOption::Ciphers, _) => Flag::Value("-c"),
        (SshOption::Macs, _) => Flag::Value("-m"),
        (SshOption::EscapeChar, _) => Flag::Value("-e"),
        (SshOption::SessionType, "none") => Flag::Bare("-N"),
        (SshOption::SessionType, "subsystem") => Flag::Bare("-s"),
        (SshOption::RequestTty, "yes") => Flag::Bare("-t"),
        (SshOption::RequestTty, "force") => Flag::Bare("-tt"),
        (SshOption::RequestTty, "no") => Flag::Bare("-T"),
        (SshOption::LogLevel, "quiet") => Flag::Bare("-q"),
        (SshOption::LogLevel, "debug1") => Flag::Bare("-v"),
        (SshOption::LogLevel, "debug2") => Flag::Bare("-vv"),
        (SshOption::LogLevel, "debug3") => Flag::Bare("-vvv"),
        _ => return None,
    };
    // Bare flags parse back to one canonical spelling.
    if let Flag::Bare(_) = flag {
        if !is_canonical(opt, value) {
            return None;
        }
    }
    Some(flag)
}

fn is_canonical(opt: SshOption, value: &str) -> bool {
    match opt {
        SshOption::LogLevel => value == value.to_ascii_uppercase(),
        _ => value == value.to_ascii_lowercase(),
    }
}

/// `ssh -W <target> %h:%p` is what `-W <target>` parses into.
fn jump_target(command: &str) -> Option<&str> {
    let target = command.strip_prefix("ssh -W ")?.strip_suffix(" %h:%p")?;
    (!target.is_empty() && !target.contains(char::is_whitespace)).then_some(target)
}

fn push_option(args: &mut Vec<String>, opt: SshOption, value: &str) {
    args.push("-o".to_string());
    args.push(quote(&format!("{}={value}", opt.name())));
}

/// Double-quotes `word` when a POSIX shell would split, expand or redirect
/// it. A leading `~` is left bare so paths still expand.
pub fn quote(word: &str) -> String {
    let needs_quotes = word.is_empty()
        || word.chars().any(|c| {
            c.is_whitespace()
                || matches!(
                    c,
                    '"' | '\'' | '\\' | '$' | '`' | ';' | '|' | '&' | '<' | '>' | '(' | ')' | '*' | '?' | '#'
                )
        });
    if !needs_quotes {
        return word.to_string();
    }
    let mut quoted = String::with_capacity(word.len() + 2);
    quoted.push('"');
    for c in word.chars() {
        if matches!(c, '"' | '\\' | '$' | '`') {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invocation::{parse_invocation, tokenize};
    use pretty_assertions::assert_eq;

    fn sample() -> Host {
        let mut host = Host::new("web");
        host.hostname = "10.0.0.1".into();
        host.user = "deploy".into();
        host.port = Some(2222);
        host.identity_files = vec!["~/.ssh/id_ed25519".into()];
        host.tags = vec!["prod".into(), "eu".into()];
        host.options.set(SshOption::ProxyJump, "bastion");
        host.options.push(SshOption::LocalForward, "8080:localhost:80");
        host.options.set(SshOption::ForwardAgent, "yes");
        host.options.set(SshOption::ServerAliveInterval, "30");
        host.options.set(SshOption::StrictHostKeyChecking, "no");
        host
    }

    #[test]
    fn fixed_layout() {
        assert_eq!(
            build_command(&sample()),
            "# lazyssh-alias:web tags:prod,eu\n\
             ssh -J bastion -L 8080:localhost:80 -A -o ServerAliveInterval=30 \
             -o StrictHostKeyChecking=no -p 2222 -i ~/.ssh/id_ed25519 deploy@10.0.0.1"
        );
    }

    #[test]
    fn minimal_host() {
        let mut host = Host::new("");
        host.hostname = "h.example".into();
        assert_eq!(build_command(&host), "ssh h.example");
    }

    #[test]
    fn values_with_spaces_are_quoted() {
        let mut host = Host::new("box");
        host.hostname = "box.lan".into();
        host.identity_files = vec!["/keys/my key".into()];
        host.options.set(SshOption::ProxyCommand, "nc -X 5 %h %p");
        let args = build_args(&host);
        assert!(args.contains(&"\"ProxyCommand=nc -X 5 %h %p\"".to_string()));
        assert!(args.contains(&"\"/keys/my key\"".to_string()));

        let line = args.join(" ");
        let tokens = tokenize(&line).unwrap();
        assert!(tokens.contains(&"/keys/my key".to_string()));
    }

    #[test]
    fn remote_command_is_one_quoted_word() {
        for command in ["bash -c 'echo hi'", "echo \"a  b\"", "ls; rm -rf /tmp/x"] {
            let mut host = Host::new("box");
            host.hostname = "box.lan".into();
            host.options.set(SshOption::RemoteCommand, command);

            let args = build_args(&host);
            assert_eq!(args.len(), 3);
            assert_eq!(tokenize(&args.join(" ")).unwrap()[2], command);
            let parsed = parse_invocation(&build_command(&host)).unwrap();
            assert_eq!(parsed.option(SshOption::RemoteCommand), Some(command));
        }

        let mut host = Host::new("");
        host.hostname = "box.lan".into();
        host.options.set(SshOption::RemoteCommand, "ls; rm -rf /tmp/x");
        assert_eq!(build_command(&host), "ssh box.lan \"ls; rm -rf /tmp/x\"");
    }

    #[test]
    fn tags_with_spaces_survive_export() {
        let mut host = sample();
        host.tags = vec!["my team".into(), "eu".into()];
        let command = build_command(&host);
        assert!(command.starts_with("# lazyssh-alias:web tags:my team,eu\n"));
        assert_eq!(parse_invocation(&command).unwrap().tags, vec!["my team", "eu"]);
    }

    #[test]
    fn shell_metacharacters_are_quoted() {
        let mut host = Host::new("");
        host.hostname = "box.lan".into();
        host.options.set(SshOption::PermitLocalCommand, "yes");
        host.options.set(SshOption::LocalCommand, "a;b");
        host.identity_files = vec!["~/.ssh/id_ed25519".into()];
        let args = build_args(&host);
        assert!(args.contains(&"\"LocalCommand=a;b\"".to_string()));
        assert!(args.contains(&"~/.ssh/id_ed25519".to_string()));

        for word in ["a|b", "a&b", "a<b", "a>b", "(a)", "*.pem", "k?", "x#y"] {
            assert_eq!(quote(word), format!("\"{word}\""));
        }
        assert_eq!(quote("~/keys/id"), "~/keys/id");
        assert_eq!(quote("user@host:22"), "user@host:22");
    }

    #[test]
    fn dedicated_flags_only_when_exact() {
        let mut host = Host::new("x");
        host.hostname = "x.lan".into();
        host.options.set(SshOption::Compression, "no");
        host.options.set(SshOption::BatchMode, "yes");
        host.options.set(SshOption::RequestTty, "auto");
        host.options.set(SshOption::ForwardX11, "yes");
        host.options.set(SshOption::ForwardX11Trusted, "yes");
        host.options.set(SshOption::ProxyCommand, "ssh -W jump:22 %h:%p");
        let args = build_args(&host).join(" ");
        assert_eq!(
            args,
            "ssh -W jump:22 -Y -o Compression=no -o RequestTTY=auto -o BatchMode=yes x.lan"
        );
    }

    #[test]
    fn round_trip() {
        let mut host = sample();
        host.options.push(SshOption::LocalForward, "127.0.0.1:9000:db:5432");
        host.options.set(SshOption::ControlMaster, "ask");
        host.options.set(SshOption::ControlPath, "~/.ssh/cm-%r@%h:%p");
        host.options.set(SshOption::LogLevel, "DEBUG2");
        host.options.set(SshOption::ProxyCommand, "ssh -W %h:%p gateway");
        host.options.push(SshOption::SendEnv, "LANG");
        host.options.push(SshOption::SendEnv, "LC_*");
        host.options.set(SshOption::RemoteCommand, "tmux attach -t main");

        let parsed = parse_invocation(&build_command(&host)).unwrap();
        assert_eq!(parsed, host);
        assert_eq!(parsed.tags, host.tags);
    }
}
