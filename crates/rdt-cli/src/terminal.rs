use crate::server::ReliableServer;
use anyhow::Result;
use rdt_abstract::{LossConfig, ProtocolKind, TransferOutcome};
use std::io::{BufRead, Write};
use std::time::Duration;

pub const INVALID_INSTRUCTION: &str = "Invalid instruction, please try again.";

/// Loss applied by `-testgbn` / `-testsr` when no probabilities are given.
pub const DEFAULT_LOSS: f64 = 0.2;

/// One line typed at the `>>>` prompt.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SetTarget { host: String, port: u16 },
    Test { kind: ProtocolKind, loss: LossConfig },
    Exit,
    /// Forwarded verbatim to the target server.
    Send(String),
}

impl Command {
    /// `None` for empty input and malformed arguments.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        let words: Vec<&str> = line.split_whitespace().collect();
        let (&first, rest) = words.split_first()?;
        match first {
            "-settarget" => match rest {
                [host, port, ..] => Some(Command::SetTarget {
                    host: (*host).to_owned(),
                    port: port.parse().ok()?,
                }),
                _ => None,
            },
            "-exit" => Some(Command::Exit),
            other => match ProtocolKind::from_instruction(other) {
                Some(kind) => {
                    let data_loss = probability(rest.first())?;
                    let ack_loss = probability(rest.get(1))?;
                    Some(Command::Test {
                        kind,
                        loss: LossConfig::new(data_loss, ack_loss),
                    })
                }
                None => Some(Command::Send(line.to_owned())),
            },
        }
    }
}

fn probability(word: Option<&&str>) -> Option<f64> {
    match word {
        None => Some(DEFAULT_LOSS),
        Some(word) => word.parse().ok(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

/// The interactive prompt driving a [`ReliableServer`].
pub struct Terminal<'a> {
    server: &'a ReliableServer,
    host: String,
    port: u16,
    reply_timeout: Duration,
}

impl<'a> Terminal<'a> {
    /// Targets the server's own address until `-settarget` says otherwise.
    pub fn new(
        server: &'a ReliableServer,
        host: String,
        port: u16,
        reply_timeout: Duration,
    ) -> Self {
        Self {
            server,
            host,
            port,
            reply_timeout,
        }
    }

    pub fn target(&self) -> (&str, u16) {
        (&self.host, self.port)
    }

    pub fn run(&mut self, mut input: impl BufRead, mut out: impl Write) -> Result<()> {
        let mut line = String::new();
        loop {
            write!(out, ">>> ")?;
            out.flush()?;
            line.clear();
            if input.read_line(&mut line)? == 0 {
                writeln!(out)?;
                return Ok(());
            }
            if self.execute_line(&line, &mut out)? == Flow::Exit {
                return Ok(());
            }
        }
    }

    pub fn execute_line(&mut self, line: &str, out: &mut impl Write) -> Result<Flow> {
        let Some(command) = Command::parse(line) else {
            writeln!(out, "{INVALID_INSTRUCTION}")?;
            return Ok(Flow::Continue);
        };

        match command {
            Command::SetTarget { host, port } => {
                self.host = host;
                self.port = port;
                writeln!(out, "Successfully set host and port.")?;
            }
            Command::Test { kind, loss } => {
                match self
                    .server
                    .request_transfer(&self.host, self.port, kind, loss)
                {
                    Ok(transfer) => {
                        writeln!(out, "{}", transfer.text())?;
                        if transfer.outcome != TransferOutcome::Completed {
                            writeln!(out, "({kind} transfer ended: {:?})", transfer.outcome)?;
                        }
                    }
                    Err(e) => writeln!(out, "error: {e:#}")?,
                }
            }
            Command::Exit => return Ok(Flow::Exit),
            Command::Send(text) => {
                match self
                    .server
                    .send_message(&self.host, self.port, &text, self.reply_timeout)
                {
                    Ok(reply) => writeln!(out, "{reply}")?,
                    Err(e) => writeln!(out, "error: {e:#}")?,
                }
            }
        }
        Ok(Flow::Continue)
    }
}

/// Ask for the listening address when none was configured.
///
/// Keeps asking until both parts look valid; EOF is an error.
pub fn prompt_listen_addr(mut input: impl BufRead, mut out: impl Write) -> Result<String> {
    let mut line = String::new();
    loop {
        write!(out, "Please input the IP address: ")?;
        out.flush()?;
        line.clear();
        if input.read_line(&mut line)? == 0 {
            anyhow::bail!("No listening address given");
        }
        let host = line.trim().to_owned();

        write!(out, "Please input the port: ")?;
        out.flush()?;
        line.clear();
        if input.read_line(&mut line)? == 0 {
            anyhow::bail!("No listening port given");
        }
        match line.trim().parse::<u16>() {
            Ok(port) if !host.is_empty() => return Ok(format!("{host}:{port}")),
            _ => writeln!(out, "{INVALID_INSTRUCTION}")?,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_target_and_exit() {
        assert_eq!(
            Command::parse("-settarget 10.1.2.3 9000\n"),
            Some(Command::SetTarget {
                host: "10.1.2.3".into(),
                port: 9000
            })
        );
        assert_eq!(Command::parse("-settarget 10.1.2.3"), None);
        assert_eq!(Command::parse("-settarget host notaport"), None);
        assert_eq!(Command::parse("-exit"), Some(Command::Exit));
    }

    #[test]
    fn test_commands_default_to_twenty_percent_loss() {
        assert_eq!(
            Command::parse("-testgbn"),
            Some(Command::Test {
                kind: ProtocolKind::Gbn,
                loss: LossConfig::new(0.2, 0.2)
            })
        );
        assert_eq!(
            Command::parse("  -testsr   0.5 "),
            Some(Command::Test {
                kind: ProtocolKind::Sr,
                loss: LossConfig::new(0.5, 0.2)
            })
        );
        assert_eq!(
            Command::parse("-testsr 0 0.1"),
            Some(Command::Test {
                kind: ProtocolKind::Sr,
                loss: LossConfig::new(0.0, 0.1)
            })
        );
        assert_eq!(Command::parse("-testgbn lots"), None);
    }

    #[test]
    fn everything_else_is_sent_as_typed() {
        assert_eq!(
            Command::parse("-time\n"),
            Some(Command::Send("-time".into()))
        );
        assert_eq!(
            Command::parse("hello  there"),
            Some(Command::Send("hello  there".into()))
        );
        assert_eq!(Command::parse("   \n"), None);
        assert_eq!(Command::parse(""), None);
    }

    #[test]
    fn listen_prompt_retries_bad_port() {
        let input = b"127.0.0.1\nnope\n127.0.0.1\n8888\n";
        let mut out = Vec::new();
        let addr = prompt_listen_addr(&input[..], &mut out).unwrap();
        assert_eq!(addr, "127.0.0.1:8888");
        let out = String::from_utf8(out).unwrap();
        assert_eq!(out.matches(INVALID_INSTRUCTION).count(), 1);

        assert!(prompt_listen_addr(&b"127.0.0.1\n"[..], Vec::new()).is_err());
    }
}
