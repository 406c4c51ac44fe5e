use rdt_abstract::ProtocolKind;

pub const QUIT_REPLY: &str = "Good bye!";

/// What the server does with one datagram on its listening socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    /// Reply with the current time.
    Time,
    /// Reply with a farewell.
    Quit,
    /// Run the engine as responder towards the requester. No text reply.
    Test(ProtocolKind),
    /// Anything else comes back trimmed. Empty text gets no reply.
    Echo(String),
}

impl Instruction {
    pub fn parse(datagram: &[u8]) -> Self {
        let text = String::from_utf8_lossy(datagram);
        let text = text.trim();
        match text {
            "-time" => Instruction::Time,
            "-quit" => Instruction::Quit,
            other => match ProtocolKind::from_instruction(other) {
                Some(kind) => Instruction::Test(kind),
                None => Instruction::Echo(other.to_owned()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_lookup_is_on_trimmed_text() {
        assert_eq!(Instruction::parse(b"-time"), Instruction::Time);
        assert_eq!(Instruction::parse(b"  -quit\r\n"), Instruction::Quit);
        assert_eq!(
            Instruction::parse(b"-testgbn "),
            Instruction::Test(ProtocolKind::Gbn)
        );
        assert_eq!(
            Instruction::parse(b"-testsr"),
            Instruction::Test(ProtocolKind::Sr)
        );
    }

    #[test]
    fn unknown_text_is_echoed() {
        assert_eq!(
            Instruction::parse(b"  hello world \n"),
            Instruction::Echo("hello world".into())
        );
        assert_eq!(Instruction::parse(b"-TIME"), Instruction::Echo("-TIME".into()));
        assert_eq!(Instruction::parse(b"   "), Instruction::Echo(String::new()));
    }
}
