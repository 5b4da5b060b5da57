//! Encoding of the two built-in outbound commands.
//!
//! Unlike server-to-client traffic, commands sent by the client are plain
//! ASCII lines terminated by `\n` (see spec on the wire protocol's client
//! direction); there is no binary framing to apply. Additional commands
//! beyond `init`/`ping` are a mechanical extension of the same pattern
//! and are intentionally out of scope here.

use std::io::{self, Write};

/// A command ready to be handed to the write queue.
pub trait Encode {
    fn encode(&self, writer: &mut impl Write) -> io::Result<()>;
}

/// `init [password=<password>]\n`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitCommand<'a> {
    pub password: Option<&'a str>,
}

impl Encode for InitCommand<'_> {
    fn encode(&self, writer: &mut impl Write) -> io::Result<()> {
        match self.password {
            Some(password) => write!(writer, "init password={password}\n"),
            None => write!(writer, "init\n"),
        }
    }
}

/// `ping <hex-id> [<text>]\n`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingCommand<'a> {
    pub id: u32,
    pub text: Option<&'a str>,
}

impl Encode for PingCommand<'_> {
    fn encode(&self, writer: &mut impl Write) -> io::Result<()> {
        match self.text {
            Some(text) => write!(writer, "ping {:x} {text}\n", self.id),
            None => write!(writer, "ping {:x}\n", self.id),
        }
    }
}

pub fn encode_to_vec(cmd: &impl Encode) -> Vec<u8> {
    let mut out = Vec::new();
    cmd.encode(&mut out).expect("writing to a Vec is infallible");
    out
}
