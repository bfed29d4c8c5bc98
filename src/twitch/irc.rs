//! Twitch IRC message parsing and line codec.

use std::collections::HashMap;

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Decoder, Encoder, Framed};

use crate::common::error::PlatformError;
use crate::common::EmoteRange;

/// Twitch drops lines longer than this.
const MAX_LINE_LENGTH: usize = 8 * 1024;

/// A single IRC line with IRCv3 tags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IrcMessage {
    pub tags: HashMap<String, String>,
    /// `nick!user@host` or server name, without the leading `:`.
    pub prefix: Option<String>,
    pub command: String,
    pub params: Vec<String>,
}

impl IrcMessage {
    /// Build an outgoing message.
    pub fn new<S: AsRef<str>>(command: &str, params: &[S]) -> Self {
        Self {
            command: command.to_string(),
            params: params.iter().map(|p| p.as_ref().to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn privmsg(channel: &str, text: &str) -> Self {
        Self::new("PRIVMSG", &[format!("#{}", channel).as_str(), text])
    }

    /// Parse one line, without its line terminator.
    pub fn parse(line: &str) -> Result<Self, PlatformError> {
        let mut rest = line;
        let mut message = IrcMessage::default();

        if let Some(tagged) = rest.strip_prefix('@') {
            let (tags, tail) = tagged.split_once(' ').ok_or_else(|| malformed(line))?;
            message.tags = parse_tags(tags);
            rest = tail.trim_start_matches(' ');
        }

        if let Some(prefixed) = rest.strip_prefix(':') {
            let (prefix, tail) = prefixed.split_once(' ').ok_or_else(|| malformed(line))?;
            message.prefix = Some(prefix.to_string());
            rest = tail.trim_start_matches(' ');
        }

        let (command, mut params) = match rest.split_once(' ') {
            Some((command, params)) => (command, params),
            None => (rest, ""),
        };
        if command.is_empty() {
            return Err(malformed(line));
        }
        message.command = command.to_ascii_uppercase();

        while !params.is_empty() {
            if let Some(trailing) = params.strip_prefix(':') {
                message.params.push(trailing.to_string());
                break;
            }
            match params.split_once(' ') {
                Some((param, tail)) => {
                    if !param.is_empty() {
                        message.params.push(param.to_string());
                    }
                    params = tail;
                }
                None => {
                    message.params.push(params.to_string());
                    break;
                }
            }
        }

        Ok(message)
    }

    pub fn tag(&self, name: &str) -> Option<&str> {
        self.tags.get(name).map(String::as_str).filter(|v| !v.is_empty())
    }

    /// Nickname part of the prefix.
    pub fn nick(&self) -> Option<&str> {
        let prefix = self.prefix.as_deref()?;
        prefix.split('!').next().filter(|nick| !nick.is_empty())
    }

    /// Last parameter, the message body for PRIVMSG.
    pub fn trailing(&self) -> Option<&str> {
        self.params.last().map(String::as_str)
    }

    /// Serialize without tags or line terminator.
    pub fn to_line(&self) -> String {
        let mut line = self.command.clone();
        if let Some((last, middle)) = self.params.split_last() {
            for param in middle {
                line.push(' ');
                line.push_str(param);
            }
            line.push(' ');
            if last.is_empty() || last.contains(' ') || last.starts_with(':') {
                line.push(':');
            }
            line.push_str(last);
        }
        line
    }
}

fn malformed(line: &str) -> PlatformError {
    PlatformError::Irc {
        message: format!("malformed line: {}", line),
    }
}

fn parse_tags(raw: &str) -> HashMap<String, String> {
    raw.split(';')
        .filter(|tag| !tag.is_empty())
        .map(|tag| match tag.split_once('=') {
            Some((key, value)) => (key.to_string(), unescape_tag_value(value)),
            None => (tag.to_string(), String::new()),
        })
        .collect()
}

fn unescape_tag_value(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            result.push(c);
            continue;
        }
        match chars.next() {
            Some(':') => result.push(';'),
            Some('s') => result.push(' '),
            Some('r') => result.push('\r'),
            Some('n') => result.push('\n'),
            Some(other) => result.push(other),
            None => {}
        }
    }
    result
}

/// Parse the `emotes` tag: `id:start-end,start-end/id:start-end`.
///
/// Malformed entries are skipped.
pub fn parse_emotes_tag(value: &str) -> Vec<EmoteRange> {
    let mut ranges = Vec::new();

    for emote in value.split('/').filter(|e| !e.is_empty()) {
        let Some((emote_id, positions)) = emote.split_once(':') else {
            continue;
        };
        for position in positions.split(',') {
            let Some((start, end)) = position.split_once('-') else {
                continue;
            };
            if let (Ok(start), Ok(end)) = (start.parse(), end.parse()) {
                ranges.push(EmoteRange {
                    emote_id: emote_id.to_string(),
                    start,
                    end,
                });
            }
        }
    }

    ranges
}

/// Line codec for the Twitch IRC connection.
#[derive(Debug, Default)]
pub struct IrcCodec {
    /// Bytes already scanned for a line terminator.
    scanned: usize,
}

impl Decoder for IrcCodec {
    type Item = IrcMessage;
    type Error = PlatformError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let Some(offset) = src[self.scanned..].iter().position(|b| *b == b'\n') else {
                if src.len() > MAX_LINE_LENGTH {
                    return Err(PlatformError::Irc {
                        message: format!("line exceeds {} bytes", MAX_LINE_LENGTH),
                    });
                }
                self.scanned = src.len();
                return Ok(None);
            };

            let line = src.split_to(self.scanned + offset + 1);
            self.scanned = 0;

            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\r', '\n']);
            if line.is_empty() {
                continue;
            }
            return IrcMessage::parse(line).map(Some);
        }
    }
}

impl Encoder<IrcMessage> for IrcCodec {
    type Error = PlatformError;

    fn encode(&mut self, item: IrcMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let line = item.to_line();
        if line.contains(['\r', '\n']) {
            return Err(PlatformError::Irc {
                message: "outgoing line contains a line break".to_string(),
            });
        }

        dst.reserve(line.len() + 2);
        dst.put_slice(line.as_bytes());
        dst.put_slice(b"\r\n");
        Ok(())
    }
}

/// A framed IRC connection.
pub type IrcConnection<S> = Framed<S, IrcCodec>;

pub fn new_irc_connection<S: AsyncRead + AsyncWrite>(stream: S) -> IrcConnection<S> {
    Framed::new(stream, IrcCodec::default())
}
