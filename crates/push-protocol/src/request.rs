use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use crate::error::FrameError;

/// A parsed `sub <key> <mid> [<heartbeat_sec>] [<token>]` TCP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeRequest {
    pub key: String,
    pub mid: i64,
    pub heartbeat_sec: Option<u64>,
    pub token: Option<String>,
}

impl SubscribeRequest {
    /// Interprets already-split command arguments (`args[0]` is the command
    /// name, e.g. `"sub"`). Returns [`FrameError::UnknownCommand`] for
    /// anything but `sub`, [`FrameError::MissingArguments`] when key or mid
    /// is absent.
    pub fn parse(args: &[String]) -> Result<Self, FrameError> {
        let Some(command) = args.first() else {
            return Err(FrameError::MissingArguments { min: 1, got: 0 });
        };
        if command != "sub" {
            return Err(FrameError::UnknownCommand(command.clone()));
        }
        if args.len() < 3 {
            return Err(FrameError::MissingArguments {
                min: 3,
                got: args.len(),
            });
        }
        let key = args[1].clone();
        let mid: i64 = args[2]
            .parse()
            .map_err(|_| FrameError::InvalidMessageId(args[2].clone()))?;
        let heartbeat_sec = match args.get(3) {
            Some(raw) if !raw.is_empty() => Some(
                raw.parse()
                    .map_err(|_| FrameError::InvalidHeartbeat(raw.clone()))?,
            ),
            _ => None,
        };
        let token = args.get(4).filter(|t| !t.is_empty()).cloned();
        Ok(Self {
            key,
            mid,
            heartbeat_sec,
            token,
        })
    }
}

/// Reads one `*<argc>\r\n$<len>\r\n<arg>\r\n...` request from `reader` and
/// returns the decoded argument strings, in order (`args[0]` is the command).
pub async fn read_request_args<R>(reader: &mut R) -> Result<Vec<String>, FrameError>
where
    R: AsyncBufRead + AsyncReadExt + Unpin,
{
    let argc = read_size_line(reader, b'*').await?;
    let mut args = Vec::with_capacity(argc);
    for _ in 0..argc {
        let len = read_size_line(reader, b'$').await?;
        let mut buf = vec![0u8; len];
        reader.read_exact(&mut buf).await?;
        let mut crlf = [0u8; 2];
        reader.read_exact(&mut crlf).await?;
        if crlf != *b"\r\n" {
            return Err(FrameError::LengthMismatch {
                declared: len,
                actual: buf.len(),
            });
        }
        let arg = String::from_utf8(buf).map_err(|_| FrameError::InvalidUtf8)?;
        args.push(arg);
    }
    Ok(args)
}

async fn read_size_line<R>(reader: &mut R, prefix: u8) -> Result<usize, FrameError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    let n = reader.read_until(b'\n', &mut line).await?;
    if n == 0 {
        return Err(FrameError::UnexpectedEof);
    }
    if line.last() != Some(&b'\n') || line.len() < 2 || line[line.len() - 2] != b'\r' {
        return Err(FrameError::InvalidLength(
            "size line missing CRLF terminator".to_owned(),
        ));
    }
    let body = &line[..line.len() - 2];
    let Some((&found, rest)) = body.split_first() else {
        return Err(FrameError::UnexpectedEof);
    };
    if found != prefix {
        return Err(FrameError::InvalidPrefix {
            expected: prefix as char,
            found: found as char,
        });
    }
    std::str::from_utf8(rest)
        .map_err(|_| FrameError::InvalidUtf8)?
        .parse()
        .map_err(|e| FrameError::InvalidLength(format!("{e}")))
}
