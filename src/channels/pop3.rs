//! Minimal blocking POP3 client.
//!
//! Covers exactly the commands the email channel needs: USER/PASS, UIDL,
//! RETR, DELE, QUIT. Protocol errors (`-ERR` responses, truncated
//! streams) surface as `io::Error`.

use std::io::{self, BufRead, BufReader, Write};
use std::net::TcpStream;
use std::time::Duration;

use tracing::debug;

/// One POP3 session. Dropped connections are not re-established; callers
/// open a fresh session per mailbox operation.
pub struct Pop3Client {
    reader: BufReader<TcpStream>,
}

impl Pop3Client {
    /// Connect and consume the server greeting.
    pub fn connect(host: &str, port: u16, read_timeout: Duration) -> io::Result<Self> {
        debug!(host, port, "Opening POP3 session");
        let stream = TcpStream::connect((host, port))?;
        stream.set_read_timeout(Some(read_timeout))?;
        let mut client = Self {
            reader: BufReader::new(stream),
        };
        client.read_status()?;
        Ok(client)
    }

    /// Authenticate with USER/PASS.
    pub fn login(&mut self, user: &str, pass: &str) -> io::Result<()> {
        self.command(&format!("USER {user}"))?;
        self.command(&format!("PASS {pass}"))?;
        Ok(())
    }

    /// List `(message number, unique id)` pairs for the whole mailbox.
    pub fn uidl(&mut self) -> io::Result<Vec<(String, String)>> {
        self.command("UIDL")?;
        let mut entries = Vec::new();
        for line in self.read_multiline()? {
            match parse_uidl_line(&line) {
                Some(entry) => entries.push(entry),
                None => {
                    return Err(io::Error::other(format!("malformed UIDL line: {line}")));
                }
            }
        }
        Ok(entries)
    }

    /// Retrieve the full raw mail as bytes, CRLF line endings.
    pub fn retr(&mut self, number: &str) -> io::Result<Vec<u8>> {
        self.command(&format!("RETR {number}"))?;
        let lines = self.read_multiline()?;
        Ok(lines.join("\r\n").into_bytes())
    }

    /// Mark a message for deletion on the server.
    pub fn dele(&mut self, number: &str) -> io::Result<()> {
        self.command(&format!("DELE {number}"))?;
        Ok(())
    }

    /// End the session, committing pending deletions.
    pub fn quit(mut self) -> io::Result<()> {
        self.command("QUIT")?;
        Ok(())
    }

    fn command(&mut self, cmd: &str) -> io::Result<String> {
        let stream = self.reader.get_mut();
        stream.write_all(cmd.as_bytes())?;
        stream.write_all(b"\r\n")?;
        stream.flush()?;
        self.read_status()
    }

    fn read_status(&mut self) -> io::Result<String> {
        let line = self.read_line()?;
        if line.starts_with("+OK") {
            Ok(line)
        } else {
            Err(io::Error::other(format!("POP3 server replied: {line}")))
        }
    }

    fn read_line(&mut self) -> io::Result<String> {
        let mut line = String::new();
        let read = self.reader.read_line(&mut line)?;
        if read == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "POP3 connection closed",
            ));
        }
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Ok(line)
    }

    /// Read a multiline response body up to the lone-dot terminator.
    fn read_multiline(&mut self) -> io::Result<Vec<String>> {
        let mut lines = Vec::new();
        loop {
            let line = self.read_line()?;
            if line == "." {
                return Ok(lines);
            }
            lines.push(unstuff(line));
        }
    }
}

/// Split a `UIDL` listing line into `(message number, unique id)`.
fn parse_uidl_line(line: &str) -> Option<(String, String)> {
    let mut parts = line.split_whitespace();
    let number = parts.next()?;
    let uid = parts.next()?;
    Some((number.to_string(), uid.to_string()))
}

/// Undo POP3 byte-stuffing: a content line starting with `.` is sent
/// with an extra leading dot.
fn unstuff(line: String) -> String {
    match line.strip_prefix('.') {
        Some(rest) => rest.to_string(),
        None => line,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uidl_line_splits_number_and_uid() {
        assert_eq!(
            parse_uidl_line("1 00000010506477be"),
            Some(("1".into(), "00000010506477be".into()))
        );
    }

    #[test]
    fn uidl_line_without_uid_is_rejected() {
        assert_eq!(parse_uidl_line("1"), None);
        assert_eq!(parse_uidl_line(""), None);
    }

    #[test]
    fn unstuff_strips_one_leading_dot() {
        assert_eq!(unstuff("..hidden".into()), ".hidden");
        assert_eq!(unstuff(".x".into()), "x");
        assert_eq!(unstuff("plain".into()), "plain");
    }
}
