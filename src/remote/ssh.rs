//! `ssh2`-backed implementation of the session abstraction.

use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use camino::Utf8Path;
use ssh2::Session;

use super::StreamKind;
use super::session::{DialError, Endpoint, RemoteSession, SessionDialer, SessionError};
use crate::server::Credential;

const CHUNK_SIZE: usize = 4096;

/// Dialer opening SSH sessions with password or key-file authentication.
#[derive(Clone, Copy, Debug)]
pub struct SshDialer {
    /// TCP connect timeout applied to each attempt.
    pub connect_timeout: Duration,
    /// Blocking-read timeout applied to established sessions.
    pub io_timeout: Duration,
}

impl Default for SshDialer {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            io_timeout: Duration::from_secs(120),
        }
    }
}

fn classify_connect_error(err: &std::io::Error) -> DialError {
    match err.kind() {
        ErrorKind::ConnectionRefused => DialError::Refused,
        ErrorKind::TimedOut | ErrorKind::WouldBlock => DialError::TimedOut,
        _ => DialError::Fatal {
            message: err.to_string(),
        },
    }
}

fn fatal(err: impl std::fmt::Display) -> DialError {
    DialError::Fatal {
        message: err.to_string(),
    }
}

fn session_err(err: impl std::fmt::Display) -> SessionError {
    SessionError::new(err.to_string())
}

impl SessionDialer for SshDialer {
    fn dial(
        &self,
        endpoint: &Endpoint,
        credential: &Credential,
    ) -> Result<Box<dyn RemoteSession>, DialError> {
        let addr = SocketAddr::new(endpoint.host, endpoint.port);
        let tcp = TcpStream::connect_timeout(&addr, self.connect_timeout)
            .map_err(|err| classify_connect_error(&err))?;
        let mut session = Session::new().map_err(fatal)?;
        session.set_tcp_stream(tcp);
        session.handshake().map_err(fatal)?;
        let timeout_ms = u32::try_from(self.io_timeout.as_millis()).unwrap_or(u32::MAX);
        session.set_timeout(timeout_ms);
        let auth = match credential {
            Credential::Password(password) => {
                session.userauth_password(&endpoint.user, password)
            }
            Credential::KeyFile(path) => {
                session.userauth_pubkey_file(&endpoint.user, None, path.as_std_path(), None)
            }
        };
        auth.map_err(|err| DialError::AuthFailed {
            message: err.to_string(),
        })?;
        if !session.authenticated() {
            return Err(DialError::AuthFailed {
                message: String::from("transport accepted no credential"),
            });
        }
        Ok(Box::new(SshSession { session }))
    }
}

struct SshSession {
    session: Session,
}

impl RemoteSession for SshSession {
    fn run(
        &mut self,
        command: &str,
        on_chunk: &mut dyn FnMut(StreamKind, &str),
    ) -> Result<(), SessionError> {
        let mut channel = self.session.channel_session().map_err(session_err)?;
        channel.exec(command).map_err(session_err)?;

        let mut buffer = [0_u8; CHUNK_SIZE];
        loop {
            let read = channel.read(&mut buffer).map_err(session_err)?;
            if read == 0 {
                break;
            }
            let chunk = buffer.get(..read).unwrap_or_default();
            on_chunk(StreamKind::Stdout, &String::from_utf8_lossy(chunk));
        }
        loop {
            let read = channel.stderr().read(&mut buffer).map_err(session_err)?;
            if read == 0 {
                break;
            }
            let chunk = buffer.get(..read).unwrap_or_default();
            on_chunk(StreamKind::Stderr, &String::from_utf8_lossy(chunk));
        }
        channel.wait_close().ok();
        Ok(())
    }

    fn run_shell(
        &mut self,
        input: &[String],
        on_chunk: &mut dyn FnMut(StreamKind, &str) -> Option<String>,
    ) -> Result<(), SessionError> {
        let mut channel = self.session.channel_session().map_err(session_err)?;
        channel
            .request_pty("xterm", None, None)
            .map_err(session_err)?;
        channel.shell().map_err(session_err)?;

        for line in input {
            channel.write_all(line.as_bytes()).map_err(session_err)?;
            channel.write_all(b"\n").map_err(session_err)?;
        }
        channel.write_all(b"exit\n").map_err(session_err)?;

        let mut buffer = [0_u8; CHUNK_SIZE];
        loop {
            let read = channel.read(&mut buffer).map_err(session_err)?;
            if read == 0 {
                break;
            }
            let raw = buffer.get(..read).unwrap_or_default();
            let chunk = String::from_utf8_lossy(raw);
            if let Some(reply) = on_chunk(StreamKind::Stdout, &chunk) {
                channel.write_all(reply.as_bytes()).map_err(session_err)?;
                channel.write_all(b"\n").map_err(session_err)?;
            }
        }
        channel.wait_close().ok();
        Ok(())
    }

    fn upload(&mut self, local: &Utf8Path, remote: &Utf8Path) -> Result<(), SessionError> {
        let contents = std::fs::read(local.as_std_path())
            .map_err(|err| SessionError::new(format!("failed to read {local}: {err}")))?;
        let size = u64::try_from(contents.len())
            .map_err(|_| SessionError::new(format!("{local} is too large to upload")))?;
        let mut remote_file = self
            .session
            .scp_send(remote.as_std_path(), 0o644, size, None)
            .map_err(session_err)?;
        remote_file.write_all(&contents).map_err(session_err)?;
        remote_file.send_eof().ok();
        remote_file.wait_eof().ok();
        remote_file.close().ok();
        remote_file.wait_close().ok();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refused_connections_are_retryable() {
        let err = std::io::Error::from(ErrorKind::ConnectionRefused);
        assert_eq!(classify_connect_error(&err), DialError::Refused);
    }

    #[test]
    fn timeouts_are_retryable() {
        let err = std::io::Error::from(ErrorKind::TimedOut);
        assert_eq!(classify_connect_error(&err), DialError::TimedOut);
    }

    #[test]
    fn other_io_errors_are_fatal() {
        let err = std::io::Error::from(ErrorKind::PermissionDenied);
        assert!(matches!(
            classify_connect_error(&err),
            DialError::Fatal { .. }
        ));
    }
}
