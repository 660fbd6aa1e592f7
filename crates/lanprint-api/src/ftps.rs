// FTPS file channel to a printer's storage.
//
// Printers run an implicit-TLS FTP server on port 990 that only speaks
// passive mode and requires a protected data channel. The control dialogue
// is plain RFC 959 framing over whatever stream we hand it, so it can be
// exercised against scripted IO in tests.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rustls::ClientConfig;
use rustls::pki_types::ServerName;
use secrecy::ExposeSecret;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, trace};

use crate::error::Error;
use crate::link::{Endpoint, ProgressFn, TransferProgress, TransportSecurity, Uploader};
use crate::tls;

const IMPLICIT_TLS_PORT: u16 = 990;
const PLAIN_PORT: u16 = 21;
const CHUNK_SIZE: usize = 64 * 1024;

/// Any stream the control or data channel can run over.
trait FtpStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> FtpStream for T {}

type BoxedStream = Box<dyn FtpStream>;

// ── Uploader ─────────────────────────────────────────────────────────

/// Uploads files over (implicit) FTPS.
#[derive(Debug, Clone)]
pub struct FtpsUploader {
    connect_timeout: Duration,
    port: Option<u16>,
}

impl FtpsUploader {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            port: None,
        }
    }

    /// Override the control port (990 with TLS, 21 without).
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    async fn dial(&self, addr: SocketAddr) -> Result<TcpStream, Error> {
        tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| Error::Timeout {
                operation: "FTP connect",
                timeout_secs: self.connect_timeout.as_secs(),
            })?
            .map_err(|e| Error::Connect {
                address: addr.to_string(),
                reason: e.to_string(),
            })
    }
}

impl Default for FtpsUploader {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

/// TLS parameters shared by the control and data connections.
struct Secure {
    config: Arc<ClientConfig>,
    server_name: ServerName<'static>,
}

impl Secure {
    async fn wrap(&self, tcp: TcpStream) -> Result<BoxedStream, Error> {
        let stream = TlsConnector::from(Arc::clone(&self.config))
            .connect(self.server_name.clone(), tcp)
            .await
            .map_err(|e| Error::Tls(format!("FTPS handshake failed: {e}")))?;
        Ok(Box::new(stream))
    }
}

#[async_trait]
impl Uploader for FtpsUploader {
    async fn upload(
        &self,
        endpoint: &Endpoint,
        local_path: &Path,
        remote_name: &str,
        progress: Option<ProgressFn>,
    ) -> Result<u64, Error> {
        let mut file = tokio::fs::File::open(local_path).await?;
        let total = file.metadata().await?.len();

        let (secure, port) = match &endpoint.security {
            TransportSecurity::Tls(mode) => (
                Some(Secure {
                    config: tls::client_config(mode, &endpoint.device_id)?,
                    server_name: tls::server_name(&endpoint.address)?,
                }),
                IMPLICIT_TLS_PORT,
            ),
            TransportSecurity::Plain => (None, PLAIN_PORT),
        };

        let addr = resolve(&endpoint.address, self.port.unwrap_or(port)).await?;
        debug!(
            device_id = %endpoint.device_id,
            %addr,
            remote = remote_name,
            bytes = total,
            "starting upload"
        );

        let tcp = self.dial(addr).await?;
        let stream: BoxedStream = match &secure {
            Some(s) => s.wrap(tcp).await?,
            None => Box::new(tcp),
        };

        let mut ctl = Control::new(stream);
        ctl.expect_greeting().await?;
        ctl.login(&endpoint.username, endpoint.password.expose_secret())
            .await?;
        if secure.is_some() {
            ctl.protect_data().await?;
        }
        ctl.prepare(remote_name).await?;

        // Passive replies often carry a NAT'd address; always dial the
        // host we already reached.
        let data_port = ctl.passive().await?;
        let data_tcp = self.dial(SocketAddr::new(addr.ip(), data_port)).await?;

        ctl.begin_store(remote_name).await?;
        let mut data: BoxedStream = match &secure {
            Some(s) => s.wrap(data_tcp).await?,
            None => Box::new(data_tcp),
        };

        let sent = copy_with_progress(&mut file, &mut data, total, progress.as_ref()).await?;
        data.shutdown().await?;
        drop(data);

        ctl.finish_store().await?;
        ctl.quit().await;

        debug!(
            device_id = %endpoint.device_id,
            remote = remote_name,
            bytes = sent,
            "upload complete"
        );
        Ok(sent)
    }
}

async fn resolve(host: &str, port: u16) -> Result<SocketAddr, Error> {
    tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| Error::Connect {
            address: host.to_owned(),
            reason: e.to_string(),
        })?
        .next()
        .ok_or_else(|| Error::Connect {
            address: host.to_owned(),
            reason: "host did not resolve".into(),
        })
}

/// Copy `src` to `dst` in fixed chunks, reporting after each one.
async fn copy_with_progress<R, W>(
    src: &mut R,
    dst: &mut W,
    total: u64,
    progress: Option<&ProgressFn>,
) -> Result<u64, Error>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut sent: u64 = 0;

    loop {
        let n = src.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        dst.write_all(&buf[..n]).await?;
        sent += n as u64;
        if let Some(cb) = progress {
            cb(TransferProgress { sent, total });
        }
    }
    dst.flush().await?;
    Ok(sent)
}

// ── Control dialogue ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
struct Reply {
    code: u16,
    text: String,
}

impl Reply {
    fn into_error(self) -> Error {
        Error::Ftp {
            code: self.code,
            message: self.text,
        }
    }
}

struct Control<S> {
    stream: BufReader<S>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Control<S> {
    fn new(stream: S) -> Self {
        Self {
            stream: BufReader::new(stream),
        }
    }

    async fn send(&mut self, line: &str) -> Result<Reply, Error> {
        if line.starts_with("PASS ") {
            trace!("> PASS ****");
        } else {
            trace!("> {line}");
        }
        let inner = self.stream.get_mut();
        inner.write_all(line.as_bytes()).await?;
        inner.write_all(b"\r\n").await?;
        inner.flush().await?;
        self.read_reply().await
    }

    async fn read_reply(&mut self) -> Result<Reply, Error> {
        let first = self.read_line().await?;
        let (code, sep, text) = split_reply_line(&first)?;

        let mut text = text.to_owned();
        if sep == '-' {
            // Multi-line: runs until a line that starts with "<code> ".
            let terminator = format!("{code} ");
            loop {
                let line = self.read_line().await?;
                if let Some(rest) = line.strip_prefix(&terminator) {
                    text.push('\n');
                    text.push_str(rest);
                    break;
                }
                text.push('\n');
                text.push_str(line.trim_start());
            }
        }

        trace!(code, "< {text}");
        Ok(Reply { code, text })
    }

    async fn read_line(&mut self) -> Result<String, Error> {
        let mut line = String::new();
        let n = self.stream.read_line(&mut line).await?;
        if n == 0 {
            return Err(Error::ChannelClosed);
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_owned())
    }

    async fn expect(&mut self, line: &str, ok: &[u16]) -> Result<Reply, Error> {
        let reply = self.send(line).await?;
        if ok.contains(&reply.code) {
            Ok(reply)
        } else {
            Err(reply.into_error())
        }
    }

    async fn expect_greeting(&mut self) -> Result<(), Error> {
        let reply = self.read_reply().await?;
        if reply.code == 220 {
            Ok(())
        } else {
            Err(reply.into_error())
        }
    }

    async fn login(&mut self, user: &str, password: &str) -> Result<(), Error> {
        let reply = self.expect(&format!("USER {user}"), &[230, 331]).await?;
        if reply.code == 331 {
            self.expect(&format!("PASS {password}"), &[230, 202]).await?;
        }
        Ok(())
    }

    async fn protect_data(&mut self) -> Result<(), Error> {
        self.expect("PBSZ 0", &[200]).await?;
        self.expect("PROT P", &[200]).await?;
        Ok(())
    }

    /// Binary mode, then drop any stale copy of `remote`.
    async fn prepare(&mut self, remote: &str) -> Result<(), Error> {
        self.expect("TYPE I", &[200]).await?;
        let reply = self.send(&format!("DELE {remote}")).await?;
        if reply.code != 250 {
            trace!(code = reply.code, "no previous file to delete");
        }
        Ok(())
    }

    async fn passive(&mut self) -> Result<u16, Error> {
        let reply = self.expect("PASV", &[227]).await?;
        parse_pasv_port(&reply.text)
    }

    async fn begin_store(&mut self, remote: &str) -> Result<(), Error> {
        self.expect(&format!("STOR {remote}"), &[125, 150]).await?;
        Ok(())
    }

    async fn finish_store(&mut self) -> Result<(), Error> {
        let reply = self.read_reply().await?;
        if matches!(reply.code, 226 | 250) {
            Ok(())
        } else {
            Err(reply.into_error())
        }
    }

    /// Best effort; the upload already succeeded.
    async fn quit(&mut self) {
        if let Err(e) = self.send("QUIT").await {
            trace!(error = %e, "QUIT failed");
        }
    }
}

fn split_reply_line(line: &str) -> Result<(u16, char, &str), Error> {
    let invalid = || Error::InvalidResponse(format!("malformed FTP reply: {line:?}"));

    let code = line
        .get(..3)
        .and_then(|c| c.parse::<u16>().ok())
        .ok_or_else(invalid)?;
    let sep = line[3..].chars().next().unwrap_or(' ');
    if sep != ' ' && sep != '-' {
        return Err(invalid());
    }
    let text = line.get(4..).unwrap_or("");
    Ok((code, sep, text))
}

/// Extract the port from `227 Entering Passive Mode (h1,h2,h3,h4,p1,p2)`.
fn parse_pasv_port(text: &str) -> Result<u16, Error> {
    let invalid = || Error::InvalidResponse(format!("malformed PASV reply: {text:?}"));

    let start = text.find('(').ok_or_else(invalid)?;
    let end = text[start..].find(')').ok_or_else(invalid)? + start;
    let fields: Vec<u16> = text[start + 1..end]
        .split(',')
        .map(|f| f.trim().parse::<u16>())
        .collect::<Result<_, _>>()
        .map_err(|_| invalid())?;

    match fields.as_slice() {
        [_, _, _, _, p1, p2] if *p1 <= 255 && *p2 <= 255 => Ok(p1 * 256 + p2),
        _ => Err(invalid()),
    }
}
