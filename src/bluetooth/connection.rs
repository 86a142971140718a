use std::os::fd::{FromRawFd, IntoRawFd, OwnedFd};
use std::time::Duration;

use async_trait::async_trait;
use bluer::Address;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tracing::{debug, info, warn};

use super::transport::Transport;
use crate::error::TransportError;
use crate::protocol::commands::{DEFAULT_RFCOMM_CHANNEL, SPP_UUID};
use crate::protocol::frame::hex;

// Bluetooth socket constants (from Linux kernel headers)
const AF_BLUETOOTH: libc::c_int = 31;
const BTPROTO_RFCOMM: libc::c_int = 3;

/// sockaddr_rc: RFCOMM socket address (from <bluetooth/rfcomm.h>)
#[repr(C)]
struct SockaddrRc {
    rc_family: u16,
    rc_bdaddr: [u8; 6], // Bluetooth address in little-endian
    rc_channel: u8,
}

/// Find the RFCOMM channel of the speaker's serial port service.
///
/// Uses the configured channel if any, then `sdptool`, then the well-known default.
pub async fn resolve_channel(address: Address, configured: Option<u8>) -> u8 {
    if let Some(channel) = configured {
        return channel;
    }
    match sdp_lookup(address).await {
        Some(channel) => {
            debug!("SDP reports SPP ({}) on channel {}", SPP_UUID, channel);
            channel
        }
        None => {
            warn!(
                "SDP lookup failed, using default RFCOMM channel {}",
                DEFAULT_RFCOMM_CHANNEL
            );
            DEFAULT_RFCOMM_CHANNEL
        }
    }
}

async fn sdp_lookup(address: Address) -> Option<u8> {
    let output = tokio::time::timeout(
        Duration::from_secs(10),
        tokio::process::Command::new("sdptool")
            .args(["search", "--bdaddr", &address.to_string(), "SP"])
            .output(),
    )
    .await
    .ok()?
    .ok()?;
    parse_sdp_channel(&String::from_utf8_lossy(&output.stdout))
}

fn parse_sdp_channel(stdout: &str) -> Option<u8> {
    stdout
        .lines()
        .map(str::trim)
        .find_map(|line| line.strip_prefix("Channel:"))
        .and_then(|rest| rest.trim().parse().ok())
}

/// RFCOMM connection to a speaker's LWACP service.
/// Uses a raw blocking socket for connect, then wraps it in tokio async I/O.
pub struct RfcommConnection {
    stream: UnixStream,
    send_timeout: Duration,
}

impl RfcommConnection {
    /// Connect on the given channel. Blocks until the RFCOMM DLC handshake completes.
    pub async fn connect(
        address: Address,
        channel: u8,
        send_timeout: Duration,
    ) -> Result<Self, TransportError> {
        info!("Connecting to {} on RFCOMM channel {}", address, channel);

        let addr_bytes = address.0; // [u8; 6] in big-endian
        let timeout_secs = send_timeout.as_secs().max(1) as libc::time_t;

        let fd = tokio::task::spawn_blocking(move || -> Result<OwnedFd, TransportError> {
            unsafe {
                let fd = libc::socket(AF_BLUETOOTH, libc::SOCK_STREAM, BTPROTO_RFCOMM);
                if fd < 0 {
                    return Err(TransportError::Io(std::io::Error::last_os_error()));
                }
                let fd = OwnedFd::from_raw_fd(fd);
                let raw = std::os::fd::AsRawFd::as_raw_fd(&fd);

                let timeout = libc::timeval {
                    tv_sec: timeout_secs,
                    tv_usec: 0,
                };
                for opt in [libc::SO_SNDTIMEO, libc::SO_RCVTIMEO] {
                    libc::setsockopt(
                        raw,
                        libc::SOL_SOCKET,
                        opt,
                        &timeout as *const _ as *const libc::c_void,
                        std::mem::size_of::<libc::timeval>() as libc::socklen_t,
                    );
                }

                let mut rc_bdaddr = addr_bytes;
                rc_bdaddr.reverse(); // Big-endian -> little-endian for BlueZ
                let addr = SockaddrRc {
                    rc_family: AF_BLUETOOTH as u16,
                    rc_bdaddr,
                    rc_channel: channel,
                };

                let ret = libc::connect(
                    raw,
                    &addr as *const _ as *const libc::sockaddr,
                    std::mem::size_of::<SockaddrRc>() as libc::socklen_t,
                );
                if ret < 0 {
                    let err = std::io::Error::last_os_error();
                    return Err(TransportError::Connect(format!(
                        "RFCOMM channel {}: {}",
                        channel, err
                    )));
                }

                // Non-blocking for tokio async I/O
                let flags = libc::fcntl(raw, libc::F_GETFL);
                libc::fcntl(raw, libc::F_SETFL, flags | libc::O_NONBLOCK);

                Ok(fd)
            }
        })
        .await
        .map_err(|e| TransportError::Connect(format!("connect task failed: {}", e)))??;

        // UnixStream is only an AsyncFd wrapper; it works for any stream socket
        let std_stream = unsafe { std::os::unix::net::UnixStream::from_raw_fd(fd.into_raw_fd()) };
        let stream = UnixStream::from_std(std_stream)?;

        info!("Connected to {} on RFCOMM channel {}", address, channel);
        Ok(Self {
            stream,
            send_timeout,
        })
    }
}

#[async_trait]
impl Transport for RfcommConnection {
    async fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        debug!("TX: {}", hex::spaced(bytes));
        let limit = self.send_timeout;
        let stream = &mut self.stream;
        let write = async {
            stream.write_all(bytes).await?;
            stream.flush().await
        };
        match tokio::time::timeout(limit, write).await {
            Ok(result) => result.map_err(TransportError::from),
            Err(_) => Err(TransportError::Timeout(limit)),
        }
    }

    async fn receive(&mut self, deadline: Duration) -> Result<Option<Vec<u8>>, TransportError> {
        let mut buf = [0u8; 1024];
        match tokio::time::timeout(deadline, self.stream.read(&mut buf)).await {
            Err(_) => Ok(None),
            Ok(Ok(0)) => Err(TransportError::Closed),
            Ok(Ok(n)) => {
                debug!("RX: {}", hex::spaced(&buf[..n]));
                Ok(Some(buf[..n].to_vec()))
            }
            Ok(Err(e)) => Err(TransportError::Io(e)),
        }
    }
}
