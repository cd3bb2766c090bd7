use crate::snapshot::TelemetrySnapshot;
use anyhow::{bail, Context, Result};
use log::debug;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::time::Duration;

/// Unix socket server broadcasting each published snapshot as one JSON line
pub struct IpcServer {
    listener: UnixListener,
    clients: Vec<UnixStream>,
    socket_path: String,
}

impl IpcServer {
    pub fn new(socket_path: &str) -> Result<Self> {
        // Remove old socket file if exists
        if Path::new(socket_path).exists() {
            fs::remove_file(socket_path)
                .with_context(|| format!("Failed to remove old socket: {}", socket_path))?;
        }

        // Ensure parent directory exists
        if let Some(parent) = Path::new(socket_path).parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create socket directory: {:?}", parent))?;
        }

        let listener = UnixListener::bind(socket_path)
            .with_context(|| format!("Failed to bind Unix socket: {}", socket_path))?;

        // Set non-blocking mode for accept
        listener
            .set_nonblocking(true)
            .context("Failed to set socket non-blocking")?;

        Ok(IpcServer {
            listener,
            clients: Vec::new(),
            socket_path: socket_path.to_string(),
        })
    }

    /// Accept new client connections (non-blocking); each new client is sent
    /// `latest` straight away so it does not wait a full poll interval.
    pub fn accept_clients(&mut self, latest: Option<&TelemetrySnapshot>) {
        let greeting = latest.and_then(encode_line);
        loop {
            match self.listener.accept() {
                Ok((mut stream, _addr)) => {
                    // Set short timeout for writes to avoid blocking
                    let _ = stream.set_write_timeout(Some(Duration::from_millis(100)));
                    if let Some(ref line) = greeting {
                        if stream.write_all(line.as_bytes()).is_err() {
                            continue;
                        }
                    }
                    self.clients.push(stream);
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    // No more pending connections
                    break;
                }
                Err(_) => {
                    // Ignore other errors
                    break;
                }
            }
        }
    }

    pub fn broadcast(&mut self, snapshot: &TelemetrySnapshot) {
        let message = match encode_line(snapshot) {
            Some(m) => m,
            None => return,
        };

        // Send to all clients, removing disconnected ones
        self.clients
            .retain_mut(|client| client.write_all(message.as_bytes()).is_ok());
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }
}

fn encode_line(snapshot: &TelemetrySnapshot) -> Option<String> {
    match serde_json::to_string(snapshot) {
        Ok(json) => Some(format!("{}\n", json)),
        Err(e) => {
            debug!("Failed to serialize snapshot: {}", e);
            None
        }
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        // Clean up socket file
        let _ = fs::remove_file(&self.socket_path);
    }
}

/// Connect to the daemon's IPC socket
pub fn connect_to_daemon(socket_path: &str) -> Result<BufReader<UnixStream>> {
    let stream = UnixStream::connect(socket_path).with_context(|| {
        format!(
            "Cannot connect to daemon socket: {}\n\
             Is the ups-hat-e service running?\n\
             Try: sudo systemctl start ups-hat-e",
            socket_path
        )
    })?;

    // Set read timeout
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .context("Failed to set socket timeout")?;

    Ok(BufReader::new(stream))
}

/// Read the next published snapshot from the daemon
pub fn read_snapshot<R: BufRead>(reader: &mut R) -> Result<TelemetrySnapshot> {
    let mut line = String::new();
    let n = reader
        .read_line(&mut line)
        .context("Failed to read from daemon")?;
    if n == 0 {
        bail!("Daemon closed the connection");
    }

    serde_json::from_str(line.trim()).context("Failed to parse snapshot from daemon")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn reads_one_snapshot_per_line() {
        let line = r#"{"captured_at":1,"charger_voltage":5.0,"charger_current":900.0,"charger_power":4500.0,"battery_voltage":16.4,"battery_current":850.0,"state_of_charge":91.0,"remaining_battery_capacity_wh":30.5,"remaining_time_minutes":40,"cell_voltages":[4.1,4.1,4.1,4.1],"online":true,"charging":true,"fast_charging":false,"state":"charging","phase":"constant_current"}"#;
        let mut reader = Cursor::new(format!("{}\n", line));
        let snapshot = read_snapshot(&mut reader).unwrap();
        assert!(snapshot.online && snapshot.charging);
        assert_eq!(snapshot.remaining_time_minutes, 40);
        assert!(read_snapshot(&mut reader).is_err());
    }

    #[test]
    fn broadcast_reaches_connected_clients() {
        let dir = std::env::temp_dir().join(format!("ups-hat-e-ipc-{}", std::process::id()));
        let socket = dir.join("ups.sock");
        let socket = socket.to_str().unwrap();
        let mut server = IpcServer::new(socket).unwrap();
        let mut client = connect_to_daemon(socket).unwrap();
        // accept is non-blocking; give the connection a moment to land
        for _ in 0..50 {
            server.accept_clients(None);
            if server.client_count() > 0 {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(server.client_count(), 1);

        let line = r#"{"captured_at":2,"charger_voltage":0.0,"charger_current":0.0,"charger_power":0.0,"battery_voltage":14.0,"battery_current":-600.0,"state_of_charge":42.0,"remaining_battery_capacity_wh":12.0,"remaining_time_minutes":70,"cell_voltages":[3.5,3.5,3.5,3.5],"online":false,"charging":false,"fast_charging":false,"state":"idle","phase":"standby"}"#;
        let snapshot: TelemetrySnapshot = serde_json::from_str(line).unwrap();
        server.broadcast(&snapshot);
        let received = read_snapshot(&mut client).unwrap();
        assert_eq!(received.remaining_time_minutes, 70);
        drop(server);
        let _ = fs::remove_dir_all(&dir);
    }
}
