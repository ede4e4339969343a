//! Local push channel: a line-framed TCP server on its own port.
//!
//! Active only while the setup AP is up. New clients immediately receive the
//! current relay-state frame; any relay change from any source is broadcast
//! to every connected client; inbound `toggle:<n>` / `status` tokens mirror
//! the HTTP operations. The listener runs non-blocking and is polled from
//! the control loop, so connects, disconnects and messages are all delivered
//! synchronously within the loop iteration that services the transport.

use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};

use anyhow::{Context, Result};

use crate::protocol::{parse_push_command, PushCommand, RelayStatesFrame};

/// Inbound line length guard; real tokens are a dozen bytes.
const MAX_LINE_LEN: usize = 128;

struct PushClient {
    stream: TcpStream,
    buf: Vec<u8>,
    id: u32,
}

pub struct PushChannel {
    listener: Option<TcpListener>,
    clients: Vec<PushClient>,
    next_id: u32,
}

impl PushChannel {
    pub fn new() -> Self {
        Self {
            listener: None,
            clients: Vec::new(),
            next_id: 0,
        }
    }

    /// Bind the listener. Idempotent start is a caller bug the state machine
    /// already rules out, but restarting after `stop` is the normal
    /// provisioning-failure path.
    pub fn start(&mut self, port: u16) -> Result<()> {
        let listener = TcpListener::bind(("0.0.0.0", port))
            .with_context(|| format!("push channel bind on port {port} failed"))?;
        listener
            .set_nonblocking(true)
            .context("push channel listener nonblocking")?;
        log::info!("push: channel listening on port {port}");
        self.listener = Some(listener);
        Ok(())
    }

    /// Tear the channel down and disconnect every client.
    pub fn stop(&mut self) {
        if self.listener.take().is_some() {
            log::info!("push: channel stopped, dropping {} client(s)", self.clients.len());
        }
        for client in self.clients.drain(..) {
            let _ = client.stream.shutdown(Shutdown::Both);
        }
    }

    pub fn is_running(&self) -> bool {
        self.listener.is_some()
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Service the transport: accept new clients (pushing `snapshot` to each
    /// newcomer), drain inbound lines, answer `status` tokens directly, and
    /// return the toggle commands for the loop to execute.
    pub fn poll(&mut self, snapshot: &RelayStatesFrame) -> Vec<PushCommand> {
        let mut commands = Vec::new();
        if self.listener.is_none() {
            return commands;
        }

        self.accept_new_clients(snapshot);

        let line = snapshot.to_line();
        let mut dropped = Vec::new();
        for (pos, client) in self.clients.iter_mut().enumerate() {
            match drain_client(client) {
                Ok(lines) => {
                    for text in lines {
                        match parse_push_command(&text) {
                            Some(PushCommand::Status) => {
                                // Reply to this client only.
                                if client.stream.write_all(line.as_bytes()).is_err() {
                                    dropped.push(pos);
                                }
                            }
                            Some(command) => commands.push(command),
                            None => log::debug!("push: ignoring token {text:?}"),
                        }
                    }
                }
                Err(()) => dropped.push(pos),
            }
        }

        dropped.dedup();
        for pos in dropped.into_iter().rev() {
            let client = self.clients.swap_remove(pos);
            log::info!("push: client {} disconnected", client.id);
            let _ = client.stream.shutdown(Shutdown::Both);
        }

        commands
    }

    /// Push the relay-state frame to every connected client.
    pub fn broadcast(&mut self, frame: &RelayStatesFrame) {
        if self.clients.is_empty() {
            return;
        }
        let line = frame.to_line();
        self.clients.retain_mut(|client| {
            if client.stream.write_all(line.as_bytes()).is_ok() {
                true
            } else {
                log::info!("push: client {} dropped during broadcast", client.id);
                let _ = client.stream.shutdown(Shutdown::Both);
                false
            }
        });
    }

    fn accept_new_clients(&mut self, snapshot: &RelayStatesFrame) {
        let Some(listener) = &self.listener else {
            return;
        };
        loop {
            match listener.accept() {
                Ok((stream, peer)) => {
                    if stream.set_nonblocking(true).is_err() {
                        continue;
                    }
                    let id = self.next_id;
                    self.next_id = self.next_id.wrapping_add(1);
                    log::info!("push: client {id} connected from {peer}");

                    let mut client = PushClient {
                        stream,
                        buf: Vec::new(),
                        id,
                    };
                    // Immediate snapshot so the client renders current state
                    // without asking.
                    if client.stream.write_all(snapshot.to_line().as_bytes()).is_ok() {
                        self.clients.push(client);
                    }
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => break,
                Err(err) => {
                    log::warn!("push: accept failed: {err}");
                    break;
                }
            }
        }
    }
}

impl Default for PushChannel {
    fn default() -> Self {
        Self::new()
    }
}

/// Read whatever the client has sent and split it into complete lines.
/// `Err(())` means the connection is gone.
fn drain_client(client: &mut PushClient) -> Result<Vec<String>, ()> {
    let mut chunk = [0u8; 256];
    loop {
        match client.stream.read(&mut chunk) {
            Ok(0) => return Err(()),
            Ok(n) => {
                client.buf.extend_from_slice(&chunk[..n]);
                if client.buf.len() > MAX_LINE_LEN {
                    // A client streaming garbage gets cut off rather than
                    // growing the buffer forever.
                    return Err(());
                }
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => break,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(_) => return Err(()),
        }
    }

    let mut lines = Vec::new();
    while let Some(newline) = client.buf.iter().position(|&b| b == b'\n') {
        let line: Vec<u8> = client.buf.drain(..=newline).collect();
        let text = String::from_utf8_lossy(&line[..line.len() - 1]).into_owned();
        if !text.trim().is_empty() {
            lines.push(text);
        }
    }
    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relays::RelayIndex;
    use std::io::BufRead;
    use std::io::BufReader;
    use std::time::Duration;

    fn start_channel() -> (PushChannel, u16) {
        // Port 0 lets the OS pick a free port; rebind on the assigned one is
        // not needed because we read it back from the listener.
        let mut channel = PushChannel::new();
        channel.start(0).unwrap();
        let port = channel
            .listener
            .as_ref()
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        (channel, port)
    }

    fn connect(port: u16) -> BufReader<TcpStream> {
        let stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        BufReader::new(stream)
    }

    fn poll_until<F: FnMut(&mut PushChannel) -> bool>(channel: &mut PushChannel, mut done: F) {
        let frame = RelayStatesFrame::new([false; 4]);
        for _ in 0..100 {
            channel.poll(&frame);
            if done(channel) {
                return;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("push channel did not reach the expected state");
    }

    #[test]
    fn new_client_receives_a_snapshot_immediately() {
        let (mut channel, port) = start_channel();
        let mut client = connect(port);
        poll_until(&mut channel, |c| c.client_count() == 1);

        let mut line = String::new();
        client.read_line(&mut line).unwrap();
        assert_eq!(line, "{\"relay_states\":[false,false,false,false]}\n");
    }

    #[test]
    fn inbound_tokens_are_parsed_and_status_answered() {
        let (mut channel, port) = start_channel();
        let mut client = connect(port);
        poll_until(&mut channel, |c| c.client_count() == 1);

        client
            .get_mut()
            .write_all(b"toggle:2\nstatus\nnonsense\n")
            .unwrap();

        let mut toggles = Vec::new();
        let frame = RelayStatesFrame::new([true, false, false, false]);
        for _ in 0..100 {
            toggles.extend(channel.poll(&frame));
            if !toggles.is_empty() {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(
            toggles,
            vec![PushCommand::Toggle(RelayIndex::new(2).unwrap())]
        );

        // First line is the connect snapshot, second the status reply.
        let mut line = String::new();
        client.read_line(&mut line).unwrap();
        line.clear();
        client.read_line(&mut line).unwrap();
        assert_eq!(line, "{\"relay_states\":[true,false,false,false]}\n");
    }

    #[test]
    fn broadcast_reaches_all_clients() {
        let (mut channel, port) = start_channel();
        let mut first = connect(port);
        let mut second = connect(port);
        poll_until(&mut channel, |c| c.client_count() == 2);

        channel.broadcast(&RelayStatesFrame::new([false, true, false, true]));

        for client in [&mut first, &mut second] {
            let mut line = String::new();
            client.read_line(&mut line).unwrap(); // connect snapshot
            line.clear();
            client.read_line(&mut line).unwrap();
            assert_eq!(line, "{\"relay_states\":[false,true,false,true]}\n");
        }
    }

    #[test]
    fn stop_disconnects_every_client() {
        let (mut channel, port) = start_channel();
        let mut client = connect(port);
        poll_until(&mut channel, |c| c.client_count() == 1);

        channel.stop();
        assert!(!channel.is_running());
        assert_eq!(channel.client_count(), 0);

        // The peer observes EOF once the connect snapshot is consumed.
        let mut line = String::new();
        client.read_line(&mut line).unwrap();
        line.clear();
        assert_eq!(client.read_line(&mut line).unwrap(), 0);
    }

    #[test]
    fn disconnected_clients_are_pruned() {
        let (mut channel, port) = start_channel();
        let client = connect(port);
        poll_until(&mut channel, |c| c.client_count() == 1);

        drop(client);
        poll_until(&mut channel, |c| c.client_count() == 0);
    }
}
