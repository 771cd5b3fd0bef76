#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tensilelink::transport::LinkTransport;
use tensilelink::LinkConfig;

#[derive(Default)]
struct LoopbackState {
    incoming: VecDeque<u8>,
    read_faults: VecDeque<io::Error>,
    write_faults: VecDeque<io::Error>,
    sent: Vec<u8>,
    discards: usize,
}

/// Scripted in-memory transport standing in for the serial port.
///
/// Clones share one underlying stream, mirroring how the production
/// transport hands a `try_clone` to the reader thread. An empty inbound
/// queue behaves like the real port's read timeout.
#[derive(Clone, Default)]
pub struct LoopbackTransport {
    state: Arc<Mutex<LoopbackState>>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one device line, newline-terminated, for the reader loop.
    pub fn feed_line(&self, line: &str) {
        let mut state = self.state.lock().unwrap();
        state.incoming.extend(line.as_bytes());
        state.incoming.push_back(b'\n');
    }

    pub fn feed_bytes(&self, bytes: &[u8]) {
        self.state.lock().unwrap().incoming.extend(bytes);
    }

    /// Make the next read fail with `kind`.
    pub fn inject_read_fault(&self, kind: io::ErrorKind, message: &str) {
        self.state
            .lock()
            .unwrap()
            .read_faults
            .push_back(io::Error::new(kind, message.to_string()));
    }

    /// Make the next write fail with `kind`.
    pub fn inject_write_fault(&self, kind: io::ErrorKind, message: &str) {
        self.state
            .lock()
            .unwrap()
            .write_faults
            .push_back(io::Error::new(kind, message.to_string()));
    }

    /// Every byte written to the device so far, in order.
    pub fn sent_bytes(&self) -> Vec<u8> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn clear_sent(&self) {
        self.state.lock().unwrap().sent.clear();
    }

    /// How many times the inbound buffer has been discarded.
    pub fn discards(&self) -> usize {
        self.state.lock().unwrap().discards
    }
}

impl LinkTransport for LoopbackTransport {
    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        {
            let mut state = self.state.lock().unwrap();
            if let Some(fault) = state.read_faults.pop_front() {
                return Err(fault);
            }
            if !state.incoming.is_empty() {
                let n = buf.len().min(state.incoming.len());
                for slot in buf.iter_mut().take(n) {
                    *slot = state.incoming.pop_front().unwrap();
                }
                return Ok(n);
            }
        }
        // Emulate the serial read timeout so the loop polls its stop flag
        // instead of busy-spinning.
        thread::sleep(Duration::from_millis(2));
        Err(io::Error::new(io::ErrorKind::TimedOut, "read timed out"))
    }

    fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(fault) = state.write_faults.pop_front() {
            return Err(fault);
        }
        state.sent.extend_from_slice(bytes);
        Ok(())
    }

    fn discard_input(&mut self) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.incoming.clear();
        state.discards += 1;
        Ok(())
    }

    fn try_clone(&self) -> io::Result<Box<dyn LinkTransport>> {
        Ok(Box::new(self.clone()))
    }
}

/// Link config with the handshake and settle delays collapsed so tests run
/// in milliseconds. Timing-sensitivity itself is not under test here.
pub fn fast_config() -> LinkConfig {
    LinkConfig {
        read_timeout: Duration::from_millis(20),
        boot_settle_delay: Duration::ZERO,
        mode_switch_delay: Duration::ZERO,
        pause_confirm_delay: Duration::ZERO,
        command_settle_delay: Duration::ZERO,
        join_timeout: Duration::from_millis(500),
        ..LinkConfig::default()
    }
}

/// Poll `condition` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}
