//! Loopback stand-in for the microcontroller, used by the async tests.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pwm_core::protocol::ACK;
use pwm_core::wire::{decode_request, encode_config_report};
use pwm_core::{PinTable, Request, MAX_DATAGRAM};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

pub const TEST_TIMEOUT: Duration = Duration::from_millis(150);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    Received { text: String },
    Replied { text: String },
}

struct DeviceState {
    online: AtomicBool,
    received: AtomicUsize,
    config_requests: AtomicUsize,
    pings: AtomicUsize,
    delay_ms: AtomicUsize,
    table: Mutex<PinTable>,
    ping_reply: Mutex<String>,
    config_reply: Mutex<Option<String>>,
    events: Mutex<Vec<DeviceEvent>>,
}

/// Answers `!PING`, `!REQUEST_CONFIG` and `<label>_<duty>` like the firmware does.
/// Offline devices still count what they receive but never reply.
pub struct FakeDevice {
    addr: SocketAddr,
    state: Arc<DeviceState>,
    task: JoinHandle<()>,
}

impl FakeDevice {
    pub async fn start() -> Self {
        Self::with_table(PinTable::placeholder()).await
    }

    pub async fn with_report(report: &str) -> Self {
        let table = pwm_core::decode_config_report(report.as_bytes()).unwrap();
        Self::with_table(table).await
    }

    pub async fn with_table(table: PinTable) -> Self {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let addr = socket.local_addr().unwrap();
        let state = Arc::new(DeviceState {
            online: AtomicBool::new(true),
            received: AtomicUsize::new(0),
            config_requests: AtomicUsize::new(0),
            pings: AtomicUsize::new(0),
            delay_ms: AtomicUsize::new(0),
            table: Mutex::new(table),
            ping_reply: Mutex::new(ACK.to_string()),
            config_reply: Mutex::new(None),
            events: Mutex::new(Vec::new()),
        });
        let task = tokio::spawn(serve(socket, state.clone()));
        Self { addr, state, task }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn set_online(&self, online: bool) {
        self.state.online.store(online, Ordering::SeqCst);
    }

    pub fn set_reply_delay(&self, delay: Duration) {
        self.state
            .delay_ms
            .store(delay.as_millis() as usize, Ordering::SeqCst);
    }

    pub fn set_ping_reply(&self, reply: &str) {
        *self.state.ping_reply.lock().unwrap() = reply.to_string();
    }

    /// Reply sent to `!REQUEST_CONFIG` instead of the encoded table.
    pub fn set_config_reply(&self, reply: Option<&str>) {
        *self.state.config_reply.lock().unwrap() = reply.map(str::to_string);
    }

    pub fn set_table(&self, table: PinTable) {
        *self.state.table.lock().unwrap() = table;
    }

    pub fn table(&self) -> PinTable {
        self.state.table.lock().unwrap().clone()
    }

    /// Datagrams received, answered or not.
    pub fn received(&self) -> usize {
        self.state.received.load(Ordering::SeqCst)
    }

    pub fn pings(&self) -> usize {
        self.state.pings.load(Ordering::SeqCst)
    }

    pub fn config_requests(&self) -> usize {
        self.state.config_requests.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> Vec<DeviceEvent> {
        self.state.events.lock().unwrap().clone()
    }

    pub fn update_reply(&self, request: &str) -> String {
        format!("[SERVER] {}", request)
    }
}

impl Drop for FakeDevice {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(socket: Arc<UdpSocket>, state: Arc<DeviceState>) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        let Ok((n, from)) = socket.recv_from(&mut buf).await else {
            return;
        };
        let text = String::from_utf8_lossy(&buf[..n]).to_string();
        state.received.fetch_add(1, Ordering::SeqCst);
        state
            .events
            .lock()
            .unwrap()
            .push(DeviceEvent::Received { text: text.clone() });
        let reply = match decode_request(&buf[..n]) {
            Ok(Request::Ping) => {
                state.pings.fetch_add(1, Ordering::SeqCst);
                let reply = state.ping_reply.lock().unwrap().clone();
                reply
            }
            Ok(Request::RequestConfig) => {
                state.config_requests.fetch_add(1, Ordering::SeqCst);
                let table = state.table.lock().unwrap().clone();
                let canned = state.config_reply.lock().unwrap().clone();
                match canned {
                    Some(reply) => reply,
                    None => String::from_utf8(encode_config_report(&table)).unwrap(),
                }
            }
            Ok(Request::SetDutyCycle { label, duty }) => {
                {
                    let mut table = state.table.lock().unwrap();
                    if let Some(next) = table.with_duty_cycle(&label, duty) {
                        *table = next;
                    }
                }
                format!("[SERVER] {}", text)
            }
            Err(_) => continue,
        };
        if !state.online.load(Ordering::SeqCst) {
            continue;
        }
        let delay = Duration::from_millis(state.delay_ms.load(Ordering::SeqCst) as u64);
        let socket = socket.clone();
        let state = state.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            state
                .events
                .lock()
                .unwrap()
                .push(DeviceEvent::Replied { text: reply.clone() });
            let _ = socket.send_to(reply.as_bytes(), from).await;
        });
    }
}
