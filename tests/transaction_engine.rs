//! End-to-end transaction tests against a simulated link.
//!
//! The simulated link records every frame written with its (paused-clock)
//! timestamp and lets each test script what the slave sends back.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use genlink::transport::{ByteTransport, LinkKind};
use genlink::{
    crc, MasterConfig, ModbusError, ModbusException, ModbusMaster, ModbusRequest, ModbusResult,
    RxBuffer,
};

const SLAVE: u8 = 0x9D;

/// Scripted slave reply: `chunks` arrive one after another, `delay` apart.
struct Reply {
    delay: Duration,
    chunks: Vec<Vec<u8>>,
}

impl Reply {
    fn after(delay: Duration, frame: Vec<u8>) -> Option<Self> {
        Some(Self {
            delay,
            chunks: vec![frame],
        })
    }
}

type Responder = Box<dyn Fn(&[u8]) -> Option<Reply> + Send + Sync>;
type WriteLog = Arc<Mutex<Vec<(Instant, Vec<u8>)>>>;

struct SimulatedLink {
    rx: RxBuffer,
    writes: WriteLog,
    responder: Responder,
    kind: LinkKind,
}

impl ByteTransport for SimulatedLink {
    async fn write(&mut self, frame: &[u8]) -> ModbusResult<()> {
        self.writes.lock().push((Instant::now(), frame.to_vec()));
        if let Some(reply) = (self.responder)(frame) {
            let rx = self.rx.clone();
            tokio::spawn(async move {
                for chunk in reply.chunks {
                    tokio::time::sleep(reply.delay).await;
                    rx.append(&chunk);
                }
            });
        }
        Ok(())
    }

    fn rx_buffer(&self) -> &RxBuffer {
        &self.rx
    }

    fn link_kind(&self) -> LinkKind {
        self.kind
    }

    async fn close(&mut self) -> ModbusResult<()> {
        Ok(())
    }
}

fn simulated<F>(responder: F) -> (ModbusMaster<SimulatedLink>, WriteLog)
where
    F: Fn(&[u8]) -> Option<Reply> + Send + Sync + 'static,
{
    simulated_with(MasterConfig::default(), responder)
}

fn simulated_with<F>(
    config: MasterConfig,
    responder: F,
) -> (ModbusMaster<SimulatedLink>, WriteLog)
where
    F: Fn(&[u8]) -> Option<Reply> + Send + Sync + 'static,
{
    let writes = WriteLog::default();
    let link = SimulatedLink {
        rx: RxBuffer::new(),
        writes: writes.clone(),
        responder: Box::new(responder),
        kind: LinkKind::Serial { baud_rate: 9600 },
    };
    (ModbusMaster::new(link, config), writes)
}

fn with_crc(body: &[u8]) -> Vec<u8> {
    let mut frame = body.to_vec();
    crc::append(&mut frame);
    frame
}

/// Register a request frame addresses.
fn requested_register(request: &[u8]) -> u16 {
    u16::from_be_bytes([request[2], request[3]])
}

/// Answers only the first request, after `delay`.
fn answer_once(
    delay: Duration,
    frame: Vec<u8>,
) -> impl Fn(&[u8]) -> Option<Reply> + Send + Sync + 'static {
    let answered = Mutex::new(false);
    move |_| {
        if std::mem::replace(&mut *answered.lock(), true) {
            None
        } else {
            Reply::after(delay, frame.clone())
        }
    }
}

/// Read response whose single register holds the requested address.
fn echo_address(request: &[u8]) -> Vec<u8> {
    with_crc(&[SLAVE, 0x03, 0x02, request[2], request[3]])
}

#[tokio::test(start_paused = true)]
async fn test_read_end_to_end() {
    let (master, writes) = simulated(|_| {
        Reply::after(
            Duration::from_millis(50),
            with_crc(&[SLAVE, 0x03, 0x02, 0x00, 0x2A]),
        )
    });

    let value = master.read_registers(0x0001, 1).await.unwrap();
    assert_eq!(value, "002a");
    assert_eq!(master.register("0001").as_deref(), Some("002a"));

    let writes = writes.lock();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].1, with_crc(&[SLAVE, 0x03, 0x00, 0x01, 0x00, 0x01]));

    let stats = master.comm_stats();
    assert_eq!(stats.tx_frames, 1);
    assert_eq!(stats.rx_frames, 1);
    assert_eq!(stats.crc_errors, 0);
    let latency = stats.average_latency().unwrap();
    assert!(latency >= Duration::from_millis(50));
    assert!(latency <= Duration::from_millis(70));
}

#[tokio::test(start_paused = true)]
async fn test_silent_slave_times_out_after_budget() {
    let (master, _) = simulated(|_| None);
    let budget = master.response_timeout();
    assert_eq!(budget, Duration::from_micros(3_020_833));

    let started = Instant::now();
    let result = master.read_registers(0x0001, 1).await;
    let elapsed = started.elapsed();

    match result {
        Err(ModbusError::Timeout {
            register, buffered, ..
        }) => {
            assert_eq!(register, 0x0001);
            assert_eq!(buffered, 0);
        }
        other => panic!("expected timeout, got {:?}", other),
    }
    assert!(elapsed >= budget);
    assert!(elapsed <= budget + Duration::from_millis(50));

    let stats = master.comm_stats();
    assert_eq!(stats.timeouts, 1);
    assert_eq!(stats.crc_errors, 0);
    assert_eq!(stats.timeout_percent(), 100.0);
}

#[tokio::test(start_paused = true)]
async fn test_tcp_link_uses_its_own_budget() {
    let writes = WriteLog::default();
    let link = SimulatedLink {
        rx: RxBuffer::new(),
        writes,
        responder: Box::new(|_| None),
        kind: LinkKind::Tcp,
    };
    let config = MasterConfig::default().with_tcp_timeout(Duration::from_millis(500));
    let master = ModbusMaster::new(link, config);

    let started = Instant::now();
    let result = master.read_registers(0x0001, 1).await;
    assert!(matches!(result, Err(ModbusError::Timeout { timeout_ms: 500, .. })));
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn test_partial_frame_at_timeout_is_reported() {
    let (master, _) = simulated(|_| Reply::after(Duration::from_millis(20), vec![SLAVE, 0x03, 0x04]));

    let result = master.read_registers(0x0001, 2).await;
    assert!(matches!(result, Err(ModbusError::Timeout { buffered: 3, .. })));
    assert_eq!(master.comm_stats().timeouts, 1);
}

#[tokio::test(start_paused = true)]
async fn test_crc_error_counted_and_buffer_cleared() {
    let (master, _) = simulated(|_| {
        let mut frame = with_crc(&[SLAVE, 0x03, 0x02, 0x00, 0x2A]);
        frame[4] ^= 0x10;
        Reply::after(Duration::from_millis(20), frame)
    });

    let result = master.read_registers(0x0001, 1).await;
    assert!(matches!(result, Err(ModbusError::Crc { .. })));
    assert!(master.register_cache().is_empty());

    let stats = master.comm_stats();
    assert_eq!(stats.crc_errors, 1);
    assert_eq!(stats.rx_frames, 0);
    assert_eq!(stats.timeouts, 0);
    assert_eq!(stats.crc_error_percent(), 100.0);
}

#[tokio::test(start_paused = true)]
async fn test_garbage_byte_is_framing_error_then_recovers() {
    let first = Arc::new(Mutex::new(true));
    let (master, _) = simulated(move |request| {
        let mut reply = Vec::new();
        if std::mem::replace(&mut *first.lock(), false) {
            reply.push(0x55);
        }
        reply.extend_from_slice(&echo_address(request));
        Reply::after(Duration::from_millis(20), reply)
    });

    let result = master.read_registers(0x0001, 1).await;
    assert!(matches!(result, Err(ModbusError::Framing { .. })));
    assert_eq!(master.comm_stats().discarded_bytes, 1);

    // Remainder was cleared, so the next exchange starts clean
    assert_eq!(master.read_registers(0x0002, 1).await.unwrap(), "0002");
    assert_eq!(master.comm_stats().discarded_bytes, 1);
}

#[tokio::test(start_paused = true)]
async fn test_exception_response() {
    let (master, _) = simulated(|_| {
        Reply::after(Duration::from_millis(20), with_crc(&[SLAVE, 0x83, 0x02]))
    });

    match master.read_registers(0x9999, 1).await {
        Err(ModbusError::Exception {
            function,
            exception,
        }) => {
            assert_eq!(function, 0x03);
            assert_eq!(exception, ModbusException::IllegalDataAddress);
        }
        other => panic!("expected exception, got {:?}", other),
    }

    let stats = master.comm_stats();
    assert_eq!(stats.exceptions, 1);
    assert_eq!(stats.rx_frames, 1);
    assert!(stats.average_latency().is_none());
    assert!(master.register_cache().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_invalid_write_never_transmitted() {
    let (master, writes) = simulated(|_| None);

    let result = master.write_registers(0x002C, 2, vec![0x00, 0x01]).await;
    assert!(matches!(result, Err(ModbusError::Validation { .. })));

    let result = master.write_registers(0x002C, 0, Vec::new()).await;
    assert!(matches!(result, Err(ModbusError::Validation { .. })));

    assert!(writes.lock().is_empty());
    assert_eq!(master.comm_stats().tx_frames, 0);
}

#[tokio::test(start_paused = true)]
async fn test_write_does_not_touch_cache() {
    let (master, writes) = simulated(|request| {
        Reply::after(Duration::from_millis(20), with_crc(&request[..6]))
    });

    master
        .write_registers(0x002C, 1, vec![0x00, 0x05])
        .await
        .unwrap();
    assert!(master.register_cache().is_empty());
    assert_eq!(
        writes.lock()[0].1,
        with_crc(&[SLAVE, 0x10, 0x00, 0x2C, 0x00, 0x01, 0x02, 0x00, 0x05])
    );

    // Opt-in cache update stores the echoed register and count
    let request = ModbusRequest::write_words(0x002C, &[0x0005]);
    master.execute(&request, true).await.unwrap();
    assert_eq!(master.register("002c").as_deref(), Some("002c0001"));
}

#[tokio::test(start_paused = true)]
async fn test_split_arrival_assembles_one_frame() {
    let (master, _) = simulated(|_| {
        let frame = with_crc(&[SLAVE, 0x03, 0x04, 0x12, 0x34, 0x56, 0x78]);
        Some(Reply {
            delay: Duration::from_millis(25),
            chunks: vec![frame[..3].to_vec(), frame[3..6].to_vec(), frame[6..].to_vec()],
        })
    });

    let value = master.read_registers(0x0100, 2).await.unwrap();
    assert_eq!(value, "12345678");
    assert_eq!(master.comm_stats().discarded_bytes, 0);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_requests_never_interleave() {
    let (master, writes) =
        simulated(|request| Reply::after(Duration::from_millis(200), echo_address(request)));
    let master = Arc::new(master);

    let tasks: Vec<_> = (1..=3u16)
        .map(|register| {
            let master = master.clone();
            tokio::spawn(async move { master.read_registers(register, 1).await })
        })
        .collect();

    for (register, task) in (1..=3u16).zip(tasks) {
        let value = task.await.unwrap().unwrap();
        assert_eq!(value, format!("{:04x}", register));
    }

    let writes = writes.lock();
    assert_eq!(writes.len(), 3);
    for pair in writes.windows(2) {
        // The next request only goes out once the previous reply was handled
        assert!(pair[1].0 - pair[0].0 >= Duration::from_millis(200));
    }
    for (_, frame) in writes.iter() {
        assert_eq!(frame.len(), 8);
        assert!(crc::verify(frame));
    }

    for register in 1..=3u16 {
        assert_eq!(
            master.register_cache().get_register(register),
            Some(format!("{:04x}", register))
        );
    }
}

#[tokio::test(start_paused = true)]
async fn test_stop_signal_ends_wait_promptly() {
    let (master, writes) = simulated(|_| None);
    let master = Arc::new(master);
    let stop = master.stop_token();

    let waiting = {
        let master = master.clone();
        tokio::spawn(async move { master.read_registers(0x0001, 1).await })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    let cancelled_at = Instant::now();
    stop.cancel();

    let result = waiting.await.unwrap();
    assert!(matches!(result, Err(ModbusError::Stopping)));
    assert!(cancelled_at.elapsed() < Duration::from_millis(20));
    assert_eq!(master.comm_stats().timeouts, 0);

    let result = master.read_registers(0x0002, 1).await;
    assert!(matches!(result, Err(ModbusError::Stopping)));
    assert_eq!(writes.lock().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_reset_comm_stats_keeps_cache() {
    let (master, _) =
        simulated(|request| Reply::after(Duration::from_millis(20), echo_address(request)));

    master.read_registers(0x0007, 1).await.unwrap();
    assert_eq!(master.comm_stats().tx_frames, 1);

    master.reset_comm_stats().await;
    let stats = master.comm_stats();
    assert_eq!(stats.tx_frames, 0);
    assert_eq!(stats.rx_frames, 0);
    assert!(stats.average_latency().is_none());
    assert_eq!(master.register("7").as_deref(), Some("0007"));

    let report = stats.report();
    assert_eq!(report[0], ("Packet Count", "M: 0, S: 0".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_late_reply_not_taken_for_next_read() {
    // Two-register reply lands 80 ms after the first read gave up
    let (master, _) = simulated(answer_once(
        Duration::from_millis(3100),
        with_crc(&[SLAVE, 0x03, 0x04, 0x00, 0x01, 0xAA, 0xBB]),
    ));

    let first = master.read_registers(0x0001, 2).await;
    assert!(matches!(first, Err(ModbusError::Timeout { .. })));

    let second = master.read_registers(0x0050, 1).await;
    assert!(matches!(second, Err(ModbusError::Framing { .. })));
    assert_eq!(master.register("0050"), None);
    assert_eq!(master.register("0001"), None);
    assert!(master.register_cache().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_reply_arriving_between_transactions_is_dropped() {
    // Same shape as the next request, but it lands while the link is idle
    let (master, writes) = simulated(answer_once(
        Duration::from_millis(3100),
        with_crc(&[SLAVE, 0x03, 0x02, 0x00, 0x2A]),
    ));

    let first = master.read_registers(0x0001, 1).await;
    assert!(matches!(first, Err(ModbusError::Timeout { .. })));
    tokio::time::sleep(Duration::from_millis(200)).await;

    let second = master.read_registers(0x0002, 1).await;
    assert!(matches!(second, Err(ModbusError::Timeout { buffered: 0, .. })));
    assert!(master.register_cache().is_empty());
    assert_eq!(writes.lock().len(), 2);
    assert_eq!(master.comm_stats().timeouts, 2);
}

#[tokio::test(start_paused = true)]
async fn test_next_request_waits_for_timeout() {
    let (master, writes) = simulated(|request| match requested_register(request) {
        0x0001 => None,
        _ => Reply::after(Duration::from_millis(20), echo_address(request)),
    });
    let master = Arc::new(master);
    let budget = master.response_timeout();

    let first = {
        let master = master.clone();
        tokio::spawn(async move { master.read_registers(0x0001, 1).await })
    };
    // Let the first request take the lock
    tokio::time::sleep(Duration::from_millis(1)).await;
    let second = {
        let master = master.clone();
        tokio::spawn(async move { master.read_registers(0x0002, 1).await })
    };

    assert!(matches!(first.await.unwrap(), Err(ModbusError::Timeout { .. })));
    assert_eq!(second.await.unwrap().unwrap(), "0002");

    let writes = writes.lock();
    assert_eq!(writes.len(), 2);
    assert_eq!(requested_register(&writes[0].1), 0x0001);
    assert!(writes[1].0 - writes[0].0 >= budget);
}

#[tokio::test(start_paused = true)]
async fn test_next_request_waits_for_crc_failure() {
    let (master, writes) = simulated(|request| match requested_register(request) {
        0x0001 => {
            let mut frame = echo_address(request);
            frame[3] ^= 0x01;
            Reply::after(Duration::from_millis(200), frame)
        }
        _ => Reply::after(Duration::from_millis(20), echo_address(request)),
    });
    let master = Arc::new(master);

    let first = {
        let master = master.clone();
        tokio::spawn(async move { master.read_registers(0x0001, 1).await })
    };
    tokio::time::sleep(Duration::from_millis(1)).await;
    let second = {
        let master = master.clone();
        tokio::spawn(async move { master.read_registers(0x0002, 1).await })
    };

    assert!(matches!(first.await.unwrap(), Err(ModbusError::Crc { .. })));
    assert_eq!(second.await.unwrap().unwrap(), "0002");

    let writes = writes.lock();
    assert_eq!(requested_register(&writes[0].1), 0x0001);
    assert!(writes[1].0 - writes[0].0 >= Duration::from_millis(200));
    assert_eq!(master.comm_stats().crc_errors, 1);
}

#[tokio::test(start_paused = true)]
async fn test_reduced_cpu_polls_less_often() {
    let reply = |_: &[u8]| {
        Reply::after(
            Duration::from_millis(35),
            with_crc(&[SLAVE, 0x03, 0x02, 0x00, 0x2A]),
        )
    };
    let request = ModbusRequest::read(0x0001, 1);

    // 10 ms quantum: seen on the poll at 40 ms
    let (master, _) = simulated(reply);
    let round_trip = master.execute(&request, false).await.unwrap().round_trip();
    assert!(round_trip >= Duration::from_millis(40));
    assert!(round_trip < Duration::from_millis(50));

    // 30 ms quantum: seen on the poll at 60 ms
    let config = MasterConfig::default().with_reduced_cpu(true);
    assert_eq!(config.poll_quantum(), Duration::from_millis(30));
    let (master, _) = simulated_with(config, reply);
    let round_trip = master.execute(&request, false).await.unwrap().round_trip();
    assert!(round_trip >= Duration::from_millis(60));
    assert!(round_trip < Duration::from_millis(70));
}
