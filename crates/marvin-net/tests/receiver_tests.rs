//! 接收端端到端测试
//!
//! 通过回环 TCP 连接驱动真实的 `poll_once` 迭代。

use marvin_net::{
    ClientError, CommandClient, ConnectionId, MAX_QUEUED_FRAMES, PacketReceiver, ReceiverConfig,
    ReceiverHandler,
};
use marvin_protocol::{Command, FrameHeader, MotorSettings, MotorSpeed};
use proptest::prelude::*;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Event {
    Connected(SocketAddr),
    Disconnected(SocketAddr),
    Command(SocketAddr, Command),
}

struct RecordingHandler {
    events: Vec<Event>,
    reply: bool,
}

impl RecordingHandler {
    fn new() -> Self {
        Self {
            events: Vec::new(),
            reply: true,
        }
    }

    fn commands(&self) -> Vec<Command> {
        self.events
            .iter()
            .filter_map(|event| match event {
                Event::Command(_, command) => Some(*command),
                _ => None,
            })
            .collect()
    }

    fn disconnects(&self) -> usize {
        self.events.iter().filter(|e| matches!(e, Event::Disconnected(_))).count()
    }
}

impl ReceiverHandler for RecordingHandler {
    fn on_client_connected(&mut self, peer: SocketAddr) {
        self.events.push(Event::Connected(peer));
    }

    fn on_client_disconnected(&mut self, peer: SocketAddr) {
        self.events.push(Event::Disconnected(peer));
    }

    fn on_command(&mut self, peer: SocketAddr, command: Command) -> bool {
        self.events.push(Event::Command(peer, command));
        self.reply
    }
}

type Receiver = PacketReceiver<RecordingHandler>;

fn receiver() -> Receiver {
    let config = ReceiverConfig::new("127.0.0.1:0".parse().unwrap())
        .with_poll_timeout(Duration::from_millis(10));
    PacketReceiver::bind(&config, RecordingHandler::new()).unwrap()
}

/// 反复执行 poll 迭代直到条件成立（最多 2 秒）
fn pump_until(rx: &mut Receiver, cond: impl Fn(&Receiver) -> bool) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !cond(rx) {
        assert!(Instant::now() < deadline, "condition not reached in time");
        rx.poll_once().unwrap();
    }
}

/// 反复执行 poll 迭代直到累计发出 `frames` 个应答帧
fn pump_until_sent(rx: &mut Receiver, frames: usize) {
    let deadline = Instant::now() + Duration::from_secs(2);
    let mut sent = 0;
    while sent < frames {
        assert!(Instant::now() < deadline, "responses not sent in time");
        sent += rx.poll_once().unwrap().sent;
    }
}

fn pump(rx: &mut Receiver, iterations: usize) {
    for _ in 0..iterations {
        rx.poll_once().unwrap();
    }
}

/// 建立一个客户端连接，返回 (客户端流, 连接标识)
fn connect(rx: &mut Receiver) -> (TcpStream, ConnectionId) {
    let before = rx.connection_ids();
    let stream = TcpStream::connect(rx.local_addr()).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    stream.set_nodelay(true).unwrap();

    pump_until(rx, |rx| rx.connection_count() == before.len() + 1);
    let id = rx
        .connection_ids()
        .into_iter()
        .find(|id| !before.contains(id))
        .unwrap();
    (stream, id)
}

fn read_response(stream: &mut TcpStream) -> [u8; 3] {
    let mut buf = [0u8; 3];
    stream.read_exact(&mut buf).unwrap();
    buf
}

// ============================================================
// 端到端
// ============================================================

#[test]
fn test_motor_speed_end_to_end() {
    let mut rx = receiver();
    let (mut client, id) = connect(&mut rx);
    let peer = client.local_addr().unwrap();

    client.write_all(&[0x01, 0x00, 0x08]).unwrap();
    client.write_all(&100i32.to_be_bytes()).unwrap();
    client.write_all(&(-50i32).to_be_bytes()).unwrap();

    pump_until(&mut rx, |rx| {
        rx.handler().commands().len() == 1 && rx.queued_frames(id) == 0
    });

    assert_eq!(read_response(&mut client), [0x01, 0x00, 0x00]);
    assert_eq!(
        rx.handler().events,
        vec![
            Event::Connected(peer),
            Event::Command(peer, Command::MotorSpeed(MotorSpeed::new(100, -50))),
        ]
    );
    assert!(rx.pending_header(id).is_none());
}

#[test]
fn test_disconnect_mid_header() {
    let mut rx = receiver();
    let (mut client, id) = connect(&mut rx);

    client.write_all(&[0x01, 0x00]).unwrap();
    pump(&mut rx, 5);
    // 两字节不足以构成帧头：既不读取也不断开
    assert!(rx.is_connected(id));
    assert!(rx.pending_header(id).is_none());

    drop(client);
    pump_until(&mut rx, |rx| !rx.is_connected(id));
    pump(&mut rx, 5);

    assert_eq!(rx.handler().disconnects(), 1);
    assert!(rx.handler().commands().is_empty());
    assert_eq!(rx.connection_count(), 0);
}

#[test]
fn test_zero_payload_command_dispatched_immediately() {
    let mut rx = receiver();
    let (mut client, id) = connect(&mut rx);

    client.write_all(&[0x02, 0x00, 0x00]).unwrap();
    pump_until(&mut rx, |rx| rx.queued_frames(id) == 0 && !rx.handler().commands().is_empty());

    assert_eq!(rx.handler().commands(), vec![Command::MotorStop]);
    assert_eq!(read_response(&mut client), [0x01, 0x00, 0x00]);
}

#[test]
fn test_handler_false_produces_false_response() {
    let mut rx = receiver();
    rx.handler_mut().reply = false;
    let (mut client, id) = connect(&mut rx);

    client
        .write_all(&Command::MotorSettings(MotorSettings::new(30)).encode_frame())
        .unwrap();
    pump_until(&mut rx, |rx| rx.queued_frames(id) == 0 && !rx.handler().commands().is_empty());

    assert_eq!(read_response(&mut client), [0x00, 0x00, 0x00]);
}

#[test]
fn test_pipelined_frames_answered_in_order() {
    let mut rx = receiver();
    let (mut client, _id) = connect(&mut rx);

    let mut bytes = Command::MotorStop.encode_frame();
    bytes.extend_from_slice(&[0x09, 0x00, 0x00]);
    bytes.extend_from_slice(&Command::MotorSpeed(MotorSpeed::new(1, 2)).encode_frame());
    client.write_all(&bytes).unwrap();

    pump_until_sent(&mut rx, 3);

    let mut responses = [0u8; 9];
    client.read_exact(&mut responses).unwrap();
    assert_eq!(responses, [1, 0, 0, 0, 0, 0, 1, 0, 0]);
    assert_eq!(
        rx.handler().commands(),
        vec![Command::MotorStop, Command::MotorSpeed(MotorSpeed::new(1, 2))]
    );
}

#[test]
fn test_disconnect_mid_payload() {
    let mut rx = receiver();
    let (mut client, id) = connect(&mut rx);

    client.write_all(&[0x03, 0x00, 0x04, 0x00, 0x00]).unwrap();
    pump_until(&mut rx, |rx| rx.pending_header(id).is_some());
    pump(&mut rx, 5);
    assert!(rx.is_connected(id));

    drop(client);
    pump_until(&mut rx, |rx| !rx.is_connected(id));
    pump(&mut rx, 5);

    assert_eq!(rx.handler().disconnects(), 1);
    assert!(rx.handler().commands().is_empty());
}

#[test]
fn test_outbound_queue_bounded_when_peer_does_not_read() {
    let mut rx = receiver();
    let (mut client, id) = connect(&mut rx);
    let total = MAX_QUEUED_FRAMES * 4;

    let bytes: Vec<u8> = (0..total).flat_map(|_| Command::MotorStop.encode_frame()).collect();
    client.write_all(&bytes).unwrap();

    let deadline = Instant::now() + Duration::from_secs(2);
    while rx.handler().commands().len() < total {
        assert!(Instant::now() < deadline, "commands not dispatched in time");
        rx.poll_once().unwrap();
        assert!(rx.queued_frames(id) <= MAX_QUEUED_FRAMES);
    }
    pump_until(&mut rx, |rx| rx.queued_frames(id) == 0);

    let mut responses = vec![0u8; total * 3];
    client.read_exact(&mut responses).unwrap();
    assert!(responses.chunks(3).all(|frame| frame == [0x01, 0x00, 0x00]));
    assert!(rx.is_connected(id));
}

// ============================================================
// 协议错误
// ============================================================

#[test]
fn test_unknown_command_keeps_connection() {
    let mut rx = receiver();
    let (mut client, id) = connect(&mut rx);

    client.write_all(&[0x09, 0x00, 0x02, 0xAA, 0xBB]).unwrap();
    pump_until_sent(&mut rx, 1);
    assert_eq!(read_response(&mut client), [0x00, 0x00, 0x00]);
    assert!(rx.is_connected(id));
    assert!(rx.handler().commands().is_empty());

    // 同一连接继续可用
    client.write_all(&Command::MotorStop.encode_frame()).unwrap();
    pump_until(&mut rx, |rx| rx.handler().commands().len() == 1 && rx.queued_frames(id) == 0);
    assert_eq!(read_response(&mut client), [0x01, 0x00, 0x00]);
}

#[test]
fn test_oversized_frame_closes_connection() {
    let mut rx = receiver();
    let (mut client, id) = connect(&mut rx);

    client.write_all(&[0x01, 0x07, 0xD0]).unwrap();
    pump_until(&mut rx, |rx| !rx.is_connected(id));

    assert_eq!(rx.handler().disconnects(), 1);
    assert!(rx.handler().commands().is_empty());
}

#[test]
fn test_malformed_payload_isolated_to_one_connection() {
    let mut rx = receiver();
    let (mut a, id_a) = connect(&mut rx);
    let (mut b, id_b) = connect(&mut rx);

    // B 先送出帧头，进入等待载荷状态
    b.write_all(&[0x01, 0x00, 0x08]).unwrap();
    pump_until(&mut rx, |rx| rx.pending_header(id_b).is_some());

    // A 发送长度错误的 MotorSpeed
    a.write_all(&[0x01, 0x00, 0x04, 0, 0, 0, 1]).unwrap();
    pump_until(&mut rx, |rx| !rx.is_connected(id_a));

    assert!(rx.is_connected(id_b));
    assert_eq!(rx.pending_header(id_b), Some(FrameHeader::new(0x01, 8)));
    assert_eq!(rx.queued_frames(id_b), 0);

    b.write_all(&MotorSpeed::new(3, 4).encode()).unwrap();
    pump_until(&mut rx, |rx| rx.handler().commands().len() == 1 && rx.queued_frames(id_b) == 0);
    assert_eq!(
        rx.handler().commands(),
        vec![Command::MotorSpeed(MotorSpeed::new(3, 4))]
    );
    assert_eq!(read_response(&mut b), [0x01, 0x00, 0x00]);
}

// ============================================================
// 拆除
// ============================================================

#[test]
fn test_teardown_is_idempotent() {
    let mut rx = receiver();
    let (client, id) = connect(&mut rx);

    assert!(rx.teardown(id));
    assert!(!rx.teardown(id));
    assert!(!rx.is_connected(id));
    assert_eq!(rx.queued_frames(id), 0);
    assert!(!rx.has_write_interest(id));
    // 显式拆除不触发断开回调
    assert_eq!(rx.handler().disconnects(), 0);

    drop(client);
    pump(&mut rx, 3);
    assert_eq!(rx.handler().disconnects(), 0);
}

#[test]
fn test_connection_ids_not_reused() {
    let mut rx = receiver();
    let (_a, id_a) = connect(&mut rx);
    rx.teardown(id_a);
    let (_b, id_b) = connect(&mut rx);
    assert_ne!(id_a, id_b);
}

// ============================================================
// 客户端
// ============================================================

#[test]
fn test_command_client_roundtrip() {
    let mut rx = receiver();
    let addr = rx.local_addr();
    let running = Arc::new(AtomicBool::new(true));

    let flag = running.clone();
    let server = thread::spawn(move || {
        while flag.load(Ordering::SeqCst) {
            rx.poll_once().unwrap();
        }
        rx
    });

    let client = CommandClient::new(addr).with_timeout(Duration::from_secs(2));
    assert!(client.send(&Command::MotorSpeed(MotorSpeed::new(100, -50))).unwrap());
    assert!(client.send(&Command::MotorStop).unwrap());

    running.store(false, Ordering::SeqCst);
    let rx = server.join().unwrap();
    assert_eq!(
        rx.handler().commands(),
        vec![
            Command::MotorSpeed(MotorSpeed::new(100, -50)),
            Command::MotorStop,
        ]
    );
}

#[test]
fn test_command_client_without_server() {
    let addr = {
        let rx = receiver();
        rx.local_addr()
    };
    let client = CommandClient::new(addr).with_timeout(Duration::from_millis(500));
    assert!(matches!(client.send(&Command::MotorStop), Err(ClientError::Io(_))));
}

// ============================================================
// 任意分片下的帧同步
// ============================================================

fn command_strategy() -> impl Strategy<Value = Command> {
    prop_oneof![
        (any::<i32>(), any::<i32>()).prop_map(|(l, r)| Command::MotorSpeed(MotorSpeed::new(l, r))),
        Just(Command::MotorStop),
        any::<i32>().prop_map(|d| Command::MotorSettings(MotorSettings::new(d))),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// 无论字节流如何分片，分发的命令序列与一次性发送相同
    #[test]
    fn prop_chunking_preserves_commands(
        commands in prop::collection::vec(command_strategy(), 1..6),
        chunk_sizes in prop::collection::vec(1usize..7, 1..40),
    ) {
        let bytes: Vec<u8> = commands.iter().flat_map(|c| c.encode_frame()).collect();

        let mut rx = receiver();
        let (mut client, id) = connect(&mut rx);

        let mut offset = 0;
        let mut sizes = chunk_sizes.iter().cycle();
        while offset < bytes.len() {
            let n = (*sizes.next().unwrap()).min(bytes.len() - offset);
            client.write_all(&bytes[offset..offset + n]).unwrap();
            offset += n;
            rx.poll_once().unwrap();
        }

        let expected = commands.len();
        pump_until(&mut rx, |rx| rx.handler().commands().len() == expected);

        prop_assert!(rx.is_connected(id));
        prop_assert_eq!(rx.handler().commands(), commands);
        prop_assert!(rx.pending_header(id).is_none());
    }
}
