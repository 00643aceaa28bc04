//! Loopback tests for the device channel and caller.
//!
//! Each test runs a scripted fake terminal on a background thread and drives
//! the client against it over a real TCP socket.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use rust_decimal_macros::dec;
use termgate_devproto::frame::{self, MessageType};
use termgate_devproto::{
    CallerConfig, DeviceChannel, DeviceGatewayCaller, DeviceRequest, Error,
};
use tokio_util::sync::CancellationToken;

const ACK: u8 = 0x02;
const NACK: u8 = 0x03;

/// Starts a fake terminal that serves one connection with `script`.
fn fake_terminal<T, F>(script: F) -> (u16, JoinHandle<T>)
where
    T: Send + 'static,
    F: FnOnce(TcpStream) -> T + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        script(stream)
    });
    (port, handle)
}

fn connected(port: u16, io_timeout: Duration) -> DeviceChannel {
    let mut channel = DeviceChannel::new("127.0.0.1", port).with_io_timeout(io_timeout);
    channel.connect().unwrap();
    channel
}

/// Reads DATA frames until the client hangs up, answering each with the
/// next byte from `replies` (nothing once exhausted). Returns frames seen.
fn answer_frames(mut stream: TcpStream, replies: &[u8]) -> usize {
    let mut seen = 0;
    while let Ok(data) = frame::decode(&mut stream) {
        assert_eq!(data.message_type, MessageType::Data);
        if let Some(reply) = replies.get(seen) {
            stream.write_all(&[*reply]).unwrap();
        }
        seen += 1;
    }
    seen
}

/// Blocks until the peer closes.
fn drain(stream: &mut TcpStream) {
    let mut buf = [0u8; 64];
    while matches!(stream.read(&mut buf), Ok(n) if n > 0) {}
}

fn fast_caller() -> DeviceGatewayCaller {
    DeviceGatewayCaller::new(CallerConfig {
        io_timeout: Duration::from_millis(300),
        poll_interval: Duration::from_millis(50),
        max_retries: 3,
    })
}

// ============================================================================
// DeviceChannel
// ============================================================================

#[test]
fn test_send_reliable_ack_first_attempt() {
    let (port, server) = fake_terminal(|stream| answer_frames(stream, &[ACK]));

    let mut channel = connected(port, Duration::from_secs(2));
    channel.send_reliable(b"{}", 3).unwrap();
    channel.close();

    assert_eq!(server.join().unwrap(), 1);
}

#[test]
fn test_send_reliable_always_nack_exhausts_retries() {
    let (port, server) = fake_terminal(|stream| answer_frames(stream, &[NACK; 8]));

    let mut channel = connected(port, Duration::from_secs(2));
    let err = channel.send_reliable(b"{}", 3).unwrap_err();
    channel.close();

    assert!(matches!(err, Error::Rejected { attempts: 3 }));
    assert_eq!(server.join().unwrap(), 3);
}

#[test]
fn test_send_reliable_ack_on_second_attempt() {
    let (port, server) = fake_terminal(|stream| answer_frames(stream, &[NACK, ACK]));

    let mut channel = connected(port, Duration::from_secs(2));
    channel.send_reliable(b"{}", 3).unwrap();
    channel.close();

    assert_eq!(server.join().unwrap(), 2);
}

#[test]
fn test_send_reliable_retries_on_silence() {
    let (port, server) = fake_terminal(|stream| answer_frames(stream, &[]));

    let mut channel = connected(port, Duration::from_millis(100));
    let err = channel.send_reliable(b"{}", 2).unwrap_err();
    channel.close();

    assert!(matches!(err, Error::Rejected { attempts: 2 }));
    assert_eq!(server.join().unwrap(), 2);
}

#[test]
fn test_send_reliable_unexpected_byte_retries() {
    let (port, server) = fake_terminal(|stream| answer_frames(stream, &[0x7F, ACK]));

    let mut channel = connected(port, Duration::from_secs(2));
    channel.send_reliable(b"{}", 3).unwrap();
    channel.close();

    assert_eq!(server.join().unwrap(), 2);
}

#[test]
fn test_send_reliable_dead_link_aborts() {
    let (port, server) = fake_terminal(|mut stream| {
        frame::decode(&mut stream).unwrap();
        // Hang up without replying.
    });

    let mut channel = connected(port, Duration::from_secs(2));
    let err = channel.send_reliable(b"{}", 3).unwrap_err();
    server.join().unwrap();

    assert!(
        matches!(err, Error::ConnectionClosed | Error::Io(_)),
        "unexpected error: {:?}",
        err
    );
}

#[test]
fn test_receive_acks_valid_frame() {
    let (port, server) = fake_terminal(|mut stream| {
        stream
            .write_all(&frame::encode(MessageType::Data, b"approved").unwrap())
            .unwrap();
        let mut reply = [0u8; 1];
        stream.read_exact(&mut reply).unwrap();
        reply[0]
    });

    let mut channel = connected(port, Duration::from_secs(2));
    assert_eq!(channel.receive().unwrap(), b"approved");

    assert_eq!(server.join().unwrap(), ACK);
}

#[test]
fn test_receive_wrong_version_nacks_before_close() {
    let (port, server) = fake_terminal(|mut stream| {
        let mut bytes = frame::encode(MessageType::Data, b"approved").unwrap();
        bytes[1] = 0x02;
        stream.write_all(&bytes).unwrap();

        let mut rest = Vec::new();
        stream.read_to_end(&mut rest).unwrap();
        rest
    });

    let mut channel = connected(port, Duration::from_secs(2));
    let err = channel.receive().unwrap_err();
    channel.close();

    assert!(matches!(
        err,
        Error::UnsupportedVersion {
            expected: 0x01,
            received: 0x02
        }
    ));
    assert_eq!(server.join().unwrap(), vec![NACK]);
}

#[test]
fn test_poll_skips_corrupt_frame() {
    let (port, server) = fake_terminal(|mut stream| {
        let mut corrupt = frame::encode(MessageType::Data, b"garbled").unwrap();
        corrupt[frame::HEADER_LEN] ^= 0x01;
        stream.write_all(&corrupt).unwrap();
        stream
            .write_all(&frame::encode(MessageType::Data, b"approved").unwrap())
            .unwrap();

        let mut replies = [0u8; 2];
        stream.read_exact(&mut replies).unwrap();
        replies
    });

    let mut channel = connected(port, Duration::from_secs(2));
    let payload = channel
        .poll_for_response(
            Duration::from_secs(5),
            Duration::from_millis(50),
            &CancellationToken::new(),
        )
        .unwrap();

    assert_eq!(payload.as_deref(), Some(&b"approved"[..]));
    assert_eq!(server.join().unwrap(), [NACK, ACK]);
}

#[test]
fn test_poll_times_out_without_cancel() {
    let (port, server) = fake_terminal(|mut stream| drain(&mut stream));

    let mut channel = connected(port, Duration::from_secs(2));
    let cancel = CancellationToken::new();
    let started = Instant::now();
    let payload = channel
        .poll_for_response(Duration::from_secs(1), Duration::from_millis(500), &cancel)
        .unwrap();
    let elapsed = started.elapsed();
    channel.close();
    server.join().unwrap();

    assert!(payload.is_none());
    assert!(!cancel.is_cancelled());
    assert!(elapsed >= Duration::from_secs(1), "returned after {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(3), "returned after {:?}", elapsed);
}

#[test]
fn test_poll_cancel_returns_within_interval() {
    let (port, server) = fake_terminal(|mut stream| drain(&mut stream));

    let mut channel = connected(port, Duration::from_secs(2));
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(200));
        trigger.cancel();
        Instant::now()
    });

    let payload = channel
        .poll_for_response(Duration::from_secs(30), Duration::from_millis(500), &cancel)
        .unwrap();
    let returned = Instant::now();
    let cancelled_at = canceller.join().unwrap();
    channel.close();
    server.join().unwrap();

    assert!(payload.is_none());
    assert!(cancel.is_cancelled());
    assert!(
        returned.duration_since(cancelled_at) <= Duration::from_millis(700),
        "poll outlived cancel by {:?}",
        returned.duration_since(cancelled_at)
    );
}

/// Writes the first bytes of a frame and then stalls until the client leaves.
fn stalled_terminal() -> (u16, JoinHandle<()>) {
    fake_terminal(|mut stream| {
        let partial = frame::encode(MessageType::Data, b"approved").unwrap();
        stream.write_all(&partial[..3]).unwrap();
        drain(&mut stream);
    })
}

#[test]
fn test_poll_cancel_during_partial_frame() {
    let (port, server) = stalled_terminal();

    // The socket timeout is far longer than the cancel delay.
    let mut channel = connected(port, Duration::from_secs(5));
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(200));
        trigger.cancel();
        Instant::now()
    });

    let payload = channel
        .poll_for_response(Duration::from_secs(30), Duration::from_millis(50), &cancel)
        .unwrap();
    let returned = Instant::now();
    let cancelled_at = canceller.join().unwrap();
    channel.close();
    server.join().unwrap();

    assert!(payload.is_none());
    assert!(
        returned.duration_since(cancelled_at) <= Duration::from_millis(500),
        "poll outlived cancel by {:?}",
        returned.duration_since(cancelled_at)
    );
}

#[test]
fn test_poll_timeout_during_partial_frame() {
    let (port, server) = stalled_terminal();

    let mut channel = connected(port, Duration::from_secs(5));
    let cancel = CancellationToken::new();
    let started = Instant::now();
    let payload = channel
        .poll_for_response(Duration::from_millis(300), Duration::from_millis(50), &cancel)
        .unwrap();
    let elapsed = started.elapsed();
    channel.close();
    server.join().unwrap();

    assert!(payload.is_none());
    assert!(!cancel.is_cancelled());
    assert!(elapsed < Duration::from_millis(1500), "returned after {:?}", elapsed);
}

// ============================================================================
// DeviceGatewayCaller
// ============================================================================

#[test]
fn test_caller_success() {
    let (port, server) = fake_terminal(|mut stream| {
        let request = frame::decode(&mut stream).unwrap();
        stream.write_all(&[ACK]).unwrap();

        stream
            .write_all(&frame::encode(MessageType::Data, br#"{"result":"APPROVED"}"#).unwrap())
            .unwrap();
        let mut reply = [0u8; 1];
        stream.read_exact(&mut reply).unwrap();
        assert_eq!(reply[0], ACK);

        serde_json::from_slice::<serde_json::Value>(&request.payload).unwrap()
    });

    let request = DeviceRequest::new("127.0.0.1", port, "k1", dec!(12.50), "credit");
    let result = fast_caller().submit(&request);

    assert!(result.success, "{:?}", result);
    assert_eq!(result.response.as_deref(), Some(r#"{"result":"APPROVED"}"#));
    assert_eq!(result.error_message, None);

    let sent = server.join().unwrap();
    assert_eq!(sent["MerchantKey"], "k1");
    assert_eq!(sent["Amount"], 12.5);
    assert_eq!(sent["PaymentType"], "credit");
}

#[test]
fn test_caller_connect_failure() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let request = DeviceRequest::new("127.0.0.1", port, "k1", dec!(1), "credit");
    let result = fast_caller().submit(&request);

    assert!(!result.success);
    assert_eq!(
        result.error_message,
        Some(format!("Unable to connect to device at 127.0.0.1:{}", port))
    );
}

#[test]
fn test_caller_send_failure() {
    let (port, server) = fake_terminal(|stream| answer_frames(stream, &[NACK; 8]));

    let request = DeviceRequest::new("127.0.0.1", port, "k1", dec!(1), "credit");
    let result = fast_caller().submit(&request);

    assert!(!result.success);
    assert_eq!(
        result.error_message.as_deref(),
        Some("Failed to send message to terminal")
    );
    assert_eq!(server.join().unwrap(), 3);
}

#[test]
fn test_caller_timeout_closes_channel() {
    let (port, server) = fake_terminal(|mut stream| {
        frame::decode(&mut stream).unwrap();
        stream.write_all(&[ACK]).unwrap();
        let started = Instant::now();
        drain(&mut stream);
        started.elapsed()
    });

    let request = DeviceRequest::new("127.0.0.1", port, "k1", dec!(1), "credit")
        .with_timeout(Duration::from_secs(1));
    let result = fast_caller().submit(&request);

    assert!(result.timed_out);
    assert!(!result.was_cancelled);
    assert_eq!(
        result.error_message.as_deref(),
        Some("Payment timed out after 1 seconds")
    );
    // The terminal saw the socket close once the timeout elapsed.
    assert!(server.join().unwrap() < Duration::from_secs(3));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_caller_async_cancel() {
    let (port, server) = fake_terminal(|mut stream| {
        frame::decode(&mut stream).unwrap();
        stream.write_all(&[ACK]).unwrap();
        drain(&mut stream);
    });

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let request = DeviceRequest::new("127.0.0.1", port, "k1", dec!(1), "credit");
    let started = Instant::now();
    let result = fast_caller().submit_async(request, cancel).await;

    assert!(result.was_cancelled, "{:?}", result);
    assert!(!result.timed_out);
    assert_eq!(
        result.error_message.as_deref(),
        Some("Payment process was cancelled")
    );
    assert!(started.elapsed() < Duration::from_secs(5));
    tokio::task::spawn_blocking(move || server.join().unwrap())
        .await
        .unwrap();
}
