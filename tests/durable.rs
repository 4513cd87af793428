use std::fs::OpenOptions;
use std::io::Seek;
use std::io::SeekFrom;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use dur_ringbuf::DurableRingBuffer;
use dur_ringbuf::Error;
use dur_ringbuf::MAX_BATCH;

fn init_logs() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn ring_path(dir: &tempfile::TempDir) -> PathBuf {
    dir.path().join("ring")
}

fn open(path: &Path, size_kib: usize) -> DurableRingBuffer {
    DurableRingBuffer::open(path, size_kib).unwrap()
}

#[test]
fn test_create_push_pop() {
    init_logs();
    let dir = tempfile::tempdir().unwrap();
    let mut buffer = open(&ring_path(&dir), 1);

    buffer.push_one(b"hello");

    assert_eq!(buffer.pop_one(), Some(&b"hello"[..]));
    assert_eq!(buffer.pop_one(), None);
    buffer.close().unwrap();
}

#[test]
fn test_reopen_resumes_unread_packets() {
    init_logs();
    let dir = tempfile::tempdir().unwrap();
    let path = ring_path(&dir);

    let mut buffer = open(&path, 1);
    buffer.push_one(b"hello");
    buffer.close().unwrap();

    let mut buffer = open(&path, 1);
    assert_eq!(buffer.pop_one(), Some(&b"hello"[..]));
    assert_eq!(buffer.pop_one(), None);
    buffer.close().unwrap();
}

#[test]
fn test_uncommitted_read_is_redelivered() {
    let dir = tempfile::tempdir().unwrap();
    let path = ring_path(&dir);

    let mut buffer = open(&path, 1);
    buffer.push_one(b"first");
    buffer.push_one(b"second");
    // a read is committed by the next pop; closing before that behaves
    // like a crash
    assert_eq!(buffer.pop_one(), Some(&b"first"[..]));
    buffer.close().unwrap();

    let mut buffer = open(&path, 1);
    assert_eq!(buffer.pop_one(), Some(&b"first"[..]));
    assert_eq!(buffer.pop_one(), Some(&b"second"[..]));
    assert_eq!(buffer.pop_one(), None);
    buffer.close().unwrap();
}

#[test]
fn test_committed_read_is_not_redelivered() {
    let dir = tempfile::tempdir().unwrap();
    let path = ring_path(&dir);

    let mut buffer = open(&path, 1);
    buffer.push_one(b"first");
    buffer.push_one(b"second");
    assert_eq!(buffer.pop_one(), Some(&b"first"[..]));
    assert_eq!(buffer.pop_one(), Some(&b"second"[..]));
    buffer.close().unwrap();

    // the pop of "second" committed "first" only
    let mut buffer = open(&path, 1);
    assert_eq!(buffer.pop_one(), Some(&b"second"[..]));
    assert_eq!(buffer.pop_one(), None);
    buffer.close().unwrap();
}

#[test]
fn test_reopen_after_drain_does_not_redeliver() {
    let dir = tempfile::tempdir().unwrap();
    let path = ring_path(&dir);

    let mut buffer = open(&path, 1);
    buffer.push_one(b"first");
    assert_eq!(buffer.pop_one(), Some(&b"first"[..]));
    assert_eq!(buffer.pop_one(), None); // commits the read
    buffer.close().unwrap();

    // the buffer never wrapped: pushing after reopen must deliver only the
    // new packet, not the committed one still sitting at offset 0
    let mut buffer = open(&path, 1);
    buffer.push_one(b"second");
    assert_eq!(buffer.pop_one(), Some(&b"second"[..]));
    assert_eq!(buffer.pop_one(), None);
    buffer.close().unwrap();
}

#[test]
fn test_flush_then_close() {
    let dir = tempfile::tempdir().unwrap();
    let path = ring_path(&dir);

    let mut buffer = open(&path, 1);
    buffer.push_one(b"durable");
    buffer.flush().unwrap();
    buffer.close().unwrap();

    let mut buffer = open(&path, 1);
    assert_eq!(buffer.pop_one(), Some(&b"durable"[..]));
    buffer.close().unwrap();
}

#[test]
fn test_push_n_pop_n() {
    let dir = tempfile::tempdir().unwrap();
    let mut buffer = open(&ring_path(&dir), 1);

    buffer.push_n(&[b"a".as_slice(), b"bb".as_slice(), b"ccc".as_slice()]);

    let packets = buffer.pop_n(2);
    let popped: Vec<Vec<u8>> = packets.iter().map(|p| p.to_vec()).collect();
    assert_eq!(popped, vec![b"a".to_vec(), b"bb".to_vec()]);

    let packets = buffer.pop_n(2);
    assert_eq!(packets.len(), 1);
    assert_eq!(packets.get(0), Some(&b"ccc"[..]));

    assert!(buffer.pop_n(MAX_BATCH).is_empty());
    buffer.close().unwrap();
}

#[test]
fn test_resume_across_wrap() {
    init_logs();
    let dir = tempfile::tempdir().unwrap();
    let path = ring_path(&dir);

    // 1 KiB file leaves a 1008-byte data span: nine 100-byte packets per
    // lap, the tenth wraps
    let mut buffer = open(&path, 1);
    for i in 0..9u8 {
        buffer.push_one(&[i; 100]);
    }
    assert_eq!(buffer.pop_n(MAX_BATCH).len(), 9);
    assert!(buffer.pop_n(MAX_BATCH).is_empty()); // commit
    buffer.push_one(&[9u8; 100]);
    buffer.close().unwrap();

    let mut buffer = open(&path, 1);
    let packets = buffer.pop_n(MAX_BATCH);
    assert_eq!(packets.len(), 1);
    assert_eq!(packets.get(0), Some(&[9u8; 100][..]));
    buffer.close().unwrap();
}

#[test]
fn test_drop_oldest_when_full() {
    let dir = tempfile::tempdir().unwrap();
    let mut buffer = open(&ring_path(&dir), 1);

    // never popping: the writer laps the repelled reader again and again
    for i in 0..50u8 {
        buffer.push_one(&[i; 100]);
    }

    let packets = buffer.pop_n(MAX_BATCH);
    let tags: Vec<u8> = packets.iter().map(|p| p[0]).collect();
    assert_eq!(tags, vec![45, 46, 47, 48, 49]);
    for packet in packets.iter() {
        assert_eq!(packet.len(), 100);
        let tag = packet[0];
        assert!(packet.iter().all(|&b| b == tag));
    }
    buffer.close().unwrap();
}

#[test]
fn test_rejects_unknown_version() {
    let dir = tempfile::tempdir().unwrap();
    let path = ring_path(&dir);

    open(&path, 1).close().unwrap();

    let mut file = OpenOptions::new().write(true).open(&path).unwrap();
    file.seek(SeekFrom::Start(0)).unwrap();
    file.write_all(&9u32.to_le_bytes()).unwrap();
    drop(file);

    let result = DurableRingBuffer::open(&path, 1);
    assert!(matches!(
        result,
        Err(Error::UnsupportedVersion { version: 9, .. })
    ));
}

#[test]
fn test_rejects_undersized_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = ring_path(&dir);

    std::fs::write(&path, [0u8; 8]).unwrap();

    let result = DurableRingBuffer::open(&path, 1);
    assert!(matches!(result, Err(Error::FileTooSmall { .. })));
}

#[test]
#[should_panic(expected = "too large")]
fn test_oversized_packet_panics() {
    let dir = tempfile::tempdir().unwrap();
    let mut buffer = open(&ring_path(&dir), 1);

    // data span is 1008 bytes, so the limit is 1006
    buffer.push_one(&[0u8; 1007]);
}
