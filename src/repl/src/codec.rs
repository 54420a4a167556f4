use std::time::Duration;
use storage::ReplLog;

use crate::error::ReplError;

/// Status lines exchanged during handshakes and batch acknowledgement
pub const REPLY_OK: &str = "+OK";
pub const REPLY_PONG: &str = "+PONG";

/// RESP simple-error reply line for a replication error
pub fn err_line(err: &ReplError) -> String {
    format!("-ERR {}", err)
}

/// Verb carried by every incremental batch frame
pub const APPLY_BINLOGS: &str = "applybinlogs";

/// Append a multi-bulk array header: `*{len}\r\n`
pub fn fmt_multi_bulk_len(buf: &mut Vec<u8>, len: usize) {
    buf.push(b'*');
    buf.extend_from_slice(len.to_string().as_bytes());
    buf.extend_from_slice(b"\r\n");
}

/// Append one bulk string: `${len}\r\n{data}\r\n`
pub fn fmt_bulk(buf: &mut Vec<u8>, data: &[u8]) {
    buf.push(b'$');
    buf.extend_from_slice(data.len().to_string().as_bytes());
    buf.extend_from_slice(b"\r\n");
    buf.extend_from_slice(data);
    buf.extend_from_slice(b"\r\n");
}

/// Frame one batch of binlog rows for the destination store.
///
/// Layout: array of `2 + 2N` bulks: the verb, the destination store id,
/// then the encoded (key, value) pair of each row in order.
pub fn encode_apply_binlogs(dst_store_id: u32, rows: &[ReplLog]) -> Vec<u8> {
    let mut buf = Vec::new();
    fmt_multi_bulk_len(&mut buf, 2 + rows.len() * 2);
    fmt_bulk(&mut buf, APPLY_BINLOGS.as_bytes());
    fmt_bulk(&mut buf, dst_store_id.to_string().as_bytes());
    for row in rows {
        let (key, value) = row.encode();
        fmt_bulk(&mut buf, &key);
        fmt_bulk(&mut buf, &value);
    }
    buf
}

/// Write timeout tier for a framed payload of the given size
pub fn write_timeout(payload_len: usize) -> Duration {
    if payload_len <= 1024 * 1024 {
        Duration::from_secs(1)
    } else if payload_len <= 10 * 1024 * 1024 {
        Duration::from_secs(2)
    } else {
        Duration::from_secs(4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage::RowOp;

    #[test]
    fn test_bulk_formatting() {
        let mut buf = Vec::new();
        fmt_multi_bulk_len(&mut buf, 3);
        fmt_bulk(&mut buf, b"ping");
        assert_eq!(buf, b"*3\r\n$4\r\nping\r\n");
    }

    #[test]
    fn test_apply_binlogs_frame_layout() {
        let rows = vec![
            ReplLog::new(10, 0, RowOp::Set { key: "a".to_string(), value: "1".to_string() }),
            ReplLog::new(11, 0, RowOp::Delete { key: "b".to_string() }),
        ];
        let frame = encode_apply_binlogs(5, &rows);

        // array of 2 + 2*2 bulks, starting with the verb and dst store id
        let head = b"*6\r\n$12\r\napplybinlogs\r\n$1\r\n5\r\n";
        assert_eq!(&frame[..head.len()], head.as_slice());

        // first bulk after the header is the 12-byte wire key of txn 10
        let (key, _) = rows[0].encode();
        let key_bulk_start = head.len();
        assert_eq!(&frame[key_bulk_start..key_bulk_start + 5], b"$12\r\n");
        assert_eq!(&frame[key_bulk_start + 5..key_bulk_start + 17], key.as_slice());
    }

    #[test]
    fn test_empty_batch_frame() {
        let frame = encode_apply_binlogs(0, &[]);
        assert_eq!(frame, b"*2\r\n$12\r\napplybinlogs\r\n$1\r\n0\r\n");
    }

    #[test]
    fn test_error_reply_lines() {
        assert_eq!(err_line(&ReplError::AdmissionFull), "-ERR workerpool full");
        assert_eq!(err_line(&ReplError::InvalidStore), "-ERR invalid storeId");
        assert_eq!(
            err_line(&ReplError::StaleOffset { first: 100, requested: 50 }),
            "-ERR invalid binlogPos"
        );
        assert_eq!(
            err_line(&ReplError::Backup("disk gone".to_string())),
            "-ERR backup failed:disk gone"
        );
    }

    #[test]
    fn test_write_timeout_tiers() {
        assert_eq!(write_timeout(512), Duration::from_secs(1));
        assert_eq!(write_timeout(1024 * 1024), Duration::from_secs(1));
        assert_eq!(write_timeout(1024 * 1024 + 1), Duration::from_secs(2));
        assert_eq!(write_timeout(10 * 1024 * 1024), Duration::from_secs(2));
        assert_eq!(write_timeout(10 * 1024 * 1024 + 1), Duration::from_secs(4));
    }
}
