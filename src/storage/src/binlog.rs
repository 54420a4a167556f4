use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use log::info;

use crate::error::StorageError;

/// Binary binlog format constants
const BINLOG_MAGIC: &[u8; 4] = b"FBLG";
const BINLOG_VERSION: u8 = 1;

/// Operation types
const OP_SET: u8 = 1;
const OP_DELETE: u8 = 2;

/// Header size: magic(4) + version(1) + op(1) + txn_id(8) + local_id(4) + key_len(4) + value_len(4) = 26 bytes
const HEADER_SIZE: usize = 26;
/// CRC32 size
const CRC_SIZE: usize = 4;

/// Wire key size: txn_id(8) + local_id(4), big-endian
pub const WIRE_KEY_SIZE: usize = 12;

/// Key of one binlog row.
///
/// `txn_id` is monotonic per store; all rows of one transaction share it
/// and are ordered by `local_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ReplLogKey {
    pub txn_id: u64,
    pub local_id: u32,
}

/// One replicated write operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowOp {
    Set { key: String, value: String },
    Delete { key: String },
}

impl RowOp {
    fn op_code(&self) -> u8 {
        match self {
            RowOp::Set { .. } => OP_SET,
            RowOp::Delete { .. } => OP_DELETE,
        }
    }
}

/// Value of one binlog row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplLogValue {
    pub op: RowOp,
}

impl ReplLogValue {
    /// Byte length of the operation payload (drives batch byte accounting)
    pub fn payload_len(&self) -> usize {
        match &self.op {
            RowOp::Set { value, .. } => value.len(),
            RowOp::Delete { .. } => 0,
        }
    }
}

/// One binlog row, the unit of replication
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplLog {
    key: ReplLogKey,
    value: ReplLogValue,
}

impl ReplLog {
    pub fn new(txn_id: u64, local_id: u32, op: RowOp) -> Self {
        ReplLog {
            key: ReplLogKey { txn_id, local_id },
            value: ReplLogValue { op },
        }
    }

    pub fn key(&self) -> &ReplLogKey {
        &self.key
    }

    pub fn value(&self) -> &ReplLogValue {
        &self.value
    }

    /// Encode into the opaque (key bytes, value bytes) pair shipped on the wire.
    ///
    /// The key is fixed-size big-endian so rows sort bytewise in
    /// (txn_id, local_id) order on the receiving side.
    pub fn encode(&self) -> (Vec<u8>, Vec<u8>) {
        let mut key = Vec::with_capacity(WIRE_KEY_SIZE);
        key.extend_from_slice(&self.key.txn_id.to_be_bytes());
        key.extend_from_slice(&self.key.local_id.to_be_bytes());

        let mut value = Vec::new();
        value.push(self.value.op.op_code());
        match &self.value.op {
            RowOp::Set { key: k, value: v } => {
                value.extend_from_slice(&(k.len() as u32).to_be_bytes());
                value.extend_from_slice(k.as_bytes());
                value.extend_from_slice(v.as_bytes());
            }
            RowOp::Delete { key: k } => {
                value.extend_from_slice(&(k.len() as u32).to_be_bytes());
                value.extend_from_slice(k.as_bytes());
            }
        }

        (key, value)
    }

    /// Decode a (key bytes, value bytes) pair produced by `encode`
    pub fn decode_kv(key: &[u8], value: &[u8]) -> Result<Self, StorageError> {
        if key.len() != WIRE_KEY_SIZE {
            return Err(StorageError::Corrupt(format!(
                "wire key must be {} bytes, got {}",
                WIRE_KEY_SIZE,
                key.len()
            )));
        }
        let txn_id = u64::from_be_bytes(
            key[0..8]
                .try_into()
                .map_err(|_| StorageError::Corrupt("short wire key".to_string()))?,
        );
        let local_id = u32::from_be_bytes(
            key[8..12]
                .try_into()
                .map_err(|_| StorageError::Corrupt("short wire key".to_string()))?,
        );

        if value.len() < 5 {
            return Err(StorageError::Corrupt("wire value too short".to_string()));
        }
        let op_code = value[0];
        let key_len = u32::from_be_bytes(
            value[1..5]
                .try_into()
                .map_err(|_| StorageError::Corrupt("short wire value".to_string()))?,
        ) as usize;
        if value.len() < 5 + key_len {
            return Err(StorageError::Corrupt("wire value truncated".to_string()));
        }
        let row_key = String::from_utf8_lossy(&value[5..5 + key_len]).to_string();

        let op = match op_code {
            OP_SET => RowOp::Set {
                key: row_key,
                value: String::from_utf8_lossy(&value[5 + key_len..]).to_string(),
            },
            OP_DELETE => RowOp::Delete { key: row_key },
            other => {
                return Err(StorageError::Corrupt(format!("unknown operation: {}", other)));
            }
        };

        Ok(ReplLog::new(txn_id, local_id, op))
    }

    /// Encode to the binary on-disk record format
    pub fn encode_record(&self) -> Vec<u8> {
        let (row_key, row_value) = match &self.value.op {
            RowOp::Set { key, value } => (key.as_bytes(), value.as_bytes()),
            RowOp::Delete { key } => (key.as_bytes(), &[] as &[u8]),
        };

        let mut buf = Vec::with_capacity(HEADER_SIZE + row_key.len() + row_value.len() + CRC_SIZE);

        buf.extend_from_slice(BINLOG_MAGIC);
        buf.push(BINLOG_VERSION);
        buf.push(self.value.op.op_code());
        buf.extend_from_slice(&self.key.txn_id.to_le_bytes());
        buf.extend_from_slice(&self.key.local_id.to_le_bytes());
        buf.extend_from_slice(&(row_key.len() as u32).to_le_bytes());
        buf.extend_from_slice(&(row_value.len() as u32).to_le_bytes());
        buf.extend_from_slice(row_key);
        buf.extend_from_slice(row_value);

        // CRC32 over everything before the CRC itself
        let crc = crc32fast::hash(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());

        buf
    }

    /// Decode one record from the on-disk format, returning the record and
    /// the number of bytes consumed
    pub fn decode_record(data: &[u8]) -> Result<(Self, usize), StorageError> {
        if data.len() < HEADER_SIZE + CRC_SIZE {
            return Err(StorageError::Corrupt("record too short".to_string()));
        }

        if &data[0..4] != BINLOG_MAGIC {
            return Err(StorageError::Corrupt("invalid magic".to_string()));
        }

        let version = data[4];
        if version != BINLOG_VERSION {
            return Err(StorageError::Corrupt(format!(
                "unsupported binlog version: {}",
                version
            )));
        }

        let op = data[5];
        let txn_id = u64::from_le_bytes(
            data[6..14]
                .try_into()
                .map_err(|_| StorageError::Corrupt("short header".to_string()))?,
        );
        let local_id = u32::from_le_bytes(
            data[14..18]
                .try_into()
                .map_err(|_| StorageError::Corrupt("short header".to_string()))?,
        );
        let key_len = u32::from_le_bytes(
            data[18..22]
                .try_into()
                .map_err(|_| StorageError::Corrupt("short header".to_string()))?,
        ) as usize;
        let value_len = u32::from_le_bytes(
            data[22..26]
                .try_into()
                .map_err(|_| StorageError::Corrupt("short header".to_string()))?,
        ) as usize;

        let total_len = HEADER_SIZE + key_len + value_len + CRC_SIZE;
        if data.len() < total_len {
            return Err(StorageError::Corrupt("record truncated".to_string()));
        }

        let stored_crc = u32::from_le_bytes(
            data[total_len - CRC_SIZE..total_len]
                .try_into()
                .map_err(|_| StorageError::Corrupt("short record".to_string()))?,
        );
        let calculated_crc = crc32fast::hash(&data[..total_len - CRC_SIZE]);
        if stored_crc != calculated_crc {
            return Err(StorageError::Corrupt(format!(
                "CRC mismatch: stored={}, calculated={}",
                stored_crc, calculated_crc
            )));
        }

        let mut offset = HEADER_SIZE;
        let row_key = String::from_utf8_lossy(&data[offset..offset + key_len]).to_string();
        offset += key_len;

        let op = match op {
            OP_SET => RowOp::Set {
                key: row_key,
                value: String::from_utf8_lossy(&data[offset..offset + value_len]).to_string(),
            },
            OP_DELETE => RowOp::Delete { key: row_key },
            other => {
                return Err(StorageError::Corrupt(format!("unknown operation: {}", other)));
            }
        };

        Ok((
            ReplLog::new(txn_id, local_id, op),
            total_len,
        ))
    }
}

/// Append-only writer for a store's binlog file
pub struct BinlogWriter {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl BinlogWriter {
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(BinlogWriter {
            path,
            writer: BufWriter::new(file),
        })
    }

    /// Append one row and flush it to the file
    pub fn append(&mut self, log: &ReplLog) -> io::Result<()> {
        self.writer.write_all(&log.encode_record())?;
        self.writer.flush()
    }

    /// Append all rows of one transaction in a single flush
    pub fn append_all(&mut self, logs: &[ReplLog]) -> io::Result<()> {
        for log in logs {
            self.writer.write_all(&log.encode_record())?;
        }
        self.writer.flush()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Read all records from a binlog file.
///
/// A corrupt record is skipped by scanning forward for the next magic,
/// so a torn tail does not lose the preceding history.
pub fn read_binlog<P: AsRef<Path>>(path: P) -> io::Result<Vec<ReplLog>> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(Vec::new());
    }

    let mut file = File::open(path)?;
    let file_size = file.metadata()?.len() as usize;
    if file_size == 0 {
        return Ok(Vec::new());
    }

    let mut data = vec![0u8; file_size];
    file.read_exact(&mut data)?;

    let mut entries = Vec::new();
    let mut offset = 0;

    while offset < data.len() {
        match ReplLog::decode_record(&data[offset..]) {
            Ok((entry, consumed)) => {
                entries.push(entry);
                offset += consumed;
            }
            Err(e) => {
                info!("Skipping corrupted binlog record at offset {}: {}", offset, e);
                offset += 1;
                while offset + 4 <= data.len() {
                    if &data[offset..offset + 4] == BINLOG_MAGIC {
                        break;
                    }
                    offset += 1;
                }
            }
        }
    }

    Ok(entries)
}
