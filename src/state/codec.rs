//! Little-endian state writer and bounds-checked reader

use super::envelope::{OperatorKind, RecordHeader, ENVELOPE_SIZE, KIND_OFFSET, PAYLOAD_SIZE_OFFSET};
use crate::checkpoint::{CheckpointError, CheckpointResult};
use crate::executor::{Rid, Tuple, TupleHeader};

/// Start of a record whose payload size is patched on `finish_record`.
#[derive(Debug, Clone, Copy)]
pub struct RecordMark {
    start: usize,
}

/// Appends encoded state to a byte buffer.
#[derive(Debug, Default)]
pub struct StateWriter {
    buf: Vec<u8>,
}

impl StateWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Writes an envelope with a zero payload size.
    pub fn begin_record(&mut self, header: &RecordHeader) -> RecordMark {
        let start = self.buf.len();
        self.put_u32(header.sql_id);
        self.put_u32(header.operator_id);
        self.put_u64(0);
        self.put_i64(header.wall_clock_micros);
        self.put_u16(header.kind.as_u16());
        self.put_bool(header.begin_complete);
        RecordMark { start }
    }

    /// Patches the payload size to the bytes written since `begin_record`.
    pub fn finish_record(&mut self, mark: RecordMark) {
        let payload = (self.buf.len() - mark.start - ENVELOPE_SIZE) as u64;
        let at = mark.start + PAYLOAD_SIZE_OFFSET;
        self.buf[at..at + 8].copy_from_slice(&payload.to_le_bytes());
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn put_bool(&mut self, v: bool) {
        self.buf.push(v as u8);
    }

    pub fn put_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Length-prefixed byte string
    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.put_u32(bytes.len() as u32);
        self.buf.extend_from_slice(bytes);
    }

    pub fn put_rid(&mut self, rid: Rid) {
        self.put_u32(rid.page_no);
        self.put_u32(rid.slot_no);
    }

    pub fn put_opt_rid(&mut self, rid: Option<Rid>) {
        match rid {
            Some(rid) => {
                self.put_u8(1);
                self.put_rid(rid);
            }
            None => self.put_u8(0),
        }
    }

    pub fn put_tuple(&mut self, tuple: &Tuple) {
        self.put_u64(tuple.header.txn_id);
        self.put_bool(tuple.header.deleted);
        self.put_rid(tuple.header.rollback);
        self.put_bytes(&tuple.data);
    }

    pub fn put_tuples<'a>(&mut self, tuples: impl ExactSizeIterator<Item = &'a Tuple>) {
        self.put_u32(tuples.len() as u32);
        for tuple in tuples {
            self.put_tuple(tuple);
        }
    }

    pub fn put_u32s(&mut self, values: &[u32]) {
        self.put_u32(values.len() as u32);
        for v in values {
            self.put_u32(*v);
        }
    }
}

/// Reads encoded state; every read is bounds-checked.
#[derive(Debug)]
pub struct StateReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> StateReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    /// Fails unless every byte has been consumed.
    pub fn expect_exhausted(&self, what: &str) -> CheckpointResult<()> {
        if self.is_exhausted() {
            Ok(())
        } else {
            Err(CheckpointError::corrupt(format!(
                "{}: declared {} bytes, consumed {}",
                what,
                self.buf.len(),
                self.pos
            )))
        }
    }

    fn take(&mut self, n: usize) -> CheckpointResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(CheckpointError::corrupt(format!(
                "Read of {} bytes at offset {} runs past {}-byte buffer",
                n,
                self.pos,
                self.buf.len()
            )));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> CheckpointResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    /// Kind tag of the record starting at the current position.
    pub fn peek_kind(&self) -> CheckpointResult<OperatorKind> {
        if self.remaining() < ENVELOPE_SIZE {
            return Err(CheckpointError::corrupt(format!(
                "Envelope needs {} bytes, {} remain",
                ENVELOPE_SIZE,
                self.remaining()
            )));
        }
        let at = self.pos + KIND_OFFSET;
        OperatorKind::from_u16(u16::from_le_bytes([self.buf[at], self.buf[at + 1]]))
    }

    /// Reads an envelope and returns a reader bounded to its payload.
    pub fn read_record(&mut self) -> CheckpointResult<(RecordHeader, StateReader<'a>)> {
        let kind = self.peek_kind()?;
        let sql_id = self.get_u32()?;
        let operator_id = self.get_u32()?;
        let payload_size = self.get_u64()?;
        let wall_clock_micros = self.get_i64()?;
        self.get_u16()?;
        let begin_complete = self.get_bool()?;

        let payload_size = usize::try_from(payload_size)
            .map_err(|_| CheckpointError::corrupt("Payload size overflows usize"))?;
        if self.remaining() < payload_size {
            return Err(CheckpointError::corrupt(format!(
                "Operator {} declares {} payload bytes, {} remain",
                operator_id,
                payload_size,
                self.remaining()
            )));
        }
        let payload = StateReader::new(self.take(payload_size)?);
        let header = RecordHeader {
            sql_id,
            operator_id,
            wall_clock_micros,
            kind,
            begin_complete,
        };
        Ok((header, payload))
    }

    pub fn get_u8(&mut self) -> CheckpointResult<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn get_bool(&mut self) -> CheckpointResult<bool> {
        match self.get_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(CheckpointError::corrupt(format!("Invalid flag byte {}", other))),
        }
    }

    pub fn get_u16(&mut self) -> CheckpointResult<u16> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    pub fn get_u32(&mut self) -> CheckpointResult<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    pub fn get_u64(&mut self) -> CheckpointResult<u64> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    pub fn get_i64(&mut self) -> CheckpointResult<i64> {
        Ok(i64::from_le_bytes(self.array()?))
    }

    pub fn get_bytes(&mut self) -> CheckpointResult<Vec<u8>> {
        let len = self.get_u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    pub fn get_rid(&mut self) -> CheckpointResult<Rid> {
        let page_no = self.get_u32()?;
        let slot_no = self.get_u32()?;
        Ok(Rid::new(page_no, slot_no))
    }

    pub fn get_opt_rid(&mut self) -> CheckpointResult<Option<Rid>> {
        if self.get_bool()? {
            Ok(Some(self.get_rid()?))
        } else {
            Ok(None)
        }
    }

    pub fn get_tuple(&mut self) -> CheckpointResult<Tuple> {
        let txn_id = self.get_u64()?;
        let deleted = self.get_bool()?;
        let rollback = self.get_rid()?;
        let data = self.get_bytes()?;
        Ok(Tuple {
            header: TupleHeader {
                txn_id,
                deleted,
                rollback,
            },
            data,
        })
    }

    pub fn get_tuples(&mut self) -> CheckpointResult<Vec<Tuple>> {
        let count = self.get_u32()?;
        let mut tuples = Vec::new();
        for _ in 0..count {
            tuples.push(self.get_tuple()?);
        }
        Ok(tuples)
    }

    pub fn get_u32s(&mut self) -> CheckpointResult<Vec<u32>> {
        let count = self.get_u32()? as usize;
        if self.remaining() < count.saturating_mul(4) {
            return Err(CheckpointError::corrupt(format!(
                "Array of {} u32 values runs past buffer",
                count
            )));
        }
        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            values.push(self.get_u32()?);
        }
        Ok(values)
    }
}
