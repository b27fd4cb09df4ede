use anyhow::{bail, Result};

use crate::types::{PackType, TagClass};
use crate::varint::{read_varint, zigzag_decode};

struct Frame {
    id_last: u32,
}

impl Frame {
    fn new() -> Self {
        Self { id_last: 0 }
    }
}

/// A single decoded tag: which field id it belongs to, its type, and its
/// raw (not-yet-zigzag-decoded) value bits.
#[derive(Clone, Copy)]
struct Tag {
    id: u32,
    pack_type: PackType,
    value: u64,
}

/// Reader side of the pack codec (§4.3). Mirrors `PackWriter`'s id-delta
/// bookkeeping: a requested id greater than the next tag's id means every
/// id in between is NULL.
pub struct PackReader<'a> {
    buf: &'a [u8],
    pos: usize,
    stack: Vec<Frame>,
}

impl<'a> PackReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            stack: vec![Frame::new()],
        }
    }

    fn top(&mut self) -> &mut Frame {
        self.stack.last_mut().expect("pack reader stack underflow")
    }

    /// Decodes the next tag, advancing past the tag byte and any id-delta /
    /// value varints. Sized fields (str/bin/pack) still need their payload
    /// read separately via [`Self::read_sized`]. Updates `id_last`
    /// unconditionally; callers that need to backtrack on overshoot must
    /// save and restore both `pos` and `id_last` themselves.
    fn read_tag_next(&mut self) -> Result<Option<Tag>> {
        if self.pos >= self.buf.len() {
            bail!("format error: buffer underflow reading tag");
        }
        let tag = self.buf[self.pos];
        self.pos += 1;
        if tag == 0 {
            return Ok(None);
        }

        let mut code = (tag >> 4) as u64;
        if code == 0xF {
            code = 0xF + read_varint(self.buf, &mut self.pos)?;
        }
        let pack_type = PackType::from_code(code)?;

        let tag_id: u64;
        let value: u64;

        match pack_type.class() {
            TagClass::IntegerMultiBit => {
                if tag & 0x8 == 0 {
                    // value fit in a single bit (0 or 1)
                    value = ((tag >> 2) & 0x1) as u64;
                    let mut delta = (tag & 0x1) as u64;
                    if tag & 0x2 != 0 {
                        delta |= read_varint(self.buf, &mut self.pos)? << 1;
                    }
                    tag_id = delta;
                } else {
                    let mut delta = (tag & 0x3) as u64;
                    if tag & 0x4 != 0 {
                        delta |= read_varint(self.buf, &mut self.pos)? << 2;
                    }
                    tag_id = delta;
                    value = read_varint(self.buf, &mut self.pos)?;
                }
            }
            TagClass::SingleBit => {
                value = ((tag >> 3) & 0x1) as u64;
                let mut delta = (tag & 0x3) as u64;
                if tag & 0x4 != 0 {
                    delta |= read_varint(self.buf, &mut self.pos)? << 2;
                }
                tag_id = delta;
            }
            TagClass::Container => {
                let mut delta = (tag & 0x7) as u64;
                if tag & 0x8 != 0 {
                    delta |= read_varint(self.buf, &mut self.pos)? << 3;
                }
                tag_id = delta;
                value = 0;
            }
        }

        let id = self.top().id_last + tag_id as u32 + 1;
        self.top().id_last = id;

        Ok(Some(Tag {
            id,
            pack_type,
            value,
        }))
    }

    /// Reads a length-prefixed byte slice following a `Str`/`Bin`/`Pack` tag
    /// whose value bit indicated data is present.
    fn read_sized(&mut self) -> Result<&'a [u8]> {
        let len = read_varint(self.buf, &mut self.pos)? as usize;
        if self.pos + len > self.buf.len() {
            bail!("format error: sized field runs past end of buffer");
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    /// Skips a decoded tag's trailing payload (sized data, or an entire
    /// nested container) without returning it. Used by `find` when walking
    /// past fields that exist but weren't the one asked for.
    fn skip_payload(&mut self, tag: &Tag) -> Result<()> {
        if tag.pack_type.has_size() {
            self.read_sized()?;
        } else if matches!(tag.pack_type, PackType::Array | PackType::Obj) {
            self.stack.push(Frame::new());
            self.end()?;
        }
        Ok(())
    }

    /// Looks up field `id`. Returns `None` if a later field id (or the
    /// container terminator) is encountered first, meaning this field was
    /// skipped on write (NULL). Fields with a lower id that aren't the one
    /// requested are transparently skipped over, including their payload.
    fn find(&mut self, id: u32, expect: PackType) -> Result<Option<Tag>> {
        loop {
            let next_id = self.top().id_last + 1;
            if next_id > id {
                return Ok(None);
            }
            let save_pos = self.pos;
            let save_id_last = self.top().id_last;

            let tag = match self.read_tag_next()? {
                None => {
                    self.pos = save_pos;
                    return Ok(None);
                }
                Some(tag) => tag,
            };

            if tag.id == id {
                if tag.pack_type != expect {
                    bail!(
                        "format error: field {id} has type {:?}, expected {:?}",
                        tag.pack_type,
                        expect
                    );
                }
                return Ok(Some(tag));
            }

            if tag.id > id {
                self.pos = save_pos;
                self.top().id_last = save_id_last;
                return Ok(None);
            }

            // tag.id < id: a field we don't care about right now. Skip its
            // payload (if any) and keep looking.
            self.skip_payload(&tag)?;
        }
    }

    pub fn read_bool(&mut self, id: u32, default: bool) -> Result<bool> {
        Ok(match self.find(id, PackType::Bool)? {
            Some(tag) => tag.value != 0,
            None => default,
        })
    }

    pub fn read_i32(&mut self, id: u32) -> Result<Option<i32>> {
        Ok(self
            .find(id, PackType::I32)?
            .map(|tag| zigzag_decode(tag.value) as i32))
    }

    pub fn read_i64(&mut self, id: u32) -> Result<Option<i64>> {
        Ok(self
            .find(id, PackType::I64)?
            .map(|tag| zigzag_decode(tag.value)))
    }

    pub fn read_u32(&mut self, id: u32) -> Result<Option<u32>> {
        Ok(self.find(id, PackType::U32)?.map(|tag| tag.value as u32))
    }

    pub fn read_u64(&mut self, id: u32) -> Result<Option<u64>> {
        Ok(self.find(id, PackType::U64)?.map(|tag| tag.value))
    }

    pub fn read_str_id(&mut self, id: u32) -> Result<Option<u64>> {
        Ok(self.find(id, PackType::StrId)?.map(|tag| tag.value))
    }

    pub fn read_mode(&mut self, id: u32) -> Result<Option<u32>> {
        Ok(self.find(id, PackType::Mode)?.map(|tag| tag.value as u32))
    }

    pub fn read_time(&mut self, id: u32) -> Result<Option<i64>> {
        Ok(self
            .find(id, PackType::Time)?
            .map(|tag| zigzag_decode(tag.value)))
    }

    pub fn read_str(&mut self, id: u32) -> Result<Option<String>> {
        match self.find(id, PackType::Str)? {
            Some(tag) if tag.value != 0 => {
                let bytes = self.read_sized()?;
                Ok(Some(String::from_utf8(bytes.to_vec())?))
            }
            Some(_) => Ok(Some(String::new())),
            None => Ok(None),
        }
    }

    pub fn read_bin(&mut self, id: u32) -> Result<Option<Vec<u8>>> {
        match self.find(id, PackType::Bin)? {
            Some(tag) if tag.value != 0 => Ok(Some(self.read_sized()?.to_vec())),
            Some(_) => Ok(Some(Vec::new())),
            None => Ok(None),
        }
    }

    pub fn read_pack(&mut self, id: u32) -> Result<Option<&'a [u8]>> {
        match self.find(id, PackType::Pack)? {
            Some(_) => Ok(Some(self.read_sized()?)),
            None => Ok(None),
        }
    }

    /// Enters the array/object at `id`; subsequent reads address fields of
    /// the nested container until the matching `end()`.
    pub fn array_begin(&mut self, id: u32) -> Result<bool> {
        let found = self.find(id, PackType::Array)?.is_some();
        if found {
            self.stack.push(Frame::new());
        }
        Ok(found)
    }

    pub fn obj_begin(&mut self, id: u32) -> Result<bool> {
        let found = self.find(id, PackType::Obj)?.is_some();
        if found {
            self.stack.push(Frame::new());
        }
        Ok(found)
    }

    /// Consumes the rest of the current container up to and including its
    /// terminator byte, then pops back to the parent's id-tracking frame.
    /// Safe to call even if the container hasn't been fully read yet.
    pub fn end(&mut self) -> Result<()> {
        loop {
            let save_pos = self.pos;
            match self.read_tag_next()? {
                None => break,
                Some(tag) => {
                    let _ = save_pos;
                    self.skip_payload(&tag)?;
                }
            }
        }
        if self.stack.len() > 1 {
            self.stack.pop();
        }
        Ok(())
    }

    pub fn is_eof(&self) -> bool {
        self.pos >= self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::PackWriter;

    #[test]
    fn sparse_fields_round_trip_with_id_gap() {
        let mut w = PackWriter::new();
        w.write_u64(1, 1);
        for _ in 2..=10 {
            w.write_null();
        }
        w.write_u64(11, 1);
        let buf = w.end();

        let mut r = PackReader::new(&buf);
        assert_eq!(r.read_u64(1).unwrap(), Some(1));
        for id in 2..=10 {
            assert_eq!(r.read_u64(id).unwrap(), None);
        }
        assert_eq!(r.read_u64(11).unwrap(), Some(1));
    }

    #[test]
    fn string_field_with_gap_round_trips() {
        let mut w = PackWriter::new();
        for _ in 1..=37 {
            w.write_null();
        }
        w.write_str(38, "sample");
        let buf = w.end();

        let mut r = PackReader::new(&buf);
        for id in 1..=37 {
            assert_eq!(r.read_str(id).unwrap(), None);
        }
        assert_eq!(r.read_str(38).unwrap(), Some("sample".to_string()));
    }

    #[test]
    fn nested_object_and_array_round_trip() {
        let mut w = PackWriter::new();
        w.write_u64(1, 7);
        w.obj_begin(2);
        w.write_str(1, "inner");
        w.write_bool(2, true, false);
        w.obj_end();
        w.array_begin(3);
        w.write_u64(1, 10);
        w.write_u64(2, 20);
        w.array_end();
        let buf = w.end();

        let mut r = PackReader::new(&buf);
        assert_eq!(r.read_u64(1).unwrap(), Some(7));
        assert!(r.obj_begin(2).unwrap());
        assert_eq!(r.read_str(1).unwrap(), Some("inner".to_string()));
        assert!(r.read_bool(2, false).unwrap());
        r.end().unwrap();
        assert!(r.array_begin(3).unwrap());
        assert_eq!(r.read_u64(1).unwrap(), Some(10));
        assert_eq!(r.read_u64(2).unwrap(), Some(20));
        r.end().unwrap();
    }

    #[test]
    fn skipping_unread_fields_still_finds_later_field() {
        let mut w = PackWriter::new();
        w.write_str(1, "a");
        w.write_u64(2, 42);
        w.write_str(3, "c");
        let buf = w.end();

        let mut r = PackReader::new(&buf);
        // ask for field 3 without reading 1 and 2 first
        assert_eq!(r.read_str(3).unwrap(), Some("c".to_string()));
    }

    #[test]
    fn defaulted_bool_is_omitted_on_write() {
        let mut w = PackWriter::new();
        w.write_bool(1, false, false);
        w.write_u64(2, 5);
        let buf = w.end();

        let mut r = PackReader::new(&buf);
        assert!(!r.read_bool(1, false).unwrap());
        assert_eq!(r.read_u64(2).unwrap(), Some(5));
    }
}
