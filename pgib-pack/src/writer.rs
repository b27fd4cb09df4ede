use crate::types::{PackType, TagClass};
use crate::varint::{write_varint, zigzag_encode};

struct Frame {
    id_last: u32,
    null_total: u32,
}

impl Frame {
    fn new() -> Self {
        Self {
            id_last: 0,
            null_total: 0,
        }
    }
}

/// Writer side of the pack codec (§4.3). Fields must be written with
/// strictly increasing ids; `write_null` (or simply skipping an id) leaves a
/// gap that the matching reader call interprets as NULL.
pub struct PackWriter {
    buf: Vec<u8>,
    stack: Vec<Frame>,
}

impl Default for PackWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl PackWriter {
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            stack: vec![Frame::new()],
        }
    }

    fn top(&mut self) -> &mut Frame {
        self.stack.last_mut().expect("pack writer stack underflow")
    }

    /// Skip the next field id, to be read back as NULL.
    pub fn write_null(&mut self) {
        self.top().null_total += 1;
    }

    /// `id == 0` means "one past whatever was last written, including any
    /// pending NULLs" - the common case when every field is always present.
    fn write_tag(&mut self, pack_type: PackType, id: u32, value: u64) {
        let id = if id == 0 {
            self.top().id_last + self.top().null_total + 1
        } else {
            assert!(
                id > self.top().id_last,
                "field id must be greater than last id"
            );
            id
        };
        self.top().null_total = 0;

        let mut tag_id = id - self.top().id_last - 1;
        let code = pack_type.code();
        let mut tag: u8 = if code >= 0xF { 0xF0 } else { (code << 4) as u8 };
        let mut value = value;

        match pack_type.class() {
            TagClass::IntegerMultiBit => {
                if value < 2 {
                    tag |= ((value & 0x1) << 2) as u8;
                    value >>= 1;
                    tag |= (tag_id & 0x1) as u8;
                    tag_id >>= 1;
                    if tag_id > 0 {
                        tag |= 0x2;
                    }
                } else {
                    tag |= 0x8;
                    tag |= (tag_id & 0x3) as u8;
                    tag_id >>= 2;
                    if tag_id > 0 {
                        tag |= 0x4;
                    }
                }
            }
            TagClass::SingleBit => {
                tag |= ((value & 0x1) << 3) as u8;
                value >>= 1;
                tag |= (tag_id & 0x3) as u8;
                tag_id >>= 2;
                if tag_id > 0 {
                    tag |= 0x4;
                }
            }
            TagClass::Container => {
                debug_assert_eq!(value, 0);
                tag |= (tag_id & 0x7) as u8;
                tag_id >>= 3;
                if tag_id > 0 {
                    tag |= 0x8;
                }
            }
        }

        self.buf.push(tag);
        if code >= 0xF {
            write_varint(code - 0xF, &mut self.buf);
        }
        if tag_id > 0 {
            write_varint(tag_id as u64, &mut self.buf);
        }
        if value > 0 {
            write_varint(value, &mut self.buf);
        }

        self.top().id_last = id;
    }

    fn write_sized(&mut self, pack_type: PackType, id: u32, bytes: &[u8]) {
        let has_data = !bytes.is_empty();
        self.write_tag(pack_type, id, has_data as u64);
        if has_data {
            write_varint(bytes.len() as u64, &mut self.buf);
            self.buf.extend_from_slice(bytes);
        }
    }

    pub fn write_bool(&mut self, id: u32, value: bool, default: bool) {
        if value == default {
            self.write_null();
        } else {
            self.write_tag(PackType::Bool, id, value as u64);
        }
    }

    pub fn write_i32(&mut self, id: u32, value: i32) {
        self.write_tag(PackType::I32, id, zigzag_encode(value as i64));
    }

    pub fn write_i64(&mut self, id: u32, value: i64) {
        self.write_tag(PackType::I64, id, zigzag_encode(value));
    }

    pub fn write_u32(&mut self, id: u32, value: u32) {
        self.write_tag(PackType::U32, id, value as u64);
    }

    pub fn write_u64(&mut self, id: u32, value: u64) {
        self.write_tag(PackType::U64, id, value);
    }

    pub fn write_str_id(&mut self, id: u32, value: u64) {
        self.write_tag(PackType::StrId, id, value);
    }

    pub fn write_mode(&mut self, id: u32, value: u32) {
        self.write_tag(PackType::Mode, id, value as u64);
    }

    pub fn write_time(&mut self, id: u32, value: i64) {
        self.write_tag(PackType::Time, id, zigzag_encode(value));
    }

    pub fn write_str(&mut self, id: u32, value: &str) {
        self.write_sized(PackType::Str, id, value.as_bytes());
    }

    pub fn write_bin(&mut self, id: u32, value: &[u8]) {
        self.write_sized(PackType::Bin, id, value);
    }

    /// Embeds an already-terminated pack blob (its own `end()` result) as a
    /// nested `Pack` field.
    pub fn write_pack(&mut self, id: u32, nested: &[u8]) {
        self.write_tag(PackType::Pack, id, 0);
        write_varint(nested.len() as u64, &mut self.buf);
        self.buf.extend_from_slice(nested);
    }

    pub fn array_begin(&mut self, id: u32) {
        self.write_tag(PackType::Array, id, 0);
        self.stack.push(Frame::new());
    }

    pub fn array_end(&mut self) {
        self.stack.pop();
        self.buf.push(0);
    }

    pub fn obj_begin(&mut self, id: u32) {
        self.write_tag(PackType::Obj, id, 0);
        self.stack.push(Frame::new());
    }

    pub fn obj_end(&mut self) {
        self.stack.pop();
        self.buf.push(0);
    }

    /// Writes the terminator for the top-level container and returns the
    /// finished buffer.
    pub fn end(mut self) -> Vec<u8> {
        self.buf.push(0);
        self.buf
    }
}
