//! Type-map code assignments (§4.3) and the three tag shapes they fall into.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum PackType {
    Array = 1,
    Bool = 2,
    I32 = 3,
    I64 = 4,
    Obj = 5,
    Str = 7,
    U32 = 8,
    U64 = 9,
    StrId = 10,
    Time = 15,
    Bin = 16,
    Pack = 17,
    Mode = 18,
}

impl PackType {
    pub fn from_code(code: u64) -> anyhow::Result<Self> {
        Ok(match code {
            1 => PackType::Array,
            2 => PackType::Bool,
            3 => PackType::I32,
            4 => PackType::I64,
            5 => PackType::Obj,
            7 => PackType::Str,
            8 => PackType::U32,
            9 => PackType::U64,
            10 => PackType::StrId,
            15 => PackType::Time,
            16 => PackType::Bin,
            17 => PackType::Pack,
            18 => PackType::Mode,
            other => anyhow::bail!("format error: invalid pack tag type {other}"),
        })
    }

    pub fn code(self) -> u64 {
        self as u64
    }

    /// Integer class: the value may need more than one bit, so the tag
    /// records only whether it overflows into a following varint.
    pub fn value_multi_bit(self) -> bool {
        matches!(
            self,
            PackType::I32
                | PackType::I64
                | PackType::U32
                | PackType::U64
                | PackType::StrId
                | PackType::Time
                | PackType::Mode
        )
    }

    /// Single-bit-value class: booleans (the value itself) and strings/bin
    /// (whether any bytes follow at all).
    pub fn value_single_bit(self) -> bool {
        matches!(self, PackType::Bool | PackType::Str | PackType::Bin)
    }

    /// Container class: arrays, objects, and nested packs carry no value
    /// bits in the tag itself.
    pub fn is_container(self) -> bool {
        !self.value_multi_bit() && !self.value_single_bit()
    }

    /// Does this type carry a size varint (string/binary length, or nested
    /// pack length) immediately after the tag (and id-delta overflow, if
    /// any)?
    pub fn has_size(self) -> bool {
        matches!(self, PackType::Str | PackType::Bin | PackType::Pack)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum TagClass {
    IntegerMultiBit,
    SingleBit,
    Container,
}

impl PackType {
    pub(crate) fn class(self) -> TagClass {
        if self.value_multi_bit() {
            TagClass::IntegerMultiBit
        } else if self.value_single_bit() {
            TagClass::SingleBit
        } else {
            TagClass::Container
        }
    }
}
